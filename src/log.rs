use crate::consolidate::PipelineState;
use crate::input::RunConfig;
use log::info;
use std::time::Duration;

pub fn show_greeting(source: &str) {
    info!("=== Rainfall Indices ===");
    info!("Loading configuration from: {}", source);
}

pub fn config_echo(config: &RunConfig) {
    info!("Configuration:");
    info!("  Coordinates: {}", config.coordinates_path.display());
    info!("  Source directory: {}", config.source_dir.display());
    info!("  Variable: {}", config.variable_name);
    info!("  Models: {}", config.models.join(", "));
    for scenario in &config.scenarios {
        info!(
            "  Scenario {} ({}): {} to {}, files '{}'",
            scenario.name,
            scenario.label,
            scenario.start_date,
            scenario.end_date,
            scenario.filename_template
        );
    }
    info!(
        "  Outputs: parquet={}, csv={}, netuno={}",
        config.outputs.parquet, config.outputs.csv, config.outputs.netuno
    );
    info!(
        "  Recovery: enabled={}, keep temporary files={}",
        config.recovery.enabled, config.recovery.keep_temp_files
    );
}

pub fn show_state(state: &PipelineState) {
    info!("Run summary:");
    info!("  Combinations: {}", state.total);
    info!("  Processed: {} ({:.2}%)", state.processed, state.process_rate);
    info!("  Succeeded: {} ({:.2}%)", state.success, state.success_rate);
    info!("  Errors: {}", state.error);
    info!("  Skipped: {}", state.skipped);
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    info!(
        "=== Completed successfully in {:.2}s ===",
        elapsed.as_secs_f64()
    );
}
