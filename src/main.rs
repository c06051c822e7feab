use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use rainfall_indices::cli::{Cli, Commands, ConfigFormat, ConsolidateArgs, OutputFormat};
use rainfall_indices::cli::{build_run_config, log_level};
use rainfall_indices::info::{get_grid_info, print_grid_info_human, print_grid_info_json, print_grid_info_yaml};
use rainfall_indices::input::RunConfig;
use rainfall_indices::log::{config_echo, show_farewell_with_timing, show_greeting, show_state};
use rainfall_indices::{run_consolidation, run_resolution};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli);

    match &cli.command {
        Commands::Consolidate(args) => consolidate(&cli, args),
        Commands::Resolve {
            coordinates,
            source_dir,
            output,
            variable,
        } => {
            let (path, resolved) = run_resolution(coordinates, source_dir, variable, output.as_deref())
                .context("Coordinate resolution failed")?;
            log::info!(
                "Resolved {} cities, coordinates written to '{}'",
                resolved.len(),
                path.display()
            );
            Ok(())
        }
        Commands::Inspect {
            file,
            variable,
            format,
        } => {
            let info = get_grid_info(file, variable)?;
            match format.as_ref().unwrap_or(&cli.output_format) {
                OutputFormat::Human => print_grid_info_human(&info),
                OutputFormat::Json => print_grid_info_json(&info)?,
                OutputFormat::Yaml => print_grid_info_yaml(&info)?,
            }
            Ok(())
        }
        Commands::Template { output, format } => {
            let template = RunConfig::new("cities.json", "grids");
            let content = match format {
                ConfigFormat::Json => template.to_json()?,
                ConfigFormat::Yaml => template.to_yaml()?,
            };
            write_or_print(output.as_ref(), content.as_bytes())
        }
        Commands::Completions { shell, output } => {
            let mut command = Cli::command();
            let mut buffer = Vec::new();
            clap_complete::generate(*shell, &mut command, "rainfall-indices", &mut buffer);
            write_or_print(output.as_ref(), &buffer)
        }
    }
}

fn setup_logging(cli: &Cli) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = log_level(cli.verbose, cli.quiet) {
        builder.filter_level(level);
    }
    builder.format_timestamp_secs().init();
}

fn write_or_print(output: Option<&PathBuf>, content: &[u8]) -> Result<()> {
    match output {
        Some(path) => fs::write(path, content)
            .with_context(|| format!("Failed to write '{}'", path.display())),
        None => {
            std::io::stdout().write_all(content)?;
            Ok(())
        }
    }
}

fn progress_bar(total: usize, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    pb
}

fn consolidate(cli: &Cli, args: &ConsolidateArgs) -> Result<()> {
    let start_time = Instant::now();

    let source = cli
        .config
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "command-line arguments".to_string());
    show_greeting(&source);

    let config = build_run_config(cli.config.as_deref(), args)
        .context("Failed to build the run configuration")?;

    if args.raw_coordinates {
        let (path, resolved) = run_resolution(
            &config.coordinates_path,
            &config.source_dir,
            &config.variable_name,
            None,
        )
        .context("Coordinate resolution failed")?;
        log::info!(
            "Resolved {} cities, coordinates written to '{}'",
            resolved.len(),
            path.display()
        );
        show_farewell_with_timing(start_time.elapsed());
        return Ok(());
    }

    config_echo(&config);
    config.validate().context("Invalid run configuration")?;

    if args.dry_run {
        log::info!("Dry run: configuration is valid, nothing was processed");
        return Ok(());
    }

    let pb = progress_bar(0, cli.quiet > 0);
    let summary = run_consolidation(&config, &mut |state| {
        pb.set_length(state.total as u64);
        pb.set_position(state.processed as u64);
        pb.set_message(format!("{} error(s)", state.error));
    })
    .context("Consolidation failed")?;
    pb.finish_and_clear();

    show_state(&summary.state);
    if let Some(path) = &summary.parquet_path {
        log::info!("Consolidated indices written to '{}'", path.display());
    }
    show_farewell_with_timing(start_time.elapsed());
    Ok(())
}
