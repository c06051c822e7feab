//! # CLI Module
//!
//! This module provides the command-line interface for rainfall-indices, including:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the RAINFALL_ prefix
//! - Merging of configuration file values with command-line overrides
//! - Log level selection from the verbosity flags

use crate::error::{PipelineError, PipelineResult};
use crate::input::{RunConfig, ScenarioConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Annual precipitation indices from multi-model climate grids
#[derive(Parser, Debug)]
#[command(name = "rainfall-indices")]
#[command(about = "Compute annual precipitation indices per city from NetCDF climate grids")]
#[command(version)]
#[command(long_about = "
rainfall-indices extracts daily precipitation series for a set of cities from
one NetCDF grid per (climate model, scenario) and computes nine annual climate
indices (PRCPTOT, R95p, RX1day, RX5day, SDII, R20mm, CDD, CWD, Seasonality Index).

FEATURES:
  • Nearest-valid-cell resolution of city coordinates
  • Resumable runs through per (model, scenario) recovery files
  • Parquet, CSV and Netuno exports
  • Configuration files: JSON and YAML format support with templates
  • Shell completions: Auto-completion for bash, zsh, fish, and PowerShell

EXAMPLES:
  # Resolve raw city coordinates against the grids
  rainfall-indices resolve cities.csv grids/

  # Consolidate indices into a Parquet file
  rainfall-indices consolidate cities.json grids/ --to-parquet

  # Resolve and consolidate in one go, also writing per-city CSV files
  rainfall-indices consolidate cities.csv grids/ -r -p -c

  # Using config file
  rainfall-indices --config run.yaml consolidate

  # Inspect a grid file
  rainfall-indices inspect grids/MIROC6-pr-hist.nc
")]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Reduce logging: -q shows warnings and errors, -qq only errors
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Configuration file path (JSON or YAML)
    #[arg(long, global = true, env = "RAINFALL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract series and compute annual indices for every combination
    #[command(long_about = "
Extract the precipitation series of every (model, scenario, city) combination
and compute its annual indices.

Progress is checkpointed after each (model, scenario) pair in a 'temp'
directory next to the grid directory. Re-running the same command after an
interruption resumes from the last checkpoint.

EXAMPLES:
  # Consolidated Parquet table
  rainfall-indices consolidate cities.json grids/ -p

  # Only per-city CSV series, no indices
  rainfall-indices consolidate cities.json grids/ -c

  # Restrict to two models and keep the recovery files
  rainfall-indices consolidate cities.json grids/ -p --models MIROC6,KACE -k
")]
    Consolidate(ConsolidateArgs),

    /// Resolve raw city coordinates to the nearest grid cells with data
    #[command(long_about = "
Resolve the coordinates of a raw CSV table (IBGE code, name, latitude,
longitude) to the nearest grid cell holding data, using the smallest NetCDF
file of the source directory as reference.

The result is written as JSON next to the CSV file unless --output is given.

EXAMPLES:
  rainfall-indices resolve cities.csv grids/
  rainfall-indices resolve cities.csv grids/ -o resolved.json
")]
    Resolve {
        /// Raw coordinates CSV file
        #[arg(value_name = "COORDINATES", env = "RAINFALL_RAW_COORDINATES")]
        coordinates: PathBuf,

        /// Directory containing the NetCDF grids
        #[arg(value_name = "SOURCE_DIR", env = "RAINFALL_SOURCE_DIR")]
        source_dir: PathBuf,

        /// Output JSON path (default: CSV path with a .json extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Precipitation variable name inside the reference grid
        #[arg(long, default_value = "pr", env = "RAINFALL_VARIABLE")]
        variable: String,
    },

    /// Show information about a grid file
    #[command(long_about = "
Inspect a NetCDF grid and display its dimensions, variables, axis ranges,
covered dates and the number of cells holding data.

EXAMPLES:
  rainfall-indices inspect grids/MIROC6-pr-hist.nc
  rainfall-indices inspect grids/MIROC6-pr-hist.nc --format json
")]
    Inspect {
        /// NetCDF file path
        file: PathBuf,

        /// Precipitation variable name
        #[arg(short = 'n', long, default_value = "pr")]
        variable: String,

        /// Output format for file information
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Generate a configuration template
    #[command(long_about = "
Generate a run configuration template with the built-in model and scenario
catalogues, in JSON or YAML.

EXAMPLES:
  rainfall-indices template --format yaml -o run.yaml
")]
    Template {
        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for various shells.

INSTALLATION:
  # Bash (add to ~/.bashrc or /etc/bash_completion.d/)
  rainfall-indices completions bash > ~/.bash_completion.d/rainfall-indices

  # Zsh (add to ~/.zshrc or fpath)
  rainfall-indices completions zsh > ~/.zsh/completions/_rainfall-indices

  # Fish (save to completions directory)
  rainfall-indices completions fish > ~/.config/fish/completions/rainfall-indices.fish
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Arguments of the `consolidate` subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct ConsolidateArgs {
    /// Coordinates file (resolved JSON, or raw CSV with --raw-coordinates)
    #[arg(value_name = "COORDINATES", env = "RAINFALL_COORDINATES")]
    pub coordinates: Option<PathBuf>,

    /// Directory containing the NetCDF grids
    #[arg(value_name = "SOURCE_DIR", env = "RAINFALL_SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    /// Write the consolidated indices table as Parquet
    #[arg(short = 'p', long, env = "RAINFALL_TO_PARQUET")]
    pub to_parquet: bool,

    /// Write one CSV series per combination
    #[arg(short = 'c', long, env = "RAINFALL_TO_CSV")]
    pub to_csv: bool,

    /// Write one Netuno-formatted CSV series per combination (overrides --to-csv)
    #[arg(short = 'n', long, env = "RAINFALL_TO_NETUNO")]
    pub to_netuno: bool,

    /// Only resolve the raw CSV coordinates file into a JSON next to it, without
    /// consolidating. Overrides --to-parquet, --to-csv and --to-netuno
    #[arg(short = 'r', long)]
    pub raw_coordinates: bool,

    /// Keep the recovery files after a completed run
    #[arg(short = 'k', long, env = "RAINFALL_KEEP_TEMP")]
    pub keep_temp: bool,

    /// Do not create or read recovery files
    #[arg(long, env = "RAINFALL_NO_RECOVERY")]
    pub no_recovery: bool,

    /// Climate models to process (comma separated)
    #[arg(long, value_delimiter = ',', env = "RAINFALL_MODELS")]
    pub models: Vec<String>,

    /// Scenario names to process (comma separated)
    #[arg(long, value_delimiter = ',', env = "RAINFALL_SCENARIOS")]
    pub scenarios: Vec<String>,

    /// Precipitation variable name inside the grids
    #[arg(long, env = "RAINFALL_VARIABLE")]
    pub variable: Option<String>,

    /// Keep only the days inside each scenario's period
    #[arg(long)]
    pub restrict_to_period: bool,

    /// Validate the configuration without processing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

/// Log level selected by the verbosity flags, `None` when neither flag is given.
///
/// `--verbose` wins over `--quiet`.
pub fn log_level(verbose: bool, quiet: u8) -> Option<LevelFilter> {
    match (verbose, quiet) {
        (true, _) => Some(LevelFilter::Debug),
        (false, 0) => None,
        (false, 1) => Some(LevelFilter::Warn),
        (false, _) => Some(LevelFilter::Error),
    }
}

/// Keeps the scenarios whose names are listed, in the order given.
fn select_scenarios(available: &[ScenarioConfig], names: &[String]) -> PipelineResult<Vec<ScenarioConfig>> {
    names
        .iter()
        .map(|name| {
            available
                .iter()
                .find(|s| &s.name == name)
                .cloned()
                .ok_or_else(|| PipelineError::InvalidClimateScenario(name.clone()))
        })
        .collect()
}

/// Builds the run configuration of a `consolidate` invocation.
///
/// Values come from the configuration file when one is given, and command-line
/// arguments (or their RAINFALL_ environment variables) override them. Without a
/// configuration file both positional paths are required.
pub fn build_run_config(config_path: Option<&Path>, args: &ConsolidateArgs) -> PipelineResult<RunConfig> {
    let mut config = match config_path {
        Some(path) => RunConfig::from_file(path)?,
        None => match (&args.coordinates, &args.source_dir) {
            (Some(coordinates), Some(source_dir)) => RunConfig::new(coordinates, source_dir),
            _ => {
                return Err(PipelineError::Config(
                    "coordinates file and source directory are required without --config"
                        .to_string(),
                ));
            }
        },
    };

    if let Some(coordinates) = &args.coordinates {
        config.coordinates_path = coordinates.clone();
    }
    if let Some(source_dir) = &args.source_dir {
        config.source_dir = source_dir.clone();
    }
    if let Some(variable) = &args.variable {
        config.variable_name = variable.clone();
    }
    if !args.models.is_empty() {
        config.models = args.models.clone();
    }
    if !args.scenarios.is_empty() {
        config.scenarios = select_scenarios(&config.scenarios, &args.scenarios)?;
    }

    config.outputs.parquet |= args.to_parquet;
    config.outputs.csv |= args.to_csv;
    config.outputs.netuno |= args.to_netuno;
    config.recovery.keep_temp_files |= args.keep_temp;
    if args.no_recovery {
        config.recovery.enabled = false;
    }
    config.restrict_to_period |= args.restrict_to_period;

    Ok(config)
}

/// Default path of the resolved coordinates JSON for a raw CSV table.
pub fn resolved_coordinates_path(raw_path: &Path) -> PathBuf {
    raw_path.with_extension("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Global mutex to ensure environment variable tests run sequentially
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn args(coordinates: &str, source_dir: &str) -> ConsolidateArgs {
        ConsolidateArgs {
            coordinates: Some(PathBuf::from(coordinates)),
            source_dir: Some(PathBuf::from(source_dir)),
            ..Default::default()
        }
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(false, 0), None);
        assert_eq!(log_level(true, 0), Some(LevelFilter::Debug));
        assert_eq!(log_level(false, 1), Some(LevelFilter::Warn));
        assert_eq!(log_level(false, 2), Some(LevelFilter::Error));
        assert_eq!(log_level(false, 5), Some(LevelFilter::Error));
        assert_eq!(log_level(true, 2), Some(LevelFilter::Debug)); // verbose wins
    }

    #[test]
    fn test_build_run_config_from_arguments() {
        let mut consolidate = args("cities.json", "grids");
        consolidate.to_parquet = true;
        consolidate.keep_temp = true;

        let config = build_run_config(None, &consolidate).unwrap();
        assert_eq!(config.coordinates_path, PathBuf::from("cities.json"));
        assert_eq!(config.source_dir, PathBuf::from("grids"));
        assert_eq!(config.models.len(), 19);
        assert_eq!(config.scenarios.len(), 3);
        assert!(config.outputs.parquet);
        assert!(!config.outputs.csv);
        assert!(config.recovery.enabled);
        assert!(config.recovery.keep_temp_files);
    }

    #[test]
    fn test_build_run_config_requires_paths() {
        let consolidate = ConsolidateArgs {
            coordinates: Some(PathBuf::from("cities.json")),
            ..Default::default()
        };
        let result = build_run_config(None, &consolidate);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_build_run_config_selects_scenarios_and_models() {
        let mut consolidate = args("cities.json", "grids");
        consolidate.scenarios = vec!["SSP585".to_string(), "Histórico".to_string()];
        consolidate.models = vec!["MIROC6".to_string()];
        consolidate.no_recovery = true;

        let config = build_run_config(None, &consolidate).unwrap();
        let names: Vec<&str> = config.scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["SSP585", "Histórico"]);
        assert_eq!(config.models, vec!["MIROC6".to_string()]);
        assert!(!config.recovery.enabled);
    }

    #[test]
    fn test_build_run_config_rejects_unknown_scenario() {
        let mut consolidate = args("cities.json", "grids");
        consolidate.scenarios = vec!["SSP126".to_string()];

        match build_run_config(None, &consolidate) {
            Err(PipelineError::InvalidClimateScenario(name)) => assert_eq!(name, "SSP126"),
            other => panic!("Expected InvalidClimateScenario, got {:?}", other),
        }
    }

    #[test]
    fn test_build_run_config_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(
            &path,
            "coordinates_path: from_file.json\nsource_dir: file_grids\nmodels: [KACE]\noutputs:\n  csv: true\n",
        )
        .unwrap();

        let consolidate = ConsolidateArgs {
            source_dir: Some(PathBuf::from("cli_grids")),
            to_parquet: true,
            ..Default::default()
        };
        let config = build_run_config(Some(&path), &consolidate).unwrap();
        assert_eq!(config.coordinates_path, PathBuf::from("from_file.json"));
        assert_eq!(config.source_dir, PathBuf::from("cli_grids"));
        assert_eq!(config.models, vec!["KACE".to_string()]);
        assert!(config.outputs.csv);
        assert!(config.outputs.parquet);
    }

    #[test]
    fn test_resolved_coordinates_path() {
        assert_eq!(
            resolved_coordinates_path(Path::new("data/cities.csv")),
            PathBuf::from("data/cities.json")
        );
    }

    #[test]
    fn test_environment_variable_arguments() {
        // Acquire mutex to ensure exclusive access to environment variables
        let _guard = ENV_TEST_MUTEX.lock().unwrap();

        use std::env;

        let original_models = env::var("RAINFALL_MODELS").ok();
        let original_source = env::var("RAINFALL_SOURCE_DIR").ok();

        unsafe {
            env::set_var("RAINFALL_MODELS", "MIROC6,KACE");
            env::set_var("RAINFALL_SOURCE_DIR", "env_grids");
        }

        let cli = Cli::try_parse_from(["rainfall-indices", "consolidate", "cities.json"]).unwrap();
        if let Commands::Consolidate(consolidate) = &cli.command {
            assert_eq!(consolidate.models, vec!["MIROC6".to_string(), "KACE".to_string()]);
            assert_eq!(consolidate.source_dir, Some(PathBuf::from("env_grids")));
        } else {
            panic!("Expected Consolidate command");
        }

        // Cleanup and restore original state
        unsafe {
            env::remove_var("RAINFALL_MODELS");
            env::remove_var("RAINFALL_SOURCE_DIR");
            if let Some(ref val) = original_models {
                env::set_var("RAINFALL_MODELS", val);
            }
            if let Some(ref val) = original_source {
                env::set_var("RAINFALL_SOURCE_DIR", val);
            }
        }
    }
}
