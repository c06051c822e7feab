//! # rainfall-indices
//!
//! A Rust library for turning multi-model, multi-scenario NetCDF precipitation grids
//! into per-city annual climate indices.
//!
//! ## Features
//!
//! - **Coordinate resolution**: Snaps each city to the nearest grid cell that holds data
//! - **Series extraction**: Daily series per (model, scenario, city) with calendar dates
//! - **Climate indices**: PRCPTOT, R95p, RX1day, RX5day, SDII, R20mm, CDD, CWD and the
//!   Walsh & Lawler seasonality index, per year
//! - **Resumable runs**: Per (model, scenario) recovery snapshots written atomically
//! - **Exports**: Consolidated Parquet table, per-combination CSV or Netuno files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rainfall_indices::{run_consolidation, input::RunConfig};
//!
//! // Load configuration from a YAML file
//! let config = RunConfig::from_file("run.yaml")?;
//!
//! // Run every combination, ignoring progress notifications
//! let summary = run_consolidation(&config, &mut |_| {})?;
//! println!("{} combinations processed", summary.state.processed);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! coordinates_path: cities.json
//! source_dir: grids
//! models: [MIROC6, KACE]
//! outputs:
//!   parquet: true
//! recovery:
//!   keep_temp_files: false
//! ```

pub mod cli;
pub mod consolidate;
pub mod error;
pub mod extract;
pub mod grid;
pub mod indices;
pub mod info;
pub mod input;
pub mod log;
pub mod output;
pub mod recovery;
pub mod resolve;

#[cfg(test)]
mod cli_tests;

use crate::consolidate::{Consolidator, PipelineState};
use crate::error::PipelineResult;
use crate::grid::{find_smallest_grid_file, open_netcdf};
use crate::indices::empty_indices_frame;
use crate::input::{ResolvedCoordinates, RunConfig, read_raw_coordinates};
use crate::output::{export_consolidated_parquet, write_coordinates_json};
use crate::resolve::resolve_cities;
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Outcome of a consolidation run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: PipelineState,
    /// Consolidated Parquet table, when requested
    pub parquet_path: Option<PathBuf>,
}

/// Runs the consolidation pipeline described by `config`.
///
/// This function orchestrates the whole run:
/// 1. Validates the configuration
/// 2. Reads the resolved coordinates
/// 3. Streams every (model, scenario, city) combination, replaying recovery snapshots
/// 4. Writes the consolidated indices table when Parquet output is requested,
///    otherwise only extracts (and exports) the series
/// 5. Removes the recovery files unless they are kept
///
/// `on_progress` is called after every successful combination.
///
/// # Errors
///
/// This function will return an error if:
/// - The coordinates file or the source directory do not exist
/// - The coordinates file is malformed
/// - The consolidated table cannot be built or written
pub fn run_consolidation(
    config: &RunConfig,
    on_progress: &mut dyn FnMut(&PipelineState),
) -> PipelineResult<RunSummary> {
    config.validate()?;
    let mut consolidator = Consolidator::from_config(config)?;

    let parquet_path = if config.outputs.parquet {
        let mut consolidated: Option<DataFrame> = None;
        let mut stream = consolidator.precipitation_indices();
        while let Some(frame) = stream.next() {
            let frame = frame?;
            match consolidated.as_mut() {
                Some(df) => {
                    df.vstack_mut(&frame)?;
                }
                None => consolidated = Some(frame),
            }
            on_progress(stream.state());
        }
        on_progress(stream.state());

        let mut df = match consolidated {
            Some(df) => df,
            None => empty_indices_frame()?,
        };
        Some(export_consolidated_parquet(&mut df, &config.output_parent())?)
    } else {
        let mut stream = consolidator.precipitation_series();
        while stream.next().is_some() {
            on_progress(stream.state());
        }
        on_progress(stream.state());
        None
    };

    consolidator.clear_temp_files()?;

    Ok(RunSummary {
        state: consolidator.state().clone(),
        parquet_path,
    })
}

/// Resolves a raw coordinates CSV against the smallest grid of `source_dir` and
/// writes the result as JSON.
///
/// The JSON is written to `output`, or next to the CSV with a `.json` extension.
/// Returns the JSON path and the resolved coordinates.
pub fn run_resolution(
    raw_coordinates: &Path,
    source_dir: &Path,
    variable: &str,
    output: Option<&Path>,
) -> PipelineResult<(PathBuf, ResolvedCoordinates)> {
    let cities = read_raw_coordinates(raw_coordinates)?;
    let reference = find_smallest_grid_file(source_dir)?;
    ::log::info!(
        "Using '{}' as reference grid for coordinate resolution",
        reference.display()
    );

    let grid = open_netcdf(&reference, variable)?;
    let resolved = resolve_cities(&grid, &cities)?;

    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cli::resolved_coordinates_path(raw_coordinates));
    write_coordinates_json(&resolved, &path)?;
    Ok((path, resolved))
}
