//! # Error Types
//!
//! Every fallible operation in the library returns [`PipelineResult`]. The variants
//! mirror the failure classes of the pipeline: resolution failures, extraction
//! failures, missing grid files and malformed inputs, plus wrapped errors from the
//! I/O, NetCDF, Polars and serde layers.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving, extracting or consolidating rainfall data
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(
        "No valid precipitation data around grid indices ({latitude_index}, {longitude_index}) \
         within a maximum index offset of {max_offset}"
    )]
    CoordinateSearchExhausted {
        latitude_index: usize,
        longitude_index: usize,
        max_offset: usize,
    },

    #[error("No matching coordinates for ({latitude}, {longitude})")]
    InvalidTargetCoordinates { latitude: f64, longitude: f64 },

    #[error(
        "Coordinates for '{city}' not in the expected key path ('nearest'->'lat' and \
         'nearest'->'lon'). Actual data: {details}"
    )]
    CoordinatesNotAvailable { city: String, details: String },

    #[error("No grid file at '{}'", .0.display())]
    MissingGridFile(PathBuf),

    #[error("Variable '{variable}' not found in '{}'", .path.display())]
    MissingVariable { variable: String, path: PathBuf },

    #[error("Invalid grid shape: {0}")]
    GridShape(String),

    #[error("Unsupported time units '{0}', expected 'days since <date>'")]
    InvalidTimeUnits(String),

    #[error("No climate scenario matches the value '{0}'")]
    InvalidClimateScenario(String),

    #[error("Provided path '{}' is not a directory", .0.display())]
    InvalidSourceDirectory(PathBuf),

    #[error("No coordinates file at '{}'", .0.display())]
    InvalidCoordinatesFile(PathBuf),

    #[error("Recovery snapshot error: {0}")]
    Snapshot(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
