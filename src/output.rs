//! # Output Module
//!
//! This module writes the products of a run: the consolidated indices table, the
//! per-combination precipitation series and the resolved coordinates file.
//!
//! ## Features
//!
//! - **Parquet**: `<YYYY-MM-DDTHH-MM>-consolidated.parquet`, LZ4 compressed
//! - **CSV**: `<YYYY-MM-DDTHH-MM>-output/{city}_{model}_{scenario}.csv` with a
//!   `date,precipitation` header
//! - **Netuno**: `(Netuno){city}_{model}_{scenario}.csv`, precipitation only, no header
//! - **JSON**: pretty-printed resolved coordinates with sorted keys

use crate::error::PipelineResult;
use crate::extract::{PrecipitationSeries, SeriesMetadata};
use crate::input::{OutputOptions, ResolvedCoordinates};
use chrono::Local;
use log::{debug, info};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Timestamp layout prefixed to output names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M";

/// Current local time formatted with [`TIMESTAMP_FORMAT`].
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Writes a DataFrame to a Parquet file with LZ4 compression.
///
/// # Errors
///
/// This function will return an error if:
/// - The output path is not writable
/// - The DataFrame contains unsupported data types for Parquet
pub fn write_dataframe_to_parquet(df: &mut DataFrame, output_path: &Path) -> PipelineResult<()> {
    debug!("Writing DataFrame to parquet file: {}", output_path.display());
    debug!("DataFrame shape: {:?}", df.shape());
    debug!("DataFrame schema:\n{:?}", df.schema());
    debug!("First few rows:\n{}", df.head(Some(5)));

    let file = File::create(output_path)?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Lz4Raw)
        .finish(df)?;

    debug!("Successfully wrote parquet file: {}", output_path.display());
    Ok(())
}

/// Writes the consolidated indices table to
/// `<output_parent>/<timestamp>-consolidated.parquet` and returns its path.
pub fn export_consolidated_parquet(df: &mut DataFrame, output_parent: &Path) -> PipelineResult<PathBuf> {
    let path = output_parent.join(format!("{}-consolidated.parquet", timestamp()));
    write_dataframe_to_parquet(df, &path)?;
    info!(
        "Saved consolidated dataset with {} rows at '{}'",
        df.height(),
        path.display()
    );
    Ok(path)
}

/// Receives every successfully extracted series while the run progresses.
pub trait SeriesExporter {
    /// Writes one series and returns the path written.
    fn export(&mut self, series: &PrecipitationSeries, metadata: &SeriesMetadata) -> PipelineResult<PathBuf>;
}

fn ensure_directory(directory: &Path) -> PipelineResult<()> {
    if !directory.is_dir() {
        fs::create_dir_all(directory)?;
        debug!("Created output directory at '{}'", directory.display());
    }
    Ok(())
}

fn write_csv(df: &mut DataFrame, path: &Path, include_header: bool) -> PipelineResult<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(include_header)
        .finish(df)?;
    Ok(())
}

/// Directory holding the per-combination series of one run.
pub fn series_output_directory(output_parent: &Path) -> PathBuf {
    output_parent.join(format!("{}-output", timestamp()))
}

/// Writes `date,precipitation` CSV files, one per combination.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    directory: PathBuf,
}

impl CsvExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        CsvExporter {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_path(&self, metadata: &SeriesMetadata) -> PathBuf {
        self.directory.join(format!(
            "{}_{}_{}.csv",
            metadata.city, metadata.model, metadata.scenario
        ))
    }
}

impl SeriesExporter for CsvExporter {
    fn export(&mut self, series: &PrecipitationSeries, metadata: &SeriesMetadata) -> PipelineResult<PathBuf> {
        ensure_directory(&self.directory)?;
        let path = self.file_path(metadata);
        let mut df = series.to_dataframe()?;
        write_csv(&mut df, &path, true)?;
        debug!("Saved CSV file at '{}'", path.display());
        Ok(path)
    }
}

/// Writes header-less, precipitation-only CSV files for the Netuno model.
#[derive(Debug, Clone)]
pub struct NetunoExporter {
    directory: PathBuf,
}

impl NetunoExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        NetunoExporter {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_path(&self, metadata: &SeriesMetadata) -> PathBuf {
        self.directory.join(format!(
            "(Netuno){}_{}_{}.csv",
            metadata.city, metadata.model, metadata.scenario
        ))
    }
}

impl SeriesExporter for NetunoExporter {
    fn export(&mut self, series: &PrecipitationSeries, metadata: &SeriesMetadata) -> PipelineResult<PathBuf> {
        ensure_directory(&self.directory)?;
        let path = self.file_path(metadata);
        let values: Vec<f64> = series.values().collect();
        let mut df = DataFrame::new(vec![Series::new("precipitation".into(), values).into()])?;
        write_csv(&mut df, &path, false)?;
        debug!("Saved Netuno CSV file at '{}'", path.display());
        Ok(path)
    }
}

/// Picks the series exporter requested by the output options, if any.
///
/// Netuno takes precedence over plain CSV when both are requested.
pub fn series_exporter(options: &OutputOptions, output_parent: &Path) -> Option<Box<dyn SeriesExporter>> {
    if options.netuno {
        Some(Box::new(NetunoExporter::new(series_output_directory(output_parent))))
    } else if options.csv {
        Some(Box::new(CsvExporter::new(series_output_directory(output_parent))))
    } else {
        None
    }
}

/// Writes resolved coordinates as pretty JSON with keys sorted at every level.
pub fn write_coordinates_json(coordinates: &ResolvedCoordinates, path: &Path) -> PipelineResult<()> {
    let value = serde_json::to_value(coordinates)?;
    fs::write(path, serde_json::to_string_pretty(&value)?)?;
    info!(
        "Saved coordinates for {} cities at '{}'",
        coordinates.len(),
        path.display()
    );
    Ok(())
}
