//! # Recovery Snapshots
//!
//! Checkpoints the cities already extracted for one (model, scenario) pair so an
//! interrupted run resumes where it stopped.
//!
//! Snapshots are Parquet files in long format, one row per `(city, date)`, stored in
//! a `temp` directory next to the grid directory:
//!
//! | Column          | Type    |
//! |-----------------|---------|
//! | `city`          | String  |
//! | `model`         | String  |
//! | `scenario`      | String  |
//! | `latitude`      | Float64 |
//! | `longitude`     | Float64 |
//! | `date`          | Int32, days since 1970-01-01 |
//! | `precipitation` | Float64 |
//!
//! Files are written to a temporary file in the same directory and renamed over the
//! final path, so readers never observe a partial snapshot.

use crate::error::{PipelineError, PipelineResult};
use crate::extract::{PrecipitationSeries, SeriesMetadata};
use crate::input::sibling_base;
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name of the recovery directory created next to the grid directory.
pub const RECOVERY_DIR_NAME: &str = "temp";

/// One checkpointed city.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub series: PrecipitationSeries,
    pub metadata: SeriesMetadata,
}

/// City → checkpointed entry for one (model, scenario) pair.
pub type Snapshot = BTreeMap<String, SnapshotEntry>;

/// Reads and writes the recovery snapshots of a run.
#[derive(Debug, Clone)]
pub struct RecoveryStore {
    directory: PathBuf,
}

fn epoch() -> NaiveDate {
    // 1970-01-01
    NaiveDate::default()
}

impl RecoveryStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        RecoveryStore {
            directory: directory.into(),
        }
    }

    /// Store rooted at `<parent of source_dir>/temp`.
    pub fn for_source_dir(source_dir: &Path) -> Self {
        RecoveryStore::new(sibling_base(source_dir).join(RECOVERY_DIR_NAME))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the snapshot for a (model, scenario) pair.
    pub fn snapshot_path(&self, model: &str, scenario: &str) -> PathBuf {
        self.directory
            .join(format!("recovery_{}_{}.parquet", model, scenario))
    }

    fn ensure_directory(&self) -> PipelineResult<()> {
        if !self.directory.is_dir() {
            fs::create_dir_all(&self.directory)?;
            debug!(
                "Created temporary recovery directory at '{}'",
                self.directory.display()
            );
        }
        Ok(())
    }

    /// Atomically persists the snapshot of a pair. Empty snapshots are not written.
    pub fn dump(&self, model: &str, scenario: &str, snapshot: &Snapshot) -> PipelineResult<()> {
        if snapshot.is_empty() {
            debug!(
                "Nothing to save for model '{}', scenario '{}'",
                model, scenario
            );
            return Ok(());
        }
        self.ensure_directory()?;

        let mut df = snapshot_to_dataframe(snapshot)?;
        let path = self.snapshot_path(model, scenario);

        let mut temp = NamedTempFile::new_in(&self.directory)?;
        ParquetWriter::new(temp.as_file_mut()).finish(&mut df)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| PipelineError::Io(e.error))?;

        info!("Successfully saved recovery file at '{}'", path.display());
        Ok(())
    }

    /// Loads the snapshot of a pair.
    ///
    /// A missing or unreadable snapshot is logged and reported as `None`, so the
    /// caller falls back to a full extraction.
    pub fn load(&self, model: &str, scenario: &str) -> Option<Snapshot> {
        let path = self.snapshot_path(model, scenario);
        if !path.is_file() {
            info!(
                "No recovery file found for model '{}', scenario '{}', proceeding...",
                model, scenario
            );
            return None;
        }

        match read_snapshot(&path) {
            Ok(snapshot) => {
                info!(
                    "Loaded recovery file at '{}' with {} cities",
                    path.display(),
                    snapshot.len()
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable recovery file at '{}': {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Removes the recovery directory and everything in it.
    pub fn clear(&self) -> PipelineResult<()> {
        if self.directory.exists() {
            fs::remove_dir_all(&self.directory)?;
            info!(
                "Removed temporary recovery directory at '{}'",
                self.directory.display()
            );
        }
        Ok(())
    }
}

fn snapshot_to_dataframe(snapshot: &Snapshot) -> PipelineResult<DataFrame> {
    let rows: usize = snapshot.values().map(|entry| entry.series.len()).sum();
    let mut cities = Vec::with_capacity(rows);
    let mut models = Vec::with_capacity(rows);
    let mut scenarios = Vec::with_capacity(rows);
    let mut latitudes = Vec::with_capacity(rows);
    let mut longitudes = Vec::with_capacity(rows);
    let mut dates = Vec::with_capacity(rows);
    let mut values = Vec::with_capacity(rows);

    let epoch = epoch();
    for (city, entry) in snapshot {
        for &(date, value) in entry.series.points() {
            cities.push(city.as_str());
            models.push(entry.metadata.model.as_str());
            scenarios.push(entry.metadata.scenario.as_str());
            latitudes.push(entry.metadata.latitude);
            longitudes.push(entry.metadata.longitude);
            dates.push((date - epoch).num_days() as i32);
            values.push(value);
        }
    }

    let df = DataFrame::new(vec![
        Series::new("city".into(), cities).into(),
        Series::new("model".into(), models).into(),
        Series::new("scenario".into(), scenarios).into(),
        Series::new("latitude".into(), latitudes).into(),
        Series::new("longitude".into(), longitudes).into(),
        Series::new("date".into(), dates).into(),
        Series::new("precipitation".into(), values).into(),
    ])?;
    Ok(df)
}

/// Reads a snapshot file.
///
/// # Errors
///
/// Returns an error if the file is not valid Parquet, lacks a snapshot column or
/// holds null cells.
pub fn read_snapshot(path: &Path) -> PipelineResult<Snapshot> {
    let file = File::open(path)?;
    let df = ParquetReader::new(file).finish()?;

    let text = |name: &str| -> PipelineResult<StringChunked> {
        Ok(df.column(name)?.as_materialized_series().str()?.clone())
    };
    let float = |name: &str| -> PipelineResult<Float64Chunked> {
        Ok(df.column(name)?.as_materialized_series().f64()?.clone())
    };

    let cities = text("city")?;
    let models = text("model")?;
    let scenarios = text("scenario")?;
    let latitudes = float("latitude")?;
    let longitudes = float("longitude")?;
    let values = float("precipitation")?;
    let dates = df.column("date")?.as_materialized_series().i32()?.clone();

    let epoch = epoch();
    let mut snapshot = Snapshot::new();
    for row in 0..df.height() {
        let (
            Some(city),
            Some(model),
            Some(scenario),
            Some(latitude),
            Some(longitude),
            Some(days),
            Some(value),
        ) = (
            cities.get(row),
            models.get(row),
            scenarios.get(row),
            latitudes.get(row),
            longitudes.get(row),
            dates.get(row),
            values.get(row),
        )
        else {
            return Err(PipelineError::Snapshot(format!(
                "null cell in row {} of '{}'",
                row,
                path.display()
            )));
        };

        let date = epoch
            .checked_add_signed(Duration::days(days as i64))
            .ok_or_else(|| PipelineError::Snapshot(format!("date out of range in row {}", row)))?;

        let entry = snapshot
            .entry(city.to_string())
            .or_insert_with(|| SnapshotEntry {
                series: PrecipitationSeries::default(),
                metadata: SeriesMetadata {
                    city: city.to_string(),
                    model: model.to_string(),
                    scenario: scenario.to_string(),
                    latitude,
                    longitude,
                },
            });
        entry.series.push(date, value);
    }

    Ok(snapshot)
}
