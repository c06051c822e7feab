//! # Input Configuration Module
//!
//! This module provides configuration parsing and validation for consolidation runs,
//! and readers for the two coordinates files the pipeline consumes.
//!
//! ## Configuration Structure
//!
//! A configuration file specifies:
//! - **coordinates_path**: Path to the resolved coordinates JSON file
//! - **source_dir**: Directory holding one NetCDF grid per (model, scenario)
//! - **models**: Climate models to process
//! - **scenarios**: Climate scenarios, each with its grid filename template
//! - **outputs**: Which exports to produce (Parquet, CSV, Netuno)
//! - **recovery**: Whether to checkpoint progress and keep the checkpoints
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use rainfall_indices::input::RunConfig;
//!
//! // Load from file (JSON or YAML, chosen by extension)
//! let config = RunConfig::from_file("run.yaml")?;
//!
//! // Load from JSON string, every other field falls back to its default
//! let json = r#"
//! {
//!   "coordinates_path": "cities.json",
//!   "source_dir": "grids"
//! }"#;
//! let config = RunConfig::from_json(json)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{PipelineError, PipelineResult};
use chrono::NaiveDate;
use log::info;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholder replaced by the model name in grid filename templates.
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// CMIP6 models processed when the configuration does not list any.
pub const CLIMATE_MODELS: [&str; 19] = [
    "ACCESS-CM2",
    "ACCESS-ESM1-5",
    "CMCC-ESM2",
    "EC-EARTH3",
    "GFDL-CM4",
    "GFDL-ESM4",
    "HadGEM3-GC31-LL",
    "INM-CM4_8",
    "INM-CM5",
    "IPSL-CM6A-LR",
    "KACE",
    "KIOST",
    "MIROC6",
    "MPI-ESM1-2",
    "MRI-ESM2",
    "NESM3",
    "NorESM2-MM",
    "TaiESM1",
    "UKESM1-0-LL",
];

/// Main configuration structure for consolidation runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Path to the resolved coordinates JSON file
    pub coordinates_path: PathBuf,
    /// Directory containing the input NetCDF grids
    pub source_dir: PathBuf,
    /// Climate models to process, in output order
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Climate scenarios to process, in output order
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<ScenarioConfig>,
    /// Name of the precipitation variable inside each grid
    #[serde(default = "default_variable_name")]
    pub variable_name: String,
    /// Export selection
    #[serde(default)]
    pub outputs: OutputOptions,
    /// Checkpointing behaviour
    #[serde(default)]
    pub recovery: RecoveryOptions,
    /// Keep only the days inside each scenario's period
    #[serde(default)]
    pub restrict_to_period: bool,
}

/// One climate scenario and the grid file that holds it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScenarioConfig {
    /// Scenario name used in metadata and file names
    pub name: String,
    /// Descriptive label of the scenario period
    pub label: String,
    /// First day of the scenario period
    pub start_date: NaiveDate,
    /// Last day of the scenario period
    pub end_date: NaiveDate,
    /// Grid filename template, `{model}` is replaced by the model name
    pub filename_template: String,
}

/// Which exporters run at the end of (or during) consolidation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OutputOptions {
    /// Write the consolidated indices table as Parquet
    #[serde(default)]
    pub parquet: bool,
    /// Write one `date,precipitation` CSV per combination
    #[serde(default)]
    pub csv: bool,
    /// Write one header-less precipitation-only CSV per combination (overrides `csv`)
    #[serde(default)]
    pub netuno: bool,
}

/// Recovery snapshot settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RecoveryOptions {
    /// Write a snapshot after each (model, scenario) pair and replay it on restart
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keep the snapshot directory after a completed run
    #[serde(default)]
    pub keep_temp_files: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        RecoveryOptions {
            enabled: true,
            keep_temp_files: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_variable_name() -> String {
    "pr".to_string()
}

/// The built-in model catalogue.
pub fn default_models() -> Vec<String> {
    CLIMATE_MODELS.iter().map(|m| m.to_string()).collect()
}

/// The built-in scenario catalogue: historical, SSP2-4.5 and SSP5-8.5.
pub fn default_scenarios() -> Vec<ScenarioConfig> {
    let scenario = |name: &str, label: &str, start: (i32, u32, u32), end: (i32, u32, u32), file: &str| {
        ScenarioConfig {
            name: name.to_string(),
            label: label.to_string(),
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap_or_default(),
            filename_template: file.to_string(),
        }
    };
    vec![
        scenario("Histórico", "Histórico", (1980, 1, 1), (2013, 12, 31), "{model}-pr-hist.nc"),
        scenario("SSP245", "SSP245_2015_2100", (2015, 1, 1), (2100, 12, 31), "{model}-pr-ssp245.nc"),
        scenario("SSP585", "SSP585_2015_2100", (2015, 1, 1), (2100, 12, 31), "{model}-pr-ssp585.nc"),
    ]
}

impl ScenarioConfig {
    /// Grid file name for a model under this scenario.
    pub fn file_name(&self, model: &str) -> String {
        self.filename_template.replace(MODEL_PLACEHOLDER, model)
    }
}

impl RunConfig {
    /// Creates a configuration with the built-in model and scenario catalogues.
    pub fn new(coordinates_path: impl Into<PathBuf>, source_dir: impl Into<PathBuf>) -> Self {
        RunConfig {
            coordinates_path: coordinates_path.into(),
            source_dir: source_dir.into(),
            models: default_models(),
            scenarios: default_scenarios(),
            variable_name: default_variable_name(),
            outputs: OutputOptions::default(),
            recovery: RecoveryOptions::default(),
            restrict_to_period: false,
        }
    }

    /// Loads a run configuration from a JSON or YAML file.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, anything else as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Loads a run configuration from a JSON string.
    pub fn from_json(json_str: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json_str)?)
    }

    /// Loads a run configuration from a YAML string.
    pub fn from_yaml(yaml_str: &str) -> PipelineResult<Self> {
        Ok(serde_yaml::from_str(yaml_str)?)
    }

    /// Serializes the configuration as pretty JSON.
    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serializes the configuration as YAML.
    pub fn to_yaml(&self) -> PipelineResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Looks up a scenario by name.
    pub fn scenario(&self, name: &str) -> PipelineResult<&ScenarioConfig> {
        self.scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| PipelineError::InvalidClimateScenario(name.to_string()))
    }

    /// Validates the structural inputs of a run before the pipeline starts.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidCoordinatesFile`] if the coordinates path is not a file
    /// - [`PipelineError::InvalidSourceDirectory`] if the source path is not a directory
    /// - [`PipelineError::Config`] for empty catalogues, duplicate scenario names or
    ///   templates without the `{model}` placeholder
    pub fn validate(&self) -> PipelineResult<()> {
        if !self.coordinates_path.is_file() {
            return Err(PipelineError::InvalidCoordinatesFile(self.coordinates_path.clone()));
        }
        if !self.source_dir.is_dir() {
            return Err(PipelineError::InvalidSourceDirectory(self.source_dir.clone()));
        }
        if self.models.is_empty() {
            return Err(PipelineError::Config("no climate models configured".to_string()));
        }
        if self.scenarios.is_empty() {
            return Err(PipelineError::Config("no climate scenarios configured".to_string()));
        }

        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if !seen.insert(scenario.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate scenario name '{}'",
                    scenario.name
                )));
            }
            if !scenario.filename_template.contains(MODEL_PLACEHOLDER) {
                return Err(PipelineError::Config(format!(
                    "filename template '{}' of scenario '{}' lacks the {} placeholder",
                    scenario.filename_template, scenario.name, MODEL_PLACEHOLDER
                )));
            }
            if scenario.start_date > scenario.end_date {
                return Err(PipelineError::Config(format!(
                    "scenario '{}' ends before it starts",
                    scenario.name
                )));
            }
        }
        Ok(())
    }

    /// Directory where exports are written: the parent of the source directory.
    pub fn output_parent(&self) -> PathBuf {
        sibling_base(&self.source_dir)
    }
}

/// Parent of a directory, or the current directory when it has none.
pub(crate) fn sibling_base(dir: &Path) -> PathBuf {
    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// A latitude/longitude pair as stored in coordinates files.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// A city's target coordinates paired with the nearest grid cell holding data.
///
/// Any other fields of the city entry (e.g. `ibge_code`) are carried through
/// untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResolvedCoordinate {
    pub target: LatLon,
    pub nearest: LatLon,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ResolvedCoordinate {
    /// Converts one city entry of a coordinates file, failing fast when the
    /// `nearest` coordinates are missing or malformed.
    pub fn from_value(city: &str, details: serde_json::Value) -> PipelineResult<Self> {
        let nearest = details
            .get("nearest")
            .and_then(|n| Some((n.get("lat")?.as_f64()?, n.get("lon")?.as_f64()?)));
        if nearest.is_none() {
            return Err(PipelineError::CoordinatesNotAvailable {
                city: city.to_string(),
                details: details.to_string(),
            });
        }
        serde_json::from_value(details.clone()).map_err(|_| PipelineError::CoordinatesNotAvailable {
            city: city.to_string(),
            details: details.to_string(),
        })
    }

    /// Returns the nearest valid grid coordinates as `(lat, lon)`.
    pub fn coordinates(&self) -> (f64, f64) {
        (self.nearest.lat, self.nearest.lon)
    }
}

/// City name → resolved coordinates, ordered by city name.
pub type ResolvedCoordinates = BTreeMap<String, ResolvedCoordinate>;

/// Reads a resolved coordinates JSON file.
pub fn read_resolved_coordinates(path: &Path) -> PipelineResult<ResolvedCoordinates> {
    if !path.is_file() {
        return Err(PipelineError::InvalidCoordinatesFile(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let coordinates = parse_resolved_coordinates(&content)?;
    info!(
        "Successfully extracted coordinates for {} cities from file at '{}'",
        coordinates.len(),
        path.display()
    );
    Ok(coordinates)
}

/// Parses the content of a resolved coordinates JSON file.
pub fn parse_resolved_coordinates(json_str: &str) -> PipelineResult<ResolvedCoordinates> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(json_str)?;
    raw.into_iter()
        .map(|(city, details)| {
            let coordinate = ResolvedCoordinate::from_value(&city, details)?;
            Ok((city, coordinate))
        })
        .collect()
}

/// A city from the raw coordinates table, before grid resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCity {
    pub ibge_code: i64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Reads the raw coordinates CSV.
///
/// The file has a header row and four positional columns: IBGE code, city name,
/// latitude and longitude.
pub fn read_raw_coordinates(path: &Path) -> PipelineResult<BTreeMap<String, RawCity>> {
    if !path.is_file() {
        return Err(PipelineError::InvalidCoordinatesFile(path.to_path_buf()));
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    if df.width() < 4 {
        return Err(PipelineError::Config(format!(
            "raw coordinates file '{}' has {} columns, expected 4",
            path.display(),
            df.width()
        )));
    }

    let columns = df.get_columns();
    let codes = columns[0].as_materialized_series().cast(&DataType::Int64)?;
    let names = columns[1].as_materialized_series().cast(&DataType::String)?;
    let latitudes = columns[2].as_materialized_series().cast(&DataType::Float64)?;
    let longitudes = columns[3].as_materialized_series().cast(&DataType::Float64)?;

    let mut cities = BTreeMap::new();
    let rows = codes
        .i64()?
        .into_iter()
        .zip(names.str()?.into_iter())
        .zip(latitudes.f64()?.into_iter())
        .zip(longitudes.f64()?.into_iter());
    for (row, (((code, name), latitude), longitude)) in rows.enumerate() {
        match (code, name, latitude, longitude) {
            (Some(ibge_code), Some(name), Some(latitude), Some(longitude)) => {
                cities.insert(
                    name.to_string(),
                    RawCity {
                        ibge_code,
                        latitude,
                        longitude,
                    },
                );
            }
            _ => {
                return Err(PipelineError::Config(format!(
                    "incomplete row {} in raw coordinates file '{}'",
                    row + 1,
                    path.display()
                )));
            }
        }
    }

    info!(
        "Successfully extracted coordinates and codes for {} cities from file at '{}'",
        cities.len(),
        path.display()
    );
    Ok(cities)
}
