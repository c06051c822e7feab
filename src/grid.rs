//! # Grid Access
//!
//! This module loads geo-referenced precipitation grids into memory and exposes
//! them to the resolution and extraction stages.
//!
//! A [`Grid`] holds the latitude, longitude and time axes plus a dense
//! `precipitation[time, lat, lon]` array where every cell carries a validity flag
//! that is independent of its numeric value.
//!
//! ## Key Components
//!
//! - [`Grid`]: In-memory masked 3-D array with its axes
//! - [`open_netcdf`]: Loads a [`Grid`] from a NetCDF file
//! - [`GridSource`]: Opens the grid for one (model, scenario) pair
//! - [`NetCdfGridSource`]: [`GridSource`] backed by a directory of NetCDF files

use crate::error::{PipelineError, PipelineResult};
use crate::input::ScenarioConfig;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::debug;
use std::path::{Path, PathBuf};

const MILLISECONDS_PER_DAY: f64 = 86_400_000.0;

/// Values at or above this magnitude are treated as the netCDF default fill value.
const DEFAULT_FILL_THRESHOLD: f64 = 1.0e30;

/// Reference-date layouts accepted after `days since`.
const REFERENCE_DATE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// In-memory precipitation grid with per-cell validity.
#[derive(Debug, Clone)]
pub struct Grid {
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    times: Vec<f64>,
    time_units: String,
    values: Vec<f64>,
    valid: Vec<bool>,
}

impl Grid {
    /// Builds a grid from its axes and a time-major `[time][lat][lon]` value array.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::GridShape`] if `values` or `valid` do not hold exactly
    /// `times.len() * latitudes.len() * longitudes.len()` entries.
    pub fn new(
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        times: Vec<f64>,
        time_units: impl Into<String>,
        values: Vec<f64>,
        valid: Vec<bool>,
    ) -> PipelineResult<Self> {
        let expected = times.len() * latitudes.len() * longitudes.len();
        if values.len() != expected || valid.len() != expected {
            return Err(PipelineError::GridShape(format!(
                "expected {} cells for shape ({}, {}, {}), got {} values and {} flags",
                expected,
                times.len(),
                latitudes.len(),
                longitudes.len(),
                values.len(),
                valid.len()
            )));
        }

        Ok(Grid {
            latitudes,
            longitudes,
            times,
            time_units: time_units.into(),
            values,
            valid,
        })
    }

    /// Builds a grid where validity is derived from the values themselves: non-finite
    /// values, values equal to one of `fill_values` and netCDF default fills are invalid.
    pub fn from_raw_values(
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        times: Vec<f64>,
        time_units: impl Into<String>,
        values: Vec<f64>,
        fill_values: &[f64],
    ) -> PipelineResult<Self> {
        let valid = values
            .iter()
            .map(|&v| is_valid_value(v, fill_values))
            .collect();
        Grid::new(latitudes, longitudes, times, time_units, values, valid)
    }

    /// Applies `value * scale + offset` to every cell, keeping validity as is.
    pub fn unpack(mut self, scale: f64, offset: f64) -> Self {
        if scale != 1.0 || offset != 0.0 {
            for value in &mut self.values {
                *value = *value * scale + offset;
            }
        }
        self
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn time_units(&self) -> &str {
        &self.time_units
    }

    /// Returns `(time, lat, lon)` lengths.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.times.len(), self.latitudes.len(), self.longitudes.len())
    }

    fn offset(&self, time_index: usize, latitude_index: usize, longitude_index: usize) -> usize {
        (time_index * self.latitudes.len() + latitude_index) * self.longitudes.len()
            + longitude_index
    }

    fn contains_cell(&self, latitude_index: usize, longitude_index: usize) -> bool {
        latitude_index < self.latitudes.len() && longitude_index < self.longitudes.len()
    }

    /// Value at a grid position, `None` when the position is invalid or out of range.
    pub fn value(
        &self,
        time_index: usize,
        latitude_index: usize,
        longitude_index: usize,
    ) -> Option<f64> {
        if time_index >= self.times.len() || !self.contains_cell(latitude_index, longitude_index)
        {
            return None;
        }
        let offset = self.offset(time_index, latitude_index, longitude_index);
        self.valid[offset].then_some(self.values[offset])
    }

    /// Checks whether a cell has at least one valid time step.
    pub fn has_valid_data(&self, latitude_index: usize, longitude_index: usize) -> bool {
        if !self.contains_cell(latitude_index, longitude_index) {
            return false;
        }
        (0..self.times.len())
            .any(|t| self.valid[self.offset(t, latitude_index, longitude_index)])
    }

    /// Iterates the time series of one cell, yielding `None` for invalid steps.
    pub fn cell_series(
        &self,
        latitude_index: usize,
        longitude_index: usize,
    ) -> impl Iterator<Item = Option<f64>> + '_ {
        (0..self.times.len()).map(move |t| self.value(t, latitude_index, longitude_index))
    }

    /// Index of an exact latitude value on the axis.
    pub fn latitude_index(&self, latitude: f64) -> Option<usize> {
        self.latitudes.iter().position(|&lat| lat == latitude)
    }

    /// Index of an exact longitude value on the axis.
    pub fn longitude_index(&self, longitude: f64) -> Option<usize> {
        self.longitudes.iter().position(|&lon| lon == longitude)
    }

    /// Number of (lat, lon) cells holding at least one valid time step.
    pub fn valid_cell_count(&self) -> usize {
        (0..self.latitudes.len())
            .flat_map(|i| (0..self.longitudes.len()).map(move |j| (i, j)))
            .filter(|&(i, j)| self.has_valid_data(i, j))
            .count()
    }

    /// Parses the reference date from the time axis units (`days since <date>`).
    pub fn reference_date(&self) -> PipelineResult<NaiveDateTime> {
        parse_reference_date(&self.time_units)
    }

    /// Calendar date of every time step: the reference date plus the step's day
    /// offset, truncated to the day.
    pub fn dates(&self) -> PipelineResult<Vec<NaiveDate>> {
        let reference = self.reference_date()?;
        self.times
            .iter()
            .map(|&offset| {
                let delta = Duration::milliseconds((offset * MILLISECONDS_PER_DAY).round() as i64);
                reference
                    .checked_add_signed(delta)
                    .map(|timestamp| timestamp.date())
                    .ok_or_else(|| {
                        PipelineError::InvalidTimeUnits(format!(
                            "{} (offset {} out of range)",
                            self.time_units, offset
                        ))
                    })
            })
            .collect()
    }
}

/// Parses a `days since <date>` units string into its reference timestamp.
pub fn parse_reference_date(units: &str) -> PipelineResult<NaiveDateTime> {
    let invalid = || PipelineError::InvalidTimeUnits(units.to_string());

    let (unit, reference) = units.split_once("since").ok_or_else(invalid)?;
    if unit.trim() != "days" {
        return Err(invalid());
    }
    let reference = reference.trim();

    for format in REFERENCE_DATE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(reference, format) {
            return Ok(parsed);
        }
    }
    NaiveDate::parse_from_str(reference, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(invalid)
}

fn is_valid_value(value: f64, fill_values: &[f64]) -> bool {
    value.is_finite() && value.abs() < DEFAULT_FILL_THRESHOLD && !fill_values.contains(&value)
}

fn read_axis(file: &netcdf::File, name: &str, path: &Path) -> PipelineResult<Vec<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| PipelineError::MissingVariable {
            variable: name.to_string(),
            path: path.to_path_buf(),
        })?;
    Ok(var.get_values::<f64, _>(..)?)
}

fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Double(v) => Some(v),
        netcdf::AttributeValue::Float(v) => Some(v as f64),
        netcdf::AttributeValue::Int(v) => Some(v as f64),
        netcdf::AttributeValue::Short(v) => Some(v as f64),
        netcdf::AttributeValue::Doubles(v) => v.first().copied(),
        netcdf::AttributeValue::Floats(v) => v.first().map(|&x| x as f64),
        _ => None,
    }
}

/// Loads a precipitation grid from a NetCDF file.
///
/// The file must expose the `lat`, `lon` and `time` axes (the latter with a
/// `units` attribute) and a `variable` laid out as `(time, lat, lon)`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, a variable or the time units
/// are missing, or the precipitation variable does not match the axes.
pub fn open_netcdf(path: &Path, variable: &str) -> PipelineResult<Grid> {
    let file = netcdf::open(path)?;

    let latitudes = read_axis(&file, "lat", path)?;
    let longitudes = read_axis(&file, "lon", path)?;
    let times = read_axis(&file, "time", path)?;

    let time_units = match file
        .variable("time")
        .and_then(|var| var.attribute_value("units"))
    {
        Some(Ok(netcdf::AttributeValue::Str(units))) => units,
        _ => return Err(PipelineError::InvalidTimeUnits(String::new())),
    };

    let var = file
        .variable(variable)
        .ok_or_else(|| PipelineError::MissingVariable {
            variable: variable.to_string(),
            path: path.to_path_buf(),
        })?;

    let dims: Vec<String> = var.dimensions().iter().map(|d| d.name().to_string()).collect();
    if dims != ["time", "lat", "lon"] {
        return Err(PipelineError::GridShape(format!(
            "variable '{}' has dimensions {:?}, expected (time, lat, lon)",
            variable, dims
        )));
    }

    let fill_values: Vec<f64> = ["_FillValue", "missing_value"]
        .iter()
        .filter_map(|name| numeric_attribute(&var, name))
        .collect();
    let scale = numeric_attribute(&var, "scale_factor").unwrap_or(1.0);
    let offset = numeric_attribute(&var, "add_offset").unwrap_or(0.0);
    let values = var.get_values::<f64, _>(..)?;

    // Fill values are stored packed, so validity is decided before unpacking.
    let grid = Grid::from_raw_values(latitudes, longitudes, times, time_units, values, &fill_values)?
        .unpack(scale, offset);
    debug!(
        "Loaded grid with shape {:?} from file at '{}'",
        grid.shape(),
        path.display()
    );
    Ok(grid)
}

/// Opens the grid for one (model, scenario) pair.
pub trait GridSource {
    /// Returns the grid for the pair, or [`PipelineError::MissingGridFile`] when no
    /// grid exists for it.
    fn open(&self, model: &str, scenario: &ScenarioConfig) -> PipelineResult<Grid>;
}

/// Grid source reading NetCDF files named by each scenario's filename template.
#[derive(Debug, Clone)]
pub struct NetCdfGridSource {
    source_dir: PathBuf,
    variable_name: String,
}

impl NetCdfGridSource {
    pub fn new(source_dir: impl Into<PathBuf>, variable_name: impl Into<String>) -> Self {
        NetCdfGridSource {
            source_dir: source_dir.into(),
            variable_name: variable_name.into(),
        }
    }

    /// Path of the grid file for a (model, scenario) pair.
    pub fn grid_path(&self, model: &str, scenario: &ScenarioConfig) -> PathBuf {
        self.source_dir.join(scenario.file_name(model))
    }
}

impl GridSource for NetCdfGridSource {
    fn open(&self, model: &str, scenario: &ScenarioConfig) -> PipelineResult<Grid> {
        let path = self.grid_path(model, scenario);
        if !path.is_file() {
            return Err(PipelineError::MissingGridFile(path));
        }
        open_netcdf(&path, &self.variable_name)
    }
}

/// Finds the smallest `.nc` file (in bytes) in a directory.
///
/// The suffix comparison is case insensitive; the format itself is not checked.
pub fn find_smallest_grid_file(directory: &Path) -> PipelineResult<PathBuf> {
    if !directory.is_dir() {
        return Err(PipelineError::InvalidSourceDirectory(directory.to_path_buf()));
    }

    let mut smallest: Option<(u64, PathBuf)> = None;
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        let is_grid = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("nc"));
        if !is_grid || !path.is_file() {
            continue;
        }
        let size = std::fs::metadata(&path)?.len();
        if smallest.as_ref().is_none_or(|(current, _)| size < *current) {
            smallest = Some((size, path));
        }
    }

    smallest
        .map(|(_, path)| path)
        .ok_or_else(|| PipelineError::MissingGridFile(directory.join("*.nc")))
}
