//! # Series Extraction
//!
//! Pulls the daily precipitation series of one resolved grid cell and maps the
//! relative time axis onto calendar dates.
//!
//! ## Key Components
//!
//! - [`PrecipitationSeries`]: Ordered `(date, precipitation)` points
//! - [`extract`]: Exact-match extraction from a [`Grid`]
//! - [`filter_by_date`]: Inclusive date-range filter

use crate::error::{PipelineError, PipelineResult};
use crate::grid::Grid;
use chrono::NaiveDate;
use polars::prelude::*;

/// Date layout used whenever a series is written as text.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Ordered daily precipitation points of one combination.
///
/// Missing grid values are stored as `0.0`, so every point carries a number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrecipitationSeries {
    points: Vec<(NaiveDate, f64)>,
}

impl PrecipitationSeries {
    pub fn new(points: Vec<(NaiveDate, f64)>) -> Self {
        PrecipitationSeries { points }
    }

    /// Appends a point at the end of the series.
    pub fn push(&mut self, date: NaiveDate, value: f64) {
        self.points.push((date, value));
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|(date, _)| *date)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(_, value)| *value)
    }

    /// Builds a `date` (text, `%Y-%m-%d`) / `precipitation` frame.
    pub fn to_dataframe(&self) -> PipelineResult<DataFrame> {
        let dates: Vec<String> = self
            .dates()
            .map(|date| date.format(DATE_FORMAT).to_string())
            .collect();
        let values: Vec<f64> = self.values().collect();
        let df = DataFrame::new(vec![
            Series::new("date".into(), dates).into(),
            Series::new("precipitation".into(), values).into(),
        ])?;
        Ok(df)
    }
}

impl FromIterator<(NaiveDate, f64)> for PrecipitationSeries {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, f64)>>(iter: I) -> Self {
        PrecipitationSeries::new(iter.into_iter().collect())
    }
}

/// Extracts the series of the grid cell at exactly `(latitude, longitude)`.
///
/// Invalid values become `0.0`. Each date is the reference date of the time units
/// plus the step's day offset, truncated to the calendar day.
///
/// # Errors
///
/// - [`PipelineError::InvalidTargetCoordinates`] if either coordinate is not an exact
///   axis value of the grid
/// - [`PipelineError::InvalidTimeUnits`] if the time units cannot be parsed
pub fn extract(grid: &Grid, latitude: f64, longitude: f64) -> PipelineResult<PrecipitationSeries> {
    let (Some(lat_index), Some(lon_index)) =
        (grid.latitude_index(latitude), grid.longitude_index(longitude))
    else {
        return Err(PipelineError::InvalidTargetCoordinates { latitude, longitude });
    };

    let dates = grid.dates()?;
    let series: PrecipitationSeries = dates
        .into_iter()
        .zip(grid.cell_series(lat_index, lon_index))
        .map(|(date, value)| (date, value.unwrap_or(0.0)))
        .collect();
    Ok(series)
}

/// Keeps the points with `start <= date <= end`.
pub fn filter_by_date(series: &PrecipitationSeries, start: NaiveDate, end: NaiveDate) -> PrecipitationSeries {
    series
        .points()
        .iter()
        .filter(|(date, _)| *date >= start && *date <= end)
        .copied()
        .collect()
}

/// Descriptive fields attached to every extracted series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMetadata {
    pub city: String,
    pub model: String,
    pub scenario: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl SeriesMetadata {
    /// Formats the metadata as `city=..., model=..., scenario=..., target_coordinates=(lat, lon)`.
    pub fn details(&self) -> String {
        format!(
            "city={}, model={}, scenario={}, target_coordinates=({}, {})",
            self.city, self.model, self.scenario, self.latitude, self.longitude
        )
    }
}
