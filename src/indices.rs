//! # Climate Indices
//!
//! Computes nine annual precipitation indices from a daily series. Most follow the
//! ETCCDI definitions (<https://etccdi.pacificclimate.org/list_27_indices.shtml>); the
//! seasonality index follows Walsh & Lawler (1981).
//!
//! | Column              | Meaning                                                   |
//! |---------------------|-----------------------------------------------------------|
//! | `PRCPTOT`           | Total precipitation on wet days (≥ 1 mm)                  |
//! | `R95p`              | Total precipitation above the whole-series 95th percentile|
//! | `RX1day`            | Maximum 1-day precipitation                               |
//! | `RX5day`            | Maximum trailing 5-day precipitation                      |
//! | `SDII`              | Mean precipitation on wet days                            |
//! | `R20mm`             | Count of days with precipitation ≥ 20 mm                  |
//! | `CDD`               | Longest run of dry days (< 1 mm)                          |
//! | `CWD`               | Longest run of wet days (≥ 1 mm)                          |
//! | `Seasonality_Index` | Walsh & Lawler seasonality index                          |

use crate::error::PipelineResult;
use crate::extract::{PrecipitationSeries, SeriesMetadata};
use chrono::Datelike;
use polars::prelude::*;
use std::collections::BTreeMap;

/// Days below this amount (mm) are dry, the rest are wet.
pub const WET_DAY_THRESHOLD: f64 = 1.0;

/// Heavy precipitation threshold (mm) for `R20mm`.
pub const HEAVY_PRECIPITATION_THRESHOLD: f64 = 20.0;

/// Trailing window length, in days, for `RX5day`.
pub const ROLLING_WINDOW: usize = 5;

/// Percentile of the whole series above which a day counts towards `R95p`.
pub const R95P_QUANTILE: f64 = 0.95;

/// Index columns in output order, after the `year` column.
pub const INDEX_COLUMNS: [&str; 9] = [
    "PRCPTOT",
    "R95p",
    "RX1day",
    "RX5day",
    "SDII",
    "R20mm",
    "CDD",
    "CWD",
    "Seasonality_Index",
];

/// Truthiness used by [`max_consecutive_run_length`]: zero, empty and absent
/// values are falsy.
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

macro_rules! impl_truthy_for_numbers {
    ($($t:ty),*) => {
        $(impl Truthy for $t {
            fn is_truthy(&self) -> bool {
                *self != (0 as $t)
            }
        })*
    };
}

impl_truthy_for_numbers!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Truthy for &str {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Truthy> Truthy for Option<T> {
    fn is_truthy(&self) -> bool {
        self.as_ref().is_some_and(Truthy::is_truthy)
    }
}

/// Length of the longest run of equal consecutive truthy values.
///
/// Runs break whenever two neighbours differ, so `[2, 2, 3]` holds runs of 2 and 1.
/// Returns 0 for empty input or when no value is truthy.
///
/// ```
/// use rainfall_indices::indices::max_consecutive_run_length;
///
/// assert_eq!(max_consecutive_run_length(&[1, 1, 0, 0, 0, 1, 1, 1, 1, 0]), 4);
/// assert_eq!(max_consecutive_run_length(&[0, 0, 0, 0, 2, 2, 2]), 3);
/// assert_eq!(max_consecutive_run_length::<bool>(&[]), 0);
/// ```
pub fn max_consecutive_run_length<T: PartialEq + Truthy>(values: &[T]) -> usize {
    values
        .chunk_by(|a, b| a == b)
        .filter(|run| run[0].is_truthy())
        .map(<[T]>::len)
        .max()
        .unwrap_or(0)
}

/// Quantile `q` of `values` with linear interpolation between closest ranks.
///
/// Returns NaN for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

/// Seasonality index of one year's `(month, precipitation)` records.
///
/// Only months present in the records contribute to the sum. Returns NaN when the
/// yearly total is not positive.
pub fn seasonality_index<I>(records: I) -> f64
where
    I: IntoIterator<Item = (u32, f64)>,
{
    let mut monthly: BTreeMap<u32, f64> = BTreeMap::new();
    for (month, value) in records {
        *monthly.entry(month).or_insert(0.0) += value;
    }
    let yearly: f64 = monthly.values().sum();
    if yearly.is_nan() || yearly <= 0.0 {
        return f64::NAN;
    }
    let even_share = yearly / 12.0;
    monthly.values().map(|m| (m - even_share).abs()).sum::<f64>() / yearly
}

/// Indices of a single year.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnualIndices {
    pub year: i32,
    pub prcptot: f64,
    pub r95p: f64,
    pub rx1day: f64,
    pub rx5day: f64,
    pub sdii: f64,
    pub r20mm: f64,
    pub cdd: f64,
    pub cwd: f64,
    pub seasonality_index: f64,
}

/// Trailing sums over up to [`ROLLING_WINDOW`] values, partial at the start.
fn rolling_sums(values: &[f64]) -> Vec<f64> {
    (0..values.len())
        .map(|k| values[k.saturating_sub(ROLLING_WINDOW - 1)..=k].iter().sum::<f64>())
        .collect()
}

/// Computes one [`AnnualIndices`] per distinct year of the series, in ascending
/// year order.
///
/// The rolling 5-day sums and the R95p threshold are computed over the whole
/// series, so both may reach across year boundaries.
pub fn compute_indices(series: &PrecipitationSeries) -> Vec<AnnualIndices> {
    let values: Vec<f64> = series.values().collect();
    let rolling = rolling_sums(&values);
    let threshold = percentile(&values, R95P_QUANTILE);

    let mut years: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (k, date) in series.dates().enumerate() {
        years.entry(date.year()).or_default().push(k);
    }

    let dates: Vec<_> = series.dates().collect();
    years
        .into_iter()
        .map(|(year, days)| {
            let daily: Vec<f64> = days.iter().map(|&k| values[k]).collect();
            let wet: Vec<f64> = daily
                .iter()
                .copied()
                .filter(|&v| v >= WET_DAY_THRESHOLD)
                .collect();
            let dry_flags: Vec<bool> = daily.iter().map(|&v| v < WET_DAY_THRESHOLD).collect();
            let wet_flags: Vec<bool> = daily.iter().map(|&v| v >= WET_DAY_THRESHOLD).collect();

            let prcptot: f64 = wet.iter().sum();
            let sdii = if wet.is_empty() {
                f64::NAN
            } else {
                prcptot / wet.len() as f64
            };

            AnnualIndices {
                year,
                prcptot,
                r95p: daily.iter().filter(|&&v| v > threshold).sum(),
                rx1day: daily.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                rx5day: days
                    .iter()
                    .map(|&k| rolling[k])
                    .fold(f64::NEG_INFINITY, f64::max),
                sdii,
                r20mm: daily
                    .iter()
                    .filter(|&&v| v >= HEAVY_PRECIPITATION_THRESHOLD)
                    .count() as f64,
                cdd: max_consecutive_run_length(&dry_flags) as f64,
                cwd: max_consecutive_run_length(&wet_flags) as f64,
                seasonality_index: seasonality_index(
                    days.iter().map(|&k| (dates[k].month(), values[k])),
                ),
            }
        })
        .collect()
}

/// Builds the indices table of one combination.
///
/// Columns are `year`, the nine [`INDEX_COLUMNS`] and the capitalized metadata
/// fields `City`, `Model`, `Scenario`, `Latitude` and `Longitude`.
pub fn indices_frame(records: &[AnnualIndices], metadata: &SeriesMetadata) -> PipelineResult<DataFrame> {
    let rows = records.len();
    let column = |name: &str, f: fn(&AnnualIndices) -> f64| -> Column {
        Series::new(name.into(), records.iter().map(f).collect::<Vec<f64>>()).into()
    };

    let df = DataFrame::new(vec![
        Series::new("year".into(), records.iter().map(|r| r.year).collect::<Vec<i32>>()).into(),
        column("PRCPTOT", |r| r.prcptot),
        column("R95p", |r| r.r95p),
        column("RX1day", |r| r.rx1day),
        column("RX5day", |r| r.rx5day),
        column("SDII", |r| r.sdii),
        column("R20mm", |r| r.r20mm),
        column("CDD", |r| r.cdd),
        column("CWD", |r| r.cwd),
        column("Seasonality_Index", |r| r.seasonality_index),
        Series::new("City".into(), vec![metadata.city.as_str(); rows]).into(),
        Series::new("Model".into(), vec![metadata.model.as_str(); rows]).into(),
        Series::new("Scenario".into(), vec![metadata.scenario.as_str(); rows]).into(),
        Series::new("Latitude".into(), vec![metadata.latitude; rows]).into(),
        Series::new("Longitude".into(), vec![metadata.longitude; rows]).into(),
    ])?;
    Ok(df)
}

/// Empty indices table with the canonical schema.
pub fn empty_indices_frame() -> PipelineResult<DataFrame> {
    let metadata = SeriesMetadata {
        city: String::new(),
        model: String::new(),
        scenario: String::new(),
        latitude: 0.0,
        longitude: 0.0,
    };
    indices_frame(&[], &metadata)
}
