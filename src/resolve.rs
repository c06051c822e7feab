//! # Coordinate Resolution
//!
//! Maps each city's target coordinates to the nearest grid cell that actually holds
//! data in a reference grid.
//!
//! The initial cell is the per-axis nearest index. When that cell has no valid time
//! step, an expanding square spiral of up to [`MAX_OFFSET`] rings is searched,
//! closest offsets first. Candidates falling outside the grid on either axis are
//! skipped.

use crate::error::{PipelineError, PipelineResult};
use crate::grid::Grid;
use crate::input::{LatLon, RawCity, ResolvedCoordinate, ResolvedCoordinates};
use log::{debug, error, info};
use std::collections::{BTreeMap, HashSet};

/// Largest ring offset visited by the spiral search.
pub const MAX_OFFSET: usize = 15;

/// Index of the axis value closest to `target` (first one on ties).
pub fn nearest_index(axis: &[f64], target: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map(|(index, _)| index)
}

/// Offsets of one ring, `0, -1, 1, ..., -offset, offset`.
fn ring_offsets(offset: usize) -> Vec<isize> {
    let offset = offset as isize;
    let mut offsets: Vec<isize> = (-offset..=offset).collect();
    offsets.sort_by_key(|o| (o.abs(), *o >= 0));
    offsets
}

fn shift(index: usize, offset: isize, len: usize) -> Option<usize> {
    index.checked_add_signed(offset).filter(|&shifted| shifted < len)
}

/// Resolves a target coordinate to the nearest grid cell with at least one valid
/// time step, returned as `(latitude, longitude)` axis values.
///
/// # Errors
///
/// - [`PipelineError::GridShape`] if the grid has an empty spatial axis
/// - [`PipelineError::CoordinateSearchExhausted`] if no valid cell lies within
///   [`MAX_OFFSET`] rings of the initial cell
pub fn resolve(grid: &Grid, target_latitude: f64, target_longitude: f64) -> PipelineResult<(f64, f64)> {
    resolve_within(grid, target_latitude, target_longitude, MAX_OFFSET)
}

/// [`resolve`] with an explicit search radius.
pub fn resolve_within(
    grid: &Grid,
    target_latitude: f64,
    target_longitude: f64,
    max_offset: usize,
) -> PipelineResult<(f64, f64)> {
    let latitudes = grid.latitudes();
    let longitudes = grid.longitudes();

    let (lat_index, lon_index) = match (
        nearest_index(latitudes, target_latitude),
        nearest_index(longitudes, target_longitude),
    ) {
        (Some(i), Some(j)) => (i, j),
        _ => {
            return Err(PipelineError::GridShape(
                "cannot resolve coordinates on a grid with an empty spatial axis".to_string(),
            ));
        }
    };

    if grid.has_valid_data(lat_index, lon_index) {
        return Ok((latitudes[lat_index], longitudes[lon_index]));
    }

    let mut checked = HashSet::from([(lat_index, lon_index)]);
    for offset in 1..=max_offset {
        let offsets = ring_offsets(offset);
        for &lat_offset in &offsets {
            let Some(i) = shift(lat_index, lat_offset, latitudes.len()) else {
                continue;
            };
            for &lon_offset in &offsets {
                let Some(j) = shift(lon_index, lon_offset, longitudes.len()) else {
                    continue;
                };
                if !checked.insert((i, j)) {
                    continue;
                }
                if grid.has_valid_data(i, j) {
                    debug!(
                        "Found valid data at offset ({}, {}) from indices ({}, {})",
                        lat_offset, lon_offset, lat_index, lon_index
                    );
                    return Ok((latitudes[i], longitudes[j]));
                }
            }
        }
    }

    Err(PipelineError::CoordinateSearchExhausted {
        latitude_index: lat_index,
        longitude_index: lon_index,
        max_offset,
    })
}

/// Resolves every city of a raw coordinates table against a reference grid.
///
/// Cities whose search is exhausted are logged and left out of the result; any
/// other error aborts the resolution.
pub fn resolve_cities(grid: &Grid, cities: &BTreeMap<String, RawCity>) -> PipelineResult<ResolvedCoordinates> {
    let mut resolved = BTreeMap::new();

    for (name, city) in cities {
        match resolve(grid, city.latitude, city.longitude) {
            Ok((lat, lon)) => {
                let extra = BTreeMap::from([(
                    "ibge_code".to_string(),
                    serde_json::Value::from(city.ibge_code),
                )]);
                resolved.insert(
                    name.clone(),
                    ResolvedCoordinate {
                        target: LatLon {
                            lat: city.latitude,
                            lon: city.longitude,
                        },
                        nearest: LatLon { lat, lon },
                        extra,
                    },
                );
            }
            Err(e @ PipelineError::CoordinateSearchExhausted { .. }) => {
                error!("Could not resolve coordinates for '{}': {}", name, e);
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Resolved nearest valid coordinates for {} of {} cities",
        resolved.len(),
        cities.len()
    );
    Ok(resolved)
}

