//! # Grid File Information Module
//!
//! This module extracts and displays information about precipitation grid files:
//! dimensions, variables, axis ranges, covered dates and how many cells hold data.

use crate::grid::open_netcdf;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Information about a NetCDF dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub name: String,
    pub length: usize,
    pub is_unlimited: bool,
}

/// Information about a NetCDF variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub data_type: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
}

/// Summary of the precipitation variable as seen by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecipitationInfo {
    pub variable: String,
    pub time_units: String,
    pub time_steps: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub latitude_range: Option<(f64, f64)>,
    pub longitude_range: Option<(f64, f64)>,
    pub total_cells: usize,
    pub valid_cells: usize,
}

/// Complete information about a grid file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridInfo {
    pub path: String,
    pub file_size: Option<u64>,
    pub dimensions: Vec<DimensionInfo>,
    pub variables: Vec<VariableInfo>,
    pub precipitation: Option<PrecipitationInfo>,
}

fn axis_range(axis: &[f64]) -> Option<(f64, f64)> {
    let min = axis.iter().copied().reduce(f64::min)?;
    let max = axis.iter().copied().reduce(f64::max)?;
    Some((min, max))
}

/// Extract information from a grid file.
///
/// When `variable` is present in the file, it is also loaded as a precipitation
/// grid to report dates and valid cells.
pub fn get_grid_info(path: &Path, variable: &str) -> Result<GridInfo> {
    debug!("Opening NetCDF file: {}", path.display());
    let file = netcdf::open(path)
        .with_context(|| format!("Failed to open NetCDF file: {}", path.display()))?;

    let file_size = std::fs::metadata(path).ok().map(|metadata| metadata.len());

    let dimensions = file
        .dimensions()
        .map(|dim| DimensionInfo {
            name: dim.name().to_string(),
            length: dim.len(),
            is_unlimited: dim.is_unlimited(),
        })
        .collect();

    let variables: Vec<VariableInfo> = file
        .variables()
        .map(|var| VariableInfo {
            name: var.name().to_string(),
            data_type: format!("{:?}", var.vartype()),
            dimensions: var
                .dimensions()
                .iter()
                .map(|d| d.name().to_string())
                .collect(),
            shape: var.dimensions().iter().map(|d| d.len()).collect(),
        })
        .collect();

    let has_variable = variables.iter().any(|v| v.name == variable);
    file.close().context("Failed to close NetCDF file")?;

    let precipitation = if has_variable {
        let grid = open_netcdf(path, variable)
            .with_context(|| format!("Failed to load variable '{}' as a grid", variable))?;
        let dates = grid.dates().context("Failed to decode the time axis")?;
        let (_, lat_len, lon_len) = grid.shape();
        Some(PrecipitationInfo {
            variable: variable.to_string(),
            time_units: grid.time_units().to_string(),
            time_steps: grid.times().len(),
            first_date: dates.first().map(|d| d.to_string()),
            last_date: dates.last().map(|d| d.to_string()),
            latitude_range: axis_range(grid.latitudes()),
            longitude_range: axis_range(grid.longitudes()),
            total_cells: lat_len * lon_len,
            valid_cells: grid.valid_cell_count(),
        })
    } else {
        debug!("Variable '{}' not found, skipping grid summary", variable);
        None
    };

    Ok(GridInfo {
        path: path.display().to_string(),
        file_size,
        dimensions,
        variables,
        precipitation,
    })
}

/// Print grid info in human-readable format
pub fn print_grid_info_human(info: &GridInfo) {
    println!("Grid File Information:");
    println!("  Path: {}", info.path);
    if let Some(size) = info.file_size {
        println!("  File Size: {:.2} MB", size as f64 / 1_048_576.0);
    }
    println!("  Dimensions: {} total", info.dimensions.len());
    for dim in &info.dimensions {
        println!(
            "    {} ({}{})",
            dim.name,
            dim.length,
            if dim.is_unlimited { ", unlimited" } else { "" }
        );
    }
    println!("  Variables: {} total", info.variables.len());
    for var in &info.variables {
        println!(
            "    {} ({}) - dimensions: [{}]",
            var.name,
            var.data_type,
            var.dimensions.join(", ")
        );
    }
    match &info.precipitation {
        Some(p) => {
            println!("  Precipitation ('{}'):", p.variable);
            println!("    Time units: {}", p.time_units);
            println!(
                "    Time steps: {} ({} to {})",
                p.time_steps,
                p.first_date.as_deref().unwrap_or("-"),
                p.last_date.as_deref().unwrap_or("-")
            );
            if let Some((min, max)) = p.latitude_range {
                println!("    Latitude: {} to {}", min, max);
            }
            if let Some((min, max)) = p.longitude_range {
                println!("    Longitude: {} to {}", min, max);
            }
            println!("    Cells with data: {} of {}", p.valid_cells, p.total_cells);
        }
        None => println!("  Precipitation: variable not found"),
    }
}

/// Print grid info in JSON format
pub fn print_grid_info_json(info: &GridInfo) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(info).context("Failed to serialize grid info to JSON")?
    );
    Ok(())
}

/// Print grid info in YAML format
pub fn print_grid_info_yaml(info: &GridInfo) -> Result<()> {
    let yaml = serde_yaml::to_string(info).context("Failed to serialize grid info to YAML")?;
    println!("{}", yaml);
    Ok(())
}
