//! # Consolidation
//!
//! Drives extraction and index computation over every (model, scenario, city)
//! combination of a run.
//!
//! Work is pulled lazily: [`Consolidator::precipitation_series`] yields one
//! [`ExtractedSeries`] per successful combination and
//! [`Consolidator::precipitation_indices`] maps each of them to its indices table.
//! Combinations are visited model first, then scenario, then city in coordinates
//! order, and only one grid is held in memory at a time.
//!
//! When recovery is enabled, the cities completed for a (model, scenario) pair are
//! checkpointed once the pair finishes, and replayed instead of re-extracted on the
//! next run.

use crate::error::{PipelineError, PipelineResult};
use crate::extract::{PrecipitationSeries, SeriesMetadata, extract, filter_by_date};
use crate::grid::{Grid, GridSource, NetCdfGridSource};
use crate::indices::{compute_indices, empty_indices_frame, indices_frame};
use crate::input::{ResolvedCoordinates, RunConfig, ScenarioConfig, read_resolved_coordinates};
use crate::output::{SeriesExporter, series_exporter};
use crate::recovery::{RecoveryStore, Snapshot, SnapshotEntry};
use log::{error, info, warn};
use polars::prelude::*;
use serde::Serialize;
use std::time::Instant;

/// Number of combinations in a cross-product of the given dimension sizes.
pub fn estimate_combinations(lengths: &[usize]) -> usize {
    lengths.iter().product()
}

/// Run counters.
///
/// `total`, `processed` and `error` are updated while the run progresses; the
/// remaining fields are derived by [`PipelineState::finalize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineState {
    pub total: usize,
    pub processed: usize,
    pub error: usize,
    pub skipped: usize,
    pub success: usize,
    pub success_rate: f64,
    pub process_rate: f64,
}

impl PipelineState {
    pub fn new(total: usize) -> Self {
        PipelineState {
            total,
            ..Default::default()
        }
    }

    fn count_processed(&mut self, metadata: &SeriesMetadata) {
        self.processed += 1;
        info!(
            "[{}/{}] Completed processing. Details: {}",
            self.processed,
            self.total,
            metadata.details()
        );
    }

    fn count_error(&mut self, metadata: &SeriesMetadata, reason: &str) {
        self.processed += 1;
        self.error += 1;
        error!(
            "[{}/{}] Error during processing. Details: {} ({})",
            self.processed,
            self.total,
            metadata.details(),
            reason
        );
    }

    /// Derives `skipped`, `success` and both rates, and logs the run summary.
    pub fn finalize(&mut self) {
        self.skipped = self.total.saturating_sub(self.processed);
        self.success = self.processed - self.error;
        self.process_rate = percentage(self.processed, self.total);
        self.success_rate = percentage(self.success, self.processed);
        info!(
            "Processed {} combinations, from a total of {}, skipped {} item(s), encountered \
             {} error(s). Success rate: {:.2}%. Effective processed rate: {:.2}%",
            self.processed,
            self.total,
            self.skipped,
            self.error,
            self.success_rate,
            self.process_rate
        );
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// A successfully extracted (or replayed) series with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSeries {
    pub series: PrecipitationSeries,
    pub metadata: SeriesMetadata,
}

/// Iterates the (model, scenario, city) space of a run.
pub struct Consolidator<S: GridSource> {
    cities: ResolvedCoordinates,
    models: Vec<String>,
    scenarios: Vec<ScenarioConfig>,
    source: S,
    recovery: Option<RecoveryStore>,
    keep_temp_files: bool,
    exporter: Option<Box<dyn SeriesExporter>>,
    restrict_to_period: bool,
    state: PipelineState,
    started: bool,
}

impl Consolidator<NetCdfGridSource> {
    /// Builds a consolidator for a validated run configuration.
    pub fn from_config(config: &RunConfig) -> PipelineResult<Self> {
        let cities = read_resolved_coordinates(&config.coordinates_path)?;
        let source = NetCdfGridSource::new(&config.source_dir, &config.variable_name);

        let mut consolidator = Consolidator::new(
            cities,
            config.models.clone(),
            config.scenarios.clone(),
            source,
        )
        .restrict_to_period(config.restrict_to_period);

        if config.recovery.enabled {
            consolidator = consolidator.with_recovery(
                RecoveryStore::for_source_dir(&config.source_dir),
                config.recovery.keep_temp_files,
            );
        }
        if let Some(exporter) = series_exporter(&config.outputs, &config.output_parent()) {
            consolidator = consolidator.with_exporter(exporter);
        }
        Ok(consolidator)
    }
}

impl<S: GridSource> Consolidator<S> {
    pub fn new(
        cities: ResolvedCoordinates,
        models: Vec<String>,
        scenarios: Vec<ScenarioConfig>,
        source: S,
    ) -> Self {
        let total = estimate_combinations(&[models.len(), scenarios.len(), cities.len()]);
        Consolidator {
            cities,
            models,
            scenarios,
            source,
            recovery: None,
            keep_temp_files: false,
            exporter: None,
            restrict_to_period: false,
            state: PipelineState::new(total),
            started: false,
        }
    }

    /// Enables checkpointing through `store`.
    pub fn with_recovery(mut self, store: RecoveryStore, keep_temp_files: bool) -> Self {
        self.recovery = Some(store);
        self.keep_temp_files = keep_temp_files;
        self
    }

    /// Streams every successful series to `exporter` as it is produced.
    pub fn with_exporter(mut self, exporter: Box<dyn SeriesExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Keeps only the days inside each scenario's period.
    pub fn restrict_to_period(mut self, restrict: bool) -> Self {
        self.restrict_to_period = restrict;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn recovery(&self) -> Option<&RecoveryStore> {
        self.recovery.as_ref()
    }

    /// Lazily yields every successful series of the run.
    ///
    /// A run is walked once: every stream after the first yields nothing and
    /// leaves the counters untouched.
    pub fn precipitation_series(&mut self) -> SeriesStream<'_, S> {
        SeriesStream::new(self)
    }

    /// Lazily yields the indices table of every successful series of the run.
    pub fn precipitation_indices(&mut self) -> IndicesStream<'_, S> {
        IndicesStream {
            series: self.precipitation_series(),
        }
    }

    /// Exhausts the series stream (exporters still run) and returns the final state.
    pub fn generate_all_precipitation_series(&mut self) -> PipelineState {
        let start = Instant::now();
        for _ in self.precipitation_series() {}
        info!("Completed process in {:.2}s", start.elapsed().as_secs_f64());
        self.state.clone()
    }

    /// Concatenates the indices tables of the whole run into one table.
    ///
    /// Returns an empty table with the canonical columns when nothing was produced.
    pub fn consolidate_indices_dataset(&mut self) -> PipelineResult<DataFrame> {
        let mut consolidated: Option<DataFrame> = None;
        for frame in self.precipitation_indices() {
            let frame = frame?;
            match consolidated.as_mut() {
                Some(df) => {
                    df.vstack_mut(&frame)?;
                }
                None => consolidated = Some(frame),
            }
        }
        match consolidated {
            Some(df) => Ok(df),
            None => empty_indices_frame(),
        }
    }

    /// Removes the recovery directory unless temporary files are kept.
    pub fn clear_temp_files(&self) -> PipelineResult<()> {
        match &self.recovery {
            Some(store) if !self.keep_temp_files => store.clear(),
            _ => Ok(()),
        }
    }

    fn pair_count(&self) -> usize {
        self.models.len() * self.scenarios.len()
    }

    fn metadata(&self, city: &str, model: &str, scenario: &str) -> SeriesMetadata {
        let (latitude, longitude) = self
            .cities
            .get(city)
            .map(|c| c.coordinates())
            .unwrap_or((f64::NAN, f64::NAN));
        SeriesMetadata {
            city: city.to_string(),
            model: model.to_string(),
            scenario: scenario.to_string(),
            latitude,
            longitude,
        }
    }

    fn start_pair(&mut self, pair_index: usize) -> PairProgress {
        let model = self.models[pair_index / self.scenarios.len()].clone();
        let scenario = self.scenarios[pair_index % self.scenarios.len()].clone();

        let recovered = self
            .recovery
            .as_ref()
            .and_then(|store| store.load(&model, &scenario.name))
            .unwrap_or_default();

        let pending = self
            .cities
            .keys()
            .filter(|city| !recovered.contains_key(*city))
            .count();

        let grid = if pending == 0 {
            info!(
                "Found recovery data for all cities under model '{}' and scenario '{}'",
                model, scenario.name
            );
            None
        } else {
            match self.source.open(&model, &scenario) {
                Ok(grid) => Some(grid),
                Err(PipelineError::MissingGridFile(path)) => {
                    warn!(
                        "Skipping model '{}', scenario '{}': no grid file at '{}'",
                        model,
                        scenario.name,
                        path.display()
                    );
                    None
                }
                Err(e) => {
                    error!(
                        "Skipping model '{}', scenario '{}': {}",
                        model, scenario.name, e
                    );
                    None
                }
            }
        };

        PairProgress {
            model,
            scenario,
            grid,
            recovered,
            buffer: Snapshot::new(),
            city_index: 0,
            extracted: false,
        }
    }

    /// Processes the next city of a pair; `None` when the city yields nothing.
    fn step_city(&mut self, pair: &mut PairProgress, city: &str) -> Option<ExtractedSeries> {
        if let Some(entry) = pair.recovered.remove(city) {
            self.state.count_processed(&entry.metadata);
            let item = ExtractedSeries {
                series: entry.series.clone(),
                metadata: entry.metadata.clone(),
            };
            pair.buffer.insert(city.to_string(), entry);
            self.export(&item);
            return Some(item);
        }

        let grid = pair.grid.as_ref()?;
        let metadata = self.metadata(city, &pair.model, &pair.scenario.name);

        match self.extract_series(grid, &pair.scenario, &metadata) {
            Ok(series) if !series.is_empty() => {
                self.state.count_processed(&metadata);
                let item = ExtractedSeries { series, metadata };
                pair.buffer.insert(
                    city.to_string(),
                    SnapshotEntry {
                        series: item.series.clone(),
                        metadata: item.metadata.clone(),
                    },
                );
                pair.extracted = true;
                self.export(&item);
                Some(item)
            }
            Ok(_) => {
                self.state.count_error(&metadata, "no data");
                None
            }
            Err(e) => {
                self.state.count_error(&metadata, &e.to_string());
                None
            }
        }
    }

    fn extract_series(
        &self,
        grid: &Grid,
        scenario: &ScenarioConfig,
        metadata: &SeriesMetadata,
    ) -> PipelineResult<PrecipitationSeries> {
        let series = extract(grid, metadata.latitude, metadata.longitude)?;
        if self.restrict_to_period {
            Ok(filter_by_date(&series, scenario.start_date, scenario.end_date))
        } else {
            Ok(series)
        }
    }

    fn export(&mut self, item: &ExtractedSeries) {
        if let Some(exporter) = self.exporter.as_mut() {
            if let Err(e) = exporter.export(&item.series, &item.metadata) {
                error!(
                    "Could not export series. Details: {} ({})",
                    item.metadata.details(),
                    e
                );
            }
        }
    }

    fn finish_pair(&mut self, pair: PairProgress) {
        if !pair.extracted {
            return;
        }
        if let Some(store) = &self.recovery {
            if let Err(e) = store.dump(&pair.model, &pair.scenario.name, &pair.buffer) {
                error!(
                    "Could not save recovery file for model '{}', scenario '{}': {}",
                    pair.model, pair.scenario.name, e
                );
            }
        }
    }
}

/// Work in progress for one (model, scenario) pair.
struct PairProgress {
    model: String,
    scenario: ScenarioConfig,
    grid: Option<Grid>,
    recovered: Snapshot,
    buffer: Snapshot,
    city_index: usize,
    extracted: bool,
}

/// Pull-based stream of the successful series of a run.
///
/// The run state is finalized when the stream is exhausted.
pub struct SeriesStream<'a, S: GridSource> {
    consolidator: &'a mut Consolidator<S>,
    cities: Vec<String>,
    pair_index: usize,
    current: Option<PairProgress>,
    finished: bool,
}

impl<'a, S: GridSource> SeriesStream<'a, S> {
    fn new(consolidator: &'a mut Consolidator<S>) -> Self {
        info!(
            "Starting extraction of precipitation data for {} cities, {} climate model(s) and \
             {} scenario(s)",
            consolidator.cities.len(),
            consolidator.models.len(),
            consolidator.scenarios.len()
        );
        let finished = consolidator.started;
        if finished {
            warn!("The combinations of this run were already visited, nothing left to extract");
        }
        consolidator.started = true;
        let cities = consolidator.cities.keys().cloned().collect();
        SeriesStream {
            consolidator,
            cities,
            pair_index: 0,
            current: None,
            finished,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.consolidator.state
    }
}

impl<S: GridSource> Iterator for SeriesStream<'_, S> {
    type Item = ExtractedSeries;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            let mut pair = match self.current.take() {
                Some(pair) => pair,
                None if self.pair_index < self.consolidator.pair_count() => {
                    self.consolidator.start_pair(self.pair_index)
                }
                None => {
                    self.consolidator.state.finalize();
                    self.finished = true;
                    return None;
                }
            };

            if pair.city_index >= self.cities.len() {
                let scenarios = self.consolidator.scenarios.len();
                if (self.pair_index + 1) % scenarios == 0 {
                    info!("Completed processing of model '{}'", pair.model);
                }
                self.consolidator.finish_pair(pair);
                self.pair_index += 1;
                continue;
            }

            let city = self.cities[pair.city_index].clone();
            pair.city_index += 1;
            let item = self.consolidator.step_city(&mut pair, &city);
            self.current = Some(pair);
            if item.is_some() {
                return item;
            }
        }
    }
}

/// Pull-based stream of per-combination indices tables.
pub struct IndicesStream<'a, S: GridSource> {
    series: SeriesStream<'a, S>,
}

impl<S: GridSource> IndicesStream<'_, S> {
    pub fn state(&self) -> &PipelineState {
        self.series.state()
    }
}

impl<S: GridSource> Iterator for IndicesStream<'_, S> {
    type Item = PipelineResult<DataFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let extracted = self.series.next()?;
        let records = compute_indices(&extracted.series);
        Some(indices_frame(&records, &extracted.metadata))
    }
}
