//! Concurrent noise-map computation over a partitioned receiver set.
//!
//! The orchestrator slices the scene extent into cells, fans the receivers
//! of each cell out over a rayon pool and runs the path search and the
//! attenuation evaluation per receiver. Energy accumulates in linear watts
//! per band and only turns into decibels when a receiver is flushed to the
//! output sink. Because each receiver's accumulation is sequential in
//! search order, the computed levels do not depend on the thread count;
//! only the delivery order does, and [`InMemorySink::into_sorted`] restores
//! a canonical order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver as ChannelReceiver, SyncSender};
use std::sync::Mutex;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::attenuation::{apply_li, evaluate};
use crate::path::PropagationPath;
use crate::pathfinder::{PathFinder, PathVisitor, SearchControl};
use crate::scene::Scene;
use crate::spectrum::{db_to_w, w_to_db, Spectrum, SPECTRUM_SIZE};

/// Level reported for bands that received no energy, dB.
pub const LEVEL_FLOOR_DB: f64 = -99.0;

/// Invalid orchestrator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Grid dimension must be a positive length.
    #[error("grid dimension must be positive, got {0}")]
    NonPositiveGrid(f64),
    /// The pruning budget cannot be negative.
    #[error("maximum error must be non-negative, got {0}")]
    NegativeError(f64),
    /// A bounded channel needs room for at least one result.
    #[error("queue capacity must be at least 1")]
    ZeroCapacity,
    /// The worker pool could not be built.
    #[error("worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Tuning knobs of a map computation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OrchestratorConfig {
    /// Worker threads; 0 uses every core, 1 runs serially.
    pub threads: usize,
    /// Cell edge length of the receiver partition, metres.
    pub grid_dimension: f64,
    /// Pruning budget in dB; once the remaining sources cannot move a
    /// receiver's total by this much they are skipped. 0 disables pruning.
    pub maximum_error: f64,
    /// Capacity of [`ChannelSink`] queues built from this config.
    pub queue_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            grid_dimension: 512.0,
            maximum_error: 0.1,
            queue_capacity: 1024,
        }
    }
}

impl OrchestratorConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.grid_dimension > 0.0) {
            return Err(ConfigError::NonPositiveGrid(self.grid_dimension));
        }
        if !(self.maximum_error >= 0.0) {
            return Err(ConfigError::NegativeError(self.maximum_error));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Finished per-band levels of one receiver, dB.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReceiverLevel {
    /// Index into [`Scene::receivers`].
    pub receiver_index: usize,
    /// Caller-assigned receiver identifier.
    pub receiver_id: u64,
    /// Accumulated level per octave band, floored at [`LEVEL_FLOOR_DB`].
    pub levels: Spectrum,
}

/// Destination of finished receiver levels.
///
/// Implementations are shared across workers, so `push` must be safe to
/// call concurrently.
pub trait OutputSink: Send + Sync {
    /// Deliver one finished receiver.
    fn push(&self, level: ReceiverLevel);
}

/// Sink that buffers everything in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    results: Mutex<Vec<ReceiverLevel>>,
}

impl InMemorySink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the sink, returning results ordered by receiver index.
    #[must_use]
    pub fn into_sorted(self) -> Vec<ReceiverLevel> {
        let mut results = self.results.into_inner().unwrap_or_else(|e| e.into_inner());
        results.sort_by_key(|r| r.receiver_index);
        results
    }
}

impl OutputSink for InMemorySink {
    fn push(&self, level: ReceiverLevel) {
        if let Ok(mut results) = self.results.lock() {
            results.push(level);
        }
    }
}

/// Sink that forwards results over a bounded channel; workers block when
/// the consumer falls behind.
pub struct ChannelSink {
    sender: SyncSender<ReceiverLevel>,
}

impl ChannelSink {
    /// Build a sink and the receiving end of its queue.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, ChannelReceiver<ReceiverLevel>) {
        let (sender, receiver) = sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl OutputSink for ChannelSink {
    fn push(&self, level: ReceiverLevel) {
        if self.sender.send(level).is_err() {
            warn!("output channel closed, dropping receiver result");
        }
    }
}

/// One cell of the receiver partition.
#[derive(Debug, Clone)]
pub struct GridCell {
    /// Row-major cell coordinates.
    pub row: usize,
    /// Column within the row.
    pub column: usize,
    /// Indices into [`Scene::receivers`] falling inside this cell.
    pub receivers: Vec<usize>,
}

/// Receiver partition of the scene extent into square cells.
#[derive(Debug, Clone, Default)]
pub struct NoiseMapGrid {
    cells: Vec<GridCell>,
}

impl NoiseMapGrid {
    /// Assign every receiver to a cell no larger than `dimension` on a side.
    #[must_use]
    pub fn partition(scene: &Scene, dimension: f64) -> Self {
        let extent = scene.extent();
        let size = extent.size();
        let columns = (size.x / dimension).ceil().max(1.0) as usize;
        let rows = (size.y / dimension).ceil().max(1.0) as usize;
        let mut buckets = vec![Vec::new(); rows * columns];
        for (index, receiver) in scene.receivers.iter().enumerate() {
            let offset = receiver.position.truncate() - extent.min;
            let column = ((offset.x / dimension) as usize).min(columns - 1);
            let row = ((offset.y / dimension) as usize).min(rows - 1);
            buckets[row * columns + column].push(index);
        }
        let cells = buckets
            .into_iter()
            .enumerate()
            .map(|(i, receivers)| GridCell {
                row: i / columns,
                column: i % columns,
                receivers,
            })
            .collect();
        Self { cells }
    }

    /// Every cell, row major.
    #[must_use]
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// Number of cells holding at least one receiver.
    #[must_use]
    pub fn populated_cells(&self) -> usize {
        self.cells.iter().filter(|c| !c.receivers.is_empty()).count()
    }
}

/// Drives the path search and evaluation over a whole scene.
pub struct Orchestrator<'a> {
    scene: &'a Scene,
    config: OrchestratorConfig,
    pool: rayon::ThreadPool,
}

impl<'a> Orchestrator<'a> {
    /// Validate the configuration and build the worker pool.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for out-of-range settings or a pool that
    /// cannot start.
    pub fn new(scene: &'a Scene, config: OrchestratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()?;
        Ok(Self {
            scene,
            config,
            pool,
        })
    }

    /// Compute every receiver and flush the levels to `sink`.
    ///
    /// `cancel` is checked between receivers; on cancellation the run stops
    /// early and already-flushed receivers stand.
    pub fn run(&self, sink: &dyn OutputSink, cancel: &AtomicBool) {
        let grid = NoiseMapGrid::partition(self.scene, self.config.grid_dimension);
        debug!(
            cells = grid.cells().len(),
            populated = grid.populated_cells(),
            threads = self.config.threads,
            "map computation start"
        );
        for cell in grid.cells() {
            if cell.receivers.is_empty() {
                continue;
            }
            if cancel.load(Ordering::Relaxed) {
                debug!(row = cell.row, column = cell.column, "cancelled before cell");
                return;
            }
            self.pool.install(|| {
                cell.receivers.par_iter().for_each(|&receiver_index| {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    sink.push(self.receiver_level(receiver_index));
                });
            });
            debug!(
                row = cell.row,
                column = cell.column,
                receivers = cell.receivers.len(),
                "cell done"
            );
        }
    }

    /// Accumulated levels of a single receiver.
    #[must_use]
    pub fn receiver_level(&self, receiver_index: usize) -> ReceiverLevel {
        let mut accumulator = Accumulator {
            scene: self.scene,
            maximum_error: self.config.maximum_error,
            watts: [0.0; SPECTRUM_SIZE],
        };
        PathFinder::new(self.scene).find_receiver_paths(receiver_index, &mut accumulator);
        let mut levels = [LEVEL_FLOOR_DB; SPECTRUM_SIZE];
        for (level, &watts) in levels.iter_mut().zip(accumulator.watts.iter()) {
            if watts > 0.0 {
                *level = w_to_db(watts).max(LEVEL_FLOOR_DB);
            }
        }
        ReceiverLevel {
            receiver_index,
            receiver_id: self.scene.receivers[receiver_index].id,
            levels,
        }
    }
}

/// Per-receiver watt accumulator with error-bound pruning.
///
/// Paths arrive nearest source first. Before a path is evaluated, its best
/// possible contribution is bounded by spherical divergence alone; once that
/// bound cannot move the accumulated total by `maximum_error` dB, no farther
/// source can either, and the rest of the search is skipped.
struct Accumulator<'s> {
    scene: &'s Scene,
    maximum_error: f64,
    watts: [f64; SPECTRUM_SIZE],
}

impl Accumulator<'_> {
    fn within_budget(&self, path: &PropagationPath) -> bool {
        if self.maximum_error <= 0.0 {
            return false;
        }
        let total: f64 = self.watts.iter().sum();
        if total <= 0.0 {
            return false;
        }
        let divergence = 20.0 * path.divergence_distance().max(1.0).log10() + 11.0;
        let power = &self.scene.sources[path.source_index].power;
        let bound: f64 = power.iter().map(|&p| db_to_w(p - divergence)).sum();
        w_to_db(total + bound) - w_to_db(total) < self.maximum_error
    }
}

impl PathVisitor for Accumulator<'_> {
    fn on_path(&mut self, path: PropagationPath) -> SearchControl {
        if self.within_budget(&path) {
            debug!(
                source = path.source_index,
                receiver = path.receiver_index,
                "remaining sources below error budget"
            );
            return SearchControl::SkipReceiver;
        }
        let source = &self.scene.sources[path.source_index];
        let attenuation = evaluate(&path, &self.scene.parameters);
        let directivity = source.directivity.map_or([0.0; SPECTRUM_SIZE], |pattern| {
            self.scene.directivity.attenuation(
                pattern,
                path.ray_directivity.yaw.to_radians(),
                path.ray_directivity.pitch.to_radians(),
            )
        });
        for band in 0..SPECTRUM_SIZE {
            let level = apply_li(
                source.power[band] + directivity[band] + attenuation[band],
                path.li,
            );
            self.watts[band] += db_to_w(level);
        }
        SearchControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::AttenuationParameters;
    use crate::scene::{Receiver, Source};
    use glam::DVec3;
    use relief::Relief;

    fn flat_scene(receivers: &[DVec3]) -> Scene {
        let mut builder = Scene::builder()
            .relief(Relief::builder().build().expect("flat relief"))
            .parameters(AttenuationParameters::default())
            .source(Source::point(
                1,
                DVec3::new(0.0, 0.0, 1.0),
                [93.0; SPECTRUM_SIZE],
            ));
        for (i, &position) in receivers.iter().enumerate() {
            builder = builder.receiver(Receiver {
                id: i as u64 + 1,
                position,
            });
        }
        builder.build().expect("valid scene")
    }

    fn run_levels(scene: &Scene, config: OrchestratorConfig) -> Vec<ReceiverLevel> {
        let orchestrator = Orchestrator::new(scene, config).expect("valid config");
        let sink = InMemorySink::new();
        orchestrator.run(&sink, &AtomicBool::new(false));
        sink.into_sorted()
    }

    #[test]
    fn test_config_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        let bad = OrchestratorConfig {
            grid_dimension: 0.0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::NonPositiveGrid(_))));
        let bad = OrchestratorConfig {
            maximum_error: -1.0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::NegativeError(_))));
        let bad = OrchestratorConfig {
            queue_capacity: 0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn test_grid_partition_covers_all_receivers() {
        let scene = flat_scene(&[
            DVec3::new(10.0, 10.0, 1.5),
            DVec3::new(900.0, 10.0, 1.5),
            DVec3::new(10.0, 900.0, 1.5),
        ]);
        let grid = NoiseMapGrid::partition(&scene, 512.0);
        let assigned: usize = grid.cells().iter().map(|c| c.receivers.len()).sum();
        assert_eq!(assigned, 3);
        assert_eq!(grid.populated_cells(), 3);
    }

    #[test]
    fn test_closer_receiver_is_louder() {
        let scene = flat_scene(&[
            DVec3::new(50.0, 0.0, 1.5),
            DVec3::new(400.0, 0.0, 1.5),
        ]);
        let results = run_levels(&scene, OrchestratorConfig::default());
        assert_eq!(results.len(), 2);
        assert!(results[0].levels[4] > results[1].levels[4] + 10.0);
    }

    #[test]
    fn test_unreached_receiver_reports_floor() {
        let scene = flat_scene(&[DVec3::new(5000.0, 0.0, 1.5)]);
        let results = run_levels(&scene, OrchestratorConfig::default());
        assert_eq!(results[0].levels, [LEVEL_FLOOR_DB; SPECTRUM_SIZE]);
    }

    #[test]
    fn test_thread_count_does_not_change_levels() {
        let receivers: Vec<DVec3> = (0..8)
            .map(|i| DVec3::new(40.0 + 30.0 * f64::from(i), 15.0, 1.5))
            .collect();
        let scene = flat_scene(&receivers);
        let serial = run_levels(
            &scene,
            OrchestratorConfig {
                threads: 1,
                ..OrchestratorConfig::default()
            },
        );
        let parallel = run_levels(
            &scene,
            OrchestratorConfig {
                threads: 4,
                ..OrchestratorConfig::default()
            },
        );
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_cancellation_stops_early() {
        let scene = flat_scene(&[DVec3::new(50.0, 0.0, 1.5)]);
        let orchestrator =
            Orchestrator::new(&scene, OrchestratorConfig::default()).expect("valid config");
        let sink = InMemorySink::new();
        orchestrator.run(&sink, &AtomicBool::new(true));
        assert!(sink.into_sorted().is_empty());
    }

    #[test]
    fn test_channel_sink_delivers() {
        let scene = flat_scene(&[DVec3::new(50.0, 0.0, 1.5)]);
        let orchestrator =
            Orchestrator::new(&scene, OrchestratorConfig::default()).expect("valid config");
        let (sink, receiver) = ChannelSink::new(16);
        orchestrator.run(&sink, &AtomicBool::new(false));
        drop(sink);
        let results: Vec<ReceiverLevel> = receiver.iter().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].receiver_id, 1);
    }

    #[test]
    fn test_pruning_stays_within_budget() {
        // One dominant source next to the receiver, a handful far away.
        let mut builder = Scene::builder()
            .relief(Relief::builder().build().expect("flat relief"))
            .source(Source::point(
                1,
                DVec3::new(0.0, 0.0, 1.0),
                [100.0; SPECTRUM_SIZE],
            ));
        for i in 0..5u32 {
            builder = builder.source(Source::point(
                u64::from(10 + i),
                DVec3::new(900.0 + 20.0 * f64::from(i), 0.0, 1.0),
                [60.0; SPECTRUM_SIZE],
            ));
        }
        let scene = builder
            .receiver(Receiver {
                id: 1,
                position: DVec3::new(20.0, 0.0, 1.5),
            })
            .build()
            .expect("valid scene");

        let budget = 0.5;
        let full = run_levels(
            &scene,
            OrchestratorConfig {
                maximum_error: 0.0,
                ..OrchestratorConfig::default()
            },
        );
        let pruned = run_levels(
            &scene,
            OrchestratorConfig {
                maximum_error: budget,
                ..OrchestratorConfig::default()
            },
        );
        for band in 0..SPECTRUM_SIZE {
            assert!((full[0].levels[band] - pruned[0].levels[band]).abs() < budget);
        }
    }
}
