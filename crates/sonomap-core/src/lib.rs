//! # Sonomap core
//!
//! CNOSSOS-EU outdoor sound propagation: multi-path search and per-band
//! attenuation over a [`relief`] obstruction substrate.
//!
//! The engine is organised as a pipeline:
//!
//! - **Scene**: immutable geometry, sources, receivers and meteorology,
//!   validated once and shared read-only across workers
//! - **Path finder**: direct, diffracted (over tops and around vertical
//!   edges) and specularly reflected paths per source-receiver pair
//! - **Attenuation evaluator**: octave-band level drop along each path,
//!   mixing homogeneous and favourable conditions by the wind rose
//! - **Orchestrator**: cell-partitioned concurrent map computation with
//!   energy accumulation, error-bound pruning and pluggable output sinks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sonomap_core::{Orchestrator, OrchestratorConfig, InMemorySink, Scene};
//! use std::sync::atomic::AtomicBool;
//!
//! let scene = Scene::builder()
//!     .source(source)
//!     .receiver(receiver)
//!     .build()?;
//! let orchestrator = Orchestrator::new(&scene, OrchestratorConfig::default())?;
//! let sink = InMemorySink::new();
//! orchestrator.run(&sink, &AtomicBool::new(false));
//! for level in sink.into_sorted() {
//!     println!("{}: {:?}", level.receiver_id, level.levels);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atmosphere;
pub mod attenuation;
pub mod directivity;
pub mod orchestrator;
pub mod orientation;
pub mod path;
pub mod pathfinder;
pub mod scene;
pub mod spectrum;

#[cfg(test)]
mod tests;

pub use atmosphere::AttenuationParameters;
pub use attenuation::{apply_li, evaluate};
pub use directivity::{DirectivityProvider, DirectivityRecord, Omnidirectional, TabulatedDirectivity};
pub use orchestrator::{
    ChannelSink, ConfigError, InMemorySink, NoiseMapGrid, Orchestrator, OrchestratorConfig,
    OutputSink, ReceiverLevel, LEVEL_FLOOR_DB,
};
pub use orientation::Orientation;
pub use path::{build_path, PathPoint, PathPointKind, PathSegment, PropagationPath};
pub use pathfinder::{PathCollector, PathFinder, PathVisitor, SearchControl};
pub use scene::{
    Receiver, Scene, SceneBuilder, SceneConfig, SceneError, Source, SourceGeometry, SourceSample,
};
pub use spectrum::{Spectrum, SPECTRUM_SIZE};
