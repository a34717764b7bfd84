//! Cross-module scenario tests.
//!
//! Module-level unit tests live next to the code they cover; everything
//! here exercises the whole pipeline (scene, path finder, evaluator,
//! orchestrator) against reference scenarios and invariants:
//!
//! - `reference.rs`: end-to-end levels on documented scenes, mirror
//!   symmetry, degenerate-scene fallback
//! - `reflections.rs`: reflection-order convergence in a wall corridor
//! - `barriers.rs`: body-barrier level ordering against reference deltas
//! - `roundtrip.rs`: path serialization round-trips, seeded random scenes
//! - `properties.rs`: property tests for the wind rose and mean plane
//! - `helpers.rs`: scene factories shared by the scenario tests

mod helpers;
mod reflections;
