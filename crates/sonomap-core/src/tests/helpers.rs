//! Scene factories and run helpers shared by the scenario tests.

use std::sync::atomic::AtomicBool;

use glam::DVec3;

use crate::atmosphere::AttenuationParameters;
use crate::orchestrator::{InMemorySink, Orchestrator, OrchestratorConfig, ReceiverLevel};
use crate::scene::{Receiver, Scene, SceneConfig, Source};
use crate::spectrum::{Spectrum, SPECTRUM_SIZE};

/// Flat 93 dB source spectrum used across the reference scenarios.
pub const REFERENCE_POWER: Spectrum = [93.0; SPECTRUM_SIZE];

/// Install the test log subscriber once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Meteorology of the documented reference scenes: 10 degrees C, 70%
/// relative humidity, uniform wind rose.
pub fn reference_parameters() -> AttenuationParameters {
    AttenuationParameters::default()
        .with_temperature(10.0)
        .with_humidity(70.0)
}

/// One source, one receiver, unobstructed flat ground with a uniform
/// ground coefficient.
pub fn flat_pair_scene(g: f64, source: DVec3, receiver: DVec3) -> Scene {
    Scene::builder()
        .relief(relief::Relief::builder().default_ground(g).build().expect("flat relief"))
        .parameters(reference_parameters())
        .config(SceneConfig {
            default_ground: g,
            ..SceneConfig::default()
        })
        .source(Source::point(1, source, REFERENCE_POWER))
        .receiver(Receiver {
            id: 1,
            position: receiver,
        })
        .build()
        .expect("valid scene")
}

/// Run the orchestrator serially with pruning disabled and return the
/// levels ordered by receiver index.
pub fn computed_levels(scene: &Scene) -> Vec<ReceiverLevel> {
    let config = OrchestratorConfig {
        threads: 1,
        maximum_error: 0.0,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(scene, config).expect("valid config");
    let sink = InMemorySink::new();
    orchestrator.run(&sink, &AtomicBool::new(false));
    sink.into_sorted()
}

/// Assert two spectra agree within `tolerance` dB on every band.
pub fn assert_spectrum_close(actual: &Spectrum, expected: &Spectrum, tolerance: f64) {
    for band in 0..SPECTRUM_SIZE {
        assert!(
            (actual[band] - expected[band]).abs() <= tolerance,
            "band {band}: {} vs expected {} (tolerance {tolerance})",
            actual[band],
            expected[band]
        );
    }
}
