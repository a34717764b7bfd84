//! Reflection-order convergence between two absorbing walls.

use glam::{DVec2, DVec3};
use relief::{Relief, Screen};

use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::path::PathPointKind;
use crate::pathfinder::PathFinder;
use crate::scene::{Receiver, Scene, SceneConfig, Source};
use crate::spectrum::{total_level, SPECTRUM_SIZE};

use super::helpers::{init_logging, reference_parameters, REFERENCE_POWER};

/// Source and receiver sit between two slanted parallel walls of strongly
/// absorbing material, so the image series is summable and the total stays
/// close to the direct field.
fn walled_scene(reflection_order: u32) -> Scene {
    let alphas = vec![0.95; SPECTRUM_SIZE];
    let relief = Relief::builder()
        .screen(Screen::new(
            vec![DVec2::new(6.0, 0.0), DVec2::new(-5.0, 12.0)],
            8.0,
            alphas.clone(),
        ))
        .screen(Screen::new(
            vec![DVec2::new(14.0, 4.0), DVec2::new(3.0, 16.0)],
            8.0,
            alphas,
        ))
        .build()
        .expect("valid relief");
    Scene::builder()
        .relief(relief)
        .parameters(reference_parameters())
        .config(SceneConfig {
            reflection_order,
            ..SceneConfig::default()
        })
        .source(Source::point(1, DVec3::new(8.0, 5.5, 0.1), REFERENCE_POWER))
        .receiver(Receiver {
            id: 1,
            position: DVec3::new(4.5, 8.0, 1.6),
        })
        .build()
        .expect("valid scene")
}

fn receiver_total(scene: &Scene) -> f64 {
    let config = OrchestratorConfig {
        threads: 1,
        maximum_error: 0.0,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(scene, config).expect("valid config");
    total_level(&orchestrator.receiver_level(0).levels)
}

#[test]
fn test_high_orders_converge_on_the_direct_level() {
    init_logging();
    let direct = receiver_total(&walled_scene(0));
    for order in [1u32, 2, 3, 10, 50, 99] {
        let scene = walled_scene(order);
        let level = receiver_total(&scene);
        assert!(
            (level - direct).abs() < 3.0,
            "order {order}: {level} dB vs direct {direct} dB"
        );
        assert!(level > direct, "reflections add energy at order {order}");
    }
}

#[test]
fn test_path_count_tracks_the_order() {
    // Between two parallel walls every order contributes exactly two new
    // bounce sequences on top of the direct path.
    for order in 0..4u32 {
        let scene = walled_scene(order);
        let paths = PathFinder::new(&scene).receiver_paths(0);
        assert_eq!(paths.len(), 2 * order as usize + 1, "order {order}");
        let bounces: usize = paths
            .iter()
            .map(|p| p.count(PathPointKind::Reflection))
            .sum();
        assert_eq!(bounces, (order * (order + 1)) as usize, "order {order}");
    }
}

#[test]
fn test_order_increments_are_monotonic() {
    let mut previous = receiver_total(&walled_scene(0));
    for order in 1..=4 {
        let level = receiver_total(&walled_scene(order));
        assert!(level >= previous - 1e-9, "order {order} lost energy");
        previous = level;
    }
}
