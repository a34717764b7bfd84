use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{DVec2, DVec3};
use relief::{Building, GroundZone, Relief, TerrainMesh};

/// Dense urban block: a grid of box buildings over sloping terrain.
fn urban_substrate(blocks_per_side: usize) -> Relief {
    let span = blocks_per_side as f64 * 50.0;
    let cols = blocks_per_side + 2;
    let heights: Vec<f64> = (0..cols * cols)
        .map(|i| (i % cols) as f64 * 0.5)
        .collect();
    let mesh = TerrainMesh::from_elevation_grid(
        DVec2::ZERO,
        span / (cols - 1) as f64,
        cols,
        cols,
        &heights,
    )
    .unwrap();

    let mut builder = Relief::builder().terrain(mesh).default_ground(0.3);
    for bx in 0..blocks_per_side {
        for by in 0..blocks_per_side {
            let x0 = 10.0 + bx as f64 * 50.0;
            let y0 = 10.0 + by as f64 * 50.0;
            builder = builder.building(Building::new(
                vec![
                    DVec2::new(x0, y0),
                    DVec2::new(x0 + 30.0, y0),
                    DVec2::new(x0 + 30.0, y0 + 30.0),
                    DVec2::new(x0, y0 + 30.0),
                ],
                6.0 + ((bx + by) % 4) as f64 * 3.0,
                vec![0.1; 8],
            ));
        }
    }
    builder
        .ground_zone(GroundZone::new(
            vec![
                DVec2::new(0.0, 0.0),
                DVec2::new(span, 0.0),
                DVec2::new(span, span / 2.0),
                DVec2::new(0.0, span / 2.0),
            ],
            0.8,
        ))
        .build()
        .unwrap()
}

fn bench_cut_profile(c: &mut Criterion) {
    let mut group = c.benchmark_group("cut_profile");
    for blocks in [4usize, 8, 16] {
        let relief = urban_substrate(blocks);
        let span = blocks as f64 * 50.0;
        group.bench_with_input(
            BenchmarkId::from_parameter(blocks * blocks),
            &relief,
            |b, relief| {
                b.iter(|| {
                    // Diagonal cut through the whole block grid.
                    let profile = relief.cut_profile(
                        black_box(DVec3::new(2.0, 3.0, 1.0)),
                        black_box(DVec3::new(span - 2.0, span - 3.0, 1.5)),
                    );
                    black_box(profile.points.len())
                });
            },
        );
    }
    group.finish();
}

fn bench_free_field(c: &mut Criterion) {
    let relief = urban_substrate(8);
    c.bench_function("is_free_field_400m", |b| {
        b.iter(|| {
            relief.is_free_field(
                black_box(DVec3::new(2.0, 3.0, 1.0)),
                black_box(DVec3::new(398.0, 397.0, 1.5)),
            )
        });
    });
}

fn bench_height_queries(c: &mut Criterion) {
    let relief = urban_substrate(8);
    c.bench_function("height_at_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for i in 0..10_000 {
                let t = i as f64 / 10_000.0;
                acc += relief.height_at(black_box(DVec2::new(t * 400.0, 200.0)));
            }
            black_box(acc)
        });
    });
}

criterion_group!(
    benches,
    bench_cut_profile,
    bench_free_field,
    bench_height_queries
);
criterion_main!(benches);
