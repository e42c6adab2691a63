//! # RRT-Connect Benchmark

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::Vector2;

use gbp_lib::{
    planner::{PlannerParams, RrtConnect, SearchOutcome, SearchRequest},
    state::State,
    terrain::{PerlinParams, TerrainMap, TerrainMapParams, TerrainModel},
};

fn rrt_connect_benchmark(c: &mut Criterion) {
    // ---- Build random terrain ----

    let terrain = TerrainMap::generate_random(
        TerrainMapParams {
            cell_size_m: 0.1,
            num_cells: Vector2::new(240, 240),
            origin_m: Vector2::new(-12.0, -12.0),
        },
        &PerlinParams {
            seed: 4,
            scale: 0.15,
            amplitude_m: 0.6,
            obstacle_height_m: Some(0.35),
        },
    )
    .unwrap();

    let params = PlannerParams {
        max_step_size: 0.75,
        max_traversability_cost: 0.85,
        traversability_cost_weight: 2.0,
        seed: Some(1),
        ..Default::default()
    };

    let on_ground = |x: f64, y: f64| {
        let z = terrain.elevation(&Vector2::new(x, y)).unwrap() + params.nominal_body_height_m;
        State::at_rest(x, y, z, 0.0)
    };
    let start = on_ground(-8.0, -6.0);
    let goal = on_ground(8.0, 6.0);

    let request = SearchRequest {
        start,
        goal,
        terrain: &terrain,
        time_budget: Duration::from_secs(5),
    };

    // ---- Bench a fresh search each iteration ----

    c.bench_function("RrtConnect::run", |b| {
        b.iter(|| {
            let mut planner = RrtConnect::new(params.clone()).unwrap();
            matches!(planner.run(&request).unwrap(), SearchOutcome::Success(_))
        })
    });

    // ---- Bench with shortcutting and a reused goal tree ----

    let mut planner = RrtConnect::new(PlannerParams {
        shortcut_path: true,
        reuse_goal_tree: true,
        ..params.clone()
    })
    .unwrap();

    c.bench_function("RrtConnect::run::reuse_goal_tree", |b| {
        b.iter(|| matches!(planner.run(&request).unwrap(), SearchOutcome::Success(_)))
    });
}

criterion_group!(benches, rrt_connect_benchmark);
criterion_main!(benches);
