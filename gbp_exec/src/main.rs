//! # Global Body Planner Executable
//!
//! Runs the global body planner against a simulated robot walking over generated terrain. The
//! robot follows the current plan at a fixed speed while the planner replans in the background,
//! and each cycle is archived into the session directory.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{sync::Arc, thread, time::Instant};

use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use gbp_lib::{
    gbp::{GbpWorker, GlobalBodyPlanner, Plan},
    state::State,
    terrain::{PerlinParams, TerrainMap, TerrainMapParams, TerrainModel},
};
use util::{
    archive::Archiver,
    logger::{logger_init, LevelFilter},
    session::{self, Session},
    time::seconds_to_duration,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Terrain generation parameters, loaded from `terrain.toml`.
#[derive(Debug, Clone, Deserialize)]
struct TerrainParams {
    map: TerrainMapParams,
    perlin: PerlinParams,
}

/// Simulation parameters, loaded from `sim.toml`.
#[derive(Debug, Clone, Deserialize)]
struct SimParams {
    /// Where the robot starts.
    start: State,

    /// Maximum number of cycles to simulate.
    num_cycles: usize,

    /// Target period of one cycle, in seconds.
    cycle_period_s: f64,

    /// Period of the planner worker, in seconds.
    planner_period_s: f64,

    /// Speed the robot walks along the plan, in meters/second.
    speed_ms: f64,

    /// The simulation ends once the robot is this close to the goal, in meters.
    goal_tolerance_m: f64,
}

/// One row of the cycle archive.
#[derive(Debug, Serialize)]
struct CycleRecord {
    time_s: f64,
    x_m: f64,
    y_m: f64,
    z_m: f64,
    yaw_rad: f64,
    status: String,
    plan_states: usize,
    plan_cost: f64,
    consecutive_failures: usize,
    planning_failure: bool,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    let session = Session::new("gbp_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Global Body Planner\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let terrain_params: TerrainParams =
        util::params::load("terrain.toml").wrap_err("Could not load terrain params")?;
    let sim_params: SimParams =
        util::params::load("sim.toml").wrap_err("Could not load sim params")?;

    // ---- MODULE INIT ----

    let terrain = TerrainMap::generate_random(terrain_params.map, &terrain_params.perlin)
        .wrap_err("Failed to generate the terrain")?;
    if let Ok(range) = terrain.range() {
        info!(
            "Generated terrain with heights from {:.3} to {:.3} m",
            range.start, range.end
        );
    }
    session.save("terrain.json", terrain.clone());
    let terrain: Arc<dyn TerrainModel> = Arc::new(terrain);

    let planner =
        GlobalBodyPlanner::from_params_file().wrap_err("Failed to initialise the planner")?;

    // Stand the start and goal on the generated ground
    let body_height_m = planner.params().planner.nominal_body_height_m;
    let mut robot = on_terrain(&sim_params.start, terrain.as_ref(), body_height_m);
    let goal = on_terrain(&planner.params().goal, terrain.as_ref(), body_height_m);

    let worker = GbpWorker::spawn(planner, seconds_to_duration(sim_params.planner_period_s))
        .wrap_err("Failed to start the planner worker")?;
    let handle = worker.handle();

    handle.set_terrain(terrain)?;
    handle.set_goal(goal)?;
    handle.set_robot_state(robot)?;

    let mut archiver = Archiver::from_path(&session, "gbp_cycles.csv")
        .wrap_err("Failed to create the cycle archive")?;

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let cycle_period = seconds_to_duration(sim_params.cycle_period_s);
    let step_m = sim_params.speed_ms * sim_params.cycle_period_s;
    let mut goal_reached = false;

    for _ in 0..sim_params.num_cycles {
        let cycle_start = Instant::now();

        // ---- SIMULATION ----

        let plan = handle.current_plan()?;
        robot = advance_along(&robot, &plan, step_m);
        handle.set_robot_state(robot)?;

        // ---- ARCHIVING ----

        let status = handle.status()?;
        archiver
            .serialise(CycleRecord {
                time_s: session::get_elapsed_seconds(),
                x_m: robot.position_m.x,
                y_m: robot.position_m.y,
                z_m: robot.position_m.z,
                yaw_rad: robot.yaw_rad,
                status: format!("{:?}", status.status),
                plan_states: plan.states.len(),
                plan_cost: plan.cost,
                consecutive_failures: status.consecutive_failures,
                planning_failure: status.planning_failure,
            })
            .wrap_err("Failed to archive the cycle")?;

        if (robot.position2() - goal.position2()).norm() <= sim_params.goal_tolerance_m {
            info!("Goal reached");
            goal_reached = true;
            break;
        }

        // ---- CYCLE MANAGEMENT ----

        match cycle_period.checked_sub(cycle_start.elapsed()) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                (cycle_start.elapsed() - cycle_period).as_secs_f64()
            ),
        }
    }

    if !goal_reached {
        warn!(
            "Goal not reached after {} cycles, robot at {:?}",
            sim_params.num_cycles, robot.position_m
        );
    }

    // ---- SHUTDOWN ----

    worker.stop().wrap_err("Planner worker stopped with an error")?;

    info!("End of execution");
    session.exit();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Place the state at the given height above the terrain.
fn on_terrain(state: &State, terrain: &dyn TerrainModel, body_height_m: f64) -> State {
    let mut state = *state;
    match terrain.elevation(&state.position2()) {
        Some(e) => state.position_m.z = e + body_height_m,
        None => warn!("No terrain under {:?}", state.position_m),
    }
    state
}

/// Move the robot `step_m` along the plan, starting from the plan state nearest to it.
fn advance_along(robot: &State, plan: &Plan, step_m: f64) -> State {
    let nearest = match plan.nearest_index(robot) {
        Some(i) => i,
        None => return *robot,
    };

    let mut current = *robot;
    let mut remaining = step_m;

    for next in plan.states.iter().skip(nearest + 1) {
        let d = (next.position2() - current.position2()).norm();

        if d >= remaining && d > 0.0 {
            return current.interpolate(next, remaining / d);
        }

        remaining -= d;
        current = *next;
    }

    // Hold position at the end of the plan
    State {
        velocity_ms: nalgebra::Vector3::zeros(),
        ..current
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_advance_along() {
        let plan = Plan {
            states: vec![
                State::at_rest(0.0, 0.0, 0.3, 0.0),
                State::at_rest(1.0, 0.0, 0.3, 0.0),
                State::at_rest(1.0, 2.0, 0.3, 0.0),
            ],
            ..Plan::empty()
        };

        let next = advance_along(&State::at_rest(0.0, 0.0, 0.3, 0.0), &plan, 1.5);
        assert!((next.position_m.x - 1.0).abs() < 1e-12);
        assert!((next.position_m.y - 0.5).abs() < 1e-12);

        let end = advance_along(&next, &plan, 10.0);
        assert_eq!(end, State::at_rest(1.0, 2.0, 0.3, 0.0));

        let idle = advance_along(&next, &Plan::empty(), 1.0);
        assert_eq!(idle, next);
    }
}

