//! # Global Body Planner Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{planner::PlannerParams, state::State};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the global body planner, loaded from `global_body_planner.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbpParams {
    /// The state to plan towards.
    pub goal: State,

    /// Wall clock time allowed for each search, in seconds.
    pub time_budget_s: f64,

    /// Time between replans while replanning is allowed, in seconds.
    pub replan_interval_s: f64,

    /// If false a plan is only made when none exists yet.
    #[serde(default = "default_true")]
    pub replanning_allowed: bool,

    /// Number of consecutive failed searches tolerated before a planning failure is reported.
    pub max_retries: usize,

    /// Robot states older than this are stale and won't be planned from, in seconds.
    #[serde(default)]
    pub max_state_age_s: Option<f64>,

    /// Terrain older than this is stale and won't be planned over, in seconds.
    #[serde(default)]
    pub max_terrain_age_s: Option<f64>,

    /// Save a report of each new plan into the session directory.
    #[serde(default)]
    pub save_reports: bool,

    #[serde(default)]
    pub algorithm: Algorithm,

    pub planner: PlannerParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The search algorithm used by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    RrtConnect,
    Rrt,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::RrtConnect
    }
}

fn default_true() -> bool {
    true
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_load_params() {
        let params: GbpParams = util::params::from_str(
            r#"
            time_budget_s = 0.5
            replan_interval_s = 2.0
            max_retries = 3
            max_state_age_s = 0.25

            [goal]
            position_m = [8.0, 0.0, 0.3]

            [planner]
            goal_bias = 0.1
            max_step_size = 0.8
            goal_acceptance_radius = 0.3
            connect_tolerance = 0.05
            max_iterations = 2000
            max_connect_steps = 30
            edge_resolution = 0.1
            nominal_body_height_m = 0.3
            min_body_height_m = 0.2
            max_body_height_m = 0.4
            max_slope = 0.5
            max_traversability_cost = 0.8
            max_speed_ms = 0.8
            traversability_cost_weight = 2.0
            seed = 3

            [planner.bounds]
            min_m = [-10.0, -5.0]
            max_m = [10.0, 5.0]

            [planner.distance_weights]
            position = 1.0
            velocity = 0.2
            yaw = 0.1
            "#,
        )
        .unwrap();

        assert!(params.replanning_allowed);
        assert_eq!(params.algorithm, Algorithm::RrtConnect);
        assert_eq!(params.max_state_age_s, Some(0.25));
        assert_eq!(params.max_terrain_age_s, None);
        assert_eq!(params.goal, State::at_rest(8.0, 0.0, 0.3, 0.0));
        assert_eq!(params.planner.seed, Some(3));
        assert!(!params.planner.shortcut_path);
        assert_eq!(params.planner.bounds.min_m.y, -5.0);
    }
}
