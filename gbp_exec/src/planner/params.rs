//! # Planner Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters shared by all sampling based searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerParams {
    /// The region of the plane in which states may be sampled and planned through.
    pub bounds: Bounds,

    /// Probability in [0, 1] of sampling the goal state instead of a random state.
    pub goal_bias: f64,

    /// Maximum distance (in the planning metric) covered by a single extend step.
    pub max_step_size: f64,

    /// A state within this distance of the goal is considered to have reached it.
    pub goal_acceptance_radius: f64,

    /// A connect attempt succeeds once the two trees are within this distance of each other.
    pub connect_tolerance: f64,

    /// Maximum number of outer iterations in one search.
    pub max_iterations: usize,

    /// Maximum number of extend steps in one connect attempt.
    pub max_connect_steps: usize,

    /// Spacing between states checked along an edge, in planning metric units.
    pub edge_resolution: f64,

    /// Height of the body above the terrain given to sampled states, in meters.
    pub nominal_body_height_m: f64,

    /// Minimum allowed height of the body above the terrain, in meters.
    pub min_body_height_m: f64,

    /// Maximum allowed height of the body above the terrain, in meters.
    pub max_body_height_m: f64,

    /// Maximum terrain slope (rise over run) the body may stand on.
    pub max_slope: f64,

    /// Maximum traversability cost the body may stand on.
    pub max_traversability_cost: f64,

    /// Maximum planar body speed, in meters/second.
    pub max_speed_ms: f64,

    pub distance_weights: DistanceWeights,

    /// Weight of the mean traversability cost along an edge relative to its length.
    pub traversability_cost_weight: f64,

    /// If true successful paths are shortcut while time budget remains.
    #[serde(default)]
    pub shortcut_path: bool,

    /// If true the goal tree is kept between searches towards the same goal.
    #[serde(default)]
    pub reuse_goal_tree: bool,

    /// A kept goal tree larger than this is discarded instead.
    #[serde(default = "default_max_cached_goal_vertices")]
    pub max_cached_goal_vertices: usize,

    /// Seed for the random number generator. If `None` the generator is seeded from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// An axis aligned planar region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bounds {
    pub min_m: Vector2<f64>,
    pub max_m: Vector2<f64>,
}

/// Weights applied to each component of the planning distance metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DistanceWeights {
    pub position: f64,
    pub velocity: f64,
    pub yaw: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Bounds {
    pub fn contains(&self, point_m: &Vector2<f64>) -> bool {
        point_m.x >= self.min_m.x
            && point_m.x <= self.max_m.x
            && point_m.y >= self.min_m.y
            && point_m.y <= self.max_m.y
    }
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            bounds: Bounds {
                min_m: Vector2::new(-10.0, -10.0),
                max_m: Vector2::new(10.0, 10.0),
            },
            goal_bias: 0.05,
            max_step_size: 1.0,
            goal_acceptance_radius: 0.5,
            connect_tolerance: 0.1,
            max_iterations: 5000,
            max_connect_steps: 50,
            edge_resolution: 0.1,
            nominal_body_height_m: 0.3,
            min_body_height_m: 0.15,
            max_body_height_m: 0.45,
            max_slope: 0.6,
            max_traversability_cost: 0.9,
            max_speed_ms: 1.0,
            distance_weights: DistanceWeights {
                position: 1.0,
                velocity: 0.0,
                yaw: 0.0,
            },
            traversability_cost_weight: 1.0,
            shortcut_path: false,
            reuse_goal_tree: false,
            max_cached_goal_vertices: default_max_cached_goal_vertices(),
            seed: None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_max_cached_goal_vertices() -> usize {
    2000
}
