//! # Planner
//!
//! Sampling based searches through the body state space. Two algorithms are provided:
//! - [`Rrt`] - grows a single tree from the start towards randomly sampled states until it comes
//!   within the acceptance radius of the goal.
//! - [`RrtConnect`] - grows one tree from the start and one from the goal, attempting to join them
//!   on every iteration. This is the primary search used by the global body planner.
//!
//! Both are built on [`PlannerBase`], which owns the planner parameters and random number
//! generator and provides sampling, distance, steering and feasibility checking against a
//! [`TerrainModel`]. Both implement [`SearchAlgorithm`], which is how the global body planner
//! drives them.
//!
//! A search failing to find a path (running out of time or iterations, or having an infeasible
//! start or goal) is an expected outcome and is reported as [`SearchOutcome::Failure`]. Only a
//! broken internal invariant is reported as a [`SearchError`].

// ------------------------------------------------------------------------------------------------
// MODS
// ------------------------------------------------------------------------------------------------

mod params;
mod rrt;
mod rrt_connect;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use params::{Bounds, DistanceWeights, PlannerParams};
pub use rrt::{Direction, ExtendStatus, Rrt};
pub use rrt_connect::RrtConnect;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use nalgebra::{Vector2, Vector3};
use util::maths::get_ang_dist;

use crate::{graph::EdgeData, graph::GraphError, state::State, terrain::TerrainModel};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Most states an edge between two in-bounds states may be discretised into.
pub const MAX_EDGE_STEPS: usize = 100_000;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A search from a start state to a goal state.
pub trait SearchAlgorithm {
    /// Run one search, returning within the request's time budget.
    fn search(&mut self, request: &SearchRequest) -> Result<SearchOutcome, SearchError>;

    /// Name of the algorithm, for logging.
    fn name(&self) -> &'static str;

    /// Discard any state carried between searches.
    fn reset(&mut self) {}
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shared sampling, metric and feasibility functionality of the searches.
#[derive(Debug, Clone)]
pub struct PlannerBase {
    params: PlannerParams,
    rng: ChaCha8Rng,
}

/// The inputs to a single search.
#[derive(Clone, Copy)]
pub struct SearchRequest<'a> {
    pub start: State,
    pub goal: State,
    pub terrain: &'a dyn TerrainModel,

    /// Wall clock time the search may take.
    pub time_budget: Duration,
}

/// A successful search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// States from the start to the goal, every consecutive pair forming a feasible edge.
    pub path: Vec<State>,

    /// Total cost of the path.
    pub cost: f64,

    pub stats: SearchStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStats {
    /// Number of outer iterations performed.
    pub iterations: usize,

    /// Number of vertices in the tree rooted at the start.
    pub start_tree_vertices: usize,

    /// Number of vertices in the tree rooted at the goal, zero for single tree searches.
    pub goal_tree_vertices: usize,

    /// Number of vertices removed from a reused goal tree before the search.
    pub pruned_vertices: usize,

    /// Wall clock time taken by the search.
    pub solve_time: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Success(SearchResult),
    Failure(SearchFailure, SearchStats),
}

/// Reasons a search can fail without anything being wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchFailure {
    /// The time budget was used up.
    TimedOut,

    /// The iteration limit was reached.
    Exhausted,

    /// The start state is not feasible.
    StartInfeasible,

    /// The goal state is not feasible.
    GoalInfeasible,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Search produced a path containing an infeasible edge between states {0} and {1}")]
    InfeasiblePath(usize, usize),

    #[error("Invalid planner parameters: {0}")]
    InvalidParams(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PlannerBase {
    /// Create a new base, seeding the generator from `params.seed` if set.
    pub fn new(params: PlannerParams) -> Result<Self, SearchError> {
        Self::validate(&params)?;

        let rng = match params.seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };

        Ok(Self { params, rng })
    }

    pub fn params(&self) -> &PlannerParams {
        &self.params
    }

    /// Sample a state, returning `goal` with probability `goal_bias` and a uniformly random state
    /// otherwise.
    pub fn sample(&mut self, goal: &State, terrain: &dyn TerrainModel) -> State {
        if self.rng.gen_bool(self.params.goal_bias) {
            *goal
        } else {
            self.sample_uniform(terrain)
        }
    }

    /// Sample a state uniformly within the bounds.
    ///
    /// The body is placed at the nominal height above the terrain, with a uniform heading and a
    /// planar velocity drawn uniformly from the disc of allowed speeds.
    pub fn sample_uniform(&mut self, terrain: &dyn TerrainModel) -> State {
        let bounds = &self.params.bounds;

        let x = sample_range(&mut self.rng, bounds.min_m.x, bounds.max_m.x);
        let y = sample_range(&mut self.rng, bounds.min_m.y, bounds.max_m.y);
        let xy = Vector2::new(x, y);

        // Unknown terrain gives an infeasible state which the caller will reject
        let z = terrain.elevation(&xy).unwrap_or(0.0) + self.params.nominal_body_height_m;

        let yaw = sample_range(&mut self.rng, -std::f64::consts::PI, std::f64::consts::PI);

        // sqrt gives a uniform area density over the disc
        let speed = self.params.max_speed_ms * self.rng.gen::<f64>().sqrt();
        let heading = sample_range(&mut self.rng, -std::f64::consts::PI, std::f64::consts::PI);

        State::new(
            Vector3::new(x, y, z),
            Vector3::new(speed * heading.cos(), speed * heading.sin(), 0.0),
            yaw,
        )
    }

    /// Returns `true` if the body can be in the given state on the terrain.
    pub fn is_feasible(&self, state: &State, terrain: &dyn TerrainModel) -> bool {
        let p = &self.params;
        let xy = state.position2();

        if !p.bounds.contains(&xy) {
            return false;
        }

        let elevation = match terrain.elevation(&xy) {
            Some(e) => e,
            None => return false,
        };
        let height = state.position_m.z - elevation;
        if height < p.min_body_height_m || height > p.max_body_height_m {
            return false;
        }

        match terrain.slope(&xy) {
            Some(s) if s <= p.max_slope => (),
            _ => return false,
        }

        match terrain.traversability_cost(&xy) {
            Some(c) if c <= p.max_traversability_cost => (),
            _ => return false,
        }

        state.velocity_ms.xy().norm() <= p.max_speed_ms
    }

    /// Returns `true` if every state along the straight edge from `from` to `to` is feasible.
    pub fn edge_feasible(&self, from: &State, to: &State, terrain: &dyn TerrainModel) -> bool {
        self.check_edge(from, to, terrain).is_some()
    }

    /// Check the edge from `from` to `to`, returning its data if feasible.
    ///
    /// The edge is discretised at `edge_resolution` and every intermediate state plus `to` are
    /// checked. `from` is assumed to already be feasible. The cost is the edge length plus the
    /// weighted mean traversability cost of the checked states, scaled by the length.
    pub fn check_edge(
        &self,
        from: &State,
        to: &State,
        terrain: &dyn TerrainModel,
    ) -> Option<EdgeData> {
        let length = self.distance(from, to);

        // Discretise over whichever is longer so that a low position weight can't let an edge
        // jump over an obstacle
        let span = length.max((to.position_m - from.position_m).norm());
        let num_steps = (span / self.params.edge_resolution).ceil();

        // Longer than any edge between two feasible states
        if !(num_steps <= MAX_EDGE_STEPS as f64) {
            return None;
        }
        let num_steps = (num_steps as usize).max(1);

        let mut sub_path = Vec::with_capacity(num_steps);
        let mut total_trav_cost = 0.0;

        for i in 1..=num_steps {
            let state = if i == num_steps {
                *to
            } else {
                from.interpolate(to, i as f64 / num_steps as f64)
            };

            if !self.is_feasible(&state, terrain) {
                return None;
            }

            total_trav_cost += terrain
                .traversability_cost(&state.position2())
                .unwrap_or(0.0);
            sub_path.push(state);
        }

        let mean_trav_cost = total_trav_cost / num_steps as f64;

        Some(EdgeData {
            cost: length * (1.0 + self.params.traversability_cost_weight * mean_trav_cost),
            sub_path,
        })
    }

    /// The planning distance between two states.
    ///
    /// A non-negatively weighted sum of the position, velocity and heading distances, which keeps
    /// it a metric.
    pub fn distance(&self, a: &State, b: &State) -> f64 {
        let w = &self.params.distance_weights;

        w.position * (a.position_m - b.position_m).norm()
            + w.velocity * (a.velocity_ms - b.velocity_ms).norm()
            + w.yaw * get_ang_dist(a.yaw_rad, b.yaw_rad).abs()
    }

    /// Move from `from` towards `toward` by at most `max_step`.
    ///
    /// Returns `toward` itself if it is within `max_step`.
    pub fn steer(&self, from: &State, toward: &State, max_step: f64) -> State {
        let d = self.distance(from, toward);

        if d <= max_step {
            *toward
        } else {
            from.interpolate(toward, max_step / d)
        }
    }

    /// Total cost of a path, or `None` if any edge along it is infeasible.
    pub fn path_cost(&self, path: &[State], terrain: &dyn TerrainModel) -> Option<f64> {
        path.windows(2)
            .map(|w| self.check_edge(&w[0], &w[1], terrain).map(|e| e.cost))
            .sum()
    }

    /// Verify a path edge by edge, returning its cost.
    pub(crate) fn verify_path(
        &self,
        path: &[State],
        terrain: &dyn TerrainModel,
    ) -> Result<f64, SearchError> {
        let mut cost = 0.0;
        for (i, w) in path.windows(2).enumerate() {
            match self.check_edge(&w[0], &w[1], terrain) {
                Some(e) => cost += e.cost,
                None => return Err(SearchError::InfeasiblePath(i, i + 1)),
            }
        }
        Ok(cost)
    }

    /// Greedily replace runs of states with direct edges while the deadline allows.
    ///
    /// A `deadline` of `None` means shortcutting is not time limited. Every edge in the returned
    /// path has passed [`PlannerBase::check_edge`].
    pub fn shortcut(
        &self,
        path: &[State],
        terrain: &dyn TerrainModel,
        deadline: Option<Instant>,
    ) -> Vec<State> {
        let time_left = || deadline.map_or(true, |d| Instant::now() < d);

        let mut out = Vec::with_capacity(path.len());
        let mut i = 0;

        if let Some(first) = path.first() {
            out.push(*first);
        }

        while i + 1 < path.len() {
            // The existing edge is always valid, so fall back to it
            let mut next = i + 1;

            if time_left() {
                for j in ((i + 2)..path.len()).rev() {
                    if !time_left() {
                        break;
                    }
                    if self.edge_feasible(&path[i], &path[j], terrain) {
                        next = j;
                        break;
                    }
                }
            }

            out.push(path[next]);
            i = next;
        }

        out
    }

    fn validate(p: &PlannerParams) -> Result<(), SearchError> {
        let invalid = |msg: &str| Err(SearchError::InvalidParams(msg.into()));
        let w = &p.distance_weights;

        if !(0.0..=1.0).contains(&p.goal_bias) {
            return invalid("goal_bias must be in [0, 1]");
        }
        if !(p.max_step_size > 0.0) {
            return invalid("max_step_size must be positive");
        }
        if !(p.edge_resolution > 0.0) {
            return invalid("edge_resolution must be positive");
        }
        if !(p.goal_acceptance_radius >= 0.0 && p.connect_tolerance >= 0.0) {
            return invalid("goal_acceptance_radius and connect_tolerance must be non-negative");
        }
        if !(w.position >= 0.0 && w.velocity >= 0.0 && w.yaw >= 0.0) {
            return invalid("distance weights must be non-negative");
        }
        if w.position + w.velocity + w.yaw <= 0.0 {
            return invalid("at least one distance weight must be positive");
        }
        if p.bounds.min_m.x > p.bounds.max_m.x || p.bounds.min_m.y > p.bounds.max_m.y {
            return invalid("bounds minimum must not exceed maximum");
        }
        if p.min_body_height_m > p.max_body_height_m {
            return invalid("min_body_height_m must not exceed max_body_height_m");
        }
        if !(p.max_speed_ms >= 0.0) {
            return invalid("max_speed_ms must be non-negative");
        }

        // Longest edge possible between two feasible states
        let diagonal = (p.bounds.max_m - p.bounds.min_m).norm();
        let max_span = diagonal.max(
            w.position * diagonal
                + w.velocity * 2.0 * p.max_speed_ms
                + w.yaw * std::f64::consts::PI,
        );
        if !(max_span / p.edge_resolution <= MAX_EDGE_STEPS as f64) {
            return Err(SearchError::InvalidParams(format!(
                "edge_resolution of {} splits edges into more than {} steps",
                p.edge_resolution, MAX_EDGE_STEPS
            )));
        }

        Ok(())
    }
}

impl SearchStats {
    fn failure(self, failure: SearchFailure) -> SearchOutcome {
        SearchOutcome::Failure(failure, self)
    }
}

impl SearchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SearchOutcome::Success(_))
    }

    pub fn stats(&self) -> &SearchStats {
        match self {
            SearchOutcome::Success(r) => &r.stats,
            SearchOutcome::Failure(_, s) => s,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Uniform sample in `[min, max)`, or `min` for an empty range.
fn sample_range(rng: &mut ChaCha8Rng, min: f64, max: f64) -> f64 {
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::terrain::{TerrainMap, TerrainMapParams, UNTRAVERSABLE};
    use nalgebra::Vector2;

    /// A 24 x 24 m flat map centred on the origin with 0.25 m cells.
    pub(crate) fn flat_terrain() -> TerrainMap {
        TerrainMap::new_flat(
            TerrainMapParams {
                cell_size_m: 0.25,
                num_cells: Vector2::new(96, 96),
                origin_m: Vector2::new(-12.0, -12.0),
            },
            0.0,
        )
        .unwrap()
    }

    pub(crate) fn params() -> PlannerParams {
        PlannerParams {
            seed: Some(42),
            ..Default::default()
        }
    }

    pub(crate) fn at(x: f64, y: f64) -> State {
        State::at_rest(x, y, 0.3, 0.0)
    }

    #[test]
    fn test_is_feasible() {
        let base = PlannerBase::new(params()).unwrap();
        let mut terrain = flat_terrain();

        assert!(base.is_feasible(&at(0.0, 0.0), &terrain));

        // Outside bounds
        assert!(!base.is_feasible(&at(10.5, 0.0), &terrain));

        // Too low and too high
        assert!(!base.is_feasible(&State::at_rest(0.0, 0.0, 0.1, 0.0), &terrain));
        assert!(!base.is_feasible(&State::at_rest(0.0, 0.0, 0.5, 0.0), &terrain));

        // Too fast
        let fast = State::new(Vector3::new(0.0, 0.0, 0.3), Vector3::new(1.5, 0.0, 0.0), 0.0);
        assert!(!base.is_feasible(&fast, &terrain));

        terrain.set_cost_in_circle(&Vector2::new(0.0, 0.0), 0.5, UNTRAVERSABLE);
        assert!(!base.is_feasible(&at(0.0, 0.0), &terrain));

        // On a raised plateau the body must be raised with it
        terrain.set_height_in_rect(&Vector2::new(2.0, -1.0), &Vector2::new(4.0, 1.0), 0.2);
        assert!(!base.is_feasible(&at(3.0, 0.0), &terrain));
        assert!(base.is_feasible(&State::at_rest(3.0, 0.0, 0.5, 0.0), &terrain));
    }

    #[test]
    fn test_edge_feasible_tunneling() {
        let base = PlannerBase::new(params()).unwrap();
        let mut terrain = flat_terrain();

        // A thin wall between two feasible states
        terrain.set_cost_in_rect(
            &Vector2::new(-0.2, -2.0),
            &Vector2::new(0.2, 2.0),
            UNTRAVERSABLE,
        );

        let a = at(-0.6, 0.0);
        let b = at(0.6, 0.0);

        assert!(base.is_feasible(&a, &terrain));
        assert!(base.is_feasible(&b, &terrain));
        assert!(!base.edge_feasible(&a, &b, &terrain));
        assert!(base.check_edge(&a, &b, &terrain).is_none());

        // Same length edge clear of the wall
        let c = at(-0.6, 3.0);
        let d = at(0.6, 3.0);
        let edge = base.check_edge(&c, &d, &terrain).unwrap();
        assert_eq!(edge.sub_path.last(), Some(&d));
        assert!((edge.cost - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_distance_metric() {
        let mut p = params();
        p.distance_weights = DistanceWeights {
            position: 1.0,
            velocity: 0.5,
            yaw: 0.3,
        };
        let mut base = PlannerBase::new(p).unwrap();
        let terrain = flat_terrain();

        let samples: Vec<State> = (0..30).map(|_| base.sample_uniform(&terrain)).collect();

        for a in samples.iter() {
            assert_eq!(base.distance(a, a), 0.0);

            for b in samples.iter() {
                let ab = base.distance(a, b);
                assert!(ab >= 0.0);
                assert!((ab - base.distance(b, a)).abs() < 1e-12);

                for c in samples.iter().take(10) {
                    assert!(ab <= base.distance(a, c) + base.distance(c, b) + 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_steer() {
        let base = PlannerBase::new(params()).unwrap();

        let from = at(0.0, 0.0);
        let near = at(0.5, 0.0);
        let far = at(3.0, 4.0);

        assert_eq!(base.steer(&from, &near, 1.0), near);

        let s = base.steer(&from, &far, 1.0);
        assert!((base.distance(&from, &s) - 1.0).abs() < 1e-12);
        assert!((s.position_m - Vector3::new(0.6, 0.8, 0.3)).norm() < 1e-12);
    }

    #[test]
    fn test_sample() {
        let mut p = params();
        p.goal_bias = 1.0;
        let mut base = PlannerBase::new(p).unwrap();
        let terrain = flat_terrain();
        let goal = at(5.0, 5.0);

        assert_eq!(base.sample(&goal, &terrain), goal);

        // Uniform samples stay within bounds at the nominal height
        for _ in 0..100 {
            let s = base.sample_uniform(&terrain);
            assert!(base.params().bounds.contains(&s.position2()));
            assert!((s.position_m.z - 0.3).abs() < 1e-12);
            assert!(s.velocity_ms.norm() <= 1.0 + 1e-12);
            assert!(base.is_feasible(&s, &terrain));
        }

        // Same seed, same samples
        let mut a = PlannerBase::new(params()).unwrap();
        let mut b = PlannerBase::new(params()).unwrap();
        for _ in 0..10 {
            assert_eq!(a.sample(&goal, &terrain), b.sample(&goal, &terrain));
        }
    }

    #[test]
    fn test_shortcut() {
        let base = PlannerBase::new(params()).unwrap();
        let terrain = flat_terrain();

        // A zig-zag on open ground collapses to a single edge
        let path = vec![at(0.0, 0.0), at(1.0, 1.0), at(2.0, -1.0), at(3.0, 0.0)];
        let deadline = Instant::now() + Duration::from_secs(5);
        let short = base.shortcut(&path, &terrain, Some(deadline));
        assert_eq!(short, vec![at(0.0, 0.0), at(3.0, 0.0)]);

        // No deadline at all
        let short = base.shortcut(&path, &terrain, None);
        assert_eq!(short, vec![at(0.0, 0.0), at(3.0, 0.0)]);

        // No time means no change
        let short = base.shortcut(&path, &terrain, Some(Instant::now()));
        assert_eq!(short, path);
    }

    #[test]
    fn test_invalid_params() {
        let mut p = params();
        p.edge_resolution = 0.0;
        assert!(matches!(
            PlannerBase::new(p),
            Err(SearchError::InvalidParams(_))
        ));

        let mut p = params();
        p.goal_bias = 1.5;
        assert!(PlannerBase::new(p).is_err());

        // Too fine for the size of the bounds
        let mut p = params();
        p.edge_resolution = 1e-6;
        assert!(matches!(
            PlannerBase::new(p),
            Err(SearchError::InvalidParams(_))
        ));

        let mut p = params();
        p.bounds.max_m.x = f64::INFINITY;
        assert!(PlannerBase::new(p).is_err());

        // The finest allowed resolution still works
        let mut p = params();
        p.edge_resolution = 1e-3;
        assert!(PlannerBase::new(p).is_ok());
    }

    #[test]
    fn test_check_edge_too_long() {
        let base = PlannerBase::new(params()).unwrap();
        let terrain = flat_terrain();

        // Far outside the bounds, rejected without discretising
        let far = at(1e9, 0.0);
        assert!(base.check_edge(&at(0.0, 0.0), &far, &terrain).is_none());
    }
}
