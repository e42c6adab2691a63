//! # RRT-Connect
//!
//! Bidirectional search. One tree is rooted at the start and one at the goal. Each iteration the
//! active tree takes one step towards a random sample and the other tree then tries to connect to
//! the new vertex, after which the trees swap roles.
//!
//! The goal tree can be kept between searches to the same goal. Before it is reused every edge is
//! re-checked against the current terrain and failing subtrees are dropped. The start tree is
//! always rebuilt since the start moves between searches.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use log::{debug, trace};

use super::{
    Direction, ExtendStatus, PlannerParams, Rrt, SearchAlgorithm, SearchError, SearchFailure,
    SearchOutcome, SearchRequest, SearchResult, SearchStats,
};
use crate::{
    graph::{Graph, VertexId},
    state::State,
    terrain::TerrainModel,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const START: usize = 0;
const GOAL: usize = 1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RrtConnect {
    rrt: Rrt,

    /// Goal tree from the previous search, if reuse is enabled.
    cached_goal_tree: Option<Graph>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RrtConnect {
    pub fn new(params: PlannerParams) -> Result<Self, SearchError> {
        Ok(Self {
            rrt: Rrt::new(params)?,
            cached_goal_tree: None,
        })
    }

    pub fn rrt(&self) -> &Rrt {
        &self.rrt
    }

    pub fn rrt_mut(&mut self) -> &mut Rrt {
        &mut self.rrt
    }

    /// The goal tree kept from the last search, if any.
    pub fn cached_goal_tree(&self) -> Option<&Graph> {
        self.cached_goal_tree.as_ref()
    }

    pub fn run(&mut self, request: &SearchRequest) -> Result<SearchOutcome, SearchError> {
        let start_time = Instant::now();
        let terrain = request.terrain;
        let base = self.rrt.base();
        let mut stats = SearchStats::default();

        if !base.is_feasible(&request.start, terrain) {
            debug!("Start state is infeasible");
            return Ok(stats.failure(SearchFailure::StartInfeasible));
        }
        if !base.is_feasible(&request.goal, terrain) {
            debug!("Goal state is infeasible");
            return Ok(stats.failure(SearchFailure::GoalInfeasible));
        }

        let goal_tree = self.take_goal_tree(&request.goal, terrain, &mut stats);
        let mut trees = [Graph::with_root(request.start), goal_tree];

        let outcome = self.grow(&mut trees, request, start_time, &mut stats);

        stats.start_tree_vertices = trees[START].len();
        stats.goal_tree_vertices = trees[GOAL].len();

        let params = self.rrt.base().params();
        if params.reuse_goal_tree {
            let [_, goal_tree] = trees;

            if goal_tree.len() > params.max_cached_goal_vertices {
                debug!(
                    "Goal tree of {} vertices is too large to keep, discarding",
                    goal_tree.len()
                );
                self.cached_goal_tree = None;
            } else {
                self.cached_goal_tree = Some(goal_tree);
            }
        }

        let mut path = match outcome? {
            Ok(path) => path,
            Err(failure) => {
                stats.solve_time = start_time.elapsed();
                debug!(
                    "RRT-Connect failed ({:?}) after {} iterations",
                    failure, stats.iterations
                );
                return Ok(stats.failure(failure));
            }
        };

        let base = self.rrt.base();
        if base.params().shortcut_path {
            let num_states = path.len();
            // A budget too large to represent as an instant places no limit on shortcutting
            let deadline = start_time.checked_add(request.time_budget);
            path = base.shortcut(&path, terrain, deadline);
            trace!("Shortcut path from {} to {} states", num_states, path.len());
        }

        let cost = base.verify_path(&path, terrain)?;
        stats.solve_time = start_time.elapsed();

        debug!(
            "RRT-Connect found a path of {} states (cost {:.3}) in {} iterations, trees {}/{}",
            path.len(),
            cost,
            stats.iterations,
            stats.start_tree_vertices,
            stats.goal_tree_vertices
        );

        Ok(SearchOutcome::Success(SearchResult { path, cost, stats }))
    }

    /// Main loop, returning the raw path on success.
    fn grow(
        &mut self,
        trees: &mut [Graph; 2],
        request: &SearchRequest,
        start_time: Instant,
        stats: &mut SearchStats,
    ) -> Result<Result<Vec<State>, SearchFailure>, SearchError> {
        let terrain = request.terrain;
        let max_iterations = self.rrt.base().params().max_iterations;

        // Index of the tree taking the single step this iteration
        let mut active = START;

        loop {
            if start_time.elapsed() >= request.time_budget {
                return Ok(Err(SearchFailure::TimedOut));
            }
            if stats.iterations >= max_iterations {
                return Ok(Err(SearchFailure::Exhausted));
            }
            stats.iterations += 1;

            let other = 1 - active;
            let bias_target = if active == START {
                request.goal
            } else {
                request.start
            };

            let sample = self.rrt.base_mut().sample(&bias_target, terrain);

            let new_id = match self.rrt.extend(
                &mut trees[active],
                &sample,
                0.0,
                direction(active),
                terrain,
            )? {
                ExtendStatus::Reached(id) | ExtendStatus::Advanced(id) => id,
                ExtendStatus::Trapped => {
                    trace!("Sample rejected");
                    active = other;
                    continue;
                }
            };

            let new_state = match trees[active].vertex(new_id) {
                Some(v) => v.state,
                None => continue,
            };

            if let ExtendStatus::Reached(other_id) =
                self.rrt
                    .connect(&mut trees[other], &new_state, direction(other), terrain)?
            {
                let (start_id, goal_id) = if active == START {
                    (new_id, other_id)
                } else {
                    (other_id, new_id)
                };

                if let Some(path) = self.join(trees, start_id, goal_id, terrain)? {
                    return Ok(Ok(path));
                }
            }

            active = other;
        }
    }

    /// Join the root path of the start tree with the reversed root path of the goal tree.
    ///
    /// Returns `None` if the two connection states differ and the edge between them is
    /// infeasible.
    fn join(
        &self,
        trees: &[Graph; 2],
        start_id: VertexId,
        goal_id: VertexId,
        terrain: &dyn TerrainModel,
    ) -> Result<Option<Vec<State>>, SearchError> {
        let mut path = trees[START].path_to(start_id)?;
        let mut goal_path = trees[GOAL].path_to(goal_id)?;
        goal_path.reverse();

        match (path.last(), goal_path.first()) {
            (Some(a), Some(b)) if a == b => {
                goal_path.remove(0);
            }
            (Some(a), Some(b)) => {
                if !self.rrt.base().edge_feasible(a, b, terrain) {
                    trace!("Trees within tolerance but not joinable");
                    return Ok(None);
                }
            }
            _ => return Ok(None),
        }

        path.extend(goal_path);
        Ok(Some(path))
    }

    /// Build the goal tree for this search, reusing the cached one if it has the same root.
    fn take_goal_tree(
        &mut self,
        goal: &State,
        terrain: &dyn TerrainModel,
        stats: &mut SearchStats,
    ) -> Graph {
        let base = self.rrt.base();

        match self.cached_goal_tree.take() {
            Some(mut tree)
                if base.params().reuse_goal_tree && tree.root_state().as_ref() == Some(goal) =>
            {
                // Edges in the goal tree are travelled child to parent
                stats.pruned_vertices =
                    tree.prune(|parent, child, _| base.edge_feasible(child, parent, terrain));

                debug!(
                    "Reusing goal tree of {} vertices ({} pruned)",
                    tree.len(),
                    stats.pruned_vertices
                );
                tree
            }
            _ => Graph::with_root(*goal),
        }
    }
}

impl SearchAlgorithm for RrtConnect {
    fn search(&mut self, request: &SearchRequest) -> Result<SearchOutcome, SearchError> {
        self.run(request)
    }

    fn name(&self) -> &'static str {
        "RRT-Connect"
    }

    fn reset(&mut self) {
        self.cached_goal_tree = None;
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn direction(tree: usize) -> Direction {
    if tree == START {
        Direction::Outward
    } else {
        Direction::Inward
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::planner::test::{at, flat_terrain, params};
    use crate::terrain::UNTRAVERSABLE;
    use nalgebra::Vector2;
    use std::time::Duration;
    use util::time::seconds_to_duration;

    fn request<'a>(start: State, goal: State, terrain: &'a dyn TerrainModel) -> SearchRequest<'a> {
        SearchRequest {
            start,
            goal,
            terrain,
            time_budget: Duration::from_secs(10),
        }
    }

    fn expect_success(outcome: SearchOutcome) -> SearchResult {
        match outcome {
            SearchOutcome::Success(r) => r,
            SearchOutcome::Failure(f, s) => panic!("Search failed: {:?} ({:?})", f, s),
        }
    }

    #[test]
    fn test_straight_line() {
        let mut planner = RrtConnect::new(PlannerParams {
            max_step_size: 1.0,
            goal_acceptance_radius: 0.5,
            max_connect_steps: 20,
            max_iterations: 20,
            ..params()
        })
        .unwrap();
        let terrain = flat_terrain();
        let start = at(0.0, 0.0);
        let goal = at(10.0, 0.0);

        let result = expect_success(planner.run(&request(start, goal, &terrain)).unwrap());

        assert!(result.stats.iterations <= 20);
        assert_eq!(result.path.first(), Some(&start));
        assert!(planner.rrt().base().distance(result.path.last().unwrap(), &goal) <= 0.5);

        // No duplicate at the join
        for w in result.path.windows(2) {
            assert_ne!(w[0], w[1]);
        }
        assert!(planner.rrt().base().path_cost(&result.path, &terrain).is_some());
    }

    #[test]
    fn test_seeded_success_is_repeatable() {
        let terrain = flat_terrain();
        let start = at(-8.0, -8.0);
        let goal = at(8.0, 7.5);

        let mut a = RrtConnect::new(params()).unwrap();
        let mut b = RrtConnect::new(params()).unwrap();

        let ra = expect_success(a.run(&request(start, goal, &terrain)).unwrap());
        let rb = expect_success(b.run(&request(start, goal, &terrain)).unwrap());

        assert!(ra.stats.iterations <= params().max_iterations);
        assert_eq!(ra.path, rb.path);
        assert_eq!(ra.stats.iterations, rb.stats.iterations);
        assert_eq!(ra.path.last(), Some(&goal));
    }

    #[test]
    fn test_around_wall() {
        let mut terrain = flat_terrain();
        terrain.set_cost_in_rect(
            &Vector2::new(-0.3, -6.0),
            &Vector2::new(0.3, 6.0),
            UNTRAVERSABLE,
        );

        let mut planner = RrtConnect::new(PlannerParams {
            shortcut_path: true,
            ..params()
        })
        .unwrap();
        let start = at(-4.0, 0.0);
        let goal = at(4.0, 0.0);

        let result = expect_success(planner.run(&request(start, goal, &terrain)).unwrap());

        assert_eq!(result.path.first(), Some(&start));
        assert_eq!(result.path.last(), Some(&goal));
        assert!(result.cost > 8.0);

        // The path must go around the end of the wall
        assert!(result
            .path
            .iter()
            .any(|s| s.position_m.y.abs() > 6.0));
        assert!(planner.rrt().base().path_cost(&result.path, &terrain).is_some());
    }

    #[test]
    fn test_infeasible_endpoints() {
        let mut terrain = flat_terrain();
        terrain.set_cost_in_circle(&Vector2::new(5.0, 0.0), 0.5, UNTRAVERSABLE);
        let mut planner = RrtConnect::new(params()).unwrap();

        let outcome = planner
            .run(&request(at(0.0, 0.0), at(5.0, 0.0), &terrain))
            .unwrap();
        assert!(matches!(
            outcome,
            SearchOutcome::Failure(SearchFailure::GoalInfeasible, _)
        ));

        let outcome = planner
            .run(&request(at(5.0, 0.0), at(0.0, 0.0), &terrain))
            .unwrap();
        assert!(matches!(
            outcome,
            SearchOutcome::Failure(SearchFailure::StartInfeasible, _)
        ));
    }

    #[test]
    fn test_zero_budget() {
        let terrain = flat_terrain();
        let mut planner = RrtConnect::new(params()).unwrap();
        let mut req = request(at(0.0, 0.0), at(5.0, 0.0), &terrain);
        req.time_budget = Duration::from_secs(0);

        assert!(matches!(
            planner.run(&req).unwrap(),
            SearchOutcome::Failure(SearchFailure::TimedOut, _)
        ));
    }

    #[test]
    fn test_goal_tree_reuse() {
        let mut terrain = flat_terrain();
        let mut planner = RrtConnect::new(PlannerParams {
            reuse_goal_tree: true,
            ..params()
        })
        .unwrap();
        let goal = at(6.0, 0.0);

        expect_success(planner.run(&request(at(-6.0, 0.0), goal, &terrain)).unwrap());
        let cached = planner.cached_goal_tree().map(|t| t.len()).unwrap();
        assert!(cached > 1);

        // Block the ground next to the goal, cutting every cached edge leaving it
        terrain.set_cost_in_rect(
            &Vector2::new(2.0, -10.0),
            &Vector2::new(5.2, 10.0),
            UNTRAVERSABLE,
        );
        terrain.set_cost_in_rect(
            &Vector2::new(5.0, 0.6),
            &Vector2::new(10.0, 10.0),
            UNTRAVERSABLE,
        );
        terrain.set_cost_in_rect(
            &Vector2::new(5.0, -10.0),
            &Vector2::new(10.0, -0.6),
            UNTRAVERSABLE,
        );

        // The goal is now walled in, but the cached tree is pruned before use
        let outcome = planner
            .run(&request(at(-6.0, 0.0), goal, &terrain))
            .unwrap();
        match outcome {
            SearchOutcome::Failure(_, stats) => assert!(stats.pruned_vertices > 0),
            SearchOutcome::Success(r) => panic!("Found a path through a wall: {:?}", r.path),
        }
        planner
            .cached_goal_tree()
            .unwrap()
            .check_invariants()
            .unwrap();

        // A different goal discards the cache
        let result = expect_success(
            planner
                .run(&request(at(-6.0, 0.0), at(-6.0, 5.0), &terrain))
                .unwrap(),
        );
        assert_eq!(result.stats.pruned_vertices, 0);

        planner.reset();
        assert!(planner.cached_goal_tree().is_none());
    }

    #[test]
    fn test_unbounded_budget() {
        let terrain = flat_terrain();
        let mut planner = RrtConnect::new(PlannerParams {
            shortcut_path: true,
            ..params()
        })
        .unwrap();
        let start = at(-4.0, 1.0);
        let goal = at(5.0, -2.0);

        let mut req = request(start, goal, &terrain);
        req.time_budget = seconds_to_duration(f64::INFINITY);
        assert_eq!(req.time_budget, Duration::MAX);

        let result = expect_success(planner.run(&req).unwrap());

        // Open ground shortcuts to a single edge
        assert_eq!(result.path, vec![start, goal]);
    }

    #[test]
    fn test_goal_tree_cache_bounded() {
        let terrain = flat_terrain();
        let max_cached = 40;
        let mut planner = RrtConnect::new(PlannerParams {
            reuse_goal_tree: true,
            max_cached_goal_vertices: max_cached,
            ..params()
        })
        .unwrap();
        let goal = at(6.0, 0.0);

        let mut sizes = Vec::new();
        for i in 0..40 {
            let start = at(-6.0, -8.0 + 0.4 * i as f64);
            expect_success(planner.run(&request(start, goal, &terrain)).unwrap());

            let size = planner.cached_goal_tree().map_or(0, |t| t.len());
            assert!(size <= max_cached, "Cached goal tree grew to {}", size);
            sizes.push(size);
        }

        // The cache is still used while it is small enough
        assert!(sizes.iter().any(|&s| s > 1));
    }
}
