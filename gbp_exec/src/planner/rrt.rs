//! # Rapidly-exploring Random Tree
//!
//! Single tree search, and the extend/connect steps shared with [`super::RrtConnect`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use log::{debug, trace};

use super::{
    PlannerBase, PlannerParams, SearchAlgorithm, SearchError, SearchFailure, SearchOutcome,
    SearchRequest, SearchResult, SearchStats,
};
use crate::{
    graph::{Graph, GraphError, VertexId},
    state::State,
    terrain::TerrainModel,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Single tree RRT.
#[derive(Debug, Clone)]
pub struct Rrt {
    pub(super) base: PlannerBase,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of a single growth step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendStatus {
    /// The new vertex lies within tolerance of the target.
    Reached(VertexId),

    /// A new vertex was added but the target is still out of reach.
    Advanced(VertexId),

    /// The step was infeasible and nothing was added.
    Trapped,
}

/// Direction of travel along the edges of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The robot moves from parent to child, as in a tree rooted at the start.
    Outward,

    /// The robot moves from child to parent, as in a tree rooted at the goal.
    Inward,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Rrt {
    pub fn new(params: PlannerParams) -> Result<Self, SearchError> {
        Ok(Self {
            base: PlannerBase::new(params)?,
        })
    }

    pub fn base(&self) -> &PlannerBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut PlannerBase {
        &mut self.base
    }

    /// Grow the tree one step towards `target`.
    ///
    /// The nearest vertex is steered at most `max_step_size` towards the target, and the new state
    /// is added if it and the edge joining it to the tree are feasible. Edges are checked in the
    /// tree's direction of travel, so the same edge is checked identically when the final path is
    /// verified.
    pub fn extend(
        &self,
        tree: &mut Graph,
        target: &State,
        tolerance: f64,
        direction: Direction,
        terrain: &dyn TerrainModel,
    ) -> Result<ExtendStatus, GraphError> {
        let base = &self.base;

        let near_id = match tree.nearest(target, |a, b| base.distance(a, b)) {
            Some(id) => id,
            None => return Ok(ExtendStatus::Trapped),
        };
        let near = tree
            .vertex(near_id)
            .map(|v| v.state)
            .ok_or(GraphError::UnknownVertex(near_id))?;

        // Already there, don't add a zero length edge
        if base.distance(&near, target) <= 0.0 {
            return Ok(ExtendStatus::Reached(near_id));
        }

        let new = base.steer(&near, target, base.params().max_step_size);

        if !base.is_feasible(&new, terrain) {
            return Ok(ExtendStatus::Trapped);
        }

        let edge = match direction {
            Direction::Outward => base.check_edge(&near, &new, terrain),
            Direction::Inward => base.check_edge(&new, &near, terrain),
        };
        let edge = match edge {
            Some(e) => e,
            None => return Ok(ExtendStatus::Trapped),
        };

        let new_id = tree.insert(new, Some((near_id, edge)))?;

        if base.distance(&new, target) <= tolerance {
            Ok(ExtendStatus::Reached(new_id))
        } else {
            Ok(ExtendStatus::Advanced(new_id))
        }
    }

    /// Repeatedly extend the tree towards `target` until it is reached, the tree is trapped, or
    /// `max_connect_steps` steps have been taken.
    pub fn connect(
        &self,
        tree: &mut Graph,
        target: &State,
        direction: Direction,
        terrain: &dyn TerrainModel,
    ) -> Result<ExtendStatus, GraphError> {
        let mut status = ExtendStatus::Trapped;

        for _ in 0..self.base.params().max_connect_steps {
            status = self.extend(
                tree,
                target,
                self.base.params().connect_tolerance,
                direction,
                terrain,
            )?;

            if !matches!(status, ExtendStatus::Advanced(_)) {
                break;
            }
        }

        Ok(status)
    }

    /// Run a single tree search from the request's start to within `goal_acceptance_radius` of
    /// its goal.
    pub fn run(&mut self, request: &SearchRequest) -> Result<SearchOutcome, SearchError> {
        let start_time = Instant::now();
        let terrain = request.terrain;
        let mut stats = SearchStats::default();

        if !self.base.is_feasible(&request.start, terrain) {
            return Ok(stats.failure(SearchFailure::StartInfeasible));
        }
        if !self.base.is_feasible(&request.goal, terrain) {
            return Ok(stats.failure(SearchFailure::GoalInfeasible));
        }

        let mut tree = Graph::with_root(request.start);
        let radius = self.base.params().goal_acceptance_radius;

        // Start may already satisfy the goal
        let mut reached = if self.base.distance(&request.start, &request.goal) <= radius {
            tree.root()
        } else {
            None
        };

        while reached.is_none() {
            if start_time.elapsed() >= request.time_budget {
                debug!("RRT timed out after {} iterations", stats.iterations);
                stats.start_tree_vertices = tree.len();
                stats.solve_time = start_time.elapsed();
                return Ok(stats.failure(SearchFailure::TimedOut));
            }
            if stats.iterations >= self.base.params().max_iterations {
                debug!("RRT exhausted after {} iterations", stats.iterations);
                stats.start_tree_vertices = tree.len();
                stats.solve_time = start_time.elapsed();
                return Ok(stats.failure(SearchFailure::Exhausted));
            }
            stats.iterations += 1;

            let target = self.base.sample(&request.goal, terrain);

            match self.extend(&mut tree, &target, 0.0, Direction::Outward, terrain)? {
                ExtendStatus::Reached(id) | ExtendStatus::Advanced(id) => {
                    let within_goal = tree
                        .vertex(id)
                        .map_or(false, |v| self.base.distance(&v.state, &request.goal) <= radius);
                    if within_goal {
                        reached = Some(id);
                    }
                }
                ExtendStatus::Trapped => trace!("Sample rejected"),
            }
        }

        let path = match reached {
            Some(id) => tree.path_to(id)?,
            None => Vec::new(),
        };
        let cost = self.base.verify_path(&path, terrain)?;

        stats.start_tree_vertices = tree.len();
        stats.solve_time = start_time.elapsed();

        debug!(
            "RRT found a path of {} states (cost {:.3}) in {} iterations",
            path.len(),
            cost,
            stats.iterations
        );

        Ok(SearchOutcome::Success(SearchResult { path, cost, stats }))
    }
}

impl SearchAlgorithm for Rrt {
    fn search(&mut self, request: &SearchRequest) -> Result<SearchOutcome, SearchError> {
        self.run(request)
    }

    fn name(&self) -> &'static str {
        "RRT"
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
