//! # Global Body Planner
//!
//! Runs the body search against live robot state and terrain, deciding on each control cycle
//! whether to replan, and publishes the resulting [`Plan`].
//!
//! Inputs and outputs are exchanged through a [`GbpHandle`], which can be cloned onto any thread.
//! Robot state and terrain are replaced as whole snapshots, and the current plan is swapped as a
//! single `Arc`, so readers always see either the old plan or the new one.
//!
//! The planner moves between the following states:
//!
//! ```text
//! Idle -> Planning -> Succeeded -> Planning -> ...
//!                  \-> Failed    -/
//! ```
//!
//! A failed search keeps the previous plan. Only a broken internal invariant is returned as an
//! error from [`GlobalBodyPlanner::step`].

// ------------------------------------------------------------------------------------------------
// MODS
// ------------------------------------------------------------------------------------------------

mod params;
mod plan;
mod worker;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use params::{Algorithm, GbpParams};
pub use plan::{Plan, PlanReport};
pub use worker::{GbpWorker, WorkerSignal};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::SendError,
        Arc, PoisonError, RwLock,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use util::{
    params::{load as load_params, LoadError},
    session,
    time::seconds_to_duration,
};

use crate::{
    planner::{
        Rrt, RrtConnect, SearchAlgorithm, SearchError, SearchFailure, SearchOutcome,
        SearchRequest,
    },
    state::State,
    terrain::TerrainModel,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Session relative path plan reports are saved to.
const PLAN_REPORT_PATH: &str = "gbp/plan.json";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The global body planner.
pub struct GlobalBodyPlanner {
    params: GbpParams,

    shared: Arc<Shared>,

    search: Box<dyn SearchAlgorithm + Send>,

    time_budget: Duration,

    /// Time of the last search.
    replan_marker: Option<Instant>,

    replanning_allowed: bool,
}

/// Cloneable access to the inputs and outputs of a [`GlobalBodyPlanner`].
#[derive(Clone)]
pub struct GbpHandle {
    shared: Arc<Shared>,
}

/// Status of the planner after a control cycle.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: PlannerStatus,

    /// When the current plan was made.
    pub last_success: Option<DateTime<Utc>>,

    /// Number of searches that have failed since the last success.
    pub consecutive_failures: usize,

    /// Set once `consecutive_failures` exceeds the allowed number of retries.
    pub planning_failure: bool,

    /// Why the most recent search failed, cleared on success.
    pub last_failure: Option<SearchFailure>,

    /// Set if the last cycle was skipped because the inputs were too old.
    pub stale_inputs: bool,
}

/// A value together with the time it was received.
#[derive(Clone)]
struct Snapshot<T> {
    value: T,
    received: Instant,
}

struct Shared {
    goal: RwLock<State>,
    robot_state: RwLock<Option<Snapshot<State>>>,
    terrain: RwLock<Option<Snapshot<Arc<dyn TerrainModel>>>>,

    current_plan: RwLock<Arc<Plan>>,
    status: RwLock<StatusReport>,

    /// Set to force a replan on the next cycle.
    restart_flag: AtomicBool,

    /// Set when the goal has changed since the last search.
    goal_changed: AtomicBool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlannerStatus {
    /// No search has been made yet.
    Idle,

    /// A search is in progress.
    Planning,

    /// The last search succeeded.
    Succeeded,

    /// The last search failed, the previous plan (if any) is still current.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum GbpError {
    #[error("Couldn't load parameters: {0}")]
    ParamLoadError(LoadError),

    #[error("Couldn't create the search: {0}")]
    SearchInitError(SearchError),

    #[error("Search invariant violated: {0}")]
    InvariantViolation(SearchError),

    #[error("Sync primitive is poisoned")]
    PoisonError,

    #[error("Couldn't spawn the planner worker thread: {0}")]
    WorkerSpawnError(std::io::Error),

    #[error("The planner worker thread panicked")]
    WorkerPanicked,

    #[error("Failed to send signal {0:?} to the worker")]
    SendError(WorkerSignal),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GlobalBodyPlanner {
    /// Create a new planner, loading parameters from `global_body_planner.toml`.
    pub fn from_params_file() -> Result<Self, GbpError> {
        Self::new(load_params("global_body_planner.toml")?)
    }

    pub fn new(params: GbpParams) -> Result<Self, GbpError> {
        let search: Box<dyn SearchAlgorithm + Send> = match params.algorithm {
            Algorithm::RrtConnect => Box::new(
                RrtConnect::new(params.planner.clone()).map_err(GbpError::SearchInitError)?,
            ),
            Algorithm::Rrt => {
                Box::new(Rrt::new(params.planner.clone()).map_err(GbpError::SearchInitError)?)
            }
        };

        let shared = Arc::new(Shared {
            goal: RwLock::new(params.goal),
            robot_state: RwLock::new(None),
            terrain: RwLock::new(None),
            current_plan: RwLock::new(Arc::new(Plan::empty())),
            status: RwLock::new(StatusReport::default()),
            restart_flag: AtomicBool::new(false),
            goal_changed: AtomicBool::new(false),
        });

        info!(
            "Global body planner created using {}, time budget {} s",
            search.name(),
            params.time_budget_s
        );

        Ok(Self {
            time_budget: seconds_to_duration(params.time_budget_s),
            replanning_allowed: params.replanning_allowed,
            params,
            shared,
            search,
            replan_marker: None,
        })
    }

    /// Get a handle onto the planner's inputs and outputs.
    pub fn handle(&self) -> GbpHandle {
        GbpHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn params(&self) -> &GbpParams {
        &self.params
    }

    pub fn set_time_budget(&mut self, time_budget: Duration) {
        self.time_budget = time_budget;
    }

    pub fn set_replanning_allowed(&mut self, allowed: bool) {
        if allowed != self.replanning_allowed {
            info!("Replanning {}", if allowed { "enabled" } else { "disabled" });
        }
        self.replanning_allowed = allowed;
    }

    /// Run one control cycle.
    pub fn step(&mut self) -> Result<StatusReport, GbpError> {
        self.step_at(Instant::now())
    }

    /// Run one control cycle as if at time `now`.
    pub fn step_at(&mut self, now: Instant) -> Result<StatusReport, GbpError> {
        // Copy the inputs so the whole cycle uses a single consistent snapshot
        let robot_state = self.shared.robot_state.read()?.clone();
        let terrain = self.shared.terrain.read()?.clone();

        let (robot_state, terrain) = match (robot_state, terrain) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                trace!("Waiting for robot state and terrain");
                return Ok(self.shared.status.read()?.clone());
            }
        };

        let state_stale = is_stale(&robot_state, self.params.max_state_age_s, now);
        let terrain_stale = is_stale(&terrain, self.params.max_terrain_age_s, now);
        if state_stale || terrain_stale {
            warn!(
                "Inputs are stale (robot state: {}, terrain: {}), skipping planning",
                state_stale, terrain_stale
            );
            self.shared.restart_flag.store(true, Ordering::SeqCst);

            let mut status = self.shared.status.write()?;
            status.stale_inputs = true;
            return Ok(status.clone());
        }
        self.shared.status.write()?.stale_inputs = false;

        if !self.should_plan(now)? {
            return Ok(self.shared.status.read()?.clone());
        }

        self.shared.restart_flag.store(false, Ordering::SeqCst);
        if self.shared.goal_changed.swap(false, Ordering::SeqCst) {
            debug!("Goal changed, resetting search");
            self.search.reset();
        }
        self.replan_marker = Some(now);

        let goal = *self.shared.goal.read()?;
        self.shared.status.write()?.status = PlannerStatus::Planning;

        let request = SearchRequest {
            start: robot_state.value,
            goal,
            terrain: &*terrain.value,
            time_budget: self.time_budget,
        };

        let outcome = match self.search.search(&request) {
            Ok(o) => o,
            Err(e) => {
                error!("{} invariant violated: {}", self.search.name(), e);
                self.shared.status.write()?.status = PlannerStatus::Failed;
                return Err(GbpError::InvariantViolation(e));
            }
        };

        match outcome {
            SearchOutcome::Success(result) => {
                let created = Utc::now();
                let plan = Arc::new(Plan::from_result(result, created));

                info!(
                    "New plan of {} states, length {:.2} m, cost {:.3}, found in {:.3} s",
                    plan.states.len(),
                    plan.length_m,
                    plan.cost,
                    plan.solve_time_s
                );

                *self.shared.current_plan.write()? = plan.clone();

                {
                    let mut status = self.shared.status.write()?;
                    status.status = PlannerStatus::Succeeded;
                    status.last_success = Some(created);
                    status.consecutive_failures = 0;
                    status.planning_failure = false;
                    status.last_failure = None;
                }

                if self.params.save_reports && session::is_initialised() {
                    session::save_with_timestamp(
                        PLAN_REPORT_PATH,
                        PlanReport {
                            algorithm: self.search.name(),
                            goal,
                            plan: (*plan).clone(),
                        },
                    );
                }
            }
            SearchOutcome::Failure(failure, stats) => {
                let mut status = self.shared.status.write()?;
                status.status = PlannerStatus::Failed;
                status.consecutive_failures += 1;
                status.last_failure = Some(failure);
                status.planning_failure = status.consecutive_failures > self.params.max_retries;

                if status.planning_failure {
                    error!(
                        "Planning failure: {} consecutive searches failed (last {:?} after {} \
                         iterations)",
                        status.consecutive_failures, failure, stats.iterations
                    );
                } else {
                    warn!(
                        "Search failed ({:?}) after {} iterations, keeping previous plan",
                        failure, stats.iterations
                    );
                }
            }
        }

        Ok(self.shared.status.read()?.clone())
    }

    /// Decide whether this cycle should search.
    fn should_plan(&self, now: Instant) -> Result<bool, GbpError> {
        if self.shared.current_plan.read()?.is_empty() {
            return Ok(true);
        }
        if !self.replanning_allowed {
            return Ok(false);
        }

        let interval_elapsed = match self.replan_marker {
            Some(marker) => {
                now.saturating_duration_since(marker)
                    >= seconds_to_duration(self.params.replan_interval_s)
            }
            None => true,
        };

        Ok(interval_elapsed || self.shared.restart_flag.load(Ordering::SeqCst))
    }
}

impl GbpHandle {
    /// Replace the robot state, received now.
    pub fn set_robot_state(&self, state: State) -> Result<(), GbpError> {
        self.set_robot_state_at(state, Instant::now())
    }

    /// Replace the robot state, received at the given time.
    pub fn set_robot_state_at(&self, state: State, received: Instant) -> Result<(), GbpError> {
        *self.shared.robot_state.write()? = Some(Snapshot {
            value: state,
            received,
        });
        Ok(())
    }

    /// Replace the terrain, received now.
    pub fn set_terrain(&self, terrain: Arc<dyn TerrainModel>) -> Result<(), GbpError> {
        self.set_terrain_at(terrain, Instant::now())
    }

    /// Replace the terrain, received at the given time.
    pub fn set_terrain_at(
        &self,
        terrain: Arc<dyn TerrainModel>,
        received: Instant,
    ) -> Result<(), GbpError> {
        *self.shared.terrain.write()? = Some(Snapshot {
            value: terrain,
            received,
        });
        Ok(())
    }

    /// Change the goal, forcing a fresh search on the next cycle.
    pub fn set_goal(&self, goal: State) -> Result<(), GbpError> {
        *self.shared.goal.write()? = goal;
        self.shared.goal_changed.store(true, Ordering::SeqCst);
        self.shared.restart_flag.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn goal(&self) -> Result<State, GbpError> {
        Ok(*self.shared.goal.read()?)
    }

    /// The current plan, empty until the first successful search.
    pub fn current_plan(&self) -> Result<Arc<Plan>, GbpError> {
        Ok(self.shared.current_plan.read()?.clone())
    }

    pub fn status(&self) -> Result<StatusReport, GbpError> {
        Ok(self.shared.status.read()?.clone())
    }

    /// Request a replan on the next cycle. A running search is not interrupted.
    pub fn request_replan(&self) {
        self.shared.restart_flag.store(true, Ordering::SeqCst);
    }
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            status: PlannerStatus::Idle,
            last_success: None,
            consecutive_failures: 0,
            planning_failure: false,
            last_failure: None,
            stale_inputs: false,
        }
    }
}

impl From<LoadError> for GbpError {
    fn from(e: LoadError) -> Self {
        Self::ParamLoadError(e)
    }
}

impl<G> From<PoisonError<G>> for GbpError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

impl From<SendError<WorkerSignal>> for GbpError {
    fn from(e: SendError<WorkerSignal>) -> Self {
        Self::SendError(e.0)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn is_stale<T>(snapshot: &Snapshot<T>, max_age_s: Option<f64>, now: Instant) -> bool {
    match max_age_s {
        Some(max) => now.saturating_duration_since(snapshot.received) > seconds_to_duration(max),
        None => false,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        graph::GraphError,
        planner::PlannerParams,
        terrain::{TerrainMap, TerrainMapParams},
    };
    use nalgebra::Vector2;

    fn terrain() -> Arc<dyn TerrainModel> {
        Arc::new(
            TerrainMap::new_flat(
                TerrainMapParams {
                    cell_size_m: 0.25,
                    num_cells: Vector2::new(96, 96),
                    origin_m: Vector2::new(-12.0, -12.0),
                },
                0.0,
            )
            .unwrap(),
        )
    }

    fn at(x: f64, y: f64) -> State {
        State::at_rest(x, y, 0.3, 0.0)
    }

    fn params() -> GbpParams {
        GbpParams {
            goal: at(6.0, 0.0),
            time_budget_s: 5.0,
            replan_interval_s: 1.0,
            replanning_allowed: true,
            max_retries: 1,
            max_state_age_s: Some(0.5),
            max_terrain_age_s: None,
            save_reports: false,
            algorithm: Algorithm::RrtConnect,
            planner: PlannerParams {
                seed: Some(7),
                ..Default::default()
            },
        }
    }

    /// Planner with fresh inputs, starting at the given state.
    fn planner(start: State) -> (GlobalBodyPlanner, GbpHandle, Instant) {
        let gbp = GlobalBodyPlanner::new(params()).unwrap();
        let handle = gbp.handle();
        let t0 = Instant::now();
        handle.set_robot_state_at(start, t0).unwrap();
        handle.set_terrain_at(terrain(), t0).unwrap();
        (gbp, handle, t0)
    }

    #[test]
    fn test_waits_for_inputs() {
        let mut gbp = GlobalBodyPlanner::new(params()).unwrap();
        let handle = gbp.handle();

        let report = gbp.step().unwrap();
        assert_eq!(report.status, PlannerStatus::Idle);

        handle.set_robot_state(at(0.0, 0.0)).unwrap();
        assert_eq!(gbp.step().unwrap().status, PlannerStatus::Idle);
        assert!(handle.current_plan().unwrap().is_empty());
    }

    #[test]
    fn test_first_plan() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));

        let report = gbp.step_at(t0).unwrap();
        assert_eq!(report.status, PlannerStatus::Succeeded);
        assert!(report.last_success.is_some());

        let plan = handle.current_plan().unwrap();
        assert_eq!(plan.first(), Some(&at(-6.0, 0.0)));
        assert_eq!(plan.last(), Some(&at(6.0, 0.0)));
        assert!(plan.length_m >= 12.0 - 1e-9);
    }

    #[test]
    fn test_replan_interval() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));

        gbp.step_at(t0).unwrap();
        let first = handle.current_plan().unwrap();

        // Inside the interval nothing changes
        handle
            .set_robot_state_at(at(-5.0, 0.0), t0 + Duration::from_millis(100))
            .unwrap();
        gbp.step_at(t0 + Duration::from_millis(200)).unwrap();
        assert!(Arc::ptr_eq(&first, &handle.current_plan().unwrap()));

        // After it a new plan is made from the latest state
        handle
            .set_robot_state_at(at(-5.0, 0.0), t0 + Duration::from_millis(1100))
            .unwrap();
        gbp.step_at(t0 + Duration::from_millis(1200)).unwrap();
        let second = handle.current_plan().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.first(), Some(&at(-5.0, 0.0)));
    }

    #[test]
    fn test_replan_from_far_start() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));
        gbp.step_at(t0).unwrap();

        // Robot has been moved somewhere else entirely
        let t1 = t0 + Duration::from_millis(10);
        handle.set_robot_state_at(at(2.0, -8.0), t1).unwrap();
        handle.request_replan();

        let report = gbp.step_at(t1).unwrap();
        assert_eq!(report.status, PlannerStatus::Succeeded);
        assert_eq!(
            handle.current_plan().unwrap().first(),
            Some(&at(2.0, -8.0))
        );
    }

    #[test]
    fn test_replanning_disabled() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));
        gbp.set_replanning_allowed(false);

        gbp.step_at(t0).unwrap();
        let first = handle.current_plan().unwrap();

        let t1 = t0 + Duration::from_secs(3);
        handle.set_robot_state_at(at(-5.0, 0.0), t1).unwrap();
        handle.request_replan();
        gbp.step_at(t1).unwrap();

        assert!(Arc::ptr_eq(&first, &handle.current_plan().unwrap()));
    }

    #[test]
    fn test_zero_budget_keeps_plan() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));
        gbp.step_at(t0).unwrap();
        let first = handle.current_plan().unwrap();

        gbp.set_time_budget(Duration::from_secs(0));

        for i in 1..=2 {
            handle.request_replan();
            let report = gbp.step_at(t0).unwrap();

            assert_eq!(report.status, PlannerStatus::Failed);
            assert_eq!(report.last_failure, Some(SearchFailure::TimedOut));
            assert_eq!(report.consecutive_failures, i);
            assert!(Arc::ptr_eq(&first, &handle.current_plan().unwrap()));

            // Exceeding the retries raises a planning failure, but still isn't an error
            assert_eq!(report.planning_failure, i > 1);
        }

        // Without a trigger no search is made
        let report = gbp.step_at(t0).unwrap();
        assert_eq!(report.consecutive_failures, 2);

        // A success clears the failure
        gbp.set_time_budget(Duration::from_secs(5));
        handle.request_replan();
        let report = gbp.step_at(t0).unwrap();
        assert_eq!(report.status, PlannerStatus::Succeeded);
        assert_eq!(report.consecutive_failures, 0);
        assert!(!report.planning_failure);
        assert!(!Arc::ptr_eq(&first, &handle.current_plan().unwrap()));
    }

    #[test]
    fn test_stale_inputs() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));

        // State received at t0 is too old by t0 + 1 s
        let report = gbp.step_at(t0 + Duration::from_secs(1)).unwrap();
        assert!(report.stale_inputs);
        assert_eq!(report.status, PlannerStatus::Idle);
        assert!(handle.current_plan().unwrap().is_empty());

        // Fresh state, planning resumes
        let t1 = t0 + Duration::from_millis(1100);
        handle.set_robot_state_at(at(-6.0, 0.0), t1).unwrap();
        let report = gbp.step_at(t1).unwrap();
        assert!(!report.stale_inputs);
        assert_eq!(report.status, PlannerStatus::Succeeded);
    }

    #[test]
    fn test_stale_inputs_force_replan() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));
        gbp.step_at(t0).unwrap();
        let first = handle.current_plan().unwrap();

        // Fresh state inside the interval doesn't trigger a replan
        let t1 = t0 + Duration::from_millis(200);
        handle.set_robot_state_at(at(-5.5, 0.0), t1).unwrap();
        gbp.step_at(t1 + Duration::from_millis(100)).unwrap();
        assert!(Arc::ptr_eq(&first, &handle.current_plan().unwrap()));

        // The state is now 0.6 s old, so this cycle is skipped
        let report = gbp.step_at(t1 + Duration::from_millis(600)).unwrap();
        assert!(report.stale_inputs);
        assert!(Arc::ptr_eq(&first, &handle.current_plan().unwrap()));

        // Still inside the replan interval, but the skipped cycle forces a restart
        let t2 = t0 + Duration::from_millis(850);
        handle.set_robot_state_at(at(-5.0, 0.0), t2).unwrap();
        let report = gbp.step_at(t2 + Duration::from_millis(50)).unwrap();

        assert!(!report.stale_inputs);
        assert_eq!(report.status, PlannerStatus::Succeeded);
        let second = handle.current_plan().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.first(), Some(&at(-5.0, 0.0)));
    }

    #[test]
    fn test_set_goal() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));
        gbp.step_at(t0).unwrap();

        handle.set_goal(at(0.0, 6.0)).unwrap();
        assert_eq!(handle.goal().unwrap(), at(0.0, 6.0));

        // Restart forced even though the interval hasn't elapsed
        gbp.step_at(t0 + Duration::from_millis(10)).unwrap();
        assert_eq!(handle.current_plan().unwrap().last(), Some(&at(0.0, 6.0)));
    }

    /// Search whose tree is always corrupt.
    struct CorruptSearch;

    impl SearchAlgorithm for CorruptSearch {
        fn search(&mut self, _request: &SearchRequest) -> Result<SearchOutcome, SearchError> {
            Err(GraphError::InvariantViolation("vertex has two parents".into()).into())
        }

        fn name(&self) -> &'static str {
            "Corrupt"
        }
    }

    #[test]
    fn test_invariant_violation() {
        let (mut gbp, handle, t0) = planner(at(-6.0, 0.0));
        gbp.search = Box::new(CorruptSearch);

        let result = gbp.step_at(t0);
        assert!(matches!(
            result,
            Err(GbpError::InvariantViolation(SearchError::Graph(
                GraphError::InvariantViolation(_)
            )))
        ));
        assert_eq!(handle.status().unwrap().status, PlannerStatus::Failed);
        assert!(handle.current_plan().unwrap().is_empty());
    }
}
