//! # Plan
//!
//! The output of the global body planner. A plan is never modified once created, a new search
//! result replaces it entirely.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    planner::{SearchResult, SearchStats},
    state::State,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A body plan from the robot's state to the goal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// States from start to goal.
    pub states: Vec<State>,

    /// Total cost of the plan.
    pub cost: f64,

    /// Planar length of the plan, in meters.
    pub length_m: f64,

    /// When the plan was created, `None` for the empty plan.
    pub created: Option<DateTime<Utc>>,

    /// Time taken to find the plan, in seconds.
    pub solve_time_s: f64,

    pub stats: SearchStats,
}

/// Record of a new plan saved into the session.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub algorithm: &'static str,
    pub goal: State,
    pub plan: Plan,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Plan {
    /// The plan held before any search has succeeded.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_result(result: SearchResult, created: DateTime<Utc>) -> Self {
        let length_m = result
            .path
            .windows(2)
            .map(|w| (w[1].position2() - w[0].position2()).norm())
            .sum();

        Self {
            states: result.path,
            cost: result.cost,
            length_m,
            created: Some(created),
            solve_time_s: result.stats.solve_time.as_secs_f64(),
            stats: result.stats,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn first(&self) -> Option<&State> {
        self.states.first()
    }

    pub fn last(&self) -> Option<&State> {
        self.states.last()
    }

    /// Index of the plan state nearest to the given planar position.
    pub fn nearest_index(&self, state: &State) -> Option<usize> {
        self.states
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| {
                ordered_float::OrderedFloat((s.position2() - state.position2()).norm())
            })
            .map(|(i, _)| i)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_result() {
        let result = SearchResult {
            path: vec![
                State::at_rest(0.0, 0.0, 0.3, 0.0),
                State::at_rest(3.0, 4.0, 0.3, 0.0),
                State::at_rest(3.0, 5.0, 0.5, 0.0),
            ],
            cost: 7.5,
            stats: SearchStats {
                solve_time: Duration::from_millis(250),
                ..Default::default()
            },
        };

        let plan = Plan::from_result(result, Utc::now());

        assert!((plan.length_m - 6.0).abs() < 1e-12);
        assert!((plan.solve_time_s - 0.25).abs() < 1e-12);
        assert!(plan.created.is_some());
        assert_eq!(plan.nearest_index(&State::at_rest(2.9, 4.2, 0.0, 0.0)), Some(1));

        let empty = Plan::empty();
        assert!(empty.is_empty());
        assert!(empty.first().is_none());
        assert!(empty.nearest_index(&State::default()).is_none());
    }

    #[test]
    fn test_report_json() {
        let report = PlanReport {
            algorithm: "RRT-Connect",
            goal: State::at_rest(3.0, 5.0, 0.5, 0.0),
            plan: Plan::empty(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["algorithm"], "RRT-Connect");
        assert_eq!(json["plan"]["states"].as_array().map(|s| s.len()), Some(0));
        assert!(json["plan"]["created"].is_null());
    }
}
