//! # Global body planner library.
//!
//! Plans body trajectories for a legged robot over uneven terrain. The library is split into:
//!
//! - [`state`] - the reduced body state planned over
//! - [`terrain`] - the terrain model the planner checks states against
//! - [`graph`] - arena storage for the search trees
//! - [`planner`] - the RRT and RRT-Connect searches
//! - [`gbp`] - the replanning loop which drives the search and publishes plans

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Global body planner - decides when to search and owns the current plan
pub mod gbp;

/// Search tree storage
pub mod graph;

/// Sampling based searches
pub mod planner;

/// Body state
pub mod state;

/// Terrain models
pub mod terrain;
