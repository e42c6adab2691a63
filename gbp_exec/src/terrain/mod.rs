//! # Terrain
//!
//! This module provides the read-only terrain interface consumed by the planner, [`TerrainModel`],
//! and a grid based implementation of it, [`TerrainMap`].
//!
//! The planner never mutates terrain. Producers build a new model and hand it to the global body
//! planner as a whole snapshot (an `Arc<dyn TerrainModel>`), so a search always sees one
//! consistent terrain.

// ------------------------------------------------------------------------------------------------
// MODS
// ------------------------------------------------------------------------------------------------

/// Implements the [`TerrainMap`] type
mod terrain_map;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use terrain_map::{TerrainMap, TerrainMapParams, PerlinParams, UNTRAVERSABLE};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector2;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Query interface onto a terrain/cost model.
///
/// All queries take a planar position in the world frame and return `None` where the terrain is
/// unknown (unobserved, or outside the modelled area).
pub trait TerrainModel: Send + Sync {
    /// Terrain elevation at the point, in meters.
    fn elevation(&self, point_m: &Vector2<f64>) -> Option<f64>;

    /// Magnitude of the terrain gradient at the point, in dz/dxy.
    fn slope(&self, point_m: &Vector2<f64>) -> Option<f64>;

    /// Traversability cost at the point.
    ///
    /// Traversable terrain has a cost in `[0, 1]`, with 0 being ideal. Terrain which must never be
    /// traversed reports [`UNTRAVERSABLE`].
    fn traversability_cost(&self, point_m: &Vector2<f64>) -> Option<f64>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("A terrain map needs at least 2x2 cells, got {0}x{1}")]
    TooFewCells(usize, usize),

    #[error("Cell size must be positive and finite, got {0}")]
    InvalidCellSize(f64),

    #[error("Provided array shape {0:?} doesn't match the map shape {1:?}")]
    IncompatibleShape((usize, usize), (usize, usize)),

    #[error("Terrain map has no known cells")]
    Empty,
}
