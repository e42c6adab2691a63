//! # Terrain Map
//!
//! A regular grid of terrain heights with a traversability cost layer. Cell `(i, j)` covers
//! `[origin + i*cell_size, origin + (i+1)*cell_size)` in X and the equivalent in Y, and its height
//! sample sits at the cell centre. Unknown heights are stored as `NaN`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::ops::Range;

use nalgebra::Vector2;
use ndarray::{Array2, Zip};
use noise::{NoiseFn, Perlin, Seedable};
use serde::{Deserialize, Serialize};

use super::{TerrainError, TerrainModel};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Cost value marking a cell which must never be traversed.
pub const UNTRAVERSABLE: f64 = f64::INFINITY;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Terrain Map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainMap {
    params: TerrainMapParams,

    /// Height of each cell centre, indexed `[x, y]`.
    heights_m: Array2<f64>,

    /// Traversability cost of each cell, indexed `[x, y]`.
    costs: Array2<f64>,
}

/// Grid description of a [`TerrainMap`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainMapParams {
    /// The size of each (square) cell, in meters.
    pub cell_size_m: f64,

    /// The number of cells along the X and Y axes.
    pub num_cells: Vector2<usize>,

    /// Position of the minimum X/Y corner of the map in the world frame, in meters.
    pub origin_m: Vector2<f64>,
}

/// Parameters for generating terrain from Perlin noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerlinParams {
    /// Seed for the noise generator.
    pub seed: u32,

    /// Scale applied to world coordinates before sampling the noise. Smaller values give smoother
    /// terrain.
    pub scale: f64,

    /// Peak height of the generated terrain, in meters. The noise lies in [-1, 1] and is scaled by
    /// this.
    pub amplitude_m: f64,

    /// Heights above this (after scaling) are marked untraversable, representing obstacles.
    pub obstacle_height_m: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TerrainMap {
    /// Create a new flat terrain map at the given height, with zero cost everywhere.
    pub fn new_flat(params: TerrainMapParams, height_m: f64) -> Result<Self, TerrainError> {
        let shape = Self::validate(&params)?;

        Ok(Self {
            params,
            heights_m: Array2::from_elem(shape, height_m),
            costs: Array2::zeros(shape),
        })
    }

    /// Create a terrain map from raw height and cost arrays, indexed `[x, y]`.
    pub fn from_arrays(
        params: TerrainMapParams,
        heights_m: Array2<f64>,
        costs: Array2<f64>,
    ) -> Result<Self, TerrainError> {
        let shape = Self::validate(&params)?;

        for arr in [&heights_m, &costs].iter() {
            if arr.dim() != shape {
                return Err(TerrainError::IncompatibleShape(arr.dim(), shape));
            }
        }

        Ok(Self {
            params,
            heights_m,
            costs,
        })
    }

    /// Generate a random terrain map using a Perlin noise system.
    ///
    /// The cost of each cell is the normalised height, so higher ground is more expensive to
    /// cross.
    pub fn generate_random(
        params: TerrainMapParams,
        perlin_params: &PerlinParams,
    ) -> Result<Self, TerrainError> {
        let mut map = Self::new_flat(params, 0.0)?;

        let perlin = Perlin::new().set_seed(perlin_params.seed);

        let origin = map.params.origin_m;
        let cell_size = map.params.cell_size_m;
        let scale = perlin_params.scale;
        let amplitude = perlin_params.amplitude_m;

        for ((x, y), height) in map.heights_m.indexed_iter_mut() {
            let pos = Vector2::new(
                origin.x + (x as f64 + 0.5) * cell_size,
                origin.y + (y as f64 + 0.5) * cell_size,
            );
            *height = amplitude * perlin.get([pos.x * scale, pos.y * scale]);
        }

        let obstacle_height = perlin_params.obstacle_height_m;
        Zip::from(&mut map.costs)
            .and(&map.heights_m)
            .for_each(|cost, &height| {
                *cost = match obstacle_height {
                    Some(h) if height > h => UNTRAVERSABLE,
                    _ if amplitude > 0.0 => (((height / amplitude) + 1.0) / 2.0).max(0.0).min(1.0),
                    _ => 0.0,
                }
            });

        Ok(map)
    }

    /// The grid description of this map.
    pub fn params(&self) -> &TerrainMapParams {
        &self.params
    }

    /// The extent of the map along each axis, as `(min, max)` corners.
    pub fn extent(&self) -> (Vector2<f64>, Vector2<f64>) {
        let size = Vector2::new(
            self.params.num_cells.x as f64 * self.params.cell_size_m,
            self.params.num_cells.y as f64 * self.params.cell_size_m,
        );
        (self.params.origin_m, self.params.origin_m + size)
    }

    /// Returns `true` if the point lies within the map.
    pub fn contains(&self, point_m: &Vector2<f64>) -> bool {
        let (min, max) = self.extent();
        point_m.x >= min.x && point_m.x <= max.x && point_m.y >= min.y && point_m.y <= max.y
    }

    /// The cell containing the point, or `None` if outside the map.
    pub fn cell_index(&self, point_m: &Vector2<f64>) -> Option<(usize, usize)> {
        if !self.contains(point_m) {
            return None;
        }

        let rel = (point_m - self.params.origin_m) / self.params.cell_size_m;

        // Points on the max edge belong to the last cell
        let x = (rel.x.floor() as usize).min(self.params.num_cells.x - 1);
        let y = (rel.y.floor() as usize).min(self.params.num_cells.y - 1);

        Some((x, y))
    }

    /// Returns the range of height in the terrain, or an error if no height is known.
    pub fn range(&self) -> Result<Range<f64>, TerrainError> {
        let (min, max) = self
            .heights_m
            .iter()
            .filter(|h| !h.is_nan())
            .fold((None, None), |(min, max): (Option<f64>, Option<f64>), &h| {
                (
                    Some(min.map_or(h, |m| m.min(h))),
                    Some(max.map_or(h, |m| m.max(h))),
                )
            });

        match (min, max) {
            (Some(min), Some(max)) => Ok(min..max),
            _ => Err(TerrainError::Empty),
        }
    }

    /// Set the traversability cost of every cell whose centre is within `radius_m` of `centre_m`.
    pub fn set_cost_in_circle(&mut self, centre_m: &Vector2<f64>, radius_m: f64, cost: f64) {
        self.map_cells(|pos, _, c| {
            if (pos - centre_m).norm() <= radius_m {
                *c = cost;
            }
        });
    }

    /// Set the traversability cost of every cell whose centre lies in the given rectangle.
    pub fn set_cost_in_rect(&mut self, min_m: &Vector2<f64>, max_m: &Vector2<f64>, cost: f64) {
        self.map_cells(|pos, _, c| {
            if pos.x >= min_m.x && pos.x <= max_m.x && pos.y >= min_m.y && pos.y <= max_m.y {
                *c = cost;
            }
        });
    }

    /// Set the height of every cell whose centre lies in the given rectangle.
    pub fn set_height_in_rect(&mut self, min_m: &Vector2<f64>, max_m: &Vector2<f64>, height_m: f64) {
        self.map_cells(|pos, h, _| {
            if pos.x >= min_m.x && pos.x <= max_m.x && pos.y >= min_m.y && pos.y <= max_m.y {
                *h = height_m;
            }
        });
    }

    /// Set every cost in the map to the given value.
    pub fn fill_cost(&mut self, cost: f64) {
        self.costs.fill(cost);
    }

    /// Validates grid parameters, returning the array shape.
    fn validate(params: &TerrainMapParams) -> Result<(usize, usize), TerrainError> {
        if params.num_cells.x < 2 || params.num_cells.y < 2 {
            return Err(TerrainError::TooFewCells(
                params.num_cells.x,
                params.num_cells.y,
            ));
        }
        if !(params.cell_size_m.is_finite() && params.cell_size_m > 0.0) {
            return Err(TerrainError::InvalidCellSize(params.cell_size_m));
        }

        Ok((params.num_cells.x, params.num_cells.y))
    }

    /// Apply `func` to each cell, passing the cell centre position, height and cost.
    fn map_cells<F>(&mut self, mut func: F)
    where
        F: FnMut(Vector2<f64>, &mut f64, &mut f64),
    {
        let origin = self.params.origin_m;
        let cell_size = self.params.cell_size_m;

        Zip::indexed(&mut self.heights_m)
            .and(&mut self.costs)
            .for_each(|(x, y), h, c| {
                let pos = Vector2::new(
                    origin.x + (x as f64 + 0.5) * cell_size,
                    origin.y + (y as f64 + 0.5) * cell_size,
                );
                func(pos, h, c)
            });
    }

    /// Bilinear interpolation of the height grid.
    fn interp_height(&self, point_m: &Vector2<f64>) -> Option<f64> {
        if !self.contains(point_m) {
            return None;
        }

        // Continuous cell coordinates relative to the cell centres
        let rel = (point_m - self.params.origin_m) / self.params.cell_size_m
            - Vector2::new(0.5, 0.5);

        let max_x = (self.params.num_cells.x - 1) as f64;
        let max_y = (self.params.num_cells.y - 1) as f64;
        let fx = rel.x.max(0.0).min(max_x);
        let fy = rel.y.max(0.0).min(max_y);

        let x0 = (fx.floor() as usize).min(self.params.num_cells.x - 2);
        let y0 = (fy.floor() as usize).min(self.params.num_cells.y - 2);
        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let h00 = self.heights_m[[x0, y0]];
        let h10 = self.heights_m[[x0 + 1, y0]];
        let h01 = self.heights_m[[x0, y0 + 1]];
        let h11 = self.heights_m[[x0 + 1, y0 + 1]];

        let h = h00 * (1.0 - tx) * (1.0 - ty)
            + h10 * tx * (1.0 - ty)
            + h01 * (1.0 - tx) * ty
            + h11 * tx * ty;

        // Any unknown corner poisons the result
        if h.is_nan() {
            None
        } else {
            Some(h)
        }
    }
}

impl TerrainModel for TerrainMap {
    fn elevation(&self, point_m: &Vector2<f64>) -> Option<f64> {
        self.interp_height(point_m)
    }

    fn slope(&self, point_m: &Vector2<f64>) -> Option<f64> {
        // Central differences over one cell, falling back to the point itself at the map edges
        let d = self.params.cell_size_m;
        let h = self.interp_height(point_m)?;

        let sample = |offset: Vector2<f64>| {
            let p = point_m + offset;
            if self.contains(&p) {
                self.interp_height(&p).map(|v| (v, d))
            } else {
                Some((h, 0.0))
            }
        };

        let (xp, xp_d) = sample(Vector2::new(d, 0.0))?;
        let (xn, xn_d) = sample(Vector2::new(-d, 0.0))?;
        let (yp, yp_d) = sample(Vector2::new(0.0, d))?;
        let (yn, yn_d) = sample(Vector2::new(0.0, -d))?;

        let grad_x = if xp_d + xn_d > 0.0 { (xp - xn) / (xp_d + xn_d) } else { 0.0 };
        let grad_y = if yp_d + yn_d > 0.0 { (yp - yn) / (yp_d + yn_d) } else { 0.0 };

        Some((grad_x.powi(2) + grad_y.powi(2)).sqrt())
    }

    fn traversability_cost(&self, point_m: &Vector2<f64>) -> Option<f64> {
        let (x, y) = self.cell_index(point_m)?;

        if self.heights_m[[x, y]].is_nan() {
            None
        } else {
            Some(self.costs[[x, y]])
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
