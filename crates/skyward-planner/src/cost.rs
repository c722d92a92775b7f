//! Cost matrix over candidate flight directions.
//!
//! Every histogram bin is a candidate direction. Its cost has two layers:
//!
//! | Layer | Source | Shape |
//! |-------|--------|-------|
//! | obstacle | histogram distance | `obstacle_cost_param / distance`, smoothed over neighbouring bins |
//! | shaping | goal, heading, last waypoint, height change | weighted angular deviations in degrees |
//!
//! Smoothing spreads obstacle cost into neighbouring bins so the vehicle keeps
//! clear of obstacle edges. The grid wraps in azimuth and reflects through
//! the poles in elevation, see [`pad_polar_matrix`].
//!
//! # Example
//!
//! ```rust
//! use skyward_perception::histogram::Histogram;
//! use skyward_perception::polar::ALPHA_RES;
//! use skyward_planner::cost::{CostParameters, get_cost_matrix, get_best_candidates_from_cost_matrix};
//! use skyward_types::Vec3;
//!
//! let histogram = Histogram::new(ALPHA_RES);
//! let goal = Vec3::new(0.0, 10.0, 0.0);
//! let (matrix, image) = get_cost_matrix(
//!     &histogram, goal, Vec3::zero(), 0.0, goal, &CostParameters::default(), 2);
//! assert_eq!(image.len(), matrix.rows() * matrix.cols() * 3);
//!
//! let best = get_best_candidates_from_cost_matrix(&matrix, 1);
//! assert_eq!(best[0].e_idx, 14);
//! ```

use serde::{Deserialize, Serialize};
use skyward_perception::grid::PolarGrid;
use skyward_perception::histogram::Histogram;
use skyward_perception::polar::{angle_difference, cartesian_to_polar, histogram_index_to_polar};
use skyward_types::{PolarPoint, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Parameters & candidates
// ────────────────────────────────────────────────────────────────────────────

/// Weights of the individual cost terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostParameters {
    /// Per degree of azimuth away from the goal.
    pub goal_cost_param: f32,
    /// Per degree of azimuth away from the current heading.
    pub heading_cost_param: f32,
    /// Per degree away from the last sent waypoint direction.
    pub smooth_cost_param: f32,
    /// Per degree of elevation away from the goal when descending.
    pub height_change_cost_param: f32,
    /// Per degree of elevation away from the goal when climbing.
    pub height_change_cost_param_adapted: f32,
    /// Numerator of the inverse-distance obstacle cost.
    pub obstacle_cost_param: f32,
}

impl Default for CostParameters {
    fn default() -> Self {
        Self {
            goal_cost_param: 2.0,
            heading_cost_param: 0.5,
            smooth_cost_param: 1.5,
            height_change_cost_param: 4.0,
            height_change_cost_param_adapted: 4.0,
            obstacle_cost_param: 1000.0,
        }
    }
}

/// A bin of the cost matrix and its cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateDirection {
    pub cost: f32,
    pub e_idx: usize,
    pub z_idx: usize,
}

impl CandidateDirection {
    /// Bin centre of this candidate on a grid of `resolution`-degree bins.
    pub fn to_polar(&self, resolution: u32, r: f32) -> PolarPoint {
        histogram_index_to_polar(self.e_idx, self.z_idx, resolution, r)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cost function
// ────────────────────────────────────────────────────────────────────────────

/// Cost of flying toward elevation `e`, azimuth `z` (degrees).
///
/// Returns `(distance_cost, other_costs)`. The distance cost is zero when the
/// bin holds no obstacle and otherwise falls off with the inverse of
/// `obstacle_distance`. The other costs penalise deviation from the goal,
/// the current `heading` (azimuth, degrees) and the last sent waypoint.
#[allow(clippy::too_many_arguments)]
pub fn cost_function(
    e: f32,
    z: f32,
    obstacle_distance: f32,
    goal: Vec3,
    position: Vec3,
    heading: f32,
    last_waypoint: Vec3,
    params: &CostParameters,
) -> (f32, f32) {
    let distance_cost = if obstacle_distance > 0.0 {
        params.obstacle_cost_param / obstacle_distance
    } else {
        0.0
    };

    let to_goal = cartesian_to_polar(goal, position);
    let to_waypoint = cartesian_to_polar(last_waypoint, position);

    let goal_cost = params.goal_cost_param * angle_difference(z, to_goal.z).abs();
    let heading_cost = params.heading_cost_param * angle_difference(z, heading).abs();
    let smooth_cost = params.smooth_cost_param
        * (angle_difference(z, to_waypoint.z).abs() + (e - to_waypoint.e).abs());
    let height_param = if e > to_goal.e {
        params.height_change_cost_param_adapted
    } else {
        params.height_change_cost_param
    };
    let height_cost = height_param * (e - to_goal.e).abs();

    (distance_cost, goal_cost + heading_cost + smooth_cost + height_cost)
}

/// Evaluate [`cost_function`] at every bin centre of `histogram`.
///
/// Returns the cost matrix (same shape as the histogram) and an RGB debug
/// image with one pixel per bin: red is the smoothed obstacle cost, green the
/// shaping cost, both scaled to `0..=255`.
#[allow(clippy::too_many_arguments)]
pub fn get_cost_matrix(
    histogram: &Histogram,
    goal: Vec3,
    position: Vec3,
    heading: f32,
    last_waypoint: Vec3,
    params: &CostParameters,
    smoothing_radius: usize,
) -> (PolarGrid, Vec<u8>) {
    let rows = histogram.rows();
    let cols = histogram.cols();
    let res = histogram.resolution();

    let mut obstacle = PolarGrid::new(rows, cols, 0.0);
    let mut shaping = PolarGrid::new(rows, cols, 0.0);
    for e in 0..rows {
        for z in 0..cols {
            let centre = histogram_index_to_polar(e, z, res, 0.0);
            let (distance_cost, other_costs) = cost_function(
                centre.e,
                centre.z,
                histogram.get_dist(e, z),
                goal,
                position,
                heading,
                last_waypoint,
                params,
            );
            obstacle.set(e, z, distance_cost);
            shaping.set(e, z, other_costs);
        }
    }

    smooth_polar_matrix(&mut obstacle, smoothing_radius);
    let image = debug_image(&obstacle, &shaping);

    let mut cost = obstacle;
    cost.add_assign(&shaping);
    (cost, image)
}

fn debug_image(obstacle: &PolarGrid, shaping: &PolarGrid) -> Vec<u8> {
    let scale = |grid: &PolarGrid| {
        let (lo, hi) = grid.finite_range().unwrap_or((0.0, 0.0));
        let span = hi - lo;
        move |v: f32| {
            if span > 0.0 && v.is_finite() {
                (((v - lo) / span) * 255.0).round() as u8
            } else {
                0
            }
        }
    };
    let red = scale(obstacle);
    let green = scale(shaping);
    obstacle
        .as_slice()
        .iter()
        .zip(shaping.as_slice())
        .flat_map(|(o, s)| [red(*o), green(*s), 0])
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Padding & smoothing
// ────────────────────────────────────────────────────────────────────────────

/// Pad `matrix` by `n` cells on every side with the values the sphere puts
/// there.
///
/// Padded columns wrap around in azimuth. Padded rows above the last or
/// below the first row are the mirrored rows on the far side of the pole,
/// shifted by half the grid width.
pub fn pad_polar_matrix(matrix: &PolarGrid, n: usize) -> PolarGrid {
    let rows = matrix.rows();
    let cols = matrix.cols();
    let mut padded = PolarGrid::new(rows + 2 * n, cols + 2 * n, 0.0);
    let n = n as isize;
    for pr in 0..padded.rows() {
        for pc in 0..padded.cols() {
            let value = matrix.get_wrapped(pr as isize - n, pc as isize - n);
            padded.set(pr, pc, value);
        }
    }
    padded
}

/// Spread each cell over its neighbours within `radius` bins.
///
/// The kernel is a pyramid: the weight at offset `(dr, dz)` is
/// `(r+1-|dr|)(r+1-|dz|)/(r+1)²`, so the centre keeps its full value. The
/// result is the weighted sum, not the average, so non-negative input only
/// grows.
pub fn smooth_polar_matrix(matrix: &mut PolarGrid, radius: usize) {
    if radius == 0 {
        return;
    }
    let rows = matrix.rows();
    let cols = matrix.cols();
    let padded = pad_polar_matrix(matrix, radius);
    let weights: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i.abs_diff(radius);
            (radius + 1 - d) as f32 / (radius + 1) as f32
        })
        .collect();

    // The kernel is separable: azimuth pass over the padded rows first.
    let mut horizontal = PolarGrid::new(padded.rows(), cols, 0.0);
    for pr in 0..padded.rows() {
        for c in 0..cols {
            let sum: f32 = weights
                .iter()
                .enumerate()
                .map(|(k, w)| w * padded.get(pr, c + k))
                .sum();
            horizontal.set(pr, c, sum);
        }
    }

    for r in 0..rows {
        for c in 0..cols {
            let sum: f32 = weights
                .iter()
                .enumerate()
                .map(|(k, w)| w * horizontal.get(r + k, c))
                .sum();
            matrix.set(r, c, sum);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Candidate selection
// ────────────────────────────────────────────────────────────────────────────

/// The `n` cheapest finite bins of `matrix`, cheapest first.
///
/// Equal costs keep row-major scan order. Non-finite bins are never
/// candidates.
pub fn get_best_candidates_from_cost_matrix(matrix: &PolarGrid, n: usize) -> Vec<CandidateDirection> {
    let mut candidates: Vec<CandidateDirection> = matrix
        .iter()
        .filter(|(_, _, cost)| cost.is_finite())
        .map(|(e_idx, z_idx, cost)| CandidateDirection { cost, e_idx, z_idx })
        .collect();
    candidates.sort_by(|a, b| a.cost.total_cmp(&b.cost));
    candidates.truncate(n);
    candidates
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
