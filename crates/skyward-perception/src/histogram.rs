//! Polar obstacle histogram.
//!
//! A [`Histogram`] stores, for every direction bin around a point, the
//! distance to the nearest obstacle seen in that direction. A value of `0`
//! means the bin is empty or unknown.
//!
//! Two resolutions are used: fine ([`ALPHA_RES`]) for the main cost matrix
//! and coarse (`2 * ALPHA_RES`) for the tree search, which evaluates many
//! nodes per cycle.
//!
//! # Example
//!
//! ```rust
//! use skyward_perception::histogram::{Histogram, generate_new_histogram};
//! use skyward_perception::polar::ALPHA_RES;
//! use skyward_types::Vec3;
//!
//! let mut h = Histogram::new(ALPHA_RES);
//! generate_new_histogram(&mut h, [Vec3::new(0.0, 2.0, 0.0)], Vec3::zero());
//! assert!((h.get_dist(15, 30) - 2.0).abs() < 1e-5);
//!
//! h.downsample().unwrap();
//! assert!((h.get_dist(7, 15) - 2.0).abs() < 1e-5);
//! ```

use crate::grid::PolarGrid;
use crate::polar::{ALPHA_RES, cartesian_to_polar, grid_cols, grid_rows, polar_to_histogram_index};
use skyward_types::{PlannerError, Vec3};

/// Nearest-obstacle distance per direction bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    resolution: u32,
    dist: PolarGrid,
}

impl Histogram {
    /// An empty histogram with `resolution`-degree bins.
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            dist: PolarGrid::new(grid_rows(resolution), grid_cols(resolution), 0.0),
        }
    }

    /// Bin width in degrees.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn rows(&self) -> usize {
        self.dist.rows()
    }

    pub fn cols(&self) -> usize {
        self.dist.cols()
    }

    pub fn get_dist(&self, e: usize, z: usize) -> f32 {
        self.dist.get(e, z)
    }

    pub fn set_dist(&mut self, e: usize, z: usize, dist: f32) {
        self.dist.set(e, z, dist);
    }

    /// Reset every bin to empty.
    pub fn set_zero(&mut self) {
        self.dist.fill(0.0);
    }

    /// True when no bin holds an obstacle.
    pub fn is_empty(&self) -> bool {
        self.dist.as_slice().iter().all(|d| *d == 0.0)
    }

    /// Convert a fine histogram to the coarse resolution.
    ///
    /// Each coarse bin takes the nearest (smallest non-zero) distance of its
    /// 2×2 fine block; a block with no obstacle stays empty.
    pub fn downsample(&mut self) -> Result<(), PlannerError> {
        self.expect_resolution(ALPHA_RES)?;
        let coarse_res = 2 * ALPHA_RES;
        let mut coarse = PolarGrid::new(grid_rows(coarse_res), grid_cols(coarse_res), 0.0);
        for e in 0..coarse.rows() {
            for z in 0..coarse.cols() {
                let nearest = [
                    (2 * e, 2 * z),
                    (2 * e + 1, 2 * z),
                    (2 * e, 2 * z + 1),
                    (2 * e + 1, 2 * z + 1),
                ]
                .into_iter()
                .map(|(fe, fz)| self.dist.get(fe, fz))
                .filter(|d| *d > 0.0)
                .fold(0.0_f32, |acc, d| if acc == 0.0 { d } else { acc.min(d) });
                coarse.set(e, z, nearest);
            }
        }
        self.dist = coarse;
        self.resolution = coarse_res;
        Ok(())
    }

    /// Convert a coarse histogram back to the fine resolution, copying each
    /// coarse bin into its four fine bins.
    pub fn upsample(&mut self) -> Result<(), PlannerError> {
        self.expect_resolution(2 * ALPHA_RES)?;
        let mut fine = PolarGrid::new(grid_rows(ALPHA_RES), grid_cols(ALPHA_RES), 0.0);
        for e in 0..fine.rows() {
            for z in 0..fine.cols() {
                fine.set(e, z, self.dist.get(e / 2, z / 2));
            }
        }
        self.dist = fine;
        self.resolution = ALPHA_RES;
        Ok(())
    }

    /// The underlying distance grid.
    pub fn grid(&self) -> &PolarGrid {
        &self.dist
    }

    fn expect_resolution(&self, expected: u32) -> Result<(), PlannerError> {
        if self.resolution == expected {
            Ok(())
        } else {
            Err(PlannerError::Resolution {
                expected,
                actual: self.resolution,
            })
        }
    }
}

/// Rebuild `histogram` from `points` as seen from `position`.
///
/// Every bin ends up holding the minimum range of the points that fall into
/// it; bins no point falls into are zero. Non-finite points are ignored.
pub fn generate_new_histogram<I>(histogram: &mut Histogram, points: I, position: Vec3)
where
    I: IntoIterator<Item = Vec3>,
{
    histogram.set_zero();
    let res = histogram.resolution();
    for point in points {
        if !point.is_finite() {
            continue;
        }
        let p = cartesian_to_polar(point, position);
        if p.r <= 0.0 {
            continue;
        }
        let (e, z) = polar_to_histogram_index(p, res);
        let current = histogram.get_dist(e, z);
        if current == 0.0 || p.r < current {
            histogram.set_dist(e, z, p.r);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polar::{GRID_LENGTH_E, GRID_LENGTH_Z, polar_to_cartesian};
    use skyward_types::PolarPoint;

    #[test]
    fn empty_cloud_gives_empty_histogram() {
        let mut h = Histogram::new(ALPHA_RES);
        h.set_dist(3, 3, 4.0);
        generate_new_histogram(&mut h, std::iter::empty(), Vec3::zero());
        for e in 0..GRID_LENGTH_E {
            for z in 0..GRID_LENGTH_Z {
                assert!(h.get_dist(e, z) <= f32::MIN_POSITIVE);
            }
        }
    }

    #[test]
    fn specific_cells_are_filled() {
        let location = Vec3::zero();
        // Kept off bin edges so the cartesian round trip cannot change bins.
        let e_angles = [-89.9_f32, -33.0, 0.0, 20.0, 40.0, 89.9];
        let z_angles = [-177.0_f32, -50.0, 0.0, 59.0, 100.0, 175.0];

        let mut cloud = Vec::new();
        let mut e_index = Vec::new();
        let mut z_index = Vec::new();
        for &e in &e_angles {
            for &z in &z_angles {
                let p = PolarPoint::new(e, z, 1.0);
                let (ei, zi) = polar_to_histogram_index(p, ALPHA_RES);
                e_index.push(ei);
                z_index.push(zi);
                let c = polar_to_cartesian(p, location);
                cloud.extend(std::iter::repeat_n(c, 20));
            }
        }

        let mut h = Histogram::new(ALPHA_RES);
        generate_new_histogram(&mut h, cloud, location);

        for e in 0..GRID_LENGTH_E {
            for z in 0..GRID_LENGTH_Z {
                if e_index.contains(&e) && z_index.contains(&z) {
                    assert!((h.get_dist(e, z) - 1.0).abs() < 0.01, "bin ({e}, {z})");
                } else {
                    assert!(h.get_dist(e, z) < f32::MIN_POSITIVE, "bin ({e}, {z})");
                }
            }
        }
    }

    #[test]
    fn bin_keeps_minimum_range() {
        let mut h = Histogram::new(ALPHA_RES);
        let points = [
            Vec3::new(0.0, 5.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(0.0, 3.0, 0.0),
            Vec3::new(f32::NAN, 1.0, 0.0),
        ];
        generate_new_histogram(&mut h, points, Vec3::zero());
        assert!((h.get_dist(15, 30) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn downsample_fuses_blocks() {
        let mut h = Histogram::new(ALPHA_RES);
        for (e, z) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            h.set_dist(e, z, 1.3);
        }
        h.downsample().unwrap();
        assert_eq!(h.resolution(), 2 * ALPHA_RES);
        for e in 0..GRID_LENGTH_E / 2 {
            for z in 0..GRID_LENGTH_Z / 2 {
                let expected = if e == 0 && z == 0 { 1.3 } else { 0.0 };
                assert_eq!(h.get_dist(e, z), expected);
            }
        }
    }

    #[test]
    fn downsample_nearest_obstacle_wins() {
        let mut h = Histogram::new(ALPHA_RES);
        h.set_dist(4, 6, 3.0);
        h.set_dist(5, 7, 1.5);
        h.set_dist(5, 6, 0.0);
        h.downsample().unwrap();
        assert_eq!(h.get_dist(2, 3), 1.5);
    }

    #[test]
    fn upsample_replicates_blocks() {
        let mut h = Histogram::new(2 * ALPHA_RES);
        h.set_dist(0, 0, 1.3);
        h.upsample().unwrap();
        assert_eq!(h.resolution(), ALPHA_RES);
        for e in 0..GRID_LENGTH_E {
            for z in 0..GRID_LENGTH_Z {
                let expected = if e < 2 && z < 2 { 1.3 } else { 0.0 };
                assert_eq!(h.get_dist(e, z), expected);
            }
        }
    }

    #[test]
    fn resampling_at_wrong_resolution_fails() {
        let mut coarse = Histogram::new(2 * ALPHA_RES);
        let mut fine = Histogram::new(ALPHA_RES);
        assert_eq!(
            coarse.downsample(),
            Err(PlannerError::Resolution {
                expected: ALPHA_RES,
                actual: 2 * ALPHA_RES
            })
        );
        assert!(matches!(fine.upsample(), Err(PlannerError::Resolution { .. })));
        // Failed calls leave the histogram untouched.
        assert_eq!(fine.resolution(), ALPHA_RES);
    }

    #[test]
    fn is_empty_tracks_single_cell() {
        let mut h = Histogram::new(ALPHA_RES);
        assert!(h.is_empty());
        h.set_dist(0, 0, 1.3);
        assert!(!h.is_empty());
        h.set_dist(0, 0, 0.0);
        assert!(h.is_empty());
    }
}
