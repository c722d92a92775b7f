//! Spherical coordinate helpers.
//!
//! Every direction the planner reasons about is a [`PolarPoint`] relative to
//! some origin (usually the vehicle position):
//!
//! | Field | Range | Convention |
//! |-------|-------|------------|
//! | `e` | `[-90, 90]` | elevation, positive up |
//! | `z` | `[-180, 180)` | azimuth, clockwise from north (+y) toward east (+x) |
//! | `r` | `>= 0` | range in metres |
//!
//! Histogram bins are `res` degrees wide; a grid at resolution `res` has
//! `180 / res` rows (elevation) and `360 / res` columns (azimuth).
//!
//! # Example
//!
//! ```rust
//! use skyward_perception::polar::{cartesian_to_polar, polar_to_histogram_index, ALPHA_RES};
//! use skyward_types::Vec3;
//!
//! // One metre due east, level with the origin.
//! let p = cartesian_to_polar(Vec3::new(1.0, 0.0, 0.0), Vec3::zero());
//! assert!((p.z - 90.0).abs() < 1e-4);
//! assert_eq!(polar_to_histogram_index(p, ALPHA_RES), (15, 45));
//! ```

use skyward_types::{PolarPoint, Vec3};

/// Angular width of a fine histogram bin (degrees).
pub const ALPHA_RES: u32 = 6;
/// Number of elevation rows at [`ALPHA_RES`].
pub const GRID_LENGTH_E: usize = (180 / ALPHA_RES) as usize;
/// Number of azimuth columns at [`ALPHA_RES`].
pub const GRID_LENGTH_Z: usize = (360 / ALPHA_RES) as usize;

/// Rows of a grid at resolution `res`.
pub fn grid_rows(res: u32) -> usize {
    (180 / res) as usize
}

/// Columns of a grid at resolution `res`.
pub fn grid_cols(res: u32) -> usize {
    (360 / res) as usize
}

/// Wrap an angle in degrees into `[-180, 180)`.
pub fn wrap_angle_to_plus_minus_180(angle: f32) -> f32 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if wrapped >= 180.0 { wrapped - 360.0 } else { wrapped }
}

/// Signed smallest difference `a - b` between two azimuths, in `[-180, 180)`.
pub fn angle_difference(a: f32, b: f32) -> f32 {
    wrap_angle_to_plus_minus_180(a - b)
}

/// Bring a polar point back into the canonical ranges.
///
/// Elevations past a pole are mirrored back and the azimuth is flipped by
/// 180°, so `(100, 0)` becomes `(80, -180)`.
pub fn wrap_polar(p: PolarPoint) -> PolarPoint {
    let mut e = wrap_angle_to_plus_minus_180(p.e);
    let mut z = wrap_angle_to_plus_minus_180(p.z);
    if e > 90.0 {
        e = 180.0 - e;
        z += 180.0;
    } else if e < -90.0 {
        e = -(180.0 + e);
        z += 180.0;
    }
    z = wrap_angle_to_plus_minus_180(z);
    PolarPoint::new(e, z, p.r)
}

/// Direction and range of `point` as seen from `origin`.
pub fn cartesian_to_polar(point: Vec3, origin: Vec3) -> PolarPoint {
    let d = point - origin;
    let r = d.norm();
    let z = d.x.atan2(d.y).to_degrees();
    let e = d.z.atan2(d.norm_xy()).to_degrees();
    PolarPoint::new(e, wrap_angle_to_plus_minus_180(z), r)
}

/// Cartesian position of `p` relative to `origin`.
pub fn polar_to_cartesian(p: PolarPoint, origin: Vec3) -> Vec3 {
    let (se, ce) = p.e.to_radians().sin_cos();
    let (sz, cz) = p.z.to_radians().sin_cos();
    Vec3::new(
        origin.x + p.r * ce * sz,
        origin.y + p.r * ce * cz,
        origin.z + p.r * se,
    )
}

/// `(e_idx, z_idx)` of the bin containing `p` at resolution `res`.
///
/// Elevation indices are clamped to the grid; azimuth indices wrap, so both
/// `-180°` and `+180°` land in column 0.
pub fn polar_to_histogram_index(p: PolarPoint, res: u32) -> (usize, usize) {
    let p = wrap_polar(p);
    let res = res as f32;
    let rows = (180.0 / res) as i64;
    let cols = (360.0 / res) as i64;
    let e_idx = (((p.e + 90.0) / res).floor() as i64).clamp(0, rows - 1);
    let z_idx = (((p.z + 180.0) / res).floor() as i64).rem_euclid(cols);
    (e_idx as usize, z_idx as usize)
}

/// Polar point at the centre of bin `(e_idx, z_idx)` with range `r`.
pub fn histogram_index_to_polar(e_idx: usize, z_idx: usize, res: u32, r: f32) -> PolarPoint {
    let res = res as f32;
    PolarPoint::new(
        e_idx as f32 * res + res / 2.0 - 90.0,
        z_idx as f32 * res + res / 2.0 - 180.0,
        r,
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn grid_dimensions() {
        assert_eq!(GRID_LENGTH_E, 30);
        assert_eq!(GRID_LENGTH_Z, 60);
        assert_eq!(grid_rows(2 * ALPHA_RES), 15);
        assert_eq!(grid_cols(2 * ALPHA_RES), 30);
    }

    #[test]
    fn wrap_angle_ranges() {
        assert!(close(wrap_angle_to_plus_minus_180(190.0), -170.0));
        assert!(close(wrap_angle_to_plus_minus_180(-190.0), 170.0));
        assert!(close(wrap_angle_to_plus_minus_180(180.0), -180.0));
        assert!(close(wrap_angle_to_plus_minus_180(720.0 + 45.0), 45.0));
    }

    #[test]
    fn angle_difference_takes_short_way_round() {
        assert!(close(angle_difference(170.0, -170.0), -20.0));
        assert!(close(angle_difference(-170.0, 170.0), 20.0));
    }

    #[test]
    fn wrap_polar_reflects_through_pole() {
        let p = wrap_polar(PolarPoint::new(100.0, 0.0, 1.0));
        assert!(close(p.e, 80.0));
        assert!(close(p.z, -180.0));

        let q = wrap_polar(PolarPoint::new(-100.0, 30.0, 1.0));
        assert!(close(q.e, -80.0));
        assert!(close(q.z, -150.0));
    }

    #[test]
    fn cardinal_directions() {
        let o = Vec3::zero();
        let north = cartesian_to_polar(Vec3::new(0.0, 2.0, 0.0), o);
        assert!(close(north.z, 0.0) && close(north.e, 0.0) && close(north.r, 2.0));
        let east = cartesian_to_polar(Vec3::new(1.0, 0.0, 0.0), o);
        assert!(close(east.z, 90.0));
        let west = cartesian_to_polar(Vec3::new(-1.0, 0.0, 0.0), o);
        assert!(close(west.z, -90.0));
        let up = cartesian_to_polar(Vec3::new(0.0, 0.0, 3.0), o);
        assert!(close(up.e, 90.0));
    }

    #[test]
    fn polar_cartesian_roundtrip_from_offset_origin() {
        let origin = Vec3::new(1.0, -2.0, 3.0);
        let p = PolarPoint::new(20.0, -130.0, 4.0);
        let c = polar_to_cartesian(p, origin);
        let back = cartesian_to_polar(c, origin);
        assert!(close(back.e, p.e) && close(back.z, p.z) && close(back.r, p.r));
    }

    #[test]
    fn histogram_index_edges() {
        assert_eq!(polar_to_histogram_index(PolarPoint::new(-90.0, -180.0, 1.0), 6), (0, 0));
        assert_eq!(polar_to_histogram_index(PolarPoint::new(90.0, 179.9, 1.0), 6), (29, 59));
        // +180 is the same direction as -180.
        assert_eq!(polar_to_histogram_index(PolarPoint::new(0.0, 180.0, 1.0), 6).1, 0);
        assert_eq!(polar_to_histogram_index(PolarPoint::new(0.0, 0.0, 1.0), 12), (7, 15));
    }

    #[test]
    fn bin_centre_maps_back_to_same_bin() {
        for e in 0..GRID_LENGTH_E {
            for z in 0..GRID_LENGTH_Z {
                let p = histogram_index_to_polar(e, z, ALPHA_RES, 1.0);
                assert_eq!(polar_to_histogram_index(p, ALPHA_RES), (e, z));
            }
        }
    }
}
