//! Camera field of view on the histogram grid.
//!
//! The window is the set of fine bins the vehicle's sensors currently see.
//! Memory points inside it are stale (the sensor would have reported them
//! again) and the cost engine treats unseen bins differently from seen empty
//! ones.

use crate::grid::wrap_column;
use crate::polar::{ALPHA_RES, GRID_LENGTH_E, GRID_LENGTH_Z, cartesian_to_polar};
use crate::transform::Quaternion;
use skyward_types::Vec3;

/// Fine-resolution bins covered by the sensor field of view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FovWindow {
    /// Azimuth columns, ascending. One or two contiguous runs.
    pub z_indices: Vec<usize>,
    /// Lowest covered elevation row (inclusive).
    pub e_min: usize,
    /// Highest covered elevation row (inclusive).
    pub e_max: usize,
}

impl FovWindow {
    /// True when bin `(e, z)` lies inside the window.
    pub fn contains(&self, e: usize, z: usize) -> bool {
        e >= self.e_min && e <= self.e_max && self.z_indices.binary_search(&z).is_ok()
    }
}

/// Bins seen by a camera with `h_fov` × `v_fov` degrees of coverage pointed
/// at azimuth `yaw` and elevation `pitch` (degrees).
pub fn calculate_fov(h_fov: f32, v_fov: f32, yaw: f32, pitch: f32) -> FovWindow {
    let res = ALPHA_RES as f32;
    let e_row = |e: f32| (((e + 90.0) / res).floor() as i64).clamp(0, GRID_LENGTH_E as i64 - 1) as usize;
    let z_col = |z: f32| ((z + 180.0) / res).floor() as isize;

    let e_max = e_row(pitch + v_fov / 2.0);
    let e_min = e_row(pitch - v_fov / 2.0);

    let z_max = z_col(yaw + h_fov / 2.0);
    let z_min = z_col(yaw - h_fov / 2.0);
    let mut z_indices: Vec<usize> = (z_min..=z_max)
        .take(GRID_LENGTH_Z)
        .map(|z| wrap_column(z, GRID_LENGTH_Z))
        .collect();
    z_indices.sort_unstable();
    z_indices.dedup();

    FovWindow {
        z_indices,
        e_min,
        e_max,
    }
}

/// Azimuth and elevation (degrees) of the vehicle's forward (+x body) axis.
pub fn orientation_to_yaw_pitch(orientation: Quaternion) -> (f32, f32) {
    let forward = orientation.rotate(Vec3::new(1.0, 0.0, 0.0));
    let p = cartesian_to_polar(forward, Vec3::zero());
    (p.z, p.e)
}
