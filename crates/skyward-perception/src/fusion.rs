//! Point-cloud fusion with temporal memory.
//!
//! Every cycle the latest cloud of each sensor is merged into a single fused
//! cloud around the vehicle:
//!
//! - points outside the [`BoundingBox`] or closer than the sensor's minimum
//!   range are rejected;
//! - points carried over from earlier cycles ("memory") age by the cycle's
//!   `dt` and are dropped once older than `max_age`;
//! - memory inside the current field of view is dropped by
//!   [`prune_visible_memory`], since the sensor looking there is authoritative.
//!
//! # Example
//!
//! ```rust
//! use skyward_perception::fusion::{AgedPoint, BoundingBox, process_pointcloud};
//! use skyward_types::Vec3;
//!
//! let position = Vec3::new(0.0, 0.0, 2.0);
//! let mut bbox = BoundingBox::new(5.0);
//! bbox.set_box_limits(position, 2.0);
//!
//! let clouds = vec![vec![Vec3::new(1.0, 1.0, 2.0), Vec3::new(20.0, 0.0, 2.0)]];
//! let mut fused: Vec<AgedPoint> = Vec::new();
//! process_pointcloud(&mut fused, &clouds, &bbox, position, 0.2, 2.0, 0.1);
//! assert_eq!(fused.len(), 1);
//! ```

use std::collections::HashSet;

use crate::fov::FovWindow;
use crate::polar::{ALPHA_RES, cartesian_to_polar, polar_to_histogram_index};
use skyward_types::Vec3;
use tracing::trace;

/// Clearance kept between the box floor and the ground so ground returns do
/// not register as obstacles (metres).
pub const BOX_Z_CLEARANCE: f32 = 0.5;

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

/// A fused point and how long it has been held in memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgedPoint {
    pub position: Vec3,
    /// Accumulated `dt` since the point was last observed; `0` for fresh
    /// points.
    pub age: f32,
}

impl AgedPoint {
    pub fn new(position: Vec3, age: f32) -> Self {
        Self { position, age }
    }
}

/// Axis-aligned box around the vehicle outside of which points are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub radius: f32,
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
    pub zmin: f32,
    pub zmax: f32,
}

impl BoundingBox {
    /// A box of half-width `radius`. Limits are set by
    /// [`BoundingBox::set_box_limits`].
    pub fn new(radius: f32) -> Self {
        Self {
            radius,
            xmin: 0.0,
            xmax: 0.0,
            ymin: 0.0,
            ymax: 0.0,
            zmin: 0.0,
            zmax: 0.0,
        }
    }

    /// Centre the box on `position`. The floor is raised so that it stays
    /// [`BOX_Z_CLEARANCE`] above the ground.
    pub fn set_box_limits(&mut self, position: Vec3, ground_distance: f32) {
        self.xmin = position.x - self.radius;
        self.xmax = position.x + self.radius;
        self.ymin = position.y - self.radius;
        self.ymax = position.y + self.radius;
        self.zmin = position.z - (ground_distance - BOX_Z_CLEARANCE).clamp(0.0, self.radius);
        self.zmax = position.z + self.radius;
    }

    /// Strict containment test.
    pub fn contains(&self, p: Vec3) -> bool {
        p.x > self.xmin
            && p.x < self.xmax
            && p.y > self.ymin
            && p.y < self.ymax
            && p.z > self.zmin
            && p.z < self.zmax
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fusion
// ────────────────────────────────────────────────────────────────────────────

/// Merge the latest sensor `clouds` into `fused_cloud`.
///
/// Memory already in `fused_cloud` ages by `dt`; it survives if it is still in
/// `bbox`, at least `min_range` from `position`, and no older than
/// `max_age`. New points enter with age 0 under the same spatial filter.
/// Non-finite points are skipped.
pub fn process_pointcloud(
    fused_cloud: &mut Vec<AgedPoint>,
    clouds: &[Vec<Vec3>],
    bbox: &BoundingBox,
    position: Vec3,
    min_range: f32,
    max_age: f32,
    dt: f32,
) {
    let keep = |p: Vec3| p.is_finite() && bbox.contains(p) && p.distance(position) >= min_range;

    let before = fused_cloud.len();
    fused_cloud.retain_mut(|point| {
        point.age += dt;
        point.age <= max_age && keep(point.position)
    });
    let remembered = fused_cloud.len();

    for cloud in clouds {
        fused_cloud.extend(
            cloud
                .iter()
                .copied()
                .filter(|p| keep(*p))
                .map(|p| AgedPoint::new(p, 0.0)),
        );
    }

    trace!(
        dropped_memory = before - remembered,
        remembered,
        total = fused_cloud.len(),
        "fused point cloud"
    );
}

/// Drop memory points that fall inside the current field of view.
///
/// Fresh points (age 0) are always kept.
pub fn prune_visible_memory(fused_cloud: &mut Vec<AgedPoint>, fov: &FovWindow, position: Vec3) {
    fused_cloud.retain(|point| {
        if point.age <= 0.0 {
            return true;
        }
        let (e, z) = polar_to_histogram_index(cartesian_to_polar(point.position, position), ALPHA_RES);
        !fov.contains(e, z)
    });
}

/// Reduce point density with a voxel grid of edge `resolution` (m).
///
/// Keeps the first point encountered in each occupied voxel, so the output
/// size is bounded by the occupied volume rather than the sensor density. A
/// non-positive `resolution` keeps every point.
pub fn voxel_downsample<I>(points: I, resolution: f32) -> Vec<Vec3>
where
    I: IntoIterator<Item = Vec3>,
{
    let points = points.into_iter();
    if resolution <= 0.0 {
        return points.collect();
    }
    let inv = 1.0 / resolution;
    let mut occupied: HashSet<(i32, i32, i32)> = HashSet::new();
    let mut out = Vec::with_capacity(points.size_hint().0);
    for p in points {
        let key = (
            (p.x * inv).floor() as i32,
            (p.y * inv).floor() as i32,
            (p.z * inv).floor() as i32,
        );
        if occupied.insert(key) {
            out.push(p);
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
