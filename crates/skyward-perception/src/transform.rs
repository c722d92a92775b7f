//! Frame transforms for sensor point clouds.
//!
//! Depth sensors report points in their own optical frame. Before fusion
//! every cloud must be expressed in the planner's fixed frame
//! ([`LOCAL_ORIGIN`]). [`TfEngine`] keeps a directed graph of named frames and
//! the rigid-body poses that relate them, and composes a chain of poses via
//! BFS when a sensor asks for its transform.
//!
//! # Example
//!
//! ```rust
//! use skyward_perception::transform::{TfEngine, Transform3D, Quaternion, LOCAL_ORIGIN};
//! use skyward_types::Vec3;
//!
//! let mut tf = TfEngine::new();
//!
//! // Vehicle body is 2 m above the origin.
//! tf.set_transform(LOCAL_ORIGIN, "base_link",
//!     Transform3D::new(Vec3::new(0.0, 0.0, 2.0), Quaternion::identity()));
//! // Camera sits 0.1 m forward of the body.
//! tf.set_transform("base_link", "front_camera",
//!     Transform3D::new(Vec3::new(0.1, 0.0, 0.0), Quaternion::identity()));
//!
//! let cloud = tf
//!     .transform_cloud(&[Vec3::new(1.0, 0.0, 0.0)], "front_camera", LOCAL_ORIGIN)
//!     .unwrap();
//! assert!((cloud[0].x - 1.1).abs() < 1e-5);
//! assert!((cloud[0].z - 2.0).abs() < 1e-5);
//! ```

use skyward_types::{PlannerError, Vec3};
use std::collections::{HashMap, HashSet, VecDeque};

/// Name of the fixed frame every fused cloud is expressed in.
pub const LOCAL_ORIGIN: &str = "local_origin";

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create a quaternion. The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation from intrinsic Z-Y-X Euler angles in radians (yaw about +z,
    /// then pitch about +y, then roll about +x).
    pub fn from_euler(roll: f32, pitch: f32, yaw: f32) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// Pose of a child frame relative to its parent.
///
/// A point expressed in the child frame is mapped into the parent frame by
/// rotating it by `rotation` and adding `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Chain two poses: if `self` = T_A_B and `other` = T_B_C the result is
    /// T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation + self.rotation.rotate(other.translation);
        Self::new(translated, self.rotation.mul(other.rotation))
    }

    /// Map a child-frame point into the parent frame.
    pub fn apply(self, point: Vec3) -> Vec3 {
        self.rotation.rotate(point) + self.translation
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// Directed graph of named frames and the [`Transform3D`] poses between
/// them.
///
/// Edges point from parent to child; adding `"A" → "B"` does not create the
/// inverse edge.
#[derive(Debug, Default, Clone)]
pub struct TfEngine {
    /// `edges[parent][child] = T_parent_child`
    edges: HashMap<String, HashMap<String, Transform3D>>,
}

impl TfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the pose of `child_frame` in `parent_frame`.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
    }

    /// Pose of `child_frame` expressed in `parent_frame`, composed over the
    /// shortest chain of registered edges.
    ///
    /// Returns `None` if no chain exists.
    pub fn lookup(&self, parent_frame: &str, child_frame: &str) -> Option<Transform3D> {
        if parent_frame == child_frame {
            return Some(Transform3D::identity());
        }

        let mut queue: VecDeque<(&str, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();
        queue.push_back((parent_frame, Transform3D::identity()));
        visited.insert(parent_frame);

        while let Some((current, accumulated)) = queue.pop_front() {
            let Some(children) = self.edges.get(current) else {
                continue;
            };
            for (next, edge_tf) in children {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                let composed = accumulated.compose(*edge_tf);
                if next == child_frame {
                    return Some(composed);
                }
                queue.push_back((next.as_str(), composed));
            }
        }

        None
    }

    /// True when a chain from `parent_frame` to `child_frame` is known.
    pub fn can_transform(&self, parent_frame: &str, child_frame: &str) -> bool {
        self.lookup(parent_frame, child_frame).is_some()
    }

    /// Express `cloud`, given in `cloud_frame`, in `fixed_frame`.
    pub fn transform_cloud(
        &self,
        cloud: &[Vec3],
        cloud_frame: &str,
        fixed_frame: &str,
    ) -> Result<Vec<Vec3>, PlannerError> {
        let tf = self
            .lookup(fixed_frame, cloud_frame)
            .ok_or_else(|| PlannerError::TransformUnavailable {
                from: cloud_frame.to_string(),
                to: fixed_frame.to_string(),
            })?;
        Ok(cloud.iter().map(|p| tf.apply(*p)).collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
