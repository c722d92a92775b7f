use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};
use thiserror::Error;

/// A 3-D vector in the planner's local ENU frame (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// Create a new vector.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Euclidean length.
    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Length of the horizontal (x, y) component.
    pub fn norm_xy(self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Self) -> f32 {
        (self - other).norm()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if n > f32::EPSILON && n.is_finite() {
            Some(self * (1.0 / n))
        } else {
            None
        }
    }

    /// True when every component is finite.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Linear interpolation: `self` at `t = 0`, `other` at `t = 1`.
    pub fn lerp(self, other: Self, t: f32) -> Self {
        self * (1.0 - t) + other * t
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A direction on the unit sphere plus a range.
///
/// `e` is elevation in degrees (positive up, `[-90, 90]`), `z` is azimuth in
/// degrees measured clockwise from north (+y) toward east (+x), `r` is the
/// radius in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PolarPoint {
    pub e: f32,
    pub z: f32,
    pub r: f32,
}

impl PolarPoint {
    pub const fn new(e: f32, z: f32, r: f32) -> Self {
        Self { e, z, r }
    }
}

/// Flight mode chosen by the waypoint state machine for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointMode {
    /// Hold the current hover point.
    Hover,
    /// Fly toward the lowest-cost histogram direction.
    Costmap,
    /// Follow the retained look-ahead tree path.
    TryPath,
    /// Fly straight at the goal.
    Direct,
    /// Climb (or descend) to the take-off height before planning.
    ReachHeight,
    /// Retreat away from an obstacle that is too close.
    GoBack,
}

impl std::fmt::Display for WaypointMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            WaypointMode::Hover => "hover",
            WaypointMode::Costmap => "costmap",
            WaypointMode::TryPath => "try_path",
            WaypointMode::Direct => "direct",
            WaypointMode::ReachHeight => "reach_height",
            WaypointMode::GoBack => "go_back",
        };
        f.write_str(label)
    }
}

/// The single setpoint emitted per planning cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub mode: WaypointMode,
    /// Position setpoint in the local frame.
    pub position: Vec3,
    /// Velocity setpoint in the local frame (m/s).
    pub velocity: Vec3,
    /// `false` once the failsafe has declared the planner unusable.
    pub healthy: bool,
}

impl PlannerOutput {
    /// A hover setpoint holding `position` with zero velocity.
    pub fn hover(position: Vec3, healthy: bool) -> Self {
        Self {
            mode: WaypointMode::Hover,
            position,
            velocity: Vec3::zero(),
            healthy,
        }
    }
}

/// Kinematic limits of the vehicle, supplied by the flight controller and
/// used as constraints on every setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    /// Maximum vertical acceleration upward (m/s²).
    pub up_acc: f32,
    /// Maximum ascent velocity (m/s).
    pub up_vel: f32,
    /// Maximum vertical acceleration downward (m/s²).
    pub down_acc: f32,
    /// Maximum descent velocity (m/s).
    pub down_vel: f32,
    /// Maximum horizontal acceleration (m/s²).
    pub xy_acc: f32,
    /// Cruise horizontal velocity (m/s).
    pub xy_vel: f32,
    /// Climb rate used while reaching the take-off height (m/s).
    pub takeoff_speed: f32,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            up_acc: 10.0,
            up_vel: 3.0,
            down_acc: 10.0,
            down_vel: 1.0,
            xy_acc: 5.0,
            xy_vel: 1.0,
            takeoff_speed: 1.0,
        }
    }
}

/// Error type shared by every planner crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("Histogram resolution error: expected {expected}° bins, histogram has {actual}°")]
    Resolution { expected: u32, actual: u32 },

    #[error("Transform from {from} to {to} unavailable")]
    TransformUnavailable { from: String, to: String },

    #[error("Sensor {0} timed out")]
    SensorTimeout(String),

    #[error("Setpoint rejected by {rule}: {details}")]
    SetpointRejected { rule: String, details: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_arithmetic() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(0.5, -1.0, 1.0);
        assert_eq!(a + b, Vec3::new(1.5, 1.0, 4.0));
        assert_eq!(a - b, Vec3::new(0.5, 3.0, 2.0));
        assert_eq!(a * 2.0, Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(-a, Vec3::new(-1.0, -2.0, -3.0));
        assert!((a.dot(b) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn vec3_norms() {
        let v = Vec3::new(3.0, 4.0, 12.0);
        assert!((v.norm() - 13.0).abs() < 1e-5);
        assert!((v.norm_xy() - 5.0).abs() < 1e-5);
        assert!((Vec3::zero().distance(v) - 13.0).abs() < 1e-5);
    }

    #[test]
    fn normalized_rejects_zero_and_nan() {
        assert!(Vec3::zero().normalized().is_none());
        assert!(Vec3::new(f32::NAN, 0.0, 0.0).normalized().is_none());
        let u = Vec3::new(0.0, 2.0, 0.0).normalized().unwrap();
        assert!((u.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn lerp_endpoints() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(a.lerp(b, 0.5), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn waypoint_mode_serialization_roundtrip() {
        let json = serde_json::to_string(&WaypointMode::TryPath).unwrap();
        assert_eq!(json, "\"try_path\"");
        let back: WaypointMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WaypointMode::TryPath);
    }

    #[test]
    fn waypoint_mode_display_matches_serde_label() {
        for mode in [
            WaypointMode::Hover,
            WaypointMode::Costmap,
            WaypointMode::TryPath,
            WaypointMode::Direct,
            WaypointMode::ReachHeight,
            WaypointMode::GoBack,
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json.trim_matches('"'), mode.to_string());
        }
    }

    #[test]
    fn hover_output_has_zero_velocity() {
        let out = PlannerOutput::hover(Vec3::new(1.0, 2.0, 3.0), true);
        assert_eq!(out.mode, WaypointMode::Hover);
        assert_eq!(out.velocity, Vec3::zero());
        assert!(out.healthy);
    }

    #[test]
    fn model_parameters_partial_deserialization_uses_defaults() {
        let params: ModelParameters = serde_json::from_str(r#"{"xy_vel": 2.5}"#).unwrap();
        assert!((params.xy_vel - 2.5).abs() < f32::EPSILON);
        assert!((params.up_vel - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn planner_error_display() {
        let err = PlannerError::Resolution {
            expected: 6,
            actual: 12,
        };
        assert!(err.to_string().contains("resolution"));

        let err2 = PlannerError::TransformUnavailable {
            from: "front_camera".to_string(),
            to: "local_origin".to_string(),
        };
        assert!(err2.to_string().contains("front_camera"));
    }
}
