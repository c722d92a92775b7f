//! Waypoint state machine.
//!
//! Each cycle [`select_mode`] picks one [`WaypointMode`] from the planner's
//! observations, checked in a fixed order:
//!
//! | # | Condition | Mode |
//! |---|-----------|------|
//! | 1 | failsafe asks for hover, or the planner is unhealthy | `Hover` |
//! | 1 | an obstacle is closer than `back_off_distance` | `GoBack` |
//! | 2 | take-off height not reached yet | `ReachHeight` |
//! | 3 | a retained tree path still gives a direction | `TryPath` |
//! | 4 | the cost matrix has a finite candidate | `Costmap` |
//! | 5 | the line to the goal is clear | `Direct` |
//! | 6 | nothing else applies | `Hover` |
//!
//! [`WaypointGenerator::generate`] then turns the chosen mode into position
//! and velocity setpoints that respect the vehicle's [`ModelParameters`].

use crate::tree::get_direction_from_tree;
use serde::{Deserialize, Serialize};
use skyward_perception::polar::{cartesian_to_polar, polar_to_cartesian};
use skyward_types::{ModelParameters, PlannerOutput, PolarPoint, Vec3, WaypointMode};
use tracing::{debug, info};

/// Tuning of the waypoint generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointParameters {
    /// Retreat when an obstacle is closer than this (m).
    pub back_off_distance: f32,
    /// How far ahead of the vehicle the position setpoint is placed, in
    /// seconds of travel at the commanded velocity.
    pub lookahead_time: f32,
}

impl Default for WaypointParameters {
    fn default() -> Self {
        Self {
            back_off_distance: 0.8,
            lookahead_time: 1.0,
        }
    }
}

/// Everything the state machine looks at in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct WaypointInputs<'a> {
    pub position: Vec3,
    pub goal: Vec3,
    /// Point held while hovering.
    pub hover_point: Vec3,
    /// Velocity setpoint sent in the previous cycle.
    pub last_velocity: Vec3,
    /// Time since the previous cycle (s).
    pub dt: f32,
    /// The failsafe wants the vehicle to hold position.
    pub failsafe_hover: bool,
    /// `false` once sensor data has been missing for too long.
    pub healthy: bool,
    /// Closest fused obstacle point, if any.
    pub closest_obstacle: Option<Vec3>,
    /// The vehicle has not yet reached `take_off_height`.
    pub take_off_pending: bool,
    pub take_off_height: f32,
    /// Retained tree path, goal end first.
    pub path: &'a [Vec3],
    pub max_path_deviation: f32,
    /// Lowest-cost direction of this cycle's cost matrix.
    pub best_candidate: Option<PolarPoint>,
    /// No obstacle lies between the vehicle and the goal.
    pub goal_clear: bool,
}

/// Pick the flight mode for this cycle.
pub fn select_mode(inputs: &WaypointInputs<'_>, params: &WaypointParameters) -> WaypointMode {
    if inputs.failsafe_hover || !inputs.healthy {
        return WaypointMode::Hover;
    }
    if inputs
        .closest_obstacle
        .is_some_and(|p| p.distance(inputs.position) < params.back_off_distance)
    {
        return WaypointMode::GoBack;
    }
    if inputs.take_off_pending {
        return WaypointMode::ReachHeight;
    }
    if get_direction_from_tree(inputs.path, inputs.position, inputs.goal, inputs.max_path_deviation).is_some() {
        return WaypointMode::TryPath;
    }
    if inputs.best_candidate.is_some_and(|c| c.e.is_finite() && c.z.is_finite()) {
        return WaypointMode::Costmap;
    }
    if inputs.goal_clear {
        return WaypointMode::Direct;
    }
    WaypointMode::Hover
}

/// Turns mode decisions into kinematically feasible setpoints.
#[derive(Debug, Clone)]
pub struct WaypointGenerator {
    model: ModelParameters,
    params: WaypointParameters,
    last_mode: Option<WaypointMode>,
}

impl WaypointGenerator {
    pub fn new(model: ModelParameters, params: WaypointParameters) -> Self {
        Self {
            model,
            params,
            last_mode: None,
        }
    }

    /// Replace the vehicle limits, e.g. after the flight controller reports
    /// new values.
    pub fn set_model_parameters(&mut self, model: ModelParameters) {
        self.model = model;
    }

    pub fn model_parameters(&self) -> &ModelParameters {
        &self.model
    }

    /// Mode chosen in the previous cycle.
    pub fn last_mode(&self) -> Option<WaypointMode> {
        self.last_mode
    }

    /// Choose a mode and compute this cycle's setpoint.
    pub fn generate(&mut self, inputs: &WaypointInputs<'_>) -> PlannerOutput {
        let mode = select_mode(inputs, &self.params);
        if self.last_mode != Some(mode) {
            info!(from = ?self.last_mode, to = %mode, "waypoint mode changed");
            self.last_mode = Some(mode);
        }

        let desired = match mode {
            WaypointMode::Hover => None,
            WaypointMode::GoBack => self.back_off_velocity(inputs),
            WaypointMode::ReachHeight => Some(self.take_off_velocity(inputs)),
            WaypointMode::TryPath => {
                get_direction_from_tree(inputs.path, inputs.position, inputs.goal, inputs.max_path_deviation)
                    .map(|dir| self.cruise_velocity(dir, inputs))
            }
            WaypointMode::Costmap => inputs.best_candidate.map(|dir| self.cruise_velocity(dir, inputs)),
            WaypointMode::Direct => {
                let dir = cartesian_to_polar(inputs.goal, inputs.position);
                Some(self.cruise_velocity(dir, inputs))
            }
        };

        let Some(desired) = desired else {
            return PlannerOutput::hover(inputs.hover_point, inputs.healthy);
        };

        let velocity = self.limit_velocity(desired, inputs.last_velocity, inputs.dt);
        let position = inputs.position + velocity * self.params.lookahead_time;
        debug!(%mode, ?velocity, ?position, "setpoint");
        PlannerOutput {
            mode,
            position,
            velocity,
            healthy: inputs.healthy,
        }
    }

    /// Velocity along `dir` at cruise speed, slowing down near the goal.
    fn cruise_velocity(&self, dir: PolarPoint, inputs: &WaypointInputs<'_>) -> Vec3 {
        let unit = polar_to_cartesian(PolarPoint::new(dir.e, dir.z, 1.0), Vec3::zero());
        let speed = self.model.xy_vel.min(inputs.position.distance(inputs.goal));
        unit * speed
    }

    fn take_off_velocity(&self, inputs: &WaypointInputs<'_>) -> Vec3 {
        let dz = inputs.take_off_height - inputs.position.z;
        let speed = self.model.takeoff_speed.min(dz.abs());
        Vec3::new(0.0, 0.0, speed.copysign(dz))
    }

    /// Horizontal retreat straight away from the closest obstacle. `None` if
    /// the obstacle is directly above or below.
    fn back_off_velocity(&self, inputs: &WaypointInputs<'_>) -> Option<Vec3> {
        let away = inputs.position - inputs.closest_obstacle?;
        let horizontal = Vec3::new(away.x, away.y, 0.0).normalized()?;
        Some(horizontal * self.model.xy_vel)
    }

    /// Apply the velocity caps and the per-cycle acceleration limits.
    fn limit_velocity(&self, desired: Vec3, last: Vec3, dt: f32) -> Vec3 {
        let mut v = desired;
        let xy = v.norm_xy();
        if xy > self.model.xy_vel && xy > 0.0 {
            let s = self.model.xy_vel / xy;
            v.x *= s;
            v.y *= s;
        }
        v.z = v.z.clamp(-self.model.down_vel, self.model.up_vel);

        if dt > 0.0 {
            let dxy = Vec3::new(v.x - last.x, v.y - last.y, 0.0);
            let max_dxy = self.model.xy_acc * dt;
            let step = dxy.norm();
            if step > max_dxy {
                let s = max_dxy / step;
                v.x = last.x + dxy.x * s;
                v.y = last.y + dxy.y * s;
            }
            let dz = v.z - last.z;
            v.z = last.z + dz.clamp(-self.model.down_acc * dt, self.model.up_acc * dt);
        }
        v
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> WaypointInputs<'static> {
        WaypointInputs {
            position: Vec3::new(0.0, 0.0, 3.0),
            goal: Vec3::new(0.0, 20.0, 3.0),
            hover_point: Vec3::new(0.0, 0.0, 3.0),
            last_velocity: Vec3::zero(),
            dt: 0.0,
            failsafe_hover: false,
            healthy: true,
            closest_obstacle: None,
            take_off_pending: false,
            take_off_height: 3.0,
            path: &[],
            max_path_deviation: 3.0,
            best_candidate: None,
            goal_clear: false,
        }
    }

    const PATH: [Vec3; 3] = [
        Vec3::new(0.0, 2.0, 3.0),
        Vec3::new(0.0, 1.0, 3.0),
        Vec3::new(0.0, 0.0, 3.0),
    ];

    // ── select_mode ─────────────────────────────────────────────────────────

    #[test]
    fn falls_back_to_hover() {
        let p = WaypointParameters::default();
        assert_eq!(select_mode(&base_inputs(), &p), WaypointMode::Hover);
    }

    #[test]
    fn failsafe_overrides_everything() {
        let p = WaypointParameters::default();
        let inputs = WaypointInputs {
            failsafe_hover: true,
            closest_obstacle: Some(Vec3::new(0.0, 0.1, 3.0)),
            take_off_pending: true,
            goal_clear: true,
            ..base_inputs()
        };
        assert_eq!(select_mode(&inputs, &p), WaypointMode::Hover);
        let unhealthy = WaypointInputs {
            healthy: false,
            goal_clear: true,
            ..base_inputs()
        };
        assert_eq!(select_mode(&unhealthy, &p), WaypointMode::Hover);
    }

    #[test]
    fn back_off_precedes_take_off() {
        let p = WaypointParameters::default();
        let inputs = WaypointInputs {
            closest_obstacle: Some(Vec3::new(0.3, 0.0, 3.0)),
            take_off_pending: true,
            ..base_inputs()
        };
        assert_eq!(select_mode(&inputs, &p), WaypointMode::GoBack);
        let far = WaypointInputs {
            closest_obstacle: Some(Vec3::new(3.0, 0.0, 3.0)),
            ..inputs
        };
        assert_eq!(select_mode(&far, &p), WaypointMode::ReachHeight);
    }

    #[test]
    fn path_precedes_costmap_and_direct() {
        let p = WaypointParameters::default();
        let inputs = WaypointInputs {
            path: &PATH,
            best_candidate: Some(PolarPoint::new(0.0, 30.0, 1.0)),
            goal_clear: true,
            ..base_inputs()
        };
        assert_eq!(select_mode(&inputs, &p), WaypointMode::TryPath);

        let no_path = WaypointInputs { path: &[], ..inputs };
        assert_eq!(select_mode(&no_path, &p), WaypointMode::Costmap);

        let no_candidate = WaypointInputs {
            best_candidate: None,
            ..no_path
        };
        assert_eq!(select_mode(&no_candidate, &p), WaypointMode::Direct);
    }

    #[test]
    fn stale_path_is_skipped() {
        let p = WaypointParameters::default();
        let inputs = WaypointInputs {
            position: Vec3::new(10.0, 0.0, 3.0),
            path: &PATH,
            goal_clear: true,
            ..base_inputs()
        };
        assert_eq!(select_mode(&inputs, &p), WaypointMode::Direct);
    }

    // ── generate ────────────────────────────────────────────────────────────

    #[test]
    fn hover_holds_hover_point() {
        let mut generator = WaypointGenerator::new(ModelParameters::default(), WaypointParameters::default());
        let inputs = WaypointInputs {
            hover_point: Vec3::new(1.0, 2.0, 3.0),
            ..base_inputs()
        };
        let out = generator.generate(&inputs);
        assert_eq!(out, PlannerOutput::hover(Vec3::new(1.0, 2.0, 3.0), true));
        assert_eq!(generator.last_mode(), Some(WaypointMode::Hover));
    }

    #[test]
    fn direct_flies_at_cruise_speed() {
        let mut generator = WaypointGenerator::new(ModelParameters::default(), WaypointParameters::default());
        let inputs = WaypointInputs {
            goal_clear: true,
            ..base_inputs()
        };
        let out = generator.generate(&inputs);
        assert_eq!(out.mode, WaypointMode::Direct);
        assert!(out.velocity.x.abs() < 1e-5);
        assert!((out.velocity.y - 1.0).abs() < 1e-5);
        assert!((out.position.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn speed_drops_near_goal() {
        let mut generator = WaypointGenerator::new(ModelParameters::default(), WaypointParameters::default());
        let inputs = WaypointInputs {
            goal: Vec3::new(0.0, 0.4, 3.0),
            goal_clear: true,
            ..base_inputs()
        };
        let out = generator.generate(&inputs);
        assert!((out.velocity.norm() - 0.4).abs() < 1e-4);
    }

    #[test]
    fn vertical_speed_is_capped() {
        let model = ModelParameters {
            xy_vel: 5.0,
            down_vel: 1.0,
            ..ModelParameters::default()
        };
        let mut generator = WaypointGenerator::new(model, WaypointParameters::default());
        let inputs = WaypointInputs {
            best_candidate: Some(PolarPoint::new(-80.0, 0.0, 1.0)),
            ..base_inputs()
        };
        let out = generator.generate(&inputs);
        assert_eq!(out.mode, WaypointMode::Costmap);
        assert!((out.velocity.z + 1.0).abs() < 1e-5, "vz={}", out.velocity.z);
    }

    #[test]
    fn acceleration_is_limited_per_cycle() {
        let model = ModelParameters {
            xy_acc: 2.0,
            ..ModelParameters::default()
        };
        let mut generator = WaypointGenerator::new(model, WaypointParameters::default());
        let inputs = WaypointInputs {
            goal_clear: true,
            dt: 0.1,
            ..base_inputs()
        };
        let out = generator.generate(&inputs);
        assert!((out.velocity.norm() - 0.2).abs() < 1e-5);
    }

    #[test]
    fn go_back_retreats_from_obstacle() {
        let mut generator = WaypointGenerator::new(ModelParameters::default(), WaypointParameters::default());
        let inputs = WaypointInputs {
            closest_obstacle: Some(Vec3::new(0.0, 0.5, 3.2)),
            ..base_inputs()
        };
        let out = generator.generate(&inputs);
        assert_eq!(out.mode, WaypointMode::GoBack);
        assert!(out.velocity.y < -0.9);
        assert_eq!(out.velocity.z, 0.0);
    }

    #[test]
    fn obstacle_straight_above_gives_hover() {
        let mut generator = WaypointGenerator::new(ModelParameters::default(), WaypointParameters::default());
        let inputs = WaypointInputs {
            closest_obstacle: Some(Vec3::new(0.0, 0.0, 3.5)),
            ..base_inputs()
        };
        let out = generator.generate(&inputs);
        assert_eq!(out.velocity, Vec3::zero());
        assert_eq!(out.position, inputs.hover_point);
    }

    #[test]
    fn reach_height_climbs_at_takeoff_speed() {
        let mut generator = WaypointGenerator::new(ModelParameters::default(), WaypointParameters::default());
        let inputs = WaypointInputs {
            position: Vec3::new(0.0, 0.0, 0.5),
            take_off_pending: true,
            ..base_inputs()
        };
        let out = generator.generate(&inputs);
        assert_eq!(out.mode, WaypointMode::ReachHeight);
        assert!((out.velocity.z - 1.0).abs() < 1e-5);
        assert_eq!(out.velocity.norm_xy(), 0.0);
    }
}
