//! [`LocalPlanner`] – one planning cycle from fused clouds to a setpoint.
//!
//! Each call to [`LocalPlanner::run_cycle`]:
//!
//! 1. **Fuse** – merge the ready sensor clouds into the aged memory cloud
//!    inside the bounding box, then drop memory the cameras currently see.
//! 2. **Histogram** – bin the fused cloud around the vehicle.
//! 3. **Cost** – build the fine cost matrix and pick the best direction.
//! 4. **Tree** – grow the look-ahead tree when obstacles are present.
//! 5. **Waypoint** – let the state machine choose a mode and setpoint.
//! 6. **Verify** – the [`StateVerifier`] replaces a bad setpoint with a hover.
//!
//! Only the memory cloud, the retained tree path, the last waypoint and
//! velocity, the take-off latch and the hover point survive between cycles.

use serde::{Deserialize, Serialize};
use skyward_kernel::{FailsafeState, StateVerifier};
use skyward_perception::fov::{FovWindow, calculate_fov, orientation_to_yaw_pitch};
use skyward_perception::fusion::{AgedPoint, BoundingBox, process_pointcloud, prune_visible_memory};
use skyward_perception::histogram::{Histogram, generate_new_histogram};
use skyward_perception::polar::{ALPHA_RES, cartesian_to_polar, polar_to_histogram_index};
use skyward_planner::cost::{CostParameters, get_best_candidates_from_cost_matrix, get_cost_matrix};
use skyward_planner::tree::{TreeParameters, TreeSearchPlanner};
use skyward_planner::waypoint::{WaypointGenerator, WaypointInputs, WaypointParameters};
use skyward_types::{ModelParameters, PlannerError, PlannerOutput, WaypointMode, Vec3};
use tracing::{debug, info};

use crate::node::VehicleState;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Perception and take-off tuning of the planning cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerParameters {
    /// Half-width of the box around the vehicle in which points are kept (m).
    pub box_radius: f32,
    /// Points closer than this to the vehicle are sensor noise (m).
    pub min_sensor_range: f32,
    /// Memory points older than this are forgotten (s).
    pub max_point_age: f32,
    /// Horizontal camera field of view (degrees).
    pub h_fov: f32,
    /// Vertical camera field of view (degrees).
    pub v_fov: f32,
    /// Smoothing radius of the fine cost matrix (bins).
    pub smoothing_radius: usize,
    /// Climb to the goal altitude before planning horizontally.
    pub rise_to_goal_altitude: bool,
    /// The goal altitude counts as reached within this margin (m).
    pub altitude_tolerance: f32,
}

impl Default for PlannerParameters {
    fn default() -> Self {
        Self {
            box_radius: 12.0,
            min_sensor_range: 0.2,
            max_point_age: 10.0,
            h_fov: 59.0,
            v_fov: 46.0,
            smoothing_radius: 4,
            rise_to_goal_altitude: true,
            altitude_tolerance: 0.5,
        }
    }
}

/// Everything [`LocalPlanner::new`] needs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalPlannerConfig {
    pub planner: PlannerParameters,
    pub cost: CostParameters,
    pub tree: TreeParameters,
    pub waypoint: WaypointParameters,
    pub model: ModelParameters,
}

/// Inputs of one planning cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleInput<'a> {
    pub state: &'a VehicleState,
    pub goal: Vec3,
    /// Clouds delivered this cycle, already in the local frame.
    pub clouds: &'a [Vec<Vec3>],
    /// Time since the previous cycle (s).
    pub dt: f32,
    pub failsafe: FailsafeState,
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalPlanner
// ─────────────────────────────────────────────────────────────────────────────

/// Planner state carried from one cycle to the next.
pub struct LocalPlanner {
    params: PlannerParameters,
    cost_params: CostParameters,
    bbox: BoundingBox,
    tree: TreeSearchPlanner,
    generator: WaypointGenerator,
    verifier: StateVerifier,

    fused_cloud: Vec<AgedPoint>,
    histogram: Histogram,
    fov: FovWindow,
    cost_image: Vec<u8>,
    hover_point: Option<Vec3>,
    last_waypoint: Option<Vec3>,
    last_velocity: Vec3,
    take_off_pending: bool,
    cycles: u64,
}

impl LocalPlanner {
    pub fn new(config: LocalPlannerConfig) -> Self {
        Self {
            params: config.planner,
            cost_params: config.cost,
            bbox: BoundingBox::new(config.planner.box_radius),
            tree: TreeSearchPlanner::new(config.tree, config.cost),
            generator: WaypointGenerator::new(config.model, config.waypoint),
            verifier: StateVerifier::for_model(&config.model),
            fused_cloud: Vec::new(),
            histogram: Histogram::new(ALPHA_RES),
            fov: FovWindow::default(),
            cost_image: Vec::new(),
            hover_point: None,
            last_waypoint: None,
            last_velocity: Vec3::zero(),
            take_off_pending: config.planner.rise_to_goal_altitude,
            cycles: 0,
        }
    }

    /// Replace the vehicle limits used by the generator and the verifier.
    pub fn set_model_parameters(&mut self, model: ModelParameters) {
        if *self.generator.model_parameters() != model {
            info!(?model, "vehicle model parameters updated");
            self.generator.set_model_parameters(model);
            self.verifier = StateVerifier::for_model(&model);
        }
    }

    /// Run one cycle and return the verified setpoint.
    pub fn run_cycle(&mut self, input: &CycleInput<'_>) -> Result<PlannerOutput, PlannerError> {
        self.cycles += 1;
        let state = input.state;
        let position = state.position;

        self.fuse(input);

        let healthy = input.failsafe.is_healthy();
        if !state.armed || !(state.offboard || state.mission) {
            self.take_off_pending = self.params.rise_to_goal_altitude;
            self.hover_point = Some(position);
            self.last_waypoint = Some(position);
            self.last_velocity = Vec3::zero();
            debug!(
                armed = state.armed,
                offboard = state.offboard,
                mission = state.mission,
                "vehicle not under planner control"
            );
            return Ok(PlannerOutput::hover(position, healthy));
        }

        if self.take_off_pending && position.z >= input.goal.z - self.params.altitude_tolerance {
            info!(altitude = position.z, "take-off altitude reached");
            self.take_off_pending = false;
        }

        generate_new_histogram(
            &mut self.histogram,
            self.fused_cloud.iter().map(|p| p.position),
            position,
        );
        let obstacles = !self.histogram.is_empty();
        let (heading, _) = orientation_to_yaw_pitch(state.orientation);
        let last_waypoint = self.last_waypoint.unwrap_or(position);
        let plan = obstacles && !input.failsafe.requires_hover() && !self.take_off_pending;

        let mut best_candidate = None;
        if plan {
            let (matrix, image) = get_cost_matrix(
                &self.histogram,
                input.goal,
                position,
                heading,
                last_waypoint,
                &self.cost_params,
                self.params.smoothing_radius,
            );
            best_candidate = get_best_candidates_from_cost_matrix(&matrix, 1)
                .first()
                .map(|c| c.to_polar(ALPHA_RES, 1.0));
            self.cost_image = image;

            self.tree
                .build_look_ahead_tree(&self.fused_cloud, position, input.goal, heading, last_waypoint)?;
        }

        let hover_point = self.hover_point.unwrap_or(position);
        let path: &[Vec3] = if plan { self.tree.path_node_positions() } else { &[] };
        let inputs = WaypointInputs {
            position,
            goal: input.goal,
            hover_point,
            last_velocity: self.last_velocity,
            dt: input.dt,
            failsafe_hover: input.failsafe.requires_hover(),
            healthy,
            closest_obstacle: self.closest_obstacle(position),
            take_off_pending: self.take_off_pending,
            take_off_height: input.goal.z,
            path,
            max_path_deviation: self.tree.params().max_path_deviation,
            best_candidate,
            goal_clear: self.goal_clear(position, input.goal),
        };

        let output = self.generator.generate(&inputs);
        let output = self.verifier.enforce(output, hover_point);

        if output.mode != WaypointMode::Hover {
            self.hover_point = Some(position);
        }
        self.last_waypoint = Some(output.position);
        self.last_velocity = output.velocity;

        debug!(
            cycle = self.cycles,
            mode = %output.mode,
            fused_points = self.fused_cloud.len(),
            obstacles,
            path_len = path.len(),
            "planning cycle complete"
        );
        Ok(output)
    }

    fn fuse(&mut self, input: &CycleInput<'_>) {
        let state = input.state;
        self.bbox.set_box_limits(state.position, state.ground_distance);
        process_pointcloud(
            &mut self.fused_cloud,
            input.clouds,
            &self.bbox,
            state.position,
            self.params.min_sensor_range,
            self.params.max_point_age,
            input.dt,
        );
        let (yaw, pitch) = orientation_to_yaw_pitch(state.orientation);
        self.fov = calculate_fov(self.params.h_fov, self.params.v_fov, yaw, pitch);
        prune_visible_memory(&mut self.fused_cloud, &self.fov, state.position);
    }

    fn closest_obstacle(&self, position: Vec3) -> Option<Vec3> {
        self.fused_cloud
            .iter()
            .map(|p| p.position)
            .min_by(|a, b| a.distance(position).total_cmp(&b.distance(position)))
    }

    /// No histogram obstacle lies in the goal's bin short of the goal.
    fn goal_clear(&self, position: Vec3, goal: Vec3) -> bool {
        let to_goal = cartesian_to_polar(goal, position);
        let (e, z) = polar_to_histogram_index(to_goal, ALPHA_RES);
        let d = self.histogram.get_dist(e, z);
        d == 0.0 || d > to_goal.r
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn fused_cloud(&self) -> &[AgedPoint] {
        &self.fused_cloud
    }

    /// Fine histogram of the last cycle.
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Camera field of view of the last cycle.
    pub fn fov(&self) -> &FovWindow {
        &self.fov
    }

    /// RGB image of the last cost matrix, one pixel per bin.
    pub fn cost_image(&self) -> &[u8] {
        &self.cost_image
    }

    /// Retained look-ahead path, goal end first.
    pub fn tree_path(&self) -> &[Vec3] {
        self.tree.path_node_positions()
    }

    pub fn hover_point(&self) -> Option<Vec3> {
        self.hover_point
    }

    pub fn last_waypoint(&self) -> Option<Vec3> {
        self.last_waypoint
    }

    pub fn take_off_pending(&self) -> bool {
        self.take_off_pending
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skyward_perception::polar::GRID_LENGTH_E;
    use skyward_perception::polar::GRID_LENGTH_Z;
    use skyward_perception::transform::Quaternion;

    const GOAL: Vec3 = Vec3::new(0.0, 20.0, 3.0);

    fn flying_at(position: Vec3) -> VehicleState {
        VehicleState {
            position,
            orientation: Quaternion::identity(),
            velocity: Vec3::zero(),
            ground_distance: position.z,
            armed: true,
            offboard: true,
            mission: false,
        }
    }

    fn cycle(
        planner: &mut LocalPlanner,
        state: &VehicleState,
        clouds: &[Vec<Vec3>],
        failsafe: FailsafeState,
    ) -> PlannerOutput {
        planner
            .run_cycle(&CycleInput {
                state,
                goal: GOAL,
                clouds,
                dt: 0.1,
                failsafe,
            })
            .unwrap()
    }

    /// A 6 m × 3 m wall across the flight path, `y` metres north.
    fn wall_at(y: f32) -> Vec<Vec3> {
        let mut points = Vec::new();
        for i in 0..=24 {
            for k in 0..=6 {
                points.push(Vec3::new(-3.0 + i as f32 * 0.25, y, 1.5 + k as f32 * 0.5));
            }
        }
        points
    }

    // ── Open space ──

    #[test]
    fn open_space_flies_direct() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let state = flying_at(Vec3::new(0.0, 0.0, 3.0));
        let out = cycle(&mut planner, &state, &[], FailsafeState::Nominal);
        assert_eq!(out.mode, WaypointMode::Direct);
        assert!(out.healthy);
        assert!(out.velocity.y > 0.0);
        assert!(out.velocity.x.abs() < 1e-3);
        assert!(planner.histogram().is_empty());
    }

    #[test]
    fn velocity_ramps_within_acceleration_limit() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let state = flying_at(Vec3::new(0.0, 0.0, 3.0));
        let first = cycle(&mut planner, &state, &[], FailsafeState::Nominal);
        // xy_acc 5 m/s² over 0.1 s.
        assert!((first.velocity.norm_xy() - 0.5).abs() < 1e-3);
        let second = cycle(&mut planner, &state, &[], FailsafeState::Nominal);
        assert!((second.velocity.norm_xy() - 1.0).abs() < 1e-3);
    }

    // ── Take-off ──

    #[test]
    fn climbs_to_goal_altitude_first() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let out = cycle(&mut planner, &flying_at(Vec3::new(0.0, 0.0, 0.5)), &[], FailsafeState::Nominal);
        assert_eq!(out.mode, WaypointMode::ReachHeight);
        assert!(out.velocity.z > 0.0);
        assert!(planner.take_off_pending());

        let out = cycle(&mut planner, &flying_at(Vec3::new(0.0, 0.0, 2.8)), &[], FailsafeState::Nominal);
        assert_eq!(out.mode, WaypointMode::Direct);
        assert!(!planner.take_off_pending());

        // The latch does not re-arm while flying.
        let out = cycle(&mut planner, &flying_at(Vec3::new(0.0, 0.0, 1.0)), &[], FailsafeState::Nominal);
        assert_ne!(out.mode, WaypointMode::ReachHeight);
    }

    #[test]
    fn disarming_resets_take_off_and_hovers() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        cycle(&mut planner, &flying_at(Vec3::new(0.0, 0.0, 3.0)), &[], FailsafeState::Nominal);
        assert!(!planner.take_off_pending());

        let mut landed = flying_at(Vec3::new(1.0, 1.0, 0.0));
        landed.armed = false;
        let out = cycle(&mut planner, &landed, &[], FailsafeState::Nominal);
        assert_eq!(out.mode, WaypointMode::Hover);
        assert_eq!(out.position, landed.position);
        assert!(planner.take_off_pending());
    }

    #[test]
    fn rise_can_be_disabled() {
        let config = LocalPlannerConfig {
            planner: PlannerParameters {
                rise_to_goal_altitude: false,
                ..PlannerParameters::default()
            },
            ..LocalPlannerConfig::default()
        };
        let mut planner = LocalPlanner::new(config);
        let out = cycle(&mut planner, &flying_at(Vec3::new(0.0, 0.0, 0.5)), &[], FailsafeState::Nominal);
        assert_eq!(out.mode, WaypointMode::Direct);
    }

    // ── Obstacles ──

    #[test]
    fn wall_ahead_follows_tree() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let state = flying_at(Vec3::new(0.0, 0.0, 3.0));
        let out = cycle(&mut planner, &state, &[wall_at(4.0)], FailsafeState::Nominal);
        assert!(!planner.histogram().is_empty());
        assert!(planner.tree_path().len() >= 2);
        assert_eq!(out.mode, WaypointMode::TryPath);
        assert!(out.velocity.is_finite());
        assert_eq!(
            planner.cost_image().len(),
            GRID_LENGTH_E * GRID_LENGTH_Z * 3
        );
    }

    #[test]
    fn close_obstacle_backs_off() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let state = flying_at(Vec3::new(0.0, 0.0, 3.0));
        let cloud = vec![Vec3::new(0.5, 0.0, 3.0)];
        let out = cycle(&mut planner, &state, &[cloud], FailsafeState::Nominal);
        assert_eq!(out.mode, WaypointMode::GoBack);
        assert!(out.velocity.x < 0.0);
        assert!(out.velocity.z.abs() < 1e-6);
    }

    #[test]
    fn ground_returns_are_cut() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let state = flying_at(Vec3::new(0.0, 0.0, 3.0));
        let ground = vec![Vec3::new(1.0, 1.0, 0.1), Vec3::new(-1.0, 2.0, 0.2)];
        cycle(&mut planner, &state, &[ground], FailsafeState::Nominal);
        assert!(planner.fused_cloud().is_empty());
    }

    // ── Memory ──

    #[test]
    fn memory_outside_view_is_kept() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let state = flying_at(Vec3::new(0.0, 0.0, 3.0));
        // Identity orientation looks east; the wall is north.
        cycle(&mut planner, &state, &[wall_at(4.0)], FailsafeState::Nominal);
        let seen = planner.fused_cloud().len();
        assert!(seen > 0);

        cycle(&mut planner, &state, &[], FailsafeState::Nominal);
        assert_eq!(planner.fused_cloud().len(), seen);
        assert!(planner.fused_cloud().iter().all(|p| p.age > 0.0));
    }

    #[test]
    fn memory_inside_view_is_dropped() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let state = flying_at(Vec3::new(0.0, 0.0, 3.0));
        let east = vec![Vec3::new(4.0, 0.0, 3.0), Vec3::new(4.0, 0.3, 3.2)];
        cycle(&mut planner, &state, &[east], FailsafeState::Nominal);
        assert_eq!(planner.fused_cloud().len(), 2);

        // The camera looks straight at where the points were and reports
        // nothing there any more.
        cycle(&mut planner, &state, &[], FailsafeState::Nominal);
        assert!(planner.fused_cloud().is_empty());
    }

    // ── Failsafe ──

    #[test]
    fn critical_holds_previous_hover_point() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let a = Vec3::new(0.0, 0.0, 3.0);
        cycle(&mut planner, &flying_at(a), &[], FailsafeState::Nominal);
        assert_eq!(planner.hover_point(), Some(a));

        let b = Vec3::new(0.0, 0.3, 3.0);
        let out = cycle(&mut planner, &flying_at(b), &[], FailsafeState::Critical);
        assert_eq!(out.mode, WaypointMode::Hover);
        assert_eq!(out.position, a);
        assert_eq!(out.velocity, Vec3::zero());
        assert!(out.healthy);
    }

    #[test]
    fn terminated_is_unhealthy() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        let out = cycle(
            &mut planner,
            &flying_at(Vec3::new(0.0, 0.0, 3.0)),
            &[],
            FailsafeState::Terminated,
        );
        assert_eq!(out.mode, WaypointMode::Hover);
        assert!(!out.healthy);
    }

    #[test]
    fn model_update_tightens_caps() {
        let mut planner = LocalPlanner::new(LocalPlannerConfig::default());
        planner.set_model_parameters(ModelParameters {
            xy_vel: 0.3,
            ..ModelParameters::default()
        });
        let state = flying_at(Vec3::new(0.0, 0.0, 3.0));
        let out = cycle(&mut planner, &state, &[], FailsafeState::Nominal);
        assert_eq!(out.mode, WaypointMode::Direct);
        assert!(out.velocity.norm_xy() <= 0.3 + 1e-4);
        assert_eq!(planner.cycles(), 1);
    }
}
