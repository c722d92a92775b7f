//! Simulated world, depth cameras and vehicle.
//!
//! [`SimVehicle`] stands in for the flight controller. Every setpoint it
//! receives advances the vehicle by one cycle, after which each simulated
//! camera ray-casts the world from the new pose and publishes a raw cloud in
//! its own frame. The camera poses are written to the shared [`TfEngine`] so
//! the sensor workers can bring the clouds into the local frame exactly as
//! they would on a real vehicle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use skyward_perception::transform::{LOCAL_ORIGIN, Quaternion, TfEngine, Transform3D};
use skyward_runtime::coordinator::{CloudPublisher, RawCloud, SensorCoordinator};
use skyward_runtime::node::{FlightControllerLink, VehicleState};
use skyward_types::{PlannerError, PlannerOutput, Vec3};
use tracing::{info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// A spherical obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphereObstacle {
    pub radius: f32,
    pub center: Vec3,
}

/// A body-mounted depth camera looking along its +x axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimCamera {
    pub id: String,
    /// Mount yaw relative to the vehicle's forward axis (degrees, CCW).
    pub mount_yaw: f32,
    pub h_fov: f32,
    pub v_fov: f32,
    pub max_range: f32,
    /// Rays per image row.
    pub columns: usize,
    /// Rays per image column.
    pub rows: usize,
    /// Stop publishing after this many seconds of simulated time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_after_s: Option<f32>,
}

impl Default for SimCamera {
    fn default() -> Self {
        Self {
            id: "front_camera".to_string(),
            mount_yaw: 0.0,
            h_fov: 59.0,
            v_fov: 46.0,
            max_range: 10.0,
            columns: 48,
            rows: 24,
            fail_after_s: None,
        }
    }
}

/// The simulated scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Initial vehicle yaw (degrees, CCW from +x).
    pub start_yaw: f32,
    /// The run ends once the vehicle is this close to the goal (m).
    pub arrival_radius: f32,
    /// Time constant of the vehicle's velocity response (s).
    pub velocity_time_constant: f32,
    // Tables after plain values so the TOML output stays valid.
    pub start: Vec3,
    pub obstacles: Vec<SphereObstacle>,
    pub cameras: Vec<SimCamera>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start: Vec3::new(0.0, 0.0, 0.0),
            start_yaw: 90.0,
            arrival_radius: 0.5,
            velocity_time_constant: 0.2,
            obstacles: vec![
                SphereObstacle {
                    center: Vec3::new(0.3, 8.0, 3.0),
                    radius: 1.5,
                },
                SphereObstacle {
                    center: Vec3::new(-2.5, 14.0, 2.5),
                    radius: 1.0,
                },
            ],
            cameras: vec![SimCamera::default()],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// World
// ─────────────────────────────────────────────────────────────────────────────

/// Distance along the unit ray `dir` from `origin` to the first hit with a
/// sphere or the ground plane `z = 0`.
pub fn ray_cast(origin: Vec3, dir: Vec3, obstacles: &[SphereObstacle], max_range: f32) -> Option<f32> {
    let mut best: Option<f32> = None;
    let mut consider = |t: f32| {
        if t > 0.0 && t <= max_range && best.is_none_or(|b| t < b) {
            best = Some(t);
        }
    };

    for sphere in obstacles {
        let oc = origin - sphere.center;
        let b = oc.dot(dir);
        let c = oc.dot(oc) - sphere.radius * sphere.radius;
        let disc = b * b - c;
        if disc < 0.0 {
            continue;
        }
        let root = disc.sqrt();
        let near = -b - root;
        consider(if near > 0.0 { near } else { -b + root });
    }
    if dir.z < 0.0 && origin.z > 0.0 {
        consider(-origin.z / dir.z);
    }
    best
}

/// Clearance between `p` and the nearest sphere surface (negative inside).
pub fn clearance(p: Vec3, obstacles: &[SphereObstacle]) -> f32 {
    obstacles
        .iter()
        .map(|s| p.distance(s.center) - s.radius)
        .fold(f32::INFINITY, f32::min)
}

/// Ray directions of `camera` in its own frame (+x forward, +z up).
fn camera_rays(camera: &SimCamera) -> Vec<Vec3> {
    let step = |fov: f32, n: usize, i: usize| {
        if n <= 1 {
            0.0
        } else {
            -fov / 2.0 + fov * i as f32 / (n - 1) as f32
        }
    };
    let mut rays = Vec::with_capacity(camera.columns * camera.rows);
    for r in 0..camera.rows {
        let el = step(camera.v_fov, camera.rows, r).to_radians();
        for c in 0..camera.columns {
            let az = step(camera.h_fov, camera.columns, c).to_radians();
            rays.push(Vec3::new(el.cos() * az.cos(), el.cos() * az.sin(), el.sin()));
        }
    }
    rays
}

// ─────────────────────────────────────────────────────────────────────────────
// SimVehicle
// ─────────────────────────────────────────────────────────────────────────────

struct MountedCamera {
    config: SimCamera,
    mount: Quaternion,
    rays: Vec<Vec3>,
    publisher: CloudPublisher,
}

/// What happened during a simulated flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightSummary {
    pub steps: u64,
    pub elapsed_s: f32,
    pub distance_flown: f32,
    pub min_clearance: f32,
    pub collisions: u64,
    pub reached_goal: bool,
    pub final_position: Vec3,
}

/// Simulated flight controller, vehicle and cameras.
pub struct SimVehicle {
    obstacles: Vec<SphereObstacle>,
    cameras: Vec<MountedCamera>,
    tf: Arc<RwLock<TfEngine>>,
    state: VehicleState,
    yaw: f32,
    dt: f32,
    tau: f32,
    goal: Vec3,
    arrival_radius: f32,
    arrived: Arc<AtomicBool>,
    summary: FlightSummary,
}

impl SimVehicle {
    /// Build the simulation and register one sensor worker per camera on
    /// `coordinator`.
    ///
    /// `dt` is the simulated time per setpoint. `arrived` is raised once the
    /// vehicle reaches `goal`.
    pub fn new(
        config: &SimConfig,
        coordinator: &mut SensorCoordinator,
        goal: Vec3,
        dt: f32,
        arrived: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let mut cameras = Vec::with_capacity(config.cameras.len());
        for camera in &config.cameras {
            let publisher = coordinator.add_sensor(&camera.id)?;
            cameras.push(MountedCamera {
                mount: Quaternion::from_euler(0.0, 0.0, camera.mount_yaw.to_radians()),
                rays: camera_rays(camera),
                config: camera.clone(),
                publisher,
            });
        }

        let yaw = config.start_yaw.to_radians();
        let mut sim = Self {
            obstacles: config.obstacles.clone(),
            cameras,
            tf: coordinator.tf(),
            state: VehicleState {
                position: config.start,
                orientation: Quaternion::from_euler(0.0, 0.0, yaw),
                velocity: Vec3::zero(),
                ground_distance: config.start.z,
                armed: true,
                offboard: true,
                mission: false,
            },
            yaw,
            dt,
            tau: config.velocity_time_constant,
            goal,
            arrival_radius: config.arrival_radius,
            arrived,
            summary: FlightSummary {
                steps: 0,
                elapsed_s: 0.0,
                distance_flown: 0.0,
                min_clearance: clearance(config.start, &config.obstacles),
                collisions: 0,
                reached_goal: false,
                final_position: config.start,
            },
        };
        sim.publish_sensors();
        Ok(sim)
    }

    pub fn summary(&self) -> FlightSummary {
        self.summary
    }

    /// Advance the vehicle by one step toward `output`.
    fn step(&mut self, output: &PlannerOutput) {
        let alpha = if self.tau > 0.0 {
            (self.dt / self.tau).min(1.0)
        } else {
            1.0
        };
        let v = self.state.velocity + (output.velocity - self.state.velocity) * alpha;
        let previous = self.state.position;
        let mut position = previous + v * self.dt;
        position.z = position.z.max(0.0);

        if v.norm_xy() > 0.1 {
            self.yaw = v.y.atan2(v.x);
        }
        self.state.position = position;
        self.state.velocity = v;
        self.state.orientation = Quaternion::from_euler(0.0, 0.0, self.yaw);
        self.state.ground_distance = position.z;

        let s = &mut self.summary;
        s.steps += 1;
        s.elapsed_s += self.dt;
        s.distance_flown += position.distance(previous);
        s.final_position = position;
        let gap = clearance(position, &self.obstacles);
        s.min_clearance = s.min_clearance.min(gap);
        if gap < 0.0 {
            s.collisions += 1;
            warn!(?position, "vehicle inside an obstacle");
        }
        if !s.reached_goal && position.distance(self.goal) < self.arrival_radius {
            s.reached_goal = true;
            info!(elapsed_s = s.elapsed_s, "goal reached");
            self.arrived.store(true, Ordering::Relaxed);
        }
    }

    /// Update the camera frames and publish one cloud per live camera.
    fn publish_sensors(&mut self) {
        let body = Transform3D::new(self.state.position, self.state.orientation);
        let poses: Vec<Transform3D> = self
            .cameras
            .iter()
            .map(|c| body.compose(Transform3D::new(Vec3::zero(), c.mount)))
            .collect();
        {
            let mut tf = self.tf.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            for (camera, pose) in self.cameras.iter().zip(&poses) {
                tf.set_transform(LOCAL_ORIGIN, &camera.config.id, *pose);
            }
        }

        for (camera, pose) in self.cameras.iter().zip(&poses) {
            if camera
                .config
                .fail_after_s
                .is_some_and(|t| self.summary.elapsed_s > t)
            {
                continue;
            }
            let points = camera
                .rays
                .iter()
                .filter_map(|ray| {
                    let world_dir = pose.rotation.rotate(*ray);
                    ray_cast(pose.translation, world_dir, &self.obstacles, camera.config.max_range)
                        .map(|t| *ray * t)
                })
                .collect();
            camera.publisher.publish(RawCloud {
                frame_id: camera.config.id.clone(),
                points,
            });
        }
    }
}

impl FlightControllerLink for SimVehicle {
    fn vehicle_state(&mut self) -> Option<VehicleState> {
        Some(self.state)
    }

    fn send_setpoint(&mut self, output: &PlannerOutput) -> Result<(), PlannerError> {
        self.step(output);
        self.publish_sensors();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyward_runtime::coordinator::CoordinatorSettings;
    use skyward_types::WaypointMode;
    use std::time::Duration;

    fn sphere(x: f32, y: f32, z: f32, r: f32) -> SphereObstacle {
        SphereObstacle {
            center: Vec3::new(x, y, z),
            radius: r,
        }
    }

    // ── Ray casting ──

    #[test]
    fn ray_hits_sphere_front_surface() {
        let t = ray_cast(Vec3::zero(), Vec3::new(0.0, 1.0, 0.0), &[sphere(0.0, 5.0, 0.0, 1.0)], 10.0);
        assert!((t.unwrap() - 4.0).abs() < 1e-4);
    }

    #[test]
    fn ray_misses_and_respects_range() {
        let obstacles = [sphere(0.0, 5.0, 0.0, 1.0)];
        assert!(ray_cast(Vec3::zero(), Vec3::new(1.0, 0.0, 0.0), &obstacles, 10.0).is_none());
        assert!(ray_cast(Vec3::zero(), Vec3::new(0.0, 1.0, 0.0), &obstacles, 3.0).is_none());
    }

    #[test]
    fn ray_hits_ground_and_nearest_wins() {
        let down = Vec3::new(0.0, 1.0, -1.0).normalized().unwrap();
        let t = ray_cast(Vec3::new(0.0, 0.0, 2.0), down, &[], 10.0).unwrap();
        assert!((t - 2.0 * 2.0_f32.sqrt()).abs() < 1e-4);

        let blocked = ray_cast(Vec3::new(0.0, 0.0, 2.0), down, &[sphere(0.0, 1.0, 1.0, 0.3)], 10.0).unwrap();
        assert!(blocked < t);
    }

    #[test]
    fn clearance_is_negative_inside() {
        let obstacles = [sphere(0.0, 0.0, 0.0, 1.0)];
        assert!((clearance(Vec3::new(0.0, 3.0, 0.0), &obstacles) - 2.0).abs() < 1e-5);
        assert!(clearance(Vec3::new(0.0, 0.5, 0.0), &obstacles) < 0.0);
        assert!(clearance(Vec3::zero(), &[]).is_infinite());
    }

    #[test]
    fn camera_rays_span_fov() {
        let camera = SimCamera {
            columns: 3,
            rows: 1,
            h_fov: 90.0,
            ..SimCamera::default()
        };
        let rays = camera_rays(&camera);
        assert_eq!(rays.len(), 3);
        // Centre ray looks straight ahead.
        assert!((rays[1].x - 1.0).abs() < 1e-6);
        assert!((rays[0].y + rays[2].y).abs() < 1e-6);
        assert!((rays[2].y - 45f32.to_radians().sin()).abs() < 1e-5);
    }

    // ── SimVehicle ──

    fn sim_with(config: SimConfig) -> (SimVehicle, SensorCoordinator, Arc<AtomicBool>) {
        let mut coordinator = SensorCoordinator::new(
            Arc::new(RwLock::new(TfEngine::new())),
            CoordinatorSettings::default(),
        );
        let arrived = Arc::new(AtomicBool::new(false));
        let sim = SimVehicle::new(
            &config,
            &mut coordinator,
            Vec3::new(0.0, 2.0, 1.0),
            0.1,
            Arc::clone(&arrived),
        )
        .unwrap();
        (sim, coordinator, arrived)
    }

    fn setpoint(velocity: Vec3) -> PlannerOutput {
        PlannerOutput {
            mode: WaypointMode::Direct,
            position: Vec3::zero(),
            velocity,
            healthy: true,
        }
    }

    #[test]
    fn cameras_publish_local_frame_clouds() {
        let config = SimConfig {
            start: Vec3::new(0.0, 0.0, 1.0),
            obstacles: vec![sphere(0.0, 4.0, 1.0, 1.0)],
            ..SimConfig::default()
        };
        let (_sim, coordinator, _) = sim_with(config);
        let batch = coordinator.gather(Duration::from_secs(2));
        assert!(batch.missing.is_empty());
        let clouds = batch.into_clouds();
        // The default start yaw faces +y, straight at the sphere; the ground
        // is hit by the lower rays.
        let on_sphere = clouds[0]
            .iter()
            .filter(|p| (p.distance(Vec3::new(0.0, 4.0, 1.0)) - 1.0).abs() < 0.05)
            .count();
        assert!(on_sphere > 0);
        assert!(clouds[0].iter().all(|p| p.z > -0.05));
    }

    #[test]
    fn vehicle_tracks_velocity_and_arrives() {
        let config = SimConfig {
            start: Vec3::new(0.0, 0.0, 1.0),
            velocity_time_constant: 0.0,
            obstacles: Vec::new(),
            ..SimConfig::default()
        };
        let (mut sim, _coordinator, arrived) = sim_with(config);
        for _ in 0..16 {
            sim.send_setpoint(&setpoint(Vec3::new(0.0, 1.0, 0.0))).unwrap();
        }
        let s = sim.summary();
        assert_eq!(s.steps, 16);
        assert!((s.final_position.y - 1.6).abs() < 1e-3);
        assert!(s.reached_goal);
        assert!(arrived.load(Ordering::Relaxed));
        assert!((s.distance_flown - 1.6).abs() < 1e-3);
    }

    #[test]
    fn vehicle_never_goes_below_ground() {
        let (mut sim, _coordinator, _) = sim_with(SimConfig {
            start: Vec3::new(0.0, 0.0, 0.05),
            velocity_time_constant: 0.0,
            ..SimConfig::default()
        });
        sim.send_setpoint(&setpoint(Vec3::new(0.0, 0.0, -1.0))).unwrap();
        assert_eq!(sim.vehicle_state().unwrap().position.z, 0.0);
    }

    #[test]
    fn collisions_are_counted() {
        let (mut sim, _coordinator, _) = sim_with(SimConfig {
            start: Vec3::new(0.0, 0.0, 1.0),
            velocity_time_constant: 0.0,
            obstacles: vec![sphere(0.0, 0.5, 1.0, 0.3)],
            ..SimConfig::default()
        });
        for _ in 0..5 {
            sim.send_setpoint(&setpoint(Vec3::new(0.0, 1.0, 0.0))).unwrap();
        }
        let s = sim.summary();
        assert!(s.collisions > 0);
        assert!(s.min_clearance < 0.0);
    }

    #[test]
    fn failed_camera_goes_silent() {
        let config = SimConfig {
            cameras: vec![SimCamera {
                fail_after_s: Some(0.0),
                ..SimCamera::default()
            }],
            velocity_time_constant: 0.0,
            ..SimConfig::default()
        };
        let (mut sim, coordinator, _) = sim_with(config);
        // The cloud published at start-up still arrives.
        assert!(coordinator.gather(Duration::from_secs(2)).missing.is_empty());
        sim.send_setpoint(&setpoint(Vec3::zero())).unwrap();
        assert_eq!(coordinator.gather(Duration::from_millis(100)).missing.len(), 1);
    }
}
