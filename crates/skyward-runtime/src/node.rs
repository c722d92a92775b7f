//! [`PlannerNode`] – the main planning loop.
//!
//! The node owns the [`SensorCoordinator`], the [`FailsafeMonitor`] and the
//! shared [`LocalPlanner`], and talks to the vehicle through a
//! [`FlightControllerLink`]. Each [`PlannerNode::spin_once`]:
//!
//! 1. reads the latest [`VehicleState`] (nothing happens before the first
//!    pose arrives),
//! 2. gathers the ready clouds against one shared deadline,
//! 3. feeds a heartbeat per delivering sensor to the failsafe and reports
//!    sensors that stay silent past the critical timeout,
//! 4. runs one [`LocalPlanner`] cycle under the planner mutex,
//! 5. sends the verified setpoint to the flight controller.
//!
//! Every cycle runs inside a [`cycle_span`] carrying its outcome.
//!
//! [`PlannerNode::run`] repeats this at the configured rate until the
//! shutdown flag is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use skyward_kernel::{FailsafeMonitor, FailsafeTimeouts};
use skyward_perception::transform::Quaternion;
use skyward_types::{ModelParameters, PlannerError, PlannerOutput, Vec3};
use tracing::{debug, info, warn};

use crate::coordinator::SensorCoordinator;
use crate::local_planner::{CycleInput, LocalPlanner};
use crate::telemetry::{cycle_span, record_cycle};

// ─────────────────────────────────────────────────────────────────────────────
// Vehicle interface
// ─────────────────────────────────────────────────────────────────────────────

/// Vehicle state reported by the flight controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    /// Position in the local frame (m).
    pub position: Vec3,
    /// Body attitude in the local frame.
    pub orientation: Quaternion,
    /// Velocity in the local frame (m/s).
    pub velocity: Vec3,
    /// Height above ground from the distance sensor (m).
    pub ground_distance: f32,
    pub armed: bool,
    /// The flight controller accepts external setpoints.
    pub offboard: bool,
    /// The flight controller is flying a mission.
    pub mission: bool,
}

/// Connection to the flight controller.
///
/// Implementations marshal [`PlannerOutput`] into whatever the vehicle
/// understands; the planner never sees the wire format.
pub trait FlightControllerLink: Send {
    /// Latest vehicle state, or `None` until the first pose arrives.
    fn vehicle_state(&mut self) -> Option<VehicleState>;

    /// Updated vehicle limits, if the flight controller reported new ones
    /// since the last call.
    fn model_parameters(&mut self) -> Option<ModelParameters> {
        None
    }

    /// Forward one setpoint.
    fn send_setpoint(&mut self, output: &PlannerOutput) -> Result<(), PlannerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Loop timing of [`PlannerNode`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Planning rate (Hz).
    pub cycle_hz: f32,
    /// Longest wait for sensor clouds per cycle (ms).
    pub gather_timeout_ms: u64,
    pub failsafe: FailsafeTimeouts,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cycle_hz: 10.0,
            gather_timeout_ms: 50,
            failsafe: FailsafeTimeouts::default(),
        }
    }
}

impl NodeConfig {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.cycle_hz.max(0.1))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PlannerNode
// ─────────────────────────────────────────────────────────────────────────────

/// Drives [`LocalPlanner`] cycles from sensor data and vehicle state.
pub struct PlannerNode<L: FlightControllerLink> {
    planner: Arc<Mutex<LocalPlanner>>,
    coordinator: SensorCoordinator,
    failsafe: FailsafeMonitor,
    link: L,
    goal: Vec3,
    config: NodeConfig,
    last_cycle: Option<Instant>,
    cycles: u64,
    stale: Vec<String>,
}

impl<L: FlightControllerLink> PlannerNode<L> {
    pub fn new(
        planner: LocalPlanner,
        coordinator: SensorCoordinator,
        link: L,
        goal: Vec3,
        config: NodeConfig,
    ) -> Self {
        let mut failsafe = FailsafeMonitor::new(config.failsafe);
        for id in coordinator.sensor_ids() {
            failsafe.register(id);
        }
        Self {
            planner: Arc::new(Mutex::new(planner)),
            coordinator,
            failsafe,
            link,
            goal,
            config,
            last_cycle: None,
            cycles: 0,
            stale: Vec::new(),
        }
    }

    /// Shared handle to the planner, e.g. for status display.
    pub fn planner(&self) -> Arc<Mutex<LocalPlanner>> {
        Arc::clone(&self.planner)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn goal(&self) -> Vec3 {
        self.goal
    }

    pub fn set_goal(&mut self, goal: Vec3) {
        info!(?goal, "new goal");
        self.goal = goal;
    }

    /// Number of completed planning cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Sensors silent for longer than the critical timeout as of the last
    /// cycle, sorted.
    pub fn stale_sensors(&self) -> &[String] {
        &self.stale
    }

    /// Run one planning cycle.
    ///
    /// Returns `Ok(None)` while no vehicle state is available.
    pub fn spin_once(&mut self) -> Result<Option<PlannerOutput>, PlannerError> {
        let span = cycle_span(self.cycles + 1);
        let _enter = span.enter();

        let Some(state) = self.link.vehicle_state() else {
            debug!("waiting for vehicle state");
            return Ok(None);
        };
        if let Some(model) = self.link.model_parameters() {
            lock_planner(&self.planner).set_model_parameters(model);
        }

        let batch = self
            .coordinator
            .gather(Duration::from_millis(self.config.gather_timeout_ms));
        for id in batch.delivered() {
            self.failsafe.heartbeat(id);
        }
        if let Err(e) = batch.check_complete() {
            debug!(error = %e, missing = ?batch.missing, "incomplete sensor data this cycle");
        }
        let failsafe = self.failsafe.check();

        let now = Instant::now();
        let dt = match self.last_cycle {
            Some(last) => now.duration_since(last).as_secs_f32(),
            None => self.config.cycle_period().as_secs_f32(),
        };
        self.last_cycle = Some(now);
        self.update_stale_sensors(now);

        let clouds = batch.into_clouds();
        let output = lock_planner(&self.planner).run_cycle(&CycleInput {
            state: &state,
            goal: self.goal,
            clouds: &clouds,
            dt,
            failsafe,
        })?;

        record_cycle(&span, &output, clouds.len(), self.stale.len());

        self.link.send_setpoint(&output)?;
        self.cycles += 1;
        Ok(Some(output))
    }

    /// Compare per-sensor silence against the critical timeout and log when
    /// the set of silent sensors changes.
    fn update_stale_sensors(&mut self, now: Instant) {
        let max_silence = Duration::from_secs_f32(self.config.failsafe.critical.max(0.0));
        let stale = self.failsafe.stale_sensors(now, max_silence);
        if stale == self.stale {
            return;
        }
        if stale.is_empty() {
            info!(recovered = ?self.stale, "all sensors delivering");
        } else {
            warn!(
                sensors = ?stale,
                max_silence_s = max_silence.as_secs_f32(),
                "sensors silent"
            );
        }
        self.stale = stale;
    }

    /// Spin at the configured rate until `shutdown` is raised or
    /// `max_cycles` planning cycles have completed.
    ///
    /// A failed cycle is logged and the loop carries on. Returns the number
    /// of completed cycles.
    pub fn run(&mut self, shutdown: &AtomicBool, max_cycles: Option<u64>) -> u64 {
        let period = self.config.cycle_period();
        info!(rate_hz = self.config.cycle_hz, goal = ?self.goal, "planner node running");

        while !shutdown.load(Ordering::Relaxed) {
            if max_cycles.is_some_and(|max| self.cycles >= max) {
                break;
            }
            let started = Instant::now();
            if let Err(e) = self.spin_once() {
                warn!(error = %e, "planning cycle failed");
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }

        info!(cycles = self.cycles, "planner node stopped");
        self.cycles
    }

    /// Stop the sensor workers and hand back the flight controller link.
    pub fn shutdown(mut self) -> L {
        self.coordinator.shutdown();
        self.link
    }
}

/// A panic in a previous cycle leaves the planner state consistent enough to
/// keep hovering, so poisoning is ignored.
fn lock_planner(planner: &Mutex<LocalPlanner>) -> MutexGuard<'_, LocalPlanner> {
    planner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
