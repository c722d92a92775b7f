//! [`FailsafeMonitor`] – sensor staleness escalation.
//!
//! Every sensor worker reports each delivered cloud through
//! [`FailsafeMonitor::heartbeat`]. The monitor escalates in two tiers when
//! clouds stop arriving:
//!
//! | State | Condition | Planner reaction |
//! |-------|-----------|------------------|
//! | `Nominal` | clouds are fresh, or still inside the startup grace period | plan normally |
//! | `Critical` | no cloud for `critical` s and running longer than `startup` s | hover in place |
//! | `Terminated` | no cloud for `termination` s and running longer than `termination` s | report unhealthy |
//!
//! A single fresh cloud from any sensor returns the monitor to `Nominal`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Escalation thresholds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailsafeTimeouts {
    /// Grace period after start-up before `Critical` can trigger.
    pub startup: f32,
    /// Silence that makes the planner hover.
    pub critical: f32,
    /// Silence that makes the planner unhealthy.
    pub termination: f32,
}

impl Default for FailsafeTimeouts {
    fn default() -> Self {
        Self {
            startup: 5.0,
            critical: 0.5,
            termination: 15.0,
        }
    }
}

/// Escalation tier reported by [`FailsafeMonitor::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailsafeState {
    Nominal,
    /// Hover until data returns.
    Critical,
    /// Data has been missing long enough that the planner must not be
    /// trusted.
    Terminated,
}

impl FailsafeState {
    /// The planner should hold position.
    pub fn requires_hover(self) -> bool {
        self != FailsafeState::Nominal
    }

    /// The planner output can still be trusted.
    pub fn is_healthy(self) -> bool {
        self != FailsafeState::Terminated
    }
}

/// Pure escalation rule, see the module table.
pub fn evaluate(
    timeouts: &FailsafeTimeouts,
    since_start: Duration,
    since_last_cloud: Duration,
) -> FailsafeState {
    let start = since_start.as_secs_f32();
    let silence = since_last_cloud.as_secs_f32();
    if silence > timeouts.termination && start > timeouts.termination {
        FailsafeState::Terminated
    } else if silence > timeouts.critical && start > timeouts.startup {
        FailsafeState::Critical
    } else {
        FailsafeState::Nominal
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FailsafeMonitor
// ────────────────────────────────────────────────────────────────────────────

/// Tracks cloud arrivals per sensor and derives the [`FailsafeState`].
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use skyward_kernel::failsafe::{FailsafeMonitor, FailsafeState, FailsafeTimeouts};
///
/// let start = Instant::now();
/// let mut monitor = FailsafeMonitor::starting_at(FailsafeTimeouts::default(), start);
/// monitor.register("front_camera");
///
/// // Silent, but still inside the startup grace period.
/// assert_eq!(monitor.check_at(start + Duration::from_secs(2)), FailsafeState::Nominal);
/// // Past the grace period with no cloud at all.
/// assert_eq!(monitor.check_at(start + Duration::from_secs(6)), FailsafeState::Critical);
///
/// monitor.heartbeat_at("front_camera", start + Duration::from_secs(6));
/// assert_eq!(monitor.check_at(start + Duration::from_millis(6200)), FailsafeState::Nominal);
/// ```
#[derive(Debug)]
pub struct FailsafeMonitor {
    timeouts: FailsafeTimeouts,
    start: Instant,
    last_cloud: Instant,
    sensors: HashMap<String, Instant>,
    state: FailsafeState,
}

impl FailsafeMonitor {
    /// Start monitoring now.
    pub fn new(timeouts: FailsafeTimeouts) -> Self {
        Self::starting_at(timeouts, Instant::now())
    }

    /// Start monitoring as of `start`.
    pub fn starting_at(timeouts: FailsafeTimeouts, start: Instant) -> Self {
        Self {
            timeouts,
            start,
            last_cloud: start,
            sensors: HashMap::new(),
            state: FailsafeState::Nominal,
        }
    }

    pub fn timeouts(&self) -> &FailsafeTimeouts {
        &self.timeouts
    }

    /// Register a sensor. Its silence is measured from start-up until its
    /// first heartbeat. Re-registering keeps the existing timestamp.
    pub fn register(&mut self, sensor_id: &str) {
        self.sensors.entry(sensor_id.to_string()).or_insert(self.start);
    }

    /// Record a delivered cloud from `sensor_id` now.
    pub fn heartbeat(&mut self, sensor_id: &str) {
        self.heartbeat_at(sensor_id, Instant::now());
    }

    /// Record a delivered cloud from `sensor_id` at `at`.
    ///
    /// Unregistered sensors are registered on their first heartbeat.
    pub fn heartbeat_at(&mut self, sensor_id: &str, at: Instant) {
        self.sensors.insert(sensor_id.to_string(), at);
        if at > self.last_cloud {
            self.last_cloud = at;
        }
    }

    /// Current state as of now.
    pub fn check(&mut self) -> FailsafeState {
        self.check_at(Instant::now())
    }

    /// State as of `now`. Transitions are logged.
    pub fn check_at(&mut self, now: Instant) -> FailsafeState {
        let since_start = now.saturating_duration_since(self.start);
        let since_last_cloud = now.saturating_duration_since(self.last_cloud);
        let state = evaluate(&self.timeouts, since_start, since_last_cloud);
        if state != self.state {
            match state {
                FailsafeState::Nominal => info!(
                    previous = ?self.state,
                    "sensor data restored"
                ),
                _ => warn!(
                    ?state,
                    silence_s = since_last_cloud.as_secs_f32(),
                    "sensor data missing"
                ),
            }
            self.state = state;
        }
        state
    }

    /// IDs of sensors silent for longer than `max_silence` as of `now`,
    /// sorted.
    pub fn stale_sensors(&self, now: Instant, max_silence: Duration) -> Vec<String> {
        let mut stale: Vec<String> = self
            .sensors
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > max_silence)
            .map(|(id, _)| id.clone())
            .collect();
        stale.sort();
        stale
    }
}
