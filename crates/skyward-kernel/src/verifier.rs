//! [`StateVerifier`] – setpoint interlock / rule engine.
//!
//! Every [`PlannerOutput`] passes through [`StateVerifier::verify`] before it
//! is handed to the flight controller. Registered [`Rule`]s are evaluated in
//! order; the first violation returns [`PlannerError::SetpointRejected`] and
//! the caller replaces the setpoint with a hover.
//!
//! Built-in rules:
//! - [`FiniteSetpointRule`] – rejects NaN or infinite position/velocity.
//! - [`VelocityCapRule`] – rejects velocities beyond the vehicle's
//!   [`ModelParameters`].

use skyward_types::{ModelParameters, PlannerError, PlannerOutput, Vec3};
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single invariant a setpoint must satisfy.
pub trait Rule: Send + Sync {
    /// Name used in rejection messages.
    fn name(&self) -> &str;

    /// `Ok(())` when `output` satisfies the invariant.
    fn check(&self, output: &PlannerOutput) -> Result<(), PlannerError>;
}

fn rejected(rule: &dyn Rule, details: String) -> PlannerError {
    PlannerError::SetpointRejected {
        rule: rule.name().to_string(),
        details,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StateVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine validating a [`PlannerOutput`] against every registered
/// [`Rule`].
///
/// # Example
///
/// ```
/// use skyward_kernel::verifier::{StateVerifier, VelocityCapRule};
/// use skyward_types::{ModelParameters, PlannerOutput, Vec3, WaypointMode};
///
/// let mut verifier = StateVerifier::new();
/// verifier.add_rule(Box::new(VelocityCapRule::from_model(&ModelParameters::default())));
///
/// let mut out = PlannerOutput::hover(Vec3::zero(), true);
/// out.mode = WaypointMode::Direct;
/// out.velocity = Vec3::new(0.5, 0.5, 0.0);
/// assert!(verifier.verify(&out).is_ok());
///
/// out.velocity = Vec3::new(4.0, 0.0, 0.0);
/// assert!(verifier.verify(&out).is_err());
/// ```
#[derive(Default)]
pub struct StateVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl StateVerifier {
    /// Create an empty verifier with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default rule set for a vehicle with the given limits.
    pub fn for_model(model: &ModelParameters) -> Self {
        let mut verifier = Self::new();
        verifier.add_rule(Box::new(FiniteSetpointRule));
        verifier.add_rule(Box::new(VelocityCapRule::from_model(model)));
        verifier
    }

    /// Register a new [`Rule`]. Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Validate `output`; returns the first rejection.
    pub fn verify(&self, output: &PlannerOutput) -> Result<(), PlannerError> {
        for rule in &self.rules {
            rule.check(output)?;
        }
        Ok(())
    }

    /// Return `output` unchanged when it passes, otherwise a hover at
    /// `hover_position` carrying the same health flag.
    pub fn enforce(&self, output: PlannerOutput, hover_position: Vec3) -> PlannerOutput {
        match self.verify(&output) {
            Ok(()) => output,
            Err(err) => {
                warn!(mode = %output.mode, error = %err, "setpoint rejected, hovering");
                PlannerOutput::hover(hover_position, output.healthy)
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects setpoints with a non-finite position or velocity component.
pub struct FiniteSetpointRule;

impl Rule for FiniteSetpointRule {
    fn name(&self) -> &str {
        "finite_setpoint"
    }

    fn check(&self, output: &PlannerOutput) -> Result<(), PlannerError> {
        if !output.position.is_finite() {
            return Err(rejected(
                self,
                format!("position {:?} is not finite", output.position),
            ));
        }
        if !output.velocity.is_finite() {
            return Err(rejected(
                self,
                format!("velocity {:?} is not finite", output.velocity),
            ));
        }
        Ok(())
    }
}

/// Rejects velocities beyond the horizontal, ascent or descent caps.
///
/// `tolerance` absorbs float error from the limiter that produced the
/// setpoint.
pub struct VelocityCapRule {
    pub max_xy: f32,
    pub max_up: f32,
    pub max_down: f32,
    pub tolerance: f32,
}

impl VelocityCapRule {
    pub fn from_model(model: &ModelParameters) -> Self {
        Self {
            max_xy: model.xy_vel,
            max_up: model.up_vel.max(model.takeoff_speed),
            max_down: model.down_vel.max(model.takeoff_speed),
            tolerance: 1e-3,
        }
    }
}

impl Rule for VelocityCapRule {
    fn name(&self) -> &str {
        "velocity_cap"
    }

    fn check(&self, output: &PlannerOutput) -> Result<(), PlannerError> {
        let v = output.velocity;
        let xy = v.norm_xy();
        if xy > self.max_xy + self.tolerance {
            return Err(rejected(
                self,
                format!("horizontal speed {xy} exceeds cap {}", self.max_xy),
            ));
        }
        if v.z > self.max_up + self.tolerance {
            return Err(rejected(
                self,
                format!("ascent rate {} exceeds cap {}", v.z, self.max_up),
            ));
        }
        if -v.z > self.max_down + self.tolerance {
            return Err(rejected(
                self,
                format!("descent rate {} exceeds cap {}", -v.z, self.max_down),
            ));
        }
        Ok(())
    }
}
