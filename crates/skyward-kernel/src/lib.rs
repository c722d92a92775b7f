//! `skyward-kernel` – Safety interlocks
//!
//! Nothing here plans. These types decide whether the planner may be trusted
//! and whether a setpoint may leave the process.
//!
//! # Modules
//!
//! - [`failsafe`] – [`FailsafeMonitor`][failsafe::FailsafeMonitor]: tracks
//!   cloud arrivals per sensor and escalates to hover, then to unhealthy, when
//!   data goes stale.
//! - [`verifier`] – [`StateVerifier`][verifier::StateVerifier]: a rule engine
//!   that validates every [`PlannerOutput`][skyward_types::PlannerOutput]
//!   against kinematic invariants and substitutes a hover on violation.

pub mod failsafe;
pub mod verifier;

pub use failsafe::{FailsafeMonitor, FailsafeState, FailsafeTimeouts};
pub use verifier::{FiniteSetpointRule, Rule, StateVerifier, VelocityCapRule};
