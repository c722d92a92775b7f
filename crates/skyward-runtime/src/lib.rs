//! `skyward-runtime` – The planning loop
//!
//! Wires perception, planning and the kernel interlocks into a running
//! planner process.
//!
//! # Modules
//!
//! - [`local_planner`] – [`LocalPlanner`][local_planner::LocalPlanner]: one
//!   cycle of fusion, histogram, cost matrix, look-ahead tree, waypoint
//!   selection and setpoint verification, plus the state kept between
//!   cycles.
//! - [`coordinator`] – [`SensorCoordinator`][coordinator::SensorCoordinator]:
//!   one worker thread per sensor that waits for its frame transform and
//!   hands the newest local-frame cloud to a bounded fan-in with a shared
//!   deadline.
//! - [`node`] – [`PlannerNode`][node::PlannerNode]: the main loop that reads
//!   the vehicle state through a [`FlightControllerLink`][node::FlightControllerLink],
//!   drives the failsafe and sends each setpoint back.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter, and [`cycle_span`][telemetry::cycle_span] lays out the span
//!   of each planning cycle. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable
//!   trace export.

pub mod coordinator;
pub mod local_planner;
pub mod node;
pub mod telemetry;

pub use coordinator::{CloudBatch, CloudPublisher, CoordinatorSettings, RawCloud, SensorCoordinator};
pub use local_planner::{CycleInput, LocalPlanner, LocalPlannerConfig, PlannerParameters};
pub use node::{FlightControllerLink, NodeConfig, PlannerNode, VehicleState};
pub use telemetry::{TracerProviderGuard, init_tracing};
