//! `skyward-planner` – direction search and setpoint generation.
//!
//! # Modules
//!
//! - [`cost`] – cost matrix over histogram bins, polar padding and
//!   smoothing, candidate ranking.
//! - [`tree`] – [`TreeSearchPlanner`][tree::TreeSearchPlanner]: best-first
//!   look-ahead tree and path following across cycles.
//! - [`waypoint`] – flight mode state machine and kinematically limited
//!   setpoints.

pub mod cost;
pub mod tree;
pub mod waypoint;
