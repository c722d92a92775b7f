//! `skyward-perception` – obstacle representation around the vehicle.
//!
//! Turns raw depth clouds from several sensors into the spherical picture the
//! planner reasons over.
//!
//! # Modules
//!
//! - [`polar`] – spherical coordinate conversions and histogram index mapping.
//! - [`grid`] – [`PolarGrid`][grid::PolarGrid]: dense matrix over the sphere
//!   with azimuth wraparound and pole reflection.
//! - [`histogram`] – [`Histogram`][histogram::Histogram]: nearest obstacle
//!   distance per direction bin, at fine or coarse resolution.
//! - [`fusion`] – merges per-sensor clouds with aged memory inside a
//!   [`BoundingBox`][fusion::BoundingBox].
//! - [`fov`] – which histogram bins the sensors currently cover.
//! - [`transform`] – [`TfEngine`][transform::TfEngine]: composes sensor frame
//!   poses so every cloud lands in the fixed planner frame.

pub mod fov;
pub mod fusion;
pub mod grid;
pub mod histogram;
pub mod polar;
pub mod transform;
