//! `arena-spatial` – Spatial occupancy index and ray casting.
//!
//! Tracks which agent's outline occupies which part of the world and answers
//! "what is the first thing along this ray" for sensors and collision checks.
//!
//! # Modules
//!
//! - [`transform`] – [`global_pose`][transform::global_pose]: composes a chain
//!   of parent-relative poses through any [`FrameTree`][transform::FrameTree]
//!   into a single world pose, rejecting non-finite results.
//! - [`shape`] – [`Shape`][shape::Shape]: an agent's outline normalized to the
//!   unit square, and [`footprint`][shape::footprint], the one routine that
//!   turns an outline at a pose into global line segments.
//! - [`grid`] – [`SpatialIndex`][grid::SpatialIndex]: a uniform grid whose
//!   cells hold the set of agents whose outline passes through them.
//! - [`raycast`] – [`RayCaster`][raycast::RayCaster]: walks grid cells along a
//!   ray and returns the first occupant accepted by a caller predicate.

pub mod grid;
pub mod raycast;
pub mod shape;
pub mod transform;

pub use grid::{Cell, LineCells, SpatialIndex};
pub use raycast::{Hit, Ray, RayCaster, RaySample};
pub use shape::{Shape, footprint};
pub use transform::{Frame, FrameTree, global_pose, is_ancestor, is_related};
