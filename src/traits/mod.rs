//! Collaborator seams of the control core.
//!
//! The core decides authority and keeps section reservations; two things
//! it consumes from outside:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`Interlocking`] | signal clearance, permission and reset |
//! | [`MotionModel`] | per-tick train movement (front, rear, speed) |
//!
//! # Implementation
//!
//! [`crate::providers`] has a block interlocking and a kinematic route
//! follower for running a simulation, plus scripted doubles in
//! [`crate::providers::mock`] for tests.

pub mod interlocking;
pub mod motion;

pub use interlocking::*;
pub use motion::*;
