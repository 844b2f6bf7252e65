//! Train motion trait.

use crate::position::TrackPosition;
use crate::track::TrackGraph;
use crate::train::Train;

/// Result of one motion step.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Movement {
    /// New front position.
    pub front: TrackPosition,
    /// New rear position.
    pub rear: TrackPosition,
    /// Speed after the step (m/s, negative when running backwards).
    pub speed_mps: f32,
    /// Signed distance moved by the front this step.
    pub distance_m: f32,
}

impl Movement {
    /// A step that leaves the train where it is, at standstill.
    pub fn none(train: &Train) -> Self {
        Self {
            front: *train.front(),
            rear: *train.rear(),
            speed_mps: 0.0,
            distance_m: 0.0,
        }
    }

    /// Moves both train ends by `distance_m` along the train's route.
    pub fn along_route(graph: &TrackGraph, train: &Train, distance_m: f32, speed_mps: f32) -> Self {
        let route = Some(train.valid_route(crate::ids::FORWARD));
        Self {
            front: graph.advance(train.front(), distance_m, route),
            rear: graph.advance(train.rear(), distance_m, route),
            speed_mps,
            distance_m,
        }
    }
}

/// Source of train movement, standing in for the vehicle dynamics.
///
/// # Implementation Notes
///
/// - Honour [`Train::is_emergency_braking`] by decelerating to a stand
/// - Move both train ends together; the core derives passed objects and
///   section changes from the difference between steps
pub trait MotionModel {
    /// Computes the movement of `train` over `dt_s` seconds.
    fn step(&mut self, graph: &TrackGraph, train: &Train, dt_s: f32) -> Movement;
}
