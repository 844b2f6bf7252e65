//! Kinematic route follower.
//!
//! Drives each train towards an operator target speed, never faster than
//! its allowed speed and never so fast that it could not stop within its
//! end of authority at the service deceleration:
//!
//! ```text
//! v_max = min(allowed, sqrt(2 × decel × (authority − margin)))
//! ```
//!
//! A negative target runs the train backwards against its backward
//! authority. Emergency braking and the handbrake override the target.

use std::collections::BTreeMap;

use crate::config::ControlConfig;
use crate::ids::{TrainId, BACKWARD, FORWARD};
use crate::track::TrackGraph;
use crate::traits::{MotionModel, Movement};
use crate::train::Train;

/// Motion model with per-train target speeds.
#[derive(Clone, Debug)]
pub struct RouteFollower {
    targets: BTreeMap<TrainId, f32>,
    /// Traction acceleration (m/s²).
    pub accel_mps2: f32,
    /// Service brake deceleration (m/s²).
    pub service_decel_mps2: f32,
    /// Emergency brake deceleration (m/s²).
    pub emergency_decel_mps2: f32,
    /// Distance kept short of the end of authority.
    pub margin_m: f32,
}

impl RouteFollower {
    /// Creates a follower braking at the configured emergency rate.
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            targets: BTreeMap::new(),
            accel_mps2: 0.5,
            service_decel_mps2: 0.7,
            emergency_decel_mps2: config.emergency_decel_mps2,
            margin_m: 5.0,
        }
    }

    /// Set the traction acceleration
    pub fn with_accel_mps2(mut self, mps2: f32) -> Self {
        self.accel_mps2 = mps2.max(0.01);
        self
    }

    /// Set the service deceleration
    pub fn with_service_decel_mps2(mut self, mps2: f32) -> Self {
        self.service_decel_mps2 = mps2.max(0.01);
        self
    }

    /// Sets the speed `train` should run at; negative runs backwards.
    pub fn set_target(&mut self, train: TrainId, speed_mps: f32) {
        self.targets.insert(train, speed_mps);
    }

    /// Current target of `train` (0 if never set).
    pub fn target(&self, train: TrainId) -> f32 {
        self.targets.get(&train).copied().unwrap_or(0.0)
    }

    /// Highest speed from which the train still stops within `authority_m`.
    pub fn braking_limit(&self, authority_m: f32) -> f32 {
        (2.0 * self.service_decel_mps2 * (authority_m - self.margin_m).max(0.0)).sqrt()
    }
}

impl MotionModel for RouteFollower {
    fn step(&mut self, graph: &TrackGraph, train: &Train, dt_s: f32) -> Movement {
        let v = train.speed_mps();
        let current = v.abs();
        let sign = if v < 0.0 { -1.0 } else { 1.0 };

        if train.is_emergency_braking() || train.handbrake() {
            let decel = if train.is_emergency_braking() {
                self.emergency_decel_mps2
            } else {
                self.service_decel_mps2
            };
            let next = (current - decel * dt_s).max(0.0);
            let distance = (current + next) / 2.0 * dt_s;
            return Movement::along_route(graph, train, sign * distance, sign * next);
        }

        let target = self.target(train.id());
        let backward = target < 0.0;
        let authority = train
            .end_authority(if backward { BACKWARD } else { FORWARD })
            .distance_m;

        // Reversing needs a stand first.
        let reversing = current > 0.0 && (v < 0.0) != backward;
        let desired = if reversing {
            0.0
        } else {
            target
                .abs()
                .min(train.allowed_speed_mps())
                .min(self.braking_limit(authority))
        };

        let next = if current < desired {
            (current + self.accel_mps2 * dt_s).min(desired)
        } else {
            (current - self.service_decel_mps2 * dt_s).max(desired)
        };
        let sign = if reversing {
            sign
        } else if backward {
            -1.0
        } else {
            1.0
        };
        let mut distance = (current + next) / 2.0 * dt_s;
        if !reversing {
            distance = distance.min(authority.max(0.0));
        }
        Movement::along_route(graph, train, sign * distance, sign * next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainConfig;
    use crate::position::TrackPosition;
    use crate::route::{SubpathRoute, TrainRoute};
    use crate::track::{Direction, SectionKind};

    fn standing_train(g: &mut TrackGraph) -> Train {
        let a = g.add_section(SectionKind::Normal, 500.0);
        let b = g.add_section(SectionKind::Normal, 500.0);
        g.link(a, b).unwrap();
        let route = TrainRoute::single(SubpathRoute::forward(g, &[a, b]).unwrap());
        Train::place(
            TrainId(0),
            TrainConfig::default().with_length_m(50.0),
            route,
            TrackPosition::new(a, Direction::Forward, 10.0),
            g,
            &ControlConfig::default(),
        )
        .unwrap()
    }

    // === Braking Curve Tests ===

    #[test]
    fn braking_limit_respects_margin() {
        let follower = RouteFollower::new(&ControlConfig::default());
        assert_eq!(follower.braking_limit(3.0), 0.0);
        let v = follower.braking_limit(5.0 + 70.0);
        assert!((v - (2.0f32 * 0.7 * 70.0).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn no_authority_means_no_movement() {
        let mut g = TrackGraph::new();
        let train = standing_train(&mut g);
        let mut follower = RouteFollower::new(&ControlConfig::default());
        follower.set_target(TrainId(0), 20.0);

        let movement = follower.step(&g, &train, 1.0);
        assert_eq!(movement.distance_m, 0.0);
        assert_eq!(movement.speed_mps, 0.0);
    }

    #[test]
    fn target_defaults_to_zero() {
        let follower = RouteFollower::new(&ControlConfig::default());
        assert_eq!(follower.target(TrainId(3)), 0.0);
    }
}
