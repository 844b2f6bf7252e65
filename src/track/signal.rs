//! Control objects attached to sections: signals and speed posts.

use super::Direction;
use crate::ids::{RoutedTrain, SectionId, SignalId, TrainId};

/// Kind of control object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ObjectKind {
    /// Block signal at a section end.
    Signal,
    /// Permanent speed limit sign.
    SpeedPost,
}

/// Signal aspect, ordered from most to least restrictive.
///
/// # Default
///
/// Defaults to [`Stop`](Self::Stop): a signal nobody has cleared is at danger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Aspect {
    /// Danger. Passing without permission is a safety violation.
    #[default]
    Stop,
    /// Permission granted to pass at stop and proceed on sight.
    StopAndProceed,
    /// Proceed at restricted speed.
    Restricting,
    /// Proceed, next signal at stop.
    Approach,
    /// Proceed.
    Clear,
}

impl Aspect {
    /// True for the most restrictive aspect.
    #[inline]
    pub const fn is_stop(self) -> bool {
        matches!(self, Aspect::Stop)
    }

    /// Returns the aspect as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Aspect::Stop => "stop",
            Aspect::StopAndProceed => "stop_and_proceed",
            Aspect::Restricting => "restricting",
            Aspect::Approach => "approach",
            Aspect::Clear => "clear",
        }
    }
}

/// Speed values carried by an object, split by train class.
///
/// `None` means unrestricted; it reads as the route maximum.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpeedLimit {
    /// Limit for passenger trains (m/s).
    pub passenger_mps: Option<f32>,
    /// Limit for freight trains (m/s).
    pub freight_mps: Option<f32>,
}

impl SpeedLimit {
    /// Same limit for every train class.
    pub const fn uniform(mps: f32) -> Self {
        Self {
            passenger_mps: Some(mps),
            freight_mps: Some(mps),
        }
    }

    /// No limit.
    pub const fn unrestricted() -> Self {
        Self {
            passenger_mps: None,
            freight_mps: None,
        }
    }

    /// Field for the given train class.
    pub fn for_train(&self, freight: bool) -> Option<f32> {
        if freight {
            self.freight_mps
        } else {
            self.passenger_mps
        }
    }

    /// Resolves "unrestricted" to `route_max_mps`.
    pub fn resolve(&self, freight: bool, route_max_mps: f32) -> f32 {
        self.for_train(freight).unwrap_or(route_max_mps)
    }
}

/// A signal or speed post.
///
/// The geometry (`section`, `direction`, `offset_m`) is fixed. The remaining
/// fields are signal state written by the interlocking and by waiting points.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalObject {
    /// Arena index.
    pub id: SignalId,
    /// Signal or speed post.
    pub kind: ObjectKind,
    /// Section carrying the object.
    pub section: SectionId,
    /// Direction of travel the object applies to.
    pub direction: Direction,
    /// Offset from the section start, measured in `direction`.
    pub offset_m: f32,
    /// Speed post value, or the speed a signal permits when not at stop.
    pub speed: SpeedLimit,
    /// Current aspect (signals only).
    pub aspect: Aspect,
    /// Train the signal is cleared for.
    pub enabled_train: Option<RoutedTrain>,
    /// Next signal along the cleared route.
    pub next_signal: Option<SignalId>,
    /// Train held at stop by a waiting point.
    pub hold_for: Option<TrainId>,
}

impl SignalObject {
    /// True if the object is a signal.
    pub fn is_signal(&self) -> bool {
        self.kind == ObjectKind::Signal
    }

    /// True if the signal is cleared for `train`.
    pub fn is_enabled_for(&self, train: TrainId) -> bool {
        self.enabled_train.map_or(false, |r| r.train == train)
    }

    /// Aspect as seen by `train`: anything not cleared for it reads as stop.
    pub fn aspect_for(&self, train: TrainId) -> Aspect {
        if self.is_enabled_for(train) {
            self.aspect
        } else {
            Aspect::Stop
        }
    }

    /// Drops clearance back to stop.
    pub fn reset(&mut self) {
        self.aspect = Aspect::Stop;
        self.enabled_train = None;
        self.next_signal = None;
    }
}
