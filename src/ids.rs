//! Dense arena indices for sections, control objects and trains.
//!
//! Every cross-reference in the crate is one of these indices rather than a
//! pointer: sections, signals and trains each live in their own `Vec`, and
//! the ids below index into them.

use core::fmt;

/// Index of a track section in the [`TrackGraph`](crate::track::TrackGraph) arena.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionId(pub usize);

/// Index of a signal or speed post in the [`TrackGraph`](crate::track::TrackGraph) arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalId(pub usize);

/// Stable numeric identity of a train.
///
/// Trains are processed in ascending `TrainId` order every tick, which makes
/// claim and deadlock outcomes reproducible across runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainId(pub usize);

impl SectionId {
    /// Arena index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl SignalId {
    /// Arena index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl TrainId {
    /// Arena index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section {}", self.0)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signal {}", self.0)
    }
}

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "train {}", self.0)
    }
}

/// Index of the forward route view of a train.
pub const FORWARD: usize = 0;
/// Index of the backward route view of a train.
pub const BACKWARD: usize = 1;

/// A train seen through one of its two directional route views.
///
/// Section state records which view reserved or occupies it, so that a
/// reservation made while looking backwards (manual mode) can be told apart
/// from one made looking forwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutedTrain {
    /// The train.
    pub train: TrainId,
    /// [`FORWARD`] or [`BACKWARD`].
    pub direction_index: usize,
}

impl RoutedTrain {
    /// Forward view of `train`.
    pub const fn forward(train: TrainId) -> Self {
        Self {
            train,
            direction_index: FORWARD,
        }
    }

    /// Backward view of `train`.
    pub const fn backward(train: TrainId) -> Self {
        Self {
            train,
            direction_index: BACKWARD,
        }
    }

    /// View of `train` for the given direction index.
    pub const fn new(train: TrainId, direction_index: usize) -> Self {
        Self {
            train,
            direction_index,
        }
    }
}
