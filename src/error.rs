//! Error type for setup and lookup failures.
//!
//! Per-tick conditions (waiting at a signal, a pending deadlock) are never
//! errors; they are flags on the train. Safety violations put the train out
//! of control. Only calls that cannot be carried out at all return
//! [`DispatchError`].

use crate::ids::{SectionId, SignalId, TrainId};

/// Failure of a network-building, placement or lookup call.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// No section with this id.
    #[error("unknown {0}")]
    UnknownSection(SectionId),

    /// No signal or speed post with this id.
    #[error("unknown {0}")]
    UnknownSignal(SignalId),

    /// No active train with this id.
    #[error("unknown {0}")]
    UnknownTrain(TrainId),

    /// Route or subpath without elements.
    #[error("route has no elements")]
    EmptyRoute,

    /// Consecutive route elements are not linked in the graph.
    #[error("{from} does not lead to {to}")]
    Disconnected {
        /// Element the route leaves.
        from: SectionId,
        /// Element the route expects next.
        to: SectionId,
    },

    /// Both link slots at this section end are in use.
    #[error("no free link slot on {0}")]
    PinsExhausted(SectionId),

    /// Object offset outside the section.
    #[error("offset {offset_m} m lies outside {section}")]
    OffsetOutOfRange {
        /// Section the object was placed on.
        section: SectionId,
        /// Requested offset.
        offset_m: f32,
    },

    /// A section a train is placed on is held by someone else.
    #[error("{section} is not available for {train}")]
    SectionUnavailable {
        /// Section refused.
        section: SectionId,
        /// Train being placed.
        train: TrainId,
    },

    /// A position does not lie on the route it is used with.
    #[error("position in {0} is not on the route")]
    NotOnRoute(SectionId),

    /// Operation needs a junction.
    #[error("{0} is not a junction")]
    NotAJunction(SectionId),
}
