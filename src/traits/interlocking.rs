//! Signal interlocking trait.
//!
//! The interlocking owns signal aspects. A train asks it to clear a signal
//! for its route; the interlocking checks the sections beyond the signal,
//! reserves them for the train and sets the aspect. Passing a signal or
//! tearing down a route resets it.
//!
//! # Example
//!
//! ```rust
//! use rs_authority::track::{Aspect, TrackGraph};
//! use rs_authority::traits::Interlocking;
//! use rs_authority::{SignalId, Train};
//!
//! /// Never clears anything.
//! struct AlwaysRed;
//!
//! impl Interlocking for AlwaysRed {
//!     fn request_clear(&mut self, _: &mut TrackGraph, _: SignalId, _: &Train) -> Aspect {
//!         Aspect::Stop
//!     }
//!
//!     fn request_permission(&mut self, _: &mut TrackGraph, _: SignalId, _: &Train) -> bool {
//!         false
//!     }
//!
//!     fn reset_signal(&mut self, graph: &mut TrackGraph, signal: SignalId) {
//!         graph.reset_signal(signal);
//!     }
//! }
//! ```

use crate::ids::SignalId;
use crate::track::{Aspect, TrackGraph};
use crate::train::Train;

/// Signal clearance authority.
///
/// # Implementation Notes
///
/// - `request_clear` may reserve sections for `train`; it must only do so
///   through [`crate::reservation`] after an availability check
/// - A signal cleared for one train must read [`Aspect::Stop`] for every
///   other train; set [`SignalObject::enabled_train`] when clearing
/// - Requests are repeated every tick while a train waits; they must be
///   idempotent
///
/// [`SignalObject::enabled_train`]: crate::track::SignalObject::enabled_train
pub trait Interlocking {
    /// Asks for `signal` to be cleared for `train`'s route.
    ///
    /// Returns the resulting aspect; [`Aspect::Stop`] means refused.
    fn request_clear(&mut self, graph: &mut TrackGraph, signal: SignalId, train: &Train)
        -> Aspect;

    /// Asks for permission to pass `signal` at stop.
    fn request_permission(
        &mut self,
        graph: &mut TrackGraph,
        signal: SignalId,
        train: &Train,
    ) -> bool;

    /// Returns `signal` to stop and drops its route.
    fn reset_signal(&mut self, graph: &mut TrackGraph, signal: SignalId);
}
