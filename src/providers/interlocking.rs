//! Block interlocking.

use crate::ids::SignalId;
use crate::track::{Aspect, TrackGraph};
use crate::traits::Interlocking;
use crate::train::Train;

use super::{clear_signal_route, enable_signal, grant_permission};

/// Clears a signal when the whole block beyond it is available to the
/// asking train.
///
/// The block is reserved for the train and held by the signal until the
/// train passes it or the signal is reset. The aspect shows
/// [`Aspect::Approach`] when the signal closing the block is at stop for
/// the train, [`Aspect::Clear`] otherwise. A signal held for a train at a
/// waiting point stays at stop for that train.
///
/// # Example
///
/// ```rust
/// use rs_authority::providers::RouteInterlocking;
/// use rs_authority::traits::Interlocking;
///
/// let interlocking = RouteInterlocking::new();
/// # let _ = interlocking;
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct RouteInterlocking;

impl RouteInterlocking {
    /// Creates the interlocking.
    pub const fn new() -> Self {
        Self
    }
}

impl Interlocking for RouteInterlocking {
    fn request_clear(&mut self, graph: &mut TrackGraph, signal: SignalId, train: &Train) -> Aspect {
        let me = train.id();
        let s = graph.signal(signal);
        if s.hold_for == Some(me) {
            return Aspect::Stop;
        }
        if s.is_enabled_for(me) {
            return s.aspect;
        }
        if s.enabled_train.is_some() {
            return Aspect::Stop;
        }

        let Some(next) = clear_signal_route(graph, signal, train) else {
            return Aspect::Stop;
        };
        let aspect = match next {
            Some(n) if graph.signal(n).aspect_for(me).is_stop() => Aspect::Approach,
            _ => Aspect::Clear,
        };
        enable_signal(graph, signal, train, aspect, next);
        aspect
    }

    fn request_permission(
        &mut self,
        graph: &mut TrackGraph,
        signal: SignalId,
        train: &Train,
    ) -> bool {
        grant_permission(graph, signal, train)
    }

    fn reset_signal(&mut self, graph: &mut TrackGraph, signal: SignalId) {
        graph.reset_signal(signal);
    }
}
