//! Concrete collaborators for the control core.
//!
//! # Available Providers
//!
//! | Provider | Trait | Purpose |
//! |----------|-------|---------|
//! | [`RouteInterlocking`] | [`Interlocking`] | block interlocking: clears a signal when its block is free |
//! | [`RouteFollower`] | [`MotionModel`] | kinematic driver that runs to a target speed within authority |
//! | [`MockInterlocking`] | [`Interlocking`] | scripted aspects, records requests |
//! | [`ScriptedMotion`] | [`MotionModel`] | queued per-train moves |
//!
//! The block helpers here are shared by both interlockings: a signal's
//! block runs from the section after the signal to the next signal facing
//! the same way, or to the end of the train's route. For manual and
//! explorer trains it follows the switches as they lie.
//!
//! [`Interlocking`]: crate::traits::Interlocking
//! [`MotionModel`]: crate::traits::MotionModel

pub mod interlocking;
pub mod mock;
pub mod motion;

pub use interlocking::*;
pub use mock::*;
pub use motion::*;

use crate::ids::{RoutedTrain, SectionId, SignalId, FORWARD};
use crate::position::TrackPosition;
use crate::reservation::{self, Availability};
use crate::track::{Aspect, TrackGraph};
use crate::train::Train;

/// Farthest a block is followed along the active pins when the signal is
/// not on the train's route.
const MAX_BLOCK_M: f32 = 5000.0;

/// Sections of the block beyond `signal` as seen by `train`, and the signal
/// closing the block, if any.
pub(crate) fn signal_block(
    graph: &TrackGraph,
    signal: SignalId,
    train: &Train,
) -> (Vec<SectionId>, Option<SignalId>) {
    let s = graph.signal(signal);
    let route = train.valid_route(FORWARD);
    let route_index = route
        .index_of(s.section, 0)
        .filter(|&i| route.get(i).map(|e| e.direction) == Some(s.direction));
    let start = TrackPosition::new(s.section, s.direction, graph.section_length(s.section))
        .with_route_index(route_index);

    // Operator-driven trains have no path beyond their window.
    let stop_at_route_end = route_index.is_some() && !train.mode().is_manual();

    let mut block = Vec::new();
    for step in graph.walk(&start, route_index.map(|_| route)).skip(1) {
        if stop_at_route_end && step.route_index.is_none() {
            break;
        }
        if step.start_m > MAX_BLOCK_M {
            break;
        }
        block.push(step.section);
        if let Some(end) = graph.section(step.section).end_signals[step.direction.index()] {
            return (block, Some(end));
        }
    }
    (block, None)
}

/// Reserves the whole block beyond `signal` for `train` and marks it held
/// by the signal. Reserves nothing unless every section is available.
///
/// Returns the signal closing the block, `Some(None)` for a block that runs
/// to the end of the route, or `None` if refused.
pub(crate) fn clear_signal_route(
    graph: &mut TrackGraph,
    signal: SignalId,
    train: &Train,
) -> Option<Option<SignalId>> {
    let (block, far_signal) = signal_block(graph, signal, train);
    let claimant = train.claimant(FORWARD);
    for &section in &block {
        let result = reservation::check_available(graph, section, &claimant);
        if result != Availability::Available {
            log::debug!(
                "{} refused for {}: {} {:?}",
                signal,
                train.id(),
                section,
                result
            );
            return None;
        }
    }
    for &section in &block {
        reservation::reserve(graph, section, &claimant);
        graph.section_mut(section).state.signal_reserved = Some(signal);
    }
    Some(far_signal)
}

/// Clears `signal` for `train` at `aspect`.
pub(crate) fn enable_signal(
    graph: &mut TrackGraph,
    signal: SignalId,
    train: &Train,
    aspect: Aspect,
    next_signal: Option<SignalId>,
) {
    let s = graph.signal_mut(signal);
    s.aspect = aspect;
    s.enabled_train = Some(RoutedTrain::forward(train.id()));
    s.next_signal = next_signal;
    log::debug!("{} cleared to {} for {}", signal, aspect.as_str(), train.id());
}

/// Grants stop-and-proceed at `signal` and reserves as much of its block
/// as is available. Refused if the signal is cleared for another train.
pub(crate) fn grant_permission(graph: &mut TrackGraph, signal: SignalId, train: &Train) -> bool {
    let me = train.id();
    if graph
        .signal(signal)
        .enabled_train
        .map_or(false, |r| r.train != me)
    {
        return false;
    }
    let (block, _) = signal_block(graph, signal, train);
    let claimant = train.claimant(FORWARD);
    for section in block {
        if !reservation::check_available(graph, section, &claimant).is_available() {
            break;
        }
        reservation::reserve(graph, section, &claimant);
    }
    enable_signal(graph, signal, train, Aspect::StopAndProceed, None);
    true
}
