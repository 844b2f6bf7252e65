//! Scripted collaborators for tests.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockInterlocking`] | [`Interlocking`] | Scripted aspects, records every request |
//! | [`ScriptedMotion`] | [`MotionModel`] | Queued per-train moves |
//!
//! # Example
//!
//! ```rust
//! use rs_authority::providers::{MockInterlocking, ScriptedMotion};
//! use rs_authority::track::Aspect;
//! use rs_authority::{SignalId, TrainId};
//!
//! let interlocking = MockInterlocking::new().with_aspect(SignalId(0), Aspect::Clear);
//! assert_eq!(interlocking.aspects.get(&SignalId(0)), Some(&Aspect::Clear));
//!
//! let mut motion = ScriptedMotion::new();
//! motion.push(TrainId(0), 10.0, 5.0);
//! assert_eq!(motion.pending(TrainId(0)), 1);
//! ```
//!
//! [`Interlocking`]: crate::traits::Interlocking
//! [`MotionModel`]: crate::traits::MotionModel

use std::collections::{BTreeMap, VecDeque};

use crate::ids::{SignalId, TrainId};
use crate::track::{Aspect, TrackGraph};
use crate::traits::{Interlocking, MotionModel, Movement};
use crate::train::Train;

use super::{clear_signal_route, enable_signal, grant_permission};

// ============================================================================
// Interlocking Mock
// ============================================================================

/// Interlocking with scripted per-signal aspects.
///
/// A signal scripted to a proceed aspect still needs its block to be
/// available; the block is reserved as the real interlocking would. Use
/// the public fields to inspect requests after a tick.
#[derive(Debug, Default)]
pub struct MockInterlocking {
    /// Aspect for signals without a script entry.
    pub default_aspect: Aspect,
    /// Per-signal aspects.
    pub aspects: BTreeMap<SignalId, Aspect>,
    /// Answer to permission requests.
    pub grant_permission: bool,
    /// Every clear request, in order.
    pub clear_requests: Vec<(SignalId, TrainId)>,
    /// Every permission request, in order.
    pub permission_requests: Vec<(SignalId, TrainId)>,
    /// Every reset, in order.
    pub resets: Vec<SignalId>,
}

impl MockInterlocking {
    /// Creates a mock that keeps every signal at stop.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `signal` to clear to `aspect`.
    pub fn with_aspect(mut self, signal: SignalId, aspect: Aspect) -> Self {
        self.aspects.insert(signal, aspect);
        self
    }

    /// Sets the aspect for unscripted signals.
    pub fn with_default(mut self, aspect: Aspect) -> Self {
        self.default_aspect = aspect;
        self
    }

    /// Sets the answer to permission requests.
    pub fn with_permission(mut self, grant: bool) -> Self {
        self.grant_permission = grant;
        self
    }

    /// Number of clear requests made for `signal`.
    pub fn clear_count(&self, signal: SignalId) -> usize {
        self.clear_requests.iter().filter(|(s, _)| *s == signal).count()
    }
}

impl Interlocking for MockInterlocking {
    fn request_clear(&mut self, graph: &mut TrackGraph, signal: SignalId, train: &Train) -> Aspect {
        let me = train.id();
        self.clear_requests.push((signal, me));

        let s = graph.signal(signal);
        if s.hold_for == Some(me) {
            return Aspect::Stop;
        }
        if s.is_enabled_for(me) {
            return s.aspect;
        }
        let scripted = self.aspects.get(&signal).copied().unwrap_or(self.default_aspect);
        if scripted.is_stop() || s.enabled_train.is_some() {
            return Aspect::Stop;
        }
        match clear_signal_route(graph, signal, train) {
            Some(next) => {
                enable_signal(graph, signal, train, scripted, next);
                scripted
            }
            None => Aspect::Stop,
        }
    }

    fn request_permission(
        &mut self,
        graph: &mut TrackGraph,
        signal: SignalId,
        train: &Train,
    ) -> bool {
        self.permission_requests.push((signal, train.id()));
        self.grant_permission && grant_permission(graph, signal, train)
    }

    fn reset_signal(&mut self, graph: &mut TrackGraph, signal: SignalId) {
        self.resets.push(signal);
        graph.reset_signal(signal);
    }
}

// ============================================================================
// Motion Mock
// ============================================================================

/// Motion source that replays queued moves.
///
/// Each tick pops one `(distance, speed)` pair for the train and moves
/// both ends along its route. A train with nothing queued stands still.
///
/// # Example
///
/// ```rust
/// use rs_authority::providers::ScriptedMotion;
/// use rs_authority::TrainId;
///
/// let mut motion = ScriptedMotion::new();
/// motion.push(TrainId(1), 25.0, 5.0).push(TrainId(1), -3.0, -1.0);
/// assert_eq!(motion.pending(TrainId(1)), 2);
/// assert_eq!(motion.pending(TrainId(2)), 0);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedMotion {
    /// Queued `(distance_m, speed_mps)` moves per train.
    pub steps: BTreeMap<TrainId, VecDeque<(f32, f32)>>,
}

impl ScriptedMotion {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a move of `distance_m` ending at `speed_mps` for `train`.
    pub fn push(&mut self, train: TrainId, distance_m: f32, speed_mps: f32) -> &mut Self {
        self.steps
            .entry(train)
            .or_default()
            .push_back((distance_m, speed_mps));
        self
    }

    /// Moves still queued for `train`.
    pub fn pending(&self, train: TrainId) -> usize {
        self.steps.get(&train).map_or(0, VecDeque::len)
    }
}

impl MotionModel for ScriptedMotion {
    fn step(&mut self, graph: &TrackGraph, train: &Train, _dt_s: f32) -> Movement {
        match self.steps.get_mut(&train.id()).and_then(VecDeque::pop_front) {
            Some((distance, speed)) => Movement::along_route(graph, train, distance, speed),
            None => Movement::none(train),
        }
    }
}
