//! Lookahead cache of upcoming signals and speed posts.
//!
//! The cache holds the control objects ahead of the train front, nearest
//! first, each with its distance and the speed it actually permits. It is
//! refreshed incrementally every tick:
//!
//! 1. distances shrink by the distance moved; the train pops passed entries
//! 2. after backward movement, objects the front has fallen behind again are
//!    re-inserted at the head
//! 3. an empty cache is seeded by one forward scan
//! 4. the cache is extended past its last entry until the lookahead
//!    threshold or a signal at stop
//! 5. permitted speeds are recomputed for every entry
//!
//! A signal not cleared for this train always reads as stop, so another
//! train's clearance is never taken for one's own.

use std::collections::{BTreeMap, VecDeque};

use crate::ids::{SignalId, TrainId};
use crate::position::TrackPosition;
use crate::route::SubpathRoute;
use crate::track::{Aspect, ObjectFilter, ObjectKind, TrackGraph};

/// One cached control object.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheEntry {
    /// The signal or speed post.
    pub object: SignalId,
    /// Its kind.
    pub kind: ObjectKind,
    /// Distance from the train front; negative once passed.
    pub distance_m: f32,
    /// Aspect as seen by this train (signals only).
    pub aspect: Aspect,
    /// Speed the object allows, before clamping.
    pub object_speed_mps: f32,
    /// Speed actually permitted from this object on.
    pub speed_mps: f32,
}

impl CacheEntry {
    /// True for signals.
    pub fn is_signal(&self) -> bool {
        self.kind == ObjectKind::Signal
    }

    /// True for a signal at stop.
    pub fn is_stop_signal(&self) -> bool {
        self.is_signal() && self.aspect.is_stop()
    }
}

/// Inputs for one cache refresh.
#[derive(Clone, Copy, Debug)]
pub struct LookaheadParams<'a> {
    /// Graph the objects live on.
    pub graph: &'a TrackGraph,
    /// Route followed ahead of the front.
    pub route: &'a SubpathRoute,
    /// Train front.
    pub front: &'a TrackPosition,
    /// Train looking ahead.
    pub train: TrainId,
    /// Freight trains read the freight speed fields.
    pub freight: bool,
    /// Stop extending beyond this distance.
    pub threshold_m: f32,
    /// Speed used for unrestricted objects.
    pub route_max_mps: f32,
    /// Speed-post limit in force at the front.
    pub speed_post_limit_mps: f32,
    /// Remembered speeds of passed signals.
    pub passed_speeds: &'a BTreeMap<SignalId, f32>,
    /// Backward movement beyond the hysteresis was detected this tick.
    pub backward: bool,
}

/// Ordered cache of upcoming control objects.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LookaheadCache {
    entries: VecDeque<CacheEntry>,
}

impl LookaheadCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries nearest first.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter()
    }

    /// Nearest entry.
    pub fn front(&self) -> Option<&CacheEntry> {
        self.entries.front()
    }

    /// True if `object` is cached.
    pub fn contains(&self, object: SignalId) -> bool {
        self.entries.iter().any(|e| e.object == object)
    }

    /// Cached entry for `object`.
    pub fn get(&self, object: SignalId) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.object == object)
    }

    /// Nearest signal.
    pub fn next_signal(&self) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.is_signal())
    }

    /// Nearest signal at stop.
    pub fn first_stop_signal(&self) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.is_stop_signal())
    }

    /// Shifts every distance by the distance the front moved.
    pub fn advance(&mut self, moved_m: f32) {
        for entry in &mut self.entries {
            entry.distance_m -= moved_m;
        }
    }

    /// Pops the head entry if the front has passed it.
    pub fn pop_passed(&mut self) -> Option<CacheEntry> {
        if self.entries.front().map_or(false, |e| e.distance_m < 0.0) {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Runs steps 2 to 5 of the refresh.
    pub fn refresh(&mut self, p: &LookaheadParams<'_>) {
        if p.backward {
            self.reinsert_behind(p);
        }

        for entry in &mut self.entries {
            if entry.is_signal() {
                entry.aspect = p.graph.signal(entry.object).aspect_for(p.train);
            }
        }

        if self.entries.is_empty() {
            if let Some(hit) =
                p.graph
                    .find_next_object(p.front, Some(p.route), p.threshold_m, ObjectFilter::Any)
            {
                self.entries.push_back(make_entry(p, hit.object, hit.distance_m));
            }
        }

        self.extend(p);
        self.recompute_speeds(p);
    }

    fn extend(&mut self, p: &LookaheadParams<'_>) {
        while let Some(last) = self.entries.back().copied() {
            if last.distance_m >= p.threshold_m || last.is_stop_signal() {
                break;
            }
            let from = object_position(p.graph, last.object);
            let Some(hit) = p.graph.find_next_object(
                &from,
                Some(p.route),
                p.threshold_m - last.distance_m,
                ObjectFilter::Any,
            ) else {
                break;
            };
            if self.contains(hit.object) {
                break;
            }
            self.entries
                .push_back(make_entry(p, hit.object, last.distance_m + hit.distance_m));
        }
    }

    /// Finds objects between the front and the current head that the front
    /// has fallen behind again, and puts them back at the head.
    fn reinsert_behind(&mut self, p: &LookaheadParams<'_>) {
        let limit = self.entries.front().map_or(p.threshold_m, |e| e.distance_m);
        let mut found = Vec::new();
        let mut from = *p.front;
        let mut base = 0.0;
        while let Some(hit) =
            p.graph
                .find_next_object(&from, Some(p.route), limit - base, ObjectFilter::Any)
        {
            let distance = base + hit.distance_m;
            if distance >= limit || self.contains(hit.object) {
                break;
            }
            found.push(make_entry(p, hit.object, distance));
            from = object_position(p.graph, hit.object);
            base = distance;
        }
        for entry in found.into_iter().rev() {
            log::debug!(
                "{} re-inserting {} at {:.1} m after backward movement",
                p.train,
                entry.object,
                entry.distance_m
            );
            self.entries.push_front(entry);
        }
    }

    fn recompute_speeds(&mut self, p: &LookaheadParams<'_>) {
        let mut post_limit = p.speed_post_limit_mps;
        for entry in &mut self.entries {
            match entry.kind {
                ObjectKind::SpeedPost => {
                    post_limit = entry.object_speed_mps;
                    entry.speed_mps = post_limit;
                }
                ObjectKind::Signal => {
                    entry.speed_mps = if entry.aspect.is_stop() {
                        0.0
                    } else {
                        entry.object_speed_mps.min(post_limit)
                    };
                }
            }
        }
    }
}

fn make_entry(p: &LookaheadParams<'_>, object: SignalId, distance_m: f32) -> CacheEntry {
    let o = p.graph.signal(object);
    let object_speed_mps = match o.kind {
        ObjectKind::Signal => p
            .passed_speeds
            .get(&object)
            .copied()
            .unwrap_or_else(|| o.speed.resolve(p.freight, p.route_max_mps)),
        ObjectKind::SpeedPost => o.speed.resolve(p.freight, p.route_max_mps),
    };
    CacheEntry {
        object,
        kind: o.kind,
        distance_m,
        aspect: if o.is_signal() {
            o.aspect_for(p.train)
        } else {
            Aspect::Clear
        },
        object_speed_mps,
        speed_mps: object_speed_mps,
    }
}

fn object_position(graph: &TrackGraph, object: SignalId) -> TrackPosition {
    let o = graph.signal(object);
    TrackPosition::new(o.section, o.direction, o.offset_m)
}
