//! Reservation protocol on individual track sections.
//!
//! Every operation here is idempotent for the calling train. The discipline
//! is "one exclusive holder, many testers": a train only reserves or clears
//! sections on its own validated route, and a reserve is always preceded by
//! an availability check in the same step. That check-then-act pattern is
//! sound only because trains are updated one at a time.
//!
//! # Availability order
//!
//! [`availability`] answers in this order, first match wins:
//!
//! 1. occupied by this train: available
//! 2. occupied by another train
//! 3. reserved by this train: available
//! 4. reserved by another train
//! 5. held by a signal against this train
//! 6. claimed: available only to the head of the claim queue
//! 7. deadlock trap set against this train
//! 8. start of an alternative path whose far end another train waits at
//!
//! # Occupation bookkeeping
//!
//! [`set_occupied`] and [`clear_occupied`] update the section state and the
//! train's own occupied list in the same call, so the two never disagree.

use crate::deadlock::DeadlockRecord;
use crate::ids::{RoutedTrain, SectionId, TrainId};
use crate::route::SubpathRoute;
use crate::track::{Direction, TrackGraph};
use crate::train::Fleet;

/// A train acting on sections through one of its route views.
#[derive(Clone, Copy, Debug)]
pub struct Claimant<'a> {
    /// Train and route view.
    pub routed: RoutedTrain,
    /// Validated route of that view.
    pub route: &'a SubpathRoute,
    /// The train's deadlock record.
    pub deadlocks: &'a DeadlockRecord,
    /// Route index of the train front.
    pub front_index: usize,
}

impl Claimant<'_> {
    /// The acting train.
    #[inline]
    pub fn train(&self) -> TrainId {
        self.routed.train
    }
}

/// Outcome of an availability check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Availability {
    /// The train may reserve the section.
    Available,
    /// Another train is on the section.
    OccupiedByOther,
    /// Another train holds the exclusive reservation.
    ReservedByOther,
    /// A signal holds the section against this train.
    SignalReserved,
    /// Another train heads the claim queue.
    Claimed,
    /// A deadlock trap holds this train back.
    DeadlockTrap,
    /// Another train waits at the far end of the alternative path starting
    /// here; the section stays open for it.
    AlternativePathAwaited,
}

impl Availability {
    /// True for [`Available`](Self::Available).
    #[inline]
    pub fn is_available(self) -> bool {
        self == Availability::Available
    }
}

/// Nearest other train found in a section.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainAhead {
    /// The train.
    pub train: TrainId,
    /// Distance from the probe offset to the nearest end of that train.
    pub distance_m: f32,
}

// ============================================================================
// Checks
// ============================================================================

/// Availability of `section` for `claimant`, without side effects.
pub fn availability(graph: &TrackGraph, section: SectionId, claimant: &Claimant<'_>) -> Availability {
    let me = claimant.train();
    let s = graph.section(section);
    let st = &s.state;

    if st.is_occupied_by(me) {
        return Availability::Available;
    }
    if st.is_occupied_by_other(me) {
        return Availability::OccupiedByOther;
    }
    if st.is_reserved_by(me) {
        return Availability::Available;
    }
    if st.is_reserved_by_other(me) {
        return Availability::ReservedByOther;
    }

    let element = claimant
        .route
        .index_of(section, 0)
        .and_then(|i| claimant.route.get(i));

    if let Some(signal) = st.signal_reserved {
        let held_by = graph.signal(signal);
        let along = element.map_or(false, |e| e.direction == held_by.direction);
        if !along || !held_by.is_enabled_for(me) {
            return Availability::SignalReserved;
        }
    }

    if let Some(head) = st.claim_head() {
        return if head == me {
            Availability::Available
        } else {
            Availability::Claimed
        };
    }

    if s.has_trap_for(me) {
        return Availability::DeadlockTrap;
    }

    if let Some(alt) = element.and_then(|e| e.alternative_start) {
        if graph.section(alt.other_end).check_deadlock_awaited(me) {
            return Availability::AlternativePathAwaited;
        }
    }

    Availability::Available
}

/// Availability check that also records the train as awaiting a deadlock
/// trap it was refused by.
pub fn check_available(
    graph: &mut TrackGraph,
    section: SectionId,
    claimant: &Claimant<'_>,
) -> Availability {
    let result = availability(graph, section, claimant);
    if result == Availability::DeadlockTrap {
        graph.section_mut(section).mark_awaited(claimant.train());
        log::debug!(
            "{} refused {} by deadlock trap, awaiting",
            claimant.train(),
            section
        );
    }
    result
}

/// Nearest train other than `me` in `section`, seen from `offset_m` when
/// travelling `direction`.
pub fn test_train_ahead(
    graph: &TrackGraph,
    fleet: &Fleet,
    section: SectionId,
    me: TrainId,
    offset_m: f32,
    direction: Direction,
) -> Option<TrainAhead> {
    let s = graph.section(section);
    let mut nearest: Option<TrainAhead> = None;
    for routed in &s.state.occupied_by {
        if routed.train == me {
            continue;
        }
        let Some(other) = fleet.get(routed.train) else {
            continue;
        };
        let Some((lo, hi)) = other.extent_in(graph, section, direction) else {
            continue;
        };
        if hi < offset_m {
            continue;
        }
        let distance_m = (lo - offset_m).max(0.0);
        if nearest.map_or(true, |n| distance_m < n.distance_m) {
            nearest = Some(TrainAhead {
                train: routed.train,
                distance_m,
            });
        }
    }
    nearest
}

// ============================================================================
// Mutations
// ============================================================================

/// Queues `routed` to receive the section when it clears.
pub fn pre_reserve(graph: &mut TrackGraph, section: SectionId, routed: RoutedTrain) {
    let st = &mut graph.section_mut(section).state;
    if !st.pre_reserved.iter().any(|r| r.train == routed.train) {
        st.pre_reserved.push_back(routed);
        log::debug!("{} pre-reserved {}", routed.train, section);
    }
}

/// Places a soft hold on the section for `routed`.
pub fn claim(graph: &mut TrackGraph, section: SectionId, routed: RoutedTrain) {
    let st = &mut graph.section_mut(section).state;
    if !st.is_claimed_by(routed.train) {
        st.claimed.push_back(routed);
        log::debug!("{} claimed {}", routed.train, section);
    }
}

/// Withdraws a claim.
pub fn unclaim(graph: &mut TrackGraph, section: SectionId, train: TrainId) {
    graph
        .section_mut(section)
        .state
        .claimed
        .retain(|r| r.train != train);
}

/// Grants the exclusive reservation to `claimant`.
///
/// Drops the train's claim, sets junctions along the claimant's route and
/// arms deadlock traps for region entries. Returns false, changing nothing,
/// if another train already holds the reservation.
pub fn reserve(graph: &mut TrackGraph, section: SectionId, claimant: &Claimant<'_>) -> bool {
    let me = claimant.train();
    {
        let st = &mut graph.section_mut(section).state;
        if st.is_reserved_by_other(me) {
            log::warn!("{} cannot reserve {}: held by another train", me, section);
            return false;
        }
        st.reserved_by = Some(claimant.routed);
        st.claimed.retain(|r| r.train != me);
    }

    if let Some(i) = claimant.route.index_of(section, 0) {
        let direction = claimant.route.get(i).map(|e| e.direction);
        let from = i
            .checked_sub(1)
            .and_then(|j| claimant.route.get(j))
            .map(|e| e.section);
        let to = claimant.route.get(i + 1).map(|e| e.section);
        if let Some(direction) = direction {
            if graph.section_mut(section).align(direction, from, to) {
                log::debug!("{} set {} for its route", me, section);
            }
        }
    }

    arm_deadlock_traps(graph, section, claimant);
    true
}

/// Drops the reservation if `train` holds it.
pub fn unreserve(graph: &mut TrackGraph, section: SectionId, train: TrainId) {
    let st = &mut graph.section_mut(section).state;
    if st.is_reserved_by(train) && !st.is_occupied_by(train) {
        st.reserved_by = None;
    }
}

/// Marks the section occupied by `claimant` and adds it to `occupied`.
///
/// The train keeps (or takes) the reservation while on the section; claims
/// and pre-reservations of the train and any signal hold are dropped.
pub fn set_occupied(
    graph: &mut TrackGraph,
    section: SectionId,
    claimant: &Claimant<'_>,
    occupied: &mut Vec<SectionId>,
) {
    let me = claimant.train();
    {
        let st = &mut graph.section_mut(section).state;
        if !st.occupied_by.contains(&claimant.routed) {
            st.occupied_by.push(claimant.routed);
        }
        if st.reserved_by.is_none() {
            st.reserved_by = Some(claimant.routed);
        }
        st.signal_reserved = None;
        st.claimed.retain(|r| r.train != me);
        st.pre_reserved.retain(|r| r.train != me);
    }
    if !occupied.contains(&section) {
        occupied.push(section);
    }
    log::debug!("{} occupies {}", me, section);
    arm_deadlock_traps(graph, section, claimant);
}

/// Releases a section the train has left.
///
/// Removes the train from the section state and from `occupied`, lifts the
/// deadlock traps it armed here and hands the section to the first
/// pre-reserving train whose route still runs through it. Returns the train
/// promoted, if any.
pub fn clear_occupied(
    graph: &mut TrackGraph,
    section: SectionId,
    train: TrainId,
    occupied: &mut Vec<SectionId>,
    fleet: &Fleet,
) -> Option<TrainId> {
    {
        let s = graph.section_mut(section);
        s.state.occupied_by.retain(|r| r.train != train);
        if s.state.is_reserved_by(train) {
            s.state.reserved_by = None;
        }
        s.state.claimed.retain(|r| r.train != train);
        s.state.pre_reserved.retain(|r| r.train != train);
        s.clear_deadlock_trap(train);
    }
    occupied.retain(|s| *s != section);
    log::debug!("{} cleared {}", train, section);

    if !graph.section(section).state.is_free() {
        return None;
    }
    while let Some(next) = graph.section_mut(section).state.pre_reserved.pop_front() {
        let Some(other) = fleet.get(next.train) else {
            continue;
        };
        let claimant = other.claimant(next.direction_index);
        if claimant.route.contains(section) && reserve(graph, section, &claimant) {
            log::debug!("{} promoted to reserve {}", next.train, section);
            return Some(next.train);
        }
    }
    None
}

/// Removes every trace of `train` from the section: occupation,
/// reservation, claims, pre-reservations and deadlock traps.
pub fn remove_train(graph: &mut TrackGraph, section: SectionId, train: TrainId) {
    let s = graph.section_mut(section);
    s.state.remove_train(train);
    s.forget_deadlocks_of(train);
}

/// Arms traps when the claimant takes the entry of a recorded deadlock
/// region: the other train may not enter the region's far end until this
/// train has cleared it.
fn arm_deadlock_traps(graph: &mut TrackGraph, section: SectionId, claimant: &Claimant<'_>) {
    let me = claimant.train();
    let entries = claimant.deadlocks.get(section).to_vec();
    for entry in entries {
        if claimant
            .route
            .index_of(entry.exit, claimant.front_index)
            .is_none()
        {
            continue;
        }
        if graph.section(entry.exit).state.is_set_for(entry.other) {
            continue;
        }
        let held_back = graph
            .section(section)
            .deadlock_traps
            .get(&me)
            .map_or(false, |armers| armers.contains(&entry.other));
        if held_back {
            continue;
        }
        graph.section_mut(entry.exit).set_deadlock_trap(entry.other, me);
        log::debug!(
            "{} armed deadlock trap on {} against {}",
            me,
            entry.exit,
            entry.other
        );
    }
}
