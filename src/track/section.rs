//! Track sections and their per-section reservation state.
//!
//! A [`TrackSection`] carries fixed geometry (kind, length, pins, attached
//! objects) and the mutable bookkeeping the reservation protocol works on:
//! the [`CircuitState`] and the deadlock trap tables.

use std::collections::{BTreeMap, VecDeque};

use super::Direction;
use crate::ids::{RoutedTrain, SectionId, SignalId, TrainId};

/// Kind of track section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SectionKind {
    /// Plain track with one link at each end.
    #[default]
    Normal,
    /// Switch: two links at the facing end, one selected at a time.
    Junction,
    /// Crossing or double slip: two links at both ends, the path through
    /// depends on the entry link.
    Crossover,
    /// Buffer stop: no link beyond its far end.
    EndOfTrack,
}

impl SectionKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Normal => "normal",
            SectionKind::Junction => "junction",
            SectionKind::Crossover => "crossover",
            SectionKind::EndOfTrack => "end_of_track",
        }
    }
}

/// Link from one section end into a neighbouring section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pin {
    /// Section entered.
    pub section: SectionId,
    /// Direction of travel in the entered section.
    pub direction: Direction,
}

// ============================================================================
// Circuit State
// ============================================================================

/// Mutable reservation state of one track section.
///
/// At most one train holds `reserved_by` at any time. `occupied_by` may list
/// several trains (coupling, recovery), each through the route view that
/// occupied it.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CircuitState {
    /// Trains physically on the section.
    pub occupied_by: Vec<RoutedTrain>,
    /// Exclusive reservation holder.
    pub reserved_by: Option<RoutedTrain>,
    /// Signal holding the section for its cleared route.
    pub signal_reserved: Option<SignalId>,
    /// Trains queued to receive the reservation once the section clears.
    pub pre_reserved: VecDeque<RoutedTrain>,
    /// Soft holds; only the head of the queue may take the section.
    pub claimed: VecDeque<RoutedTrain>,
}

impl CircuitState {
    /// True if any train occupies the section.
    pub fn is_occupied(&self) -> bool {
        !self.occupied_by.is_empty()
    }

    /// True if `train` occupies the section through either route view.
    pub fn is_occupied_by(&self, train: TrainId) -> bool {
        self.occupied_by.iter().any(|r| r.train == train)
    }

    /// True if a train other than `train` occupies the section.
    pub fn is_occupied_by_other(&self, train: TrainId) -> bool {
        self.occupied_by.iter().any(|r| r.train != train)
    }

    /// True if `train` holds the exclusive reservation.
    pub fn is_reserved_by(&self, train: TrainId) -> bool {
        self.reserved_by.map_or(false, |r| r.train == train)
    }

    /// True if a train other than `train` holds the exclusive reservation.
    pub fn is_reserved_by_other(&self, train: TrainId) -> bool {
        self.reserved_by.map_or(false, |r| r.train != train)
    }

    /// Train at the head of the claim queue.
    pub fn claim_head(&self) -> Option<TrainId> {
        self.claimed.front().map(|r| r.train)
    }

    /// True if `train` has a claim queued on the section.
    pub fn is_claimed_by(&self, train: TrainId) -> bool {
        self.claimed.iter().any(|r| r.train == train)
    }

    /// True if the section is occupied by, reserved by, or claimed at the
    /// head for `train`.
    pub fn is_set_for(&self, train: TrainId) -> bool {
        self.is_occupied_by(train) || self.is_reserved_by(train) || self.claim_head() == Some(train)
    }

    /// True if nobody occupies or reserves the section.
    pub fn is_free(&self) -> bool {
        self.occupied_by.is_empty() && self.reserved_by.is_none() && self.signal_reserved.is_none()
    }

    /// Drops every trace of `train` from the state.
    pub fn remove_train(&mut self, train: TrainId) {
        self.occupied_by.retain(|r| r.train != train);
        if self.is_reserved_by(train) {
            self.reserved_by = None;
        }
        self.pre_reserved.retain(|r| r.train != train);
        self.claimed.retain(|r| r.train != train);
    }
}

// ============================================================================
// Track Section
// ============================================================================

/// One track circuit section.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackSection {
    /// Arena index.
    pub id: SectionId,
    /// Section kind.
    pub kind: SectionKind,
    /// Length in metres.
    pub length_m: f32,
    /// `pins[d][k]`: `k`-th link when leaving the section travelling `d`.
    pub pins: [[Option<Pin>; 2]; 2],
    /// Selected slot at the facing end of a junction.
    pub switch_position: usize,
    /// Signal at the far end when travelling in each direction.
    pub end_signals: [Option<SignalId>; 2],
    /// Signals and speed posts per direction, ordered by offset.
    pub objects: [Vec<SignalId>; 2],
    /// Clearing overlap overriding the configured junction overlap.
    pub overlap_m: Option<f32>,
    /// Reservation state.
    pub state: CircuitState,
    /// Trapped train -> trains that armed the trap.
    pub deadlock_traps: BTreeMap<TrainId, Vec<TrainId>>,
    /// Trains that armed at least one trap here.
    pub deadlock_actives: Vec<TrainId>,
    /// Trains refused entry by a trap and waiting for it to clear.
    pub deadlock_awaited: Vec<TrainId>,
}

impl TrackSection {
    /// Creates an unlinked section.
    pub fn new(id: SectionId, kind: SectionKind, length_m: f32) -> Self {
        Self {
            id,
            kind,
            length_m,
            pins: [[None; 2]; 2],
            switch_position: 0,
            end_signals: [None; 2],
            objects: [Vec::new(), Vec::new()],
            overlap_m: None,
            state: CircuitState::default(),
            deadlock_traps: BTreeMap::new(),
            deadlock_actives: Vec::new(),
            deadlock_awaited: Vec::new(),
        }
    }

    /// True for junctions and crossovers.
    pub fn is_switch(&self) -> bool {
        matches!(self.kind, SectionKind::Junction | SectionKind::Crossover)
    }

    /// Direction of travel in which a junction splits, if any.
    pub fn facing_direction(&self) -> Option<Direction> {
        if self.kind != SectionKind::Junction {
            return None;
        }
        [Direction::Forward, Direction::Reverse]
            .into_iter()
            .find(|d| self.pins[d.index()][1].is_some())
    }

    /// True if travelling `direction` meets the switch blades point first.
    pub fn is_facing_point(&self, direction: Direction) -> bool {
        self.kind == SectionKind::Crossover || self.facing_direction() == Some(direction)
    }

    /// Link taken when leaving the section travelling `direction`.
    ///
    /// Crossovers keep the slot of the entry link; junctions in the facing
    /// direction follow the switch position.
    pub fn exit_pin(&self, direction: Direction, entered_from: Option<SectionId>) -> Option<Pin> {
        let slots = &self.pins[direction.index()];
        match self.kind {
            SectionKind::Crossover => {
                let slot = entered_from
                    .and_then(|from| {
                        self.pins[direction.reverse().index()]
                            .iter()
                            .position(|p| p.map(|p| p.section) == Some(from))
                    })
                    .unwrap_or(0);
                slots[slot].or(slots[0])
            }
            SectionKind::Junction if self.facing_direction() == Some(direction) => {
                slots[self.switch_position.min(1)]
            }
            _ => slots[0],
        }
    }

    /// Slot index leading to `to` when leaving travelling `direction`.
    pub fn slot_towards(&self, direction: Direction, to: SectionId) -> Option<usize> {
        self.pins[direction.index()]
            .iter()
            .position(|p| p.map(|p| p.section) == Some(to))
    }

    /// False if entering trailing from `from` runs through a switch set
    /// against it.
    pub fn is_aligned_from(&self, direction: Direction, from: SectionId) -> bool {
        match self.facing_direction() {
            Some(facing) if facing == direction.reverse() => {
                self.pins[facing.index()][self.switch_position.min(1)].map(|p| p.section)
                    == Some(from)
            }
            _ => true,
        }
    }

    /// Sets a junction for a movement travelling `direction` from `from`
    /// to `to`. Returns true if the switch moved.
    pub fn align(
        &mut self,
        direction: Direction,
        from: Option<SectionId>,
        to: Option<SectionId>,
    ) -> bool {
        let Some(facing) = self.facing_direction() else {
            return false;
        };
        let target = if facing == direction { to } else { from };
        let Some(slot) = target.and_then(|t| self.slot_towards(facing, t)) else {
            return false;
        };
        let moved = slot != self.switch_position;
        self.switch_position = slot;
        moved
    }

    // === Deadlock traps ===

    /// Arms a trap: `trapped` may not take this section until `armed_by`
    /// clears it.
    pub fn set_deadlock_trap(&mut self, trapped: TrainId, armed_by: TrainId) {
        let list = self.deadlock_traps.entry(trapped).or_default();
        if !list.contains(&armed_by) {
            list.push(armed_by);
        }
        if !self.deadlock_actives.contains(&armed_by) {
            self.deadlock_actives.push(armed_by);
        }
    }

    /// Removes every trap armed by `train`, and `train` from the awaited list.
    pub fn clear_deadlock_trap(&mut self, train: TrainId) {
        if self.deadlock_actives.contains(&train) {
            for armers in self.deadlock_traps.values_mut() {
                armers.retain(|t| *t != train);
            }
            self.deadlock_traps.retain(|_, armers| !armers.is_empty());
            self.deadlock_actives.retain(|t| *t != train);
        }
        self.deadlock_awaited.retain(|t| *t != train);
    }

    /// True if a trap on this section holds `train` back.
    pub fn has_trap_for(&self, train: TrainId) -> bool {
        self.deadlock_traps.contains_key(&train)
    }

    /// Records `train` as waiting for a trap here to clear.
    pub fn mark_awaited(&mut self, train: TrainId) {
        if !self.deadlock_awaited.contains(&train) {
            self.deadlock_awaited.push(train);
        }
    }

    /// True if any train other than `train` waits on a trap here.
    pub fn check_deadlock_awaited(&self, train: TrainId) -> bool {
        self.deadlock_awaited.iter().any(|t| *t != train)
    }

    /// Forgets `train` in the trap tables, both as trapped and as armer.
    pub fn forget_deadlocks_of(&mut self, train: TrainId) {
        self.clear_deadlock_trap(train);
        self.deadlock_traps.remove(&train);
    }
}
