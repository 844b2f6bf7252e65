//! The [`TrackGraph`] arena: building, lookups, traversal and object scans.
//!
//! # Example
//!
//! ```rust
//! use rs_authority::track::{Direction, SectionKind, SpeedLimit, TrackGraph};
//! use rs_authority::TrackPosition;
//!
//! let mut graph = TrackGraph::new();
//! let a = graph.add_section(SectionKind::Normal, 500.0);
//! let b = graph.add_section(SectionKind::Normal, 300.0);
//! graph.link(a, b).unwrap();
//! let signal = graph.add_signal(b, Direction::Forward, SpeedLimit::unrestricted()).unwrap();
//!
//! let front = TrackPosition::new(a, Direction::Forward, 100.0);
//! let hit = graph.find_next_object(&front, None, 2000.0, Default::default()).unwrap();
//! assert_eq!(hit.object, signal);
//! assert!((hit.distance_m - 700.0).abs() < 1e-3);
//! ```

use super::{
    Aspect, Direction, ObjectKind, Pin, SectionKind, SignalObject, SpeedLimit, TrackSection,
};
use crate::error::DispatchError;
use crate::ids::{SectionId, SignalId};
use crate::position::TrackPosition;
use crate::route::SubpathRoute;

/// Which objects a scan stops at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ObjectFilter {
    /// Signals and speed posts.
    #[default]
    Any,
    /// Signals only.
    Signals,
    /// Speed posts only.
    SpeedPosts,
}

impl ObjectFilter {
    fn accepts(self, kind: ObjectKind) -> bool {
        match self {
            ObjectFilter::Any => true,
            ObjectFilter::Signals => kind == ObjectKind::Signal,
            ObjectFilter::SpeedPosts => kind == ObjectKind::SpeedPost,
        }
    }
}

/// Result of an object scan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectHit {
    /// Object found.
    pub object: SignalId,
    /// Distance from the scan origin.
    pub distance_m: f32,
}

/// One section visited by a [`Walk`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectionStep {
    /// Section visited.
    pub section: SectionId,
    /// Direction of travel through it.
    pub direction: Direction,
    /// Distance from the walk origin to the section start; negative for the
    /// section holding the origin.
    pub start_m: f32,
    /// Index in the route followed, while still on it.
    pub route_index: Option<usize>,
}

/// Track-circuit graph: dense arenas of sections and control objects.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackGraph {
    sections: Vec<TrackSection>,
    signals: Vec<SignalObject>,
}

// ============================================================================
// Building
// ============================================================================

impl TrackGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unlinked section and returns its id.
    pub fn add_section(&mut self, kind: SectionKind, length_m: f32) -> SectionId {
        let id = SectionId(self.sections.len());
        self.sections.push(TrackSection::new(id, kind, length_m));
        id
    }

    /// Links two sections: leaving `from` travelling `from_dir` enters `to`
    /// travelling `to_dir`. The opposite link is added as well.
    pub fn connect(
        &mut self,
        from: SectionId,
        from_dir: Direction,
        to: SectionId,
        to_dir: Direction,
    ) -> Result<(), DispatchError> {
        self.check_section(from)?;
        self.check_section(to)?;
        self.push_pin(
            from,
            from_dir,
            Pin {
                section: to,
                direction: to_dir,
            },
        )?;
        self.push_pin(
            to,
            to_dir.reverse(),
            Pin {
                section: from,
                direction: from_dir.reverse(),
            },
        )
    }

    /// Links `a` to `b` with both sections oriented the same way.
    pub fn link(&mut self, a: SectionId, b: SectionId) -> Result<(), DispatchError> {
        self.connect(a, Direction::Forward, b, Direction::Forward)
    }

    fn push_pin(
        &mut self,
        section: SectionId,
        direction: Direction,
        pin: Pin,
    ) -> Result<(), DispatchError> {
        let s = &mut self.sections[section.index()];
        let max_slots = if s.is_switch() { 2 } else { 1 };
        let slots = &mut s.pins[direction.index()];
        if slots.contains(&Some(pin)) {
            return Ok(());
        }
        match slots.iter().take(max_slots).position(Option::is_none) {
            Some(slot) => {
                slots[slot] = Some(pin);
                Ok(())
            }
            None => Err(DispatchError::PinsExhausted(section)),
        }
    }

    /// Adds a signal at the far end of `section` for travel in `direction`.
    ///
    /// `speed` is the speed the signal permits when cleared.
    pub fn add_signal(
        &mut self,
        section: SectionId,
        direction: Direction,
        speed: SpeedLimit,
    ) -> Result<SignalId, DispatchError> {
        let length = self.check_section(section)?.length_m;
        let id = self.push_object(ObjectKind::Signal, section, direction, length, speed);
        self.sections[section.index()].end_signals[direction.index()] = Some(id);
        Ok(id)
    }

    /// Adds a speed post `offset_m` into `section` for travel in `direction`.
    pub fn add_speed_post(
        &mut self,
        section: SectionId,
        direction: Direction,
        offset_m: f32,
        limit: SpeedLimit,
    ) -> Result<SignalId, DispatchError> {
        let length = self.check_section(section)?.length_m;
        if !(0.0..=length).contains(&offset_m) {
            return Err(DispatchError::OffsetOutOfRange { section, offset_m });
        }
        Ok(self.push_object(ObjectKind::SpeedPost, section, direction, offset_m, limit))
    }

    fn push_object(
        &mut self,
        kind: ObjectKind,
        section: SectionId,
        direction: Direction,
        offset_m: f32,
        speed: SpeedLimit,
    ) -> SignalId {
        let id = SignalId(self.signals.len());
        self.signals.push(SignalObject {
            id,
            kind,
            section,
            direction,
            offset_m,
            speed,
            aspect: Aspect::Stop,
            enabled_train: None,
            next_signal: None,
            hold_for: None,
        });
        let signals = &self.signals;
        let list = &mut self.sections[section.index()].objects[direction.index()];
        let at = list
            .iter()
            .position(|o| signals[o.index()].offset_m > offset_m)
            .unwrap_or(list.len());
        list.insert(at, id);
        id
    }

    /// Overrides the clearing overlap of a section.
    pub fn set_overlap(&mut self, section: SectionId, overlap_m: f32) -> Result<(), DispatchError> {
        self.check_section(section)?;
        self.sections[section.index()].overlap_m = Some(overlap_m);
        Ok(())
    }

    /// Throws a junction to the given slot at its facing end.
    pub fn set_switch(&mut self, section: SectionId, slot: usize) -> Result<(), DispatchError> {
        let s = self.check_section(section)?;
        if s.kind != SectionKind::Junction || slot > 1 {
            return Err(DispatchError::NotAJunction(section));
        }
        self.sections[section.index()].switch_position = slot;
        Ok(())
    }

    fn check_section(&self, id: SectionId) -> Result<&TrackSection, DispatchError> {
        self.sections
            .get(id.index())
            .ok_or(DispatchError::UnknownSection(id))
    }
}

// ============================================================================
// Lookups
// ============================================================================

impl TrackGraph {
    /// Section by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn section(&self, id: SectionId) -> &TrackSection {
        &self.sections[id.index()]
    }

    /// Mutable section by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn section_mut(&mut self, id: SectionId) -> &mut TrackSection {
        &mut self.sections[id.index()]
    }

    /// Section by id, if it exists.
    pub fn get_section(&self, id: SectionId) -> Option<&TrackSection> {
        self.sections.get(id.index())
    }

    /// Signal or speed post by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn signal(&self, id: SignalId) -> &SignalObject {
        &self.signals[id.index()]
    }

    /// Mutable signal or speed post by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn signal_mut(&mut self, id: SignalId) -> &mut SignalObject {
        &mut self.signals[id.index()]
    }

    /// Signal or speed post by id, if it exists.
    pub fn get_signal(&self, id: SignalId) -> Option<&SignalObject> {
        self.signals.get(id.index())
    }

    /// All sections.
    pub fn sections(&self) -> &[TrackSection] {
        &self.sections
    }

    /// All sections, mutably.
    pub fn sections_mut(&mut self) -> &mut [TrackSection] {
        &mut self.sections
    }

    /// All control objects.
    pub fn signals(&self) -> &[SignalObject] {
        &self.signals
    }

    /// All control objects, mutably.
    pub fn signals_mut(&mut self) -> &mut [SignalObject] {
        &mut self.signals
    }

    /// Length of a section, 0 for unknown ids.
    pub fn section_length(&self, id: SectionId) -> f32 {
        self.sections.get(id.index()).map_or(0.0, |s| s.length_m)
    }

    /// Returns a signal to stop and drops any section holds it placed.
    pub fn reset_signal(&mut self, id: SignalId) {
        if let Some(signal) = self.signals.get_mut(id.index()) {
            signal.reset();
        }
        for section in &mut self.sections {
            if section.state.signal_reserved == Some(id) {
                section.state.signal_reserved = None;
            }
        }
    }
}

// ============================================================================
// Traversal
// ============================================================================

/// Iterator over the sections ahead of a position.
///
/// Follows the given route while the walk is on it, then the active pins.
pub struct Walk<'a> {
    graph: &'a TrackGraph,
    route: Option<&'a SubpathRoute>,
    next: Option<SectionStep>,
    prev: Option<SectionId>,
    remaining: usize,
}

impl Iterator for Walk<'_> {
    type Item = SectionStep;

    fn next(&mut self) -> Option<SectionStep> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next.take()?;
        let section = self.graph.get_section(current.section)?;
        let end_m = current.start_m + section.length_m;

        let on_route = self
            .route
            .zip(current.route_index)
            .and_then(|(route, i)| route.get(i + 1).map(|e| (e, i + 1)));
        self.next = match on_route {
            Some((element, index)) => Some(SectionStep {
                section: element.section,
                direction: element.direction,
                start_m: end_m,
                route_index: Some(index),
            }),
            None => section
                .exit_pin(current.direction, self.prev)
                .map(|pin| SectionStep {
                    section: pin.section,
                    direction: pin.direction,
                    start_m: end_m,
                    route_index: None,
                }),
        };
        self.prev = Some(current.section);
        Some(current)
    }
}

impl TrackGraph {
    /// Walks the sections from `start` onwards.
    ///
    /// The walk ends at a buffer stop or after every section was visited
    /// twice, whichever comes first.
    pub fn walk<'a>(&'a self, start: &TrackPosition, route: Option<&'a SubpathRoute>) -> Walk<'a> {
        let route_index = start.route_index.or_else(|| {
            route.and_then(|r| r.index_of(start.section, 0))
        });
        Walk {
            graph: self,
            route,
            next: Some(SectionStep {
                section: start.section,
                direction: start.direction,
                start_m: -start.offset_m,
                route_index,
            }),
            prev: None,
            remaining: self.sections.len() * 2 + 2,
        }
    }

    /// Nearest object of the filtered kind strictly ahead of `start`,
    /// facing the direction of travel, within `max_distance_m`.
    pub fn find_next_object(
        &self,
        start: &TrackPosition,
        route: Option<&SubpathRoute>,
        max_distance_m: f32,
        filter: ObjectFilter,
    ) -> Option<ObjectHit> {
        for step in self.walk(start, route) {
            if step.start_m > max_distance_m {
                break;
            }
            let section = self.section(step.section);
            for &id in &section.objects[step.direction.index()] {
                let object = self.signal(id);
                let distance_m = step.start_m + object.offset_m;
                if distance_m <= 0.0 || !filter.accepts(object.kind) {
                    continue;
                }
                if distance_m > max_distance_m {
                    return None;
                }
                return Some(ObjectHit {
                    object: id,
                    distance_m,
                });
            }
        }
        None
    }

    /// Signed distance from `from` to a point in `to_section`, if the walk
    /// reaches that section within `max_distance_m`.
    pub fn distance_to(
        &self,
        from: &TrackPosition,
        to_section: SectionId,
        to_offset_m: f32,
        route: Option<&SubpathRoute>,
        max_distance_m: f32,
    ) -> Option<f32> {
        self.walk(from, route)
            .take_while(|step| step.start_m <= max_distance_m)
            .find(|step| step.section == to_section)
            .map(|step| step.start_m + to_offset_m)
    }

    /// Moves a position by `distance_m` (negative moves backwards).
    ///
    /// Follows `route` where it can and the active pins elsewhere. The
    /// position stops at a buffer stop instead of leaving the graph.
    pub fn advance(
        &self,
        position: &TrackPosition,
        distance_m: f32,
        route: Option<&SubpathRoute>,
    ) -> TrackPosition {
        let mut section = position.section;
        let mut direction = position.direction;
        let mut offset = position.offset_m + distance_m;
        let mut index = position
            .route_index
            .or_else(|| route.and_then(|r| r.index_of(section, 0)));
        let mut prev: Option<SectionId> = None;

        for _ in 0..self.sections.len() * 2 + 2 {
            let length = self.section_length(section);
            if offset > length {
                let ahead = route
                    .zip(index)
                    .and_then(|(r, i)| r.get(i + 1).map(|e| (e.section, e.direction, Some(i + 1))))
                    .or_else(|| {
                        self.section(section)
                            .exit_pin(direction, prev)
                            .map(|p| (p.section, p.direction, None))
                    });
                let Some((next, next_dir, next_index)) = ahead else {
                    offset = length;
                    break;
                };
                offset -= length;
                prev = Some(section);
                section = next;
                direction = next_dir;
                index = next_index;
            } else if offset < 0.0 {
                let behind = route
                    .zip(index)
                    .and_then(|(r, i)| {
                        i.checked_sub(1)
                            .and_then(|j| r.get(j).map(|e| (e.section, e.direction, Some(j))))
                    })
                    .or_else(|| {
                        self.section(section)
                            .exit_pin(direction.reverse(), None)
                            .map(|p| (p.section, p.direction.reverse(), None))
                    });
                let Some((back, back_dir, back_index)) = behind else {
                    offset = 0.0;
                    break;
                };
                prev = None;
                section = back;
                direction = back_dir;
                index = back_index;
                offset += self.section_length(back);
            } else {
                break;
            }
        }

        TrackPosition {
            section,
            direction,
            offset_m: offset,
            route_index: index,
        }
    }
}
