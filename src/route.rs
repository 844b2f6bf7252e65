//! Route representation: elements, subpaths and a train's full path.
//!
//! A [`TrainRoute`] is the path a train was given: one [`SubpathRoute`] per
//! non-reversing stretch, plus reversal and waiting points. The train keeps a
//! separate validated window per direction, also a [`SubpathRoute`], which is
//! what reservation and authority work on.

use std::collections::BTreeMap;

use crate::error::DispatchError;
use crate::ids::{SectionId, SignalId};
use crate::position::TrackPosition;
use crate::track::{Direction, TrackGraph};

/// Marker tying the two ends of an alternative (passing loop) path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlternativePath {
    /// Path number, shared by both markers.
    pub path_id: usize,
    /// Section at the other end of the alternative path.
    pub other_end: SectionId,
}

/// One section of a route and how it is traversed.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteElement {
    /// Section traversed.
    pub section: SectionId,
    /// Direction of travel through it.
    pub direction: Direction,
    /// Exit link slot taken at the far end.
    pub out_pin: usize,
    /// True if the element meets switch blades point first.
    pub facing_point: bool,
    /// Set where an alternative path leaves this route.
    pub alternative_start: Option<AlternativePath>,
    /// Set where an alternative path rejoins this route.
    pub alternative_end: Option<AlternativePath>,
}

impl RouteElement {
    /// Element with no markers, taking the first exit slot.
    pub const fn new(section: SectionId, direction: Direction) -> Self {
        Self {
            section,
            direction,
            out_pin: 0,
            facing_point: false,
            alternative_start: None,
            alternative_end: None,
        }
    }
}

// ============================================================================
// Subpath Route
// ============================================================================

/// Ordered, non-reversing sequence of route elements.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubpathRoute {
    elements: Vec<RouteElement>,
}

impl SubpathRoute {
    /// Empty route.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a route from `(section, direction)` pairs, checking that each
    /// element links to the next and recording the exit slot taken.
    pub fn from_sections(
        graph: &TrackGraph,
        path: &[(SectionId, Direction)],
    ) -> Result<Self, DispatchError> {
        if path.is_empty() {
            return Err(DispatchError::EmptyRoute);
        }
        let mut elements = Vec::with_capacity(path.len());
        for (i, &(section, direction)) in path.iter().enumerate() {
            let s = graph
                .get_section(section)
                .ok_or(DispatchError::UnknownSection(section))?;
            let mut element = RouteElement::new(section, direction);
            element.facing_point = s.is_facing_point(direction);
            if let Some(&(next, next_dir)) = path.get(i + 1) {
                element.out_pin = s.pins[direction.index()]
                    .iter()
                    .position(|p| {
                        p.map_or(false, |p| p.section == next && p.direction == next_dir)
                    })
                    .ok_or(DispatchError::Disconnected {
                        from: section,
                        to: next,
                    })?;
            }
            elements.push(element);
        }
        Ok(Self { elements })
    }

    /// Route over sections all traversed forwards.
    pub fn forward(graph: &TrackGraph, sections: &[SectionId]) -> Result<Self, DispatchError> {
        let path: Vec<_> = sections.iter().map(|s| (*s, Direction::Forward)).collect();
        Self::from_sections(graph, &path)
    }

    /// Route over sections all traversed in reverse.
    pub fn reverse(graph: &TrackGraph, sections: &[SectionId]) -> Result<Self, DispatchError> {
        let path: Vec<_> = sections.iter().map(|s| (*s, Direction::Reverse)).collect();
        Self::from_sections(graph, &path)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True if the route has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<&RouteElement> {
        self.elements.get(index)
    }

    /// Last element.
    pub fn last(&self) -> Option<&RouteElement> {
        self.elements.last()
    }

    /// All elements in order.
    pub fn elements(&self) -> &[RouteElement] {
        &self.elements
    }

    /// Iterator over the elements.
    pub fn iter(&self) -> impl Iterator<Item = &RouteElement> {
        self.elements.iter()
    }

    /// Index of the first element for `section` at or after `from`.
    pub fn index_of(&self, section: SectionId, from: usize) -> Option<usize> {
        self.elements
            .iter()
            .skip(from)
            .position(|e| e.section == section)
            .map(|i| i + from)
    }

    /// True if `section` appears anywhere on the route.
    pub fn contains(&self, section: SectionId) -> bool {
        self.index_of(section, 0).is_some()
    }

    /// Appends an element.
    pub fn push(&mut self, element: RouteElement) {
        self.elements.push(element);
    }

    /// Inserts an element at the start.
    pub fn prepend(&mut self, element: RouteElement) {
        self.elements.insert(0, element);
    }

    /// Drops the first `count` elements.
    pub fn drop_front(&mut self, count: usize) {
        let count = count.min(self.elements.len());
        self.elements.drain(..count);
    }

    /// Keeps the first `len` elements.
    pub fn truncate(&mut self, len: usize) {
        self.elements.truncate(len);
    }

    /// Copy of the elements from `index` on.
    pub fn tail_from(&self, index: usize) -> SubpathRoute {
        SubpathRoute {
            elements: self.elements.get(index..).map(<[_]>::to_vec).unwrap_or_default(),
        }
    }

    /// Section to `(direction, index)` lookup over the elements from `from` on.
    pub fn direction_map(&self, from: usize) -> BTreeMap<SectionId, (Direction, usize)> {
        let mut map = BTreeMap::new();
        for (i, e) in self.elements.iter().enumerate().skip(from) {
            map.entry(e.section).or_insert((e.direction, i));
        }
        map
    }

    /// Marks an alternative path leaving at `start_index` and rejoining at
    /// `end_index`.
    pub fn mark_alternative(&mut self, path_id: usize, start_index: usize, end_index: usize) {
        let (Some(start), Some(end)) = (
            self.elements.get(start_index).map(|e| e.section),
            self.elements.get(end_index).map(|e| e.section),
        ) else {
            return;
        };
        self.elements[start_index].alternative_start = Some(AlternativePath {
            path_id,
            other_end: end,
        });
        self.elements[end_index].alternative_end = Some(AlternativePath {
            path_id,
            other_end: start,
        });
    }

    /// Sum of section lengths over `range` of element indices.
    pub fn length_of(&self, graph: &TrackGraph, range: core::ops::Range<usize>) -> f32 {
        self.elements
            .get(range)
            .map_or(0.0, |es| es.iter().map(|e| graph.section_length(e.section)).sum())
    }
}

// ============================================================================
// Full Path
// ============================================================================

/// Point where a train reverses between two subpaths.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReversalPoint {
    /// Section where the two subpaths diverge.
    pub diverge_section: SectionId,
    /// Offset in that section where the train stops to reverse.
    pub offset_m: f32,
    /// Signal governing the start of the reversed movement.
    pub signal: Option<SignalId>,
}

/// Scheduled stop that holds a signal until the train has waited.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WaitingPoint {
    /// Subpath the waiting point belongs to.
    pub subpath: usize,
    /// Section where the train waits.
    pub section: SectionId,
    /// Wait duration in seconds.
    pub wait_s: f32,
    /// Signal held at stop until the wait is over.
    pub hold_signal: Option<SignalId>,
}

/// A train's full path, split at reversals.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainRoute {
    /// One route per non-reversing stretch.
    pub subpaths: Vec<SubpathRoute>,
    /// Reversal between subpath `i` and `i + 1`.
    pub reversals: Vec<ReversalPoint>,
    /// Waiting points along the path.
    pub waiting_points: Vec<WaitingPoint>,
    /// Subpath currently being run.
    pub active_subpath: usize,
}

impl TrainRoute {
    /// Path with a single subpath.
    pub fn single(subpath: SubpathRoute) -> Self {
        Self {
            subpaths: vec![subpath],
            ..Self::default()
        }
    }

    /// Appends a subpath, reversing at `reversal` before it.
    pub fn with_reversal(mut self, reversal: ReversalPoint, subpath: SubpathRoute) -> Self {
        self.reversals.push(reversal);
        self.subpaths.push(subpath);
        self
    }

    /// Adds a waiting point.
    pub fn with_waiting_point(mut self, point: WaitingPoint) -> Self {
        self.waiting_points.push(point);
        self
    }

    /// Subpath currently being run.
    pub fn active(&self) -> Option<&SubpathRoute> {
        self.subpaths.get(self.active_subpath)
    }

    /// True if another subpath follows the active one.
    pub fn has_next_subpath(&self) -> bool {
        self.active_subpath + 1 < self.subpaths.len()
    }

    /// Fails unless every subpath has elements and every section and
    /// signal the path names exists in `graph`.
    pub fn validate(&self, graph: &TrackGraph) -> Result<(), DispatchError> {
        if self.subpaths.is_empty() || self.subpaths.iter().any(SubpathRoute::is_empty) {
            return Err(DispatchError::EmptyRoute);
        }
        let known_section = |id: SectionId| {
            graph
                .get_section(id)
                .map(|_| ())
                .ok_or(DispatchError::UnknownSection(id))
        };
        let known_signal = |id: SignalId| {
            graph
                .get_signal(id)
                .map(|_| ())
                .ok_or(DispatchError::UnknownSignal(id))
        };

        for element in self.subpaths.iter().flat_map(SubpathRoute::iter) {
            known_section(element.section)?;
        }
        for reversal in &self.reversals {
            known_section(reversal.diverge_section)?;
            if let Some(signal) = reversal.signal {
                known_signal(signal)?;
            }
        }
        for point in &self.waiting_points {
            known_section(point.section)?;
            if let Some(signal) = point.hold_signal {
                known_signal(signal)?;
            }
        }
        Ok(())
    }
}

/// Builds a route from `start` along the active pins covering at least
/// `length_m`, used when a train body runs off its path.
pub fn build_temp_route(graph: &TrackGraph, start: &TrackPosition, length_m: f32) -> SubpathRoute {
    let mut route = SubpathRoute::new();
    for step in graph.walk(start, None) {
        if step.start_m >= length_m && !route.is_empty() {
            break;
        }
        route.push(RouteElement {
            facing_point: graph.section(step.section).is_facing_point(step.direction),
            ..RouteElement::new(step.section, step.direction)
        });
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::SectionKind;

    fn line(n: usize) -> (TrackGraph, Vec<SectionId>) {
        let mut g = TrackGraph::new();
        let ids: Vec<_> = (0..n).map(|_| g.add_section(SectionKind::Normal, 100.0)).collect();
        for pair in ids.windows(2) {
            g.link(pair[0], pair[1]).unwrap();
        }
        (g, ids)
    }

    #[test]
    fn from_sections_rejects_gaps() {
        let (g, ids) = line(3);
        let err = SubpathRoute::forward(&g, &[ids[0], ids[2]]).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Disconnected {
                from: ids[0],
                to: ids[2]
            }
        );
        assert_eq!(SubpathRoute::forward(&g, &[]), Err(DispatchError::EmptyRoute));
    }

    #[test]
    fn reverse_route_follows_back_links() {
        let (g, ids) = line(3);
        let route = SubpathRoute::reverse(&g, &[ids[2], ids[1], ids[0]]).unwrap();
        assert_eq!(route.len(), 3);
        assert_eq!(route.index_of(ids[0], 0), Some(2));
        let map = route.direction_map(0);
        assert_eq!(map.get(&ids[1]), Some(&(Direction::Reverse, 1)));
    }

    #[test]
    fn alternative_markers_point_at_each_other() {
        let (g, ids) = line(4);
        let mut route = SubpathRoute::forward(&g, &ids).unwrap();
        route.mark_alternative(7, 1, 3);
        assert_eq!(
            route.get(1).and_then(|e| e.alternative_start),
            Some(AlternativePath {
                path_id: 7,
                other_end: ids[3]
            })
        );
        assert_eq!(
            route.get(3).and_then(|e| e.alternative_end).map(|a| a.other_end),
            Some(ids[1])
        );
    }

    #[test]
    fn validate_rejects_unknown_ids() {
        let (g, ids) = line(3);
        let route = TrainRoute::single(SubpathRoute::forward(&g, &ids).unwrap());
        assert_eq!(route.validate(&g), Ok(()));

        let held = route.clone().with_waiting_point(WaitingPoint {
            subpath: 0,
            section: ids[1],
            wait_s: 30.0,
            hold_signal: Some(SignalId(99)),
        });
        assert_eq!(held.validate(&g), Err(DispatchError::UnknownSignal(SignalId(99))));

        let misplaced = route.clone().with_waiting_point(WaitingPoint {
            subpath: 0,
            section: SectionId(42),
            wait_s: 30.0,
            hold_signal: None,
        });
        assert_eq!(
            misplaced.validate(&g),
            Err(DispatchError::UnknownSection(SectionId(42)))
        );

        let reversal = ReversalPoint {
            diverge_section: SectionId(7),
            offset_m: 10.0,
            signal: None,
        };
        let reversing = route.with_reversal(reversal, SubpathRoute::reverse(&g, &[ids[2], ids[1]]).unwrap());
        assert_eq!(
            reversing.validate(&g),
            Err(DispatchError::UnknownSection(SectionId(7)))
        );
    }

    #[test]
    fn temp_route_covers_length() {
        let (g, ids) = line(5);
        let start = TrackPosition::new(ids[0], Direction::Forward, 50.0);
        let route = build_temp_route(&g, &start, 120.0);
        // 50 m left in the first section, the second reaches 150 m.
        assert_eq!(route.len(), 2);
        assert_eq!(route.tail_from(1).len(), 1);
    }
}
