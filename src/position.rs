//! Positions of train ends on the track-circuit graph.

use crate::ids::SectionId;
use crate::track::{Direction, TrackGraph};

/// Location of one end of a train.
///
/// `offset_m` is measured from the section start in `direction`, so a front
/// end moving forwards always sees its offset grow. Rear ends are stored in
/// the train's direction of travel as well.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackPosition {
    /// Section holding the train end.
    pub section: SectionId,
    /// Direction of travel through the section.
    pub direction: Direction,
    /// Offset from the section start in `direction`.
    pub offset_m: f32,
    /// Index of `section` in the validated route, if it lies on it.
    pub route_index: Option<usize>,
}

impl TrackPosition {
    /// Position without a route index.
    pub const fn new(section: SectionId, direction: Direction, offset_m: f32) -> Self {
        Self {
            section,
            direction,
            offset_m,
            route_index: None,
        }
    }

    /// Same point seen travelling the other way.
    pub fn reversed(&self, graph: &TrackGraph) -> Self {
        let length = graph.section_length(self.section);
        Self {
            section: self.section,
            direction: self.direction.reverse(),
            offset_m: (length - self.offset_m).max(0.0),
            route_index: None,
        }
    }

    /// Distance left to the end of the section.
    pub fn distance_to_end(&self, graph: &TrackGraph) -> f32 {
        (graph.section_length(self.section) - self.offset_m).max(0.0)
    }

    /// Copy with the route index replaced.
    pub fn with_route_index(mut self, index: Option<usize>) -> Self {
        self.route_index = index;
        self
    }
}
