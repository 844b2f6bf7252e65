//! Pairwise deadlock detection on opposing routes.
//!
//! Two trains deadlock when their routes share a stretch of single track in
//! opposite directions and both enter it. [`check_deadlock`] finds every such
//! region between one train and the rest of the fleet and records it on both
//! trains:
//!
//! ```text
//!   A ->   [entry A]==========shared==========[exit A]
//!          [exit B ]==========shared==========[entry B]   <- B
//! ```
//!
//! Each side keys the record by its own entry section and stores the other
//! train and its own exit, extended along its route to the next junction
//! (the only place where one train can pass the other). When one train
//! already holds its entry, the other is trapped at the far end with a
//! deadlock trap on the section.
//!
//! Trains are scanned in ascending id order so outcomes are reproducible.

use std::collections::BTreeMap;

use crate::ids::{SectionId, TrainId, FORWARD};
use crate::route::SubpathRoute;
use crate::track::{SectionKind, TrackGraph};
use crate::train::{Fleet, Train};

/// One recorded conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeadlockEntry {
    /// Train running the other way through the region.
    pub other: TrainId,
    /// Last section of the region on this train's route.
    pub exit: SectionId,
}

/// Deadlock regions of one train, keyed by entry section.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeadlockRecord {
    entries: BTreeMap<SectionId, Vec<DeadlockEntry>>,
}

impl DeadlockRecord {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a region. Duplicates are ignored.
    pub fn insert(&mut self, entry: SectionId, other: TrainId, exit: SectionId) {
        let list = self.entries.entry(entry).or_default();
        let item = DeadlockEntry { other, exit };
        if !list.contains(&item) {
            list.push(item);
        }
    }

    /// Regions entered at `section`.
    pub fn get(&self, section: SectionId) -> &[DeadlockEntry] {
        self.entries.get(&section).map_or(&[], Vec::as_slice)
    }

    /// True if a region is entered at `section`.
    pub fn contains_key(&self, section: SectionId) -> bool {
        self.entries.contains_key(&section)
    }

    /// True if any region involves `other`.
    pub fn involves(&self, other: TrainId) -> bool {
        self.entries
            .values()
            .any(|list| list.iter().any(|e| e.other == other))
    }

    /// Drops every region shared with `other`.
    pub fn remove_train(&mut self, other: TrainId) {
        for list in self.entries.values_mut() {
            list.retain(|e| e.other != other);
        }
        self.entries.retain(|_, list| !list.is_empty());
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// True if no region is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entry sections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry sections and their regions.
    pub fn iter(&self) -> impl Iterator<Item = (SectionId, &[DeadlockEntry])> {
        self.entries.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

/// A shared opposing region seen from both sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Region {
    my_entry: SectionId,
    my_exit: SectionId,
    other_entry: SectionId,
    other_exit: SectionId,
}

/// Rebuilds the deadlock records between `train` and every other train.
///
/// Called whenever `train` commits a new route. Old records involving
/// `train` are dropped on both sides first.
pub fn check_deadlock(train: &mut Train, graph: &mut TrackGraph, fleet: &mut Fleet) {
    let me = train.id;
    train.deadlocks.clear();
    for other in fleet.iter_mut() {
        other.deadlocks.remove_train(me);
    }
    if train.config.is_static || train.valid_route[FORWARD].is_empty() {
        return;
    }

    let my_start = train.front.route_index.unwrap_or(0);
    for other_id in fleet.ids() {
        if other_id == me {
            continue;
        }
        let regions = {
            let Some(other) = fleet.get(other_id) else {
                continue;
            };
            let other_route = &other.valid_route[FORWARD];
            if other.config.is_static || other_route.is_empty() {
                continue;
            }
            let other_start = other.front.route_index.unwrap_or(0);
            find_regions(
                graph,
                &train.valid_route[FORWARD],
                my_start,
                other_route,
                other_start,
            )
        };

        for region in regions {
            train
                .deadlocks
                .insert(region.my_entry, other_id, region.my_exit);
            if let Some(other) = fleet.get_mut(other_id) {
                other
                    .deadlocks
                    .insert(region.other_entry, me, region.other_exit);
            }
            log::debug!(
                "{} deadlock region {} -> {} against {}",
                me,
                region.my_entry,
                region.my_exit,
                other_id
            );

            if graph.section(region.other_entry).state.is_set_for(other_id) {
                graph
                    .section_mut(region.other_exit)
                    .set_deadlock_trap(me, other_id);
                log::debug!("{} trapped at {} by {}", me, region.other_exit, other_id);
            } else if graph.section(region.my_entry).state.is_set_for(me) {
                graph
                    .section_mut(region.my_exit)
                    .set_deadlock_trap(other_id, me);
                log::debug!("{} trapped at {} by {}", other_id, region.my_exit, me);
            }
        }
    }
}

fn find_regions(
    graph: &TrackGraph,
    mine: &SubpathRoute,
    my_start: usize,
    theirs: &SubpathRoute,
    their_start: usize,
) -> Vec<Region> {
    let their_map = theirs.direction_map(their_start);
    let mut regions = Vec::new();
    let mut i = my_start;

    while let Some(element) = mine.get(i) {
        if graph.section(element.section).kind == SectionKind::Crossover {
            i += 1;
            continue;
        }
        let Some(&(their_dir, k)) = their_map.get(&element.section) else {
            i += 1;
            continue;
        };
        if their_dir == element.direction {
            i += 1;
            continue;
        }

        // Grow the region while my next section is their previous one,
        // still run the opposite way.
        let mut j = i;
        let mut kk = k;
        while kk > their_start {
            let (Some(my_next), Some(their_prev)) = (mine.get(j + 1), theirs.get(kk - 1)) else {
                break;
            };
            if my_next.section != their_prev.section || my_next.direction == their_prev.direction {
                break;
            }
            j += 1;
            kk -= 1;
        }

        let my_exit = extend_to_junction(graph, mine, j);
        let their_exit = extend_to_junction(graph, theirs, k);
        regions.push(Region {
            my_entry: element.section,
            my_exit,
            other_entry: mine.get(j).map_or(element.section, |e| e.section),
            other_exit: their_exit,
        });
        i = j + 1;
    }
    regions
}

/// Section at or after `index` where the route reaches a junction, or the
/// last section of the route.
fn extend_to_junction(graph: &TrackGraph, route: &SubpathRoute, index: usize) -> SectionId {
    let mut i = index;
    while let Some(element) = route.get(i) {
        if graph.section(element.section).is_switch() || i + 1 >= route.len() {
            return element.section;
        }
        i += 1;
    }
    route.last().map_or(SectionId(0), |e| e.section)
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Record Tests ===

    #[test]
    fn record_ignores_duplicates() {
        let mut r = DeadlockRecord::new();
        r.insert(SectionId(5), TrainId(1), SectionId(7));
        r.insert(SectionId(5), TrainId(1), SectionId(7));
        r.insert(SectionId(5), TrainId(2), SectionId(9));
        assert_eq!(r.get(SectionId(5)).len(), 2);
        assert!(r.involves(TrainId(2)));

        r.remove_train(TrainId(1));
        r.remove_train(TrainId(2));
        assert!(r.is_empty());
        assert!(r.get(SectionId(5)).is_empty());
    }

    // === Region Tests ===

    fn line(n: usize) -> (TrackGraph, Vec<SectionId>) {
        let mut g = TrackGraph::new();
        let ids: Vec<_> = (0..n)
            .map(|_| g.add_section(SectionKind::Normal, 100.0))
            .collect();
        for pair in ids.windows(2) {
            g.link(pair[0], pair[1]).unwrap();
        }
        (g, ids)
    }

    #[test]
    fn opposing_routes_form_one_region() {
        let (g, ids) = line(5);
        let mine = SubpathRoute::forward(&g, &ids[1..4]).unwrap();
        let theirs = SubpathRoute::reverse(&g, &[ids[3], ids[2], ids[1]]).unwrap();
        let regions = find_regions(&g, &mine, 0, &theirs, 0);
        assert_eq!(
            regions,
            vec![Region {
                my_entry: ids[1],
                my_exit: ids[3],
                other_entry: ids[3],
                other_exit: ids[1],
            }]
        );
    }

    #[test]
    fn same_direction_is_no_conflict() {
        let (g, ids) = line(4);
        let mine = SubpathRoute::forward(&g, &ids).unwrap();
        let theirs = SubpathRoute::forward(&g, &ids[1..]).unwrap();
        assert!(find_regions(&g, &mine, 0, &theirs, 0).is_empty());
    }

    #[test]
    fn exit_extends_to_junction() {
        let mut g = TrackGraph::new();
        let a = g.add_section(SectionKind::Normal, 100.0);
        let b = g.add_section(SectionKind::Normal, 100.0);
        let c = g.add_section(SectionKind::Normal, 100.0);
        let sw = g.add_section(SectionKind::Junction, 30.0);
        let d = g.add_section(SectionKind::Normal, 100.0);
        g.link(a, b).unwrap();
        g.link(b, c).unwrap();
        g.link(c, sw).unwrap();
        g.link(sw, d).unwrap();

        let mine = SubpathRoute::forward(&g, &[a, b, c, sw, d]).unwrap();
        let theirs = SubpathRoute::reverse(&g, &[b, a]).unwrap();
        let regions = find_regions(&g, &mine, 0, &theirs, 0);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].my_entry, a);
        assert_eq!(regions[0].my_exit, sw);
        assert_eq!(regions[0].other_entry, b);
        assert_eq!(regions[0].other_exit, a);
    }
}
