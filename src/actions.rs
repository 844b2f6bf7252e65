//! Distance-triggered pending actions.
//!
//! Actions fire once the train's travelled distance reaches their trigger.
//! Section clearing uses this queue so a section is released only after the
//! rear of the train plus an overlap has left it.

use crate::ids::SectionId;

/// Something to do once the train has travelled far enough.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PendingAction {
    /// Release an occupied section.
    ClearSection {
        /// Section to release.
        section: SectionId,
    },
    /// Raise the active speed-post limit once the whole train has passed
    /// the post.
    ActivateSpeedLimit {
        /// New limit (m/s).
        limit_mps: f32,
    },
}

/// A pending action and its trigger distance.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistanceAction {
    /// Travelled distance at which the action fires.
    pub trigger_m: f32,
    /// The action.
    pub action: PendingAction,
}

/// Queue of pending actions ordered by trigger distance.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActionQueue {
    queue: Vec<DistanceAction>,
    last_clear_m: f32,
}

impl ActionQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an action, keeping trigger order. Equal triggers keep
    /// insertion order.
    pub fn schedule(&mut self, trigger_m: f32, action: PendingAction) {
        let at = self
            .queue
            .iter()
            .position(|a| a.trigger_m > trigger_m)
            .unwrap_or(self.queue.len());
        self.queue.insert(at, DistanceAction { trigger_m, action });
    }

    /// Schedules a section release. Release distances never decrease, so
    /// sections clear in the order they were entered. Returns the trigger
    /// actually used.
    pub fn schedule_clear(&mut self, section: SectionId, trigger_m: f32) -> f32 {
        let trigger = trigger_m.max(self.last_clear_m);
        self.last_clear_m = trigger;
        self.remove_section(section);
        self.schedule(trigger, PendingAction::ClearSection { section });
        trigger
    }

    /// Removes and returns every action due at `travelled_m`.
    pub fn take_due(&mut self, travelled_m: f32) -> Vec<PendingAction> {
        let due = self
            .queue
            .iter()
            .take_while(|a| a.trigger_m <= travelled_m)
            .count();
        self.queue.drain(..due).map(|a| a.action).collect()
    }

    /// Drops a pending release of `section`.
    pub fn remove_section(&mut self, section: SectionId) {
        self.queue.retain(|a| a.action != PendingAction::ClearSection { section });
    }

    /// Drops every pending release, keeping other actions.
    pub fn clear_sections(&mut self) {
        self.queue
            .retain(|a| !matches!(a.action, PendingAction::ClearSection { .. }));
        self.last_clear_m = 0.0;
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.last_clear_m = 0.0;
    }

    /// Trigger of the latest scheduled release.
    pub fn last_clear_m(&self) -> f32 {
        self.last_clear_m
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pending actions in trigger order.
    pub fn iter(&self) -> impl Iterator<Item = &DistanceAction> {
        self.queue.iter()
    }
}
