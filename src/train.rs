//! Per-train authority state and the tick pipeline.
//!
//! This module provides [`Train`], the record the control core keeps for
//! every active train, the [`Fleet`] arena that owns them, and
//! [`Train::update`], which turns one [`Movement`] into occupation changes,
//! passed-object handling and a refreshed authority.
//!
//! # Overview
//!
//! Each tick, for a train in an automatic mode:
//!
//! 1. Apply the movement and locate both ends on the validated route
//! 2. Check for backward slip and for leaving the route
//! 3. Handle signals and speed posts the front has passed
//! 4. Occupy newly entered sections, schedule their release
//! 5. Run due distance actions (section releases, speed limits)
//! 6. Refresh authority for the current mode, then claims
//! 7. Refresh the lookahead cache and check for a reversal
//!
//! Manual, explorer and out-of-control trains run their own variants,
//! found in [`crate::control`].
//!
//! # Ownership
//!
//! The fleet owns every train. While one train updates it is taken out of
//! its slot, so the tick can hand `&mut TrackGraph` and `&mut Fleet` to the
//! updating train without aliasing it.

use std::collections::BTreeMap;

use crate::actions::{ActionQueue, PendingAction};
use crate::commands::RetainerSetting;
use crate::config::{ControlConfig, TrainConfig};
use crate::control::{ControlMode, EndAuthority, EndAuthorityType, OutOfControlReason};
use crate::deadlock::DeadlockRecord;
use crate::error::DispatchError;
use crate::ids::{RoutedTrain, SectionId, SignalId, TrainId, BACKWARD, FORWARD};
use crate::lookahead::{CacheEntry, LookaheadCache, LookaheadParams};
use crate::position::TrackPosition;
use crate::reservation::{self, Claimant};
use crate::route::{build_temp_route, SubpathRoute, TrainRoute};
use crate::track::{Direction, ObjectKind, SectionKind, TrackGraph};
use crate::traits::{Interlocking, Movement};

/// Sections and timer of a train's claim on the track beyond a red signal.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClaimState {
    /// Stationary time spent waiting at the signal.
    pub wait_s: f32,
    /// True once the claim is raised.
    pub active: bool,
    /// Sections currently claimed.
    pub sections: Vec<SectionId>,
}

/// Progress through the route's waiting points.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct WaitState {
    pub(crate) waited_s: f32,
    pub(crate) done: Vec<usize>,
}

/// Mutable world a train sees during its update.
pub struct TickContext<'a> {
    /// Track network, including reservation state.
    pub graph: &'a mut TrackGraph,
    /// Every other train; the updating train is not in it.
    pub fleet: &'a mut Fleet,
    /// Signal clearance authority.
    pub interlocking: &'a mut dyn Interlocking,
    /// Shared control parameters.
    pub config: &'a ControlConfig,
    /// Tick length in seconds.
    pub dt_s: f32,
}

// ============================================================================
// Train
// ============================================================================

/// A train under control of the core.
///
/// Created by [`crate::Simulation::add_train`]; read through the accessors
/// or as a [`crate::TrainStatus`] snapshot.
#[derive(Clone, Debug)]
pub struct Train {
    pub(crate) id: TrainId,
    pub(crate) config: TrainConfig,
    pub(crate) mode: ControlMode,
    pub(crate) out_of_control_reason: Option<OutOfControlReason>,
    pub(crate) route: TrainRoute,
    pub(crate) valid_route: [SubpathRoute; 2],

    pub(crate) front: TrackPosition,
    pub(crate) rear: TrackPosition,
    pub(crate) previous_front: TrackPosition,
    pub(crate) previous_rear: TrackPosition,
    pub(crate) speed_mps: f32,
    pub(crate) travelled_m: f32,
    pub(crate) backward_m: f32,

    pub(crate) occupied: Vec<SectionId>,
    pub(crate) lookahead: LookaheadCache,
    pub(crate) next_signal: [Option<SignalId>; 2],
    pub(crate) end_authority: [EndAuthority; 2],
    pub(crate) actions: ActionQueue,
    pub(crate) deadlocks: DeadlockRecord,
    pub(crate) claim: ClaimState,
    pub(crate) waiting: WaitState,

    pub(crate) allowed_speed_mps: f32,
    pub(crate) speed_post_limit_mps: f32,
    pub(crate) signal_limit_mps: f32,
    pub(crate) passed_signal_speeds: BTreeMap<SignalId, f32>,

    pub(crate) misaligned_switch: [Option<SectionId>; 2],
    pub(crate) emergency_braking: bool,
    pub(crate) handbrake: bool,
    pub(crate) retainers: RetainerSetting,
}

impl Train {
    /// Builds a train with its rear at `rear`, on the active subpath of
    /// `route`. Nothing is reserved yet.
    pub(crate) fn place(
        id: TrainId,
        config: TrainConfig,
        route: TrainRoute,
        rear: TrackPosition,
        graph: &TrackGraph,
        control: &ControlConfig,
    ) -> Result<Self, DispatchError> {
        route.validate(graph)?;
        let section = graph
            .get_section(rear.section)
            .ok_or(DispatchError::UnknownSection(rear.section))?;
        if rear.offset_m < 0.0 || rear.offset_m > section.length_m {
            return Err(DispatchError::OffsetOutOfRange {
                section: rear.section,
                offset_m: rear.offset_m,
            });
        }

        let active = route.active().ok_or(DispatchError::EmptyRoute)?;
        let rear_index = active
            .index_of(rear.section, 0)
            .filter(|&i| active.get(i).map(|e| e.direction) == Some(rear.direction))
            .ok_or(DispatchError::NotOnRoute(rear.section))?;
        let valid = active.tail_from(rear_index);
        let rear = rear.with_route_index(Some(0));
        let front = graph.advance(&rear, config.length_m, Some(&valid));
        if front.route_index.is_none() {
            return Err(DispatchError::NotOnRoute(front.section));
        }

        Ok(Self {
            id,
            config,
            mode: ControlMode::Uninitialized,
            out_of_control_reason: None,
            route,
            valid_route: [valid, SubpathRoute::new()],
            front,
            rear,
            previous_front: front,
            previous_rear: rear,
            speed_mps: 0.0,
            travelled_m: 0.0,
            backward_m: 0.0,
            occupied: Vec::new(),
            lookahead: LookaheadCache::new(),
            next_signal: [None; 2],
            end_authority: [EndAuthority::default(); 2],
            actions: ActionQueue::new(),
            deadlocks: DeadlockRecord::new(),
            claim: ClaimState::default(),
            waiting: WaitState::default(),
            allowed_speed_mps: 0.0,
            speed_post_limit_mps: control.route_max_speed_mps,
            signal_limit_mps: control.route_max_speed_mps,
            passed_signal_speeds: BTreeMap::new(),
            misaligned_switch: [None; 2],
            emergency_braking: false,
            handbrake: false,
            retainers: RetainerSetting::default(),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Train id
    pub fn id(&self) -> TrainId {
        self.id
    }

    /// Train name
    pub fn name(&self) -> &str {
        self.config.name.as_str()
    }

    /// Per-train constants
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Current control mode
    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Why the train is out of control, if it is
    pub fn out_of_control_reason(&self) -> Option<OutOfControlReason> {
        self.out_of_control_reason
    }

    /// Full path with subpaths, reversals and waiting points
    pub fn route(&self) -> &TrainRoute {
        &self.route
    }

    /// Validated route window in a direction ([`FORWARD`] or [`BACKWARD`])
    pub fn valid_route(&self, direction_index: usize) -> &SubpathRoute {
        &self.valid_route[direction_index.min(BACKWARD)]
    }

    /// Front of the train, facing the direction of travel
    pub fn front(&self) -> &TrackPosition {
        &self.front
    }

    /// Rear of the train, facing the direction of travel
    pub fn rear(&self) -> &TrackPosition {
        &self.rear
    }

    /// Speed in m/s, negative when running backwards
    pub fn speed_mps(&self) -> f32 {
        self.speed_mps
    }

    /// Signed distance travelled since placement
    pub fn travelled_m(&self) -> f32 {
        self.travelled_m
    }

    /// Sections under the train
    pub fn occupied(&self) -> &[SectionId] {
        &self.occupied
    }

    /// Signals and speed posts ahead
    pub fn lookahead(&self) -> &LookaheadCache {
        &self.lookahead
    }

    /// Governing signal in a direction
    pub fn next_signal(&self, direction_index: usize) -> Option<SignalId> {
        self.next_signal[direction_index.min(BACKWARD)]
    }

    /// Authority in a direction
    pub fn end_authority(&self, direction_index: usize) -> EndAuthority {
        self.end_authority[direction_index.min(BACKWARD)]
    }

    /// Deadlock regions recorded against other trains
    pub fn deadlocks(&self) -> &DeadlockRecord {
        &self.deadlocks
    }

    /// Claim state at the signal ahead
    pub fn claim(&self) -> &ClaimState {
        &self.claim
    }

    /// True while a claim is raised
    pub fn is_claiming(&self) -> bool {
        self.claim.active
    }

    /// Speed the train may run at
    pub fn allowed_speed_mps(&self) -> f32 {
        self.allowed_speed_mps
    }

    /// Limit from the last speed post
    pub fn speed_post_limit_mps(&self) -> f32 {
        self.speed_post_limit_mps
    }

    /// Speed read from a signal the train passed, if recorded
    pub fn passed_signal_speed(&self, signal: SignalId) -> Option<f32> {
        self.passed_signal_speeds.get(&signal).copied()
    }

    /// Switch set against a manual window, per direction
    pub fn misaligned_switch(&self, direction_index: usize) -> Option<SectionId> {
        self.misaligned_switch[direction_index.min(BACKWARD)]
    }

    /// True while the core demands an emergency stop
    pub fn is_emergency_braking(&self) -> bool {
        self.emergency_braking
    }

    /// Handbrake applied by the operator
    pub fn handbrake(&self) -> bool {
        self.handbrake
    }

    /// Retainer valve setting
    pub fn retainers(&self) -> RetainerSetting {
        self.retainers
    }

    /// This train as a reservation claimant along its window in
    /// `direction_index`.
    pub fn claimant(&self, direction_index: usize) -> Claimant<'_> {
        let d = direction_index.min(BACKWARD);
        Claimant {
            routed: RoutedTrain::new(self.id, d),
            route: &self.valid_route[d],
            deadlocks: &self.deadlocks,
            front_index: if d == FORWARD {
                self.front.route_index.unwrap_or(0)
            } else {
                0
            },
        }
    }

    /// Part of `section` under this train, as offsets seen travelling
    /// `direction`.
    pub fn extent_in(
        &self,
        graph: &TrackGraph,
        section: SectionId,
        direction: Direction,
    ) -> Option<(f32, f32)> {
        let length = graph.section_length(section);
        let (lo, hi, own) = if self.front.section == section && self.rear.section == section {
            (self.rear.offset_m, self.front.offset_m, self.front.direction)
        } else if self.front.section == section {
            (0.0, self.front.offset_m, self.front.direction)
        } else if self.rear.section == section {
            (self.rear.offset_m, length, self.rear.direction)
        } else if self.occupied.contains(&section) {
            (0.0, length, direction)
        } else {
            return None;
        };
        if own == direction {
            Some((lo, hi))
        } else {
            Some((length - hi, length - lo))
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Applies one movement step and refreshes authority.
    pub fn update(&mut self, movement: Movement, ctx: &mut TickContext<'_>) {
        self.apply_movement(movement);
        match self.mode {
            ControlMode::OutOfControl => self.update_out_of_control(ctx),
            ControlMode::Manual | ControlMode::Explorer => self.update_manual(ctx, movement.distance_m),
            ControlMode::Uninitialized => {
                self.switch_mode(ControlMode::NodeGoverned);
                self.update_automatic(ctx);
            }
            ControlMode::SignalGoverned | ControlMode::NodeGoverned => self.update_automatic(ctx),
        }
        self.update_allowed_speed();
    }

    fn apply_movement(&mut self, movement: Movement) {
        self.previous_front = self.front;
        self.previous_rear = self.rear;
        self.front = movement.front;
        self.rear = movement.rear;
        self.speed_mps = movement.speed_mps;

        let moved = movement.distance_m;
        self.travelled_m += moved;
        self.lookahead.advance(moved);
        if moved < 0.0 {
            self.backward_m += -moved;
        } else if moved > 0.0 {
            self.backward_m = (self.backward_m - moved).max(0.0);
        }
        self.locate();
    }

    /// Recomputes the route indices of both ends on the forward window.
    pub(crate) fn locate(&mut self) {
        let route = &self.valid_route[FORWARD];
        let on_route = |pos: &TrackPosition, from: usize| {
            route
                .index_of(pos.section, from)
                .filter(|&i| route.get(i).map(|e| e.direction) == Some(pos.direction))
        };
        let rear_index = on_route(&self.rear, 0);
        let front_index = on_route(&self.front, rear_index.unwrap_or(0));
        self.rear.route_index = rear_index;
        self.front.route_index = front_index;
    }

    fn update_automatic(&mut self, ctx: &mut TickContext<'_>) {
        let backward = self.check_backward_slip(ctx);
        if self.mode == ControlMode::OutOfControl {
            return;
        }
        if !self.check_on_route(ctx) {
            return;
        }

        self.process_passed_objects(ctx);
        if self.mode == ControlMode::OutOfControl {
            return;
        }
        self.update_front_occupancy(ctx);
        if self.mode == ControlMode::OutOfControl {
            return;
        }
        self.process_due_actions(ctx, true);
        self.update_waiting_points(ctx);

        match self.mode {
            ControlMode::SignalGoverned => self.update_signal_mode(ctx),
            ControlMode::NodeGoverned => self.update_node_mode(ctx),
            _ => {}
        }

        self.refresh_lookahead(ctx, backward);
        if self.mode == ControlMode::SignalGoverned {
            self.update_signal_authority(ctx);
        }
        self.update_claims(ctx);
        self.check_reversal(ctx);
    }

    fn update_allowed_speed(&mut self) {
        if self.mode == ControlMode::OutOfControl {
            self.allowed_speed_mps = 0.0;
            return;
        }
        self.allowed_speed_mps = self
            .config
            .max_speed_mps
            .min(self.speed_post_limit_mps)
            .min(self.signal_limit_mps)
            .max(0.0);
    }

    // ========================================================================
    // Route Position
    // ========================================================================

    /// False if the front left the route and no route could be rebuilt.
    fn check_on_route(&mut self, ctx: &mut TickContext<'_>) -> bool {
        if self.front.route_index.is_some() {
            return true;
        }
        log::warn!(
            "{} front in {} is off its validated route",
            self.id,
            self.front.section
        );
        if self.rebuild_route_from_path() {
            return true;
        }
        self.set_out_of_control(OutOfControlReason::OutOfPath, ctx);
        false
    }

    /// Rebuilds the forward window from the active subpath. Both ends must
    /// lie on it.
    pub(crate) fn rebuild_route_from_path(&mut self) -> bool {
        match self.path_window(&self.rear, &self.front) {
            Some(window) => {
                self.valid_route[FORWARD] = window;
                self.locate();
                true
            }
            None => false,
        }
    }

    /// Active subpath from `rear` on, if both ends lie on it facing the
    /// way they travel.
    pub(crate) fn path_window(
        &self,
        rear: &TrackPosition,
        front: &TrackPosition,
    ) -> Option<SubpathRoute> {
        let active = self.route.active()?;
        let rear_index = active
            .index_of(rear.section, 0)
            .filter(|&i| active.get(i).map(|e| e.direction) == Some(rear.direction))?;
        let window = active.tail_from(rear_index);
        let front_ok = window
            .index_of(front.section, 0)
            .and_then(|i| window.get(i))
            .map_or(false, |e| e.direction == front.direction);
        front_ok.then_some(window)
    }

    // ========================================================================
    // Passed Objects
    // ========================================================================

    pub(crate) fn process_passed_objects(&mut self, ctx: &mut TickContext<'_>) {
        while let Some(entry) = self.lookahead.pop_passed() {
            match entry.kind {
                ObjectKind::Signal => self.pass_signal(&entry, ctx),
                ObjectKind::SpeedPost => self.pass_speed_post(&entry),
            }
            if self.mode == ControlMode::OutOfControl {
                break;
            }
        }
    }

    fn pass_signal(&mut self, entry: &CacheEntry, ctx: &mut TickContext<'_>) {
        let me = self.id;
        let (enabled, aspect, chained) = {
            let signal = ctx.graph.signal(entry.object);
            (signal.is_enabled_for(me), signal.aspect, signal.next_signal)
        };
        self.passed_signal_speeds
            .insert(entry.object, entry.object_speed_mps);

        if !enabled || aspect.is_stop() {
            if self.mode.is_automatic() {
                log::warn!("{} passed {} at stop", me, entry.object);
                self.set_out_of_control(OutOfControlReason::PassedSignalAtStop, ctx);
                return;
            }
            log::warn!(
                "{} passed {} at stop in {} mode",
                me,
                entry.object,
                self.mode.as_str()
            );
        } else {
            self.signal_limit_mps = entry.object_speed_mps;
        }

        if enabled {
            ctx.interlocking.reset_signal(ctx.graph, entry.object);
        }

        if self.next_signal[FORWARD] != Some(entry.object) {
            return;
        }
        self.next_signal[FORWARD] = None;
        if self.mode != ControlMode::SignalGoverned {
            return;
        }
        match chained {
            None => {
                log::debug!("{} passed {}, no chained signal", me, entry.object);
                self.switch_mode(ControlMode::NodeGoverned);
            }
            Some(next) => {
                let aspect = ctx.interlocking.request_clear(ctx.graph, next, self);
                if aspect.is_stop() {
                    self.switch_mode(ControlMode::NodeGoverned);
                } else {
                    self.next_signal[FORWARD] = Some(next);
                }
            }
        }
    }

    fn pass_speed_post(&mut self, entry: &CacheEntry) {
        let limit = entry.object_speed_mps;
        if limit <= self.speed_post_limit_mps {
            self.speed_post_limit_mps = limit;
            log::debug!("{} speed limit {:.1} m/s at {}", self.id, limit, entry.object);
        } else {
            // Raise only once the whole train is past the post.
            let trigger = self.travelled_m + self.config.length_m + entry.distance_m;
            self.actions
                .schedule(trigger, PendingAction::ActivateSpeedLimit { limit_mps: limit });
        }
    }

    // ========================================================================
    // Occupation
    // ========================================================================

    /// Occupies `section` for the forward claimant.
    pub(crate) fn occupy(&mut self, graph: &mut TrackGraph, section: SectionId) {
        let claimant = Claimant {
            routed: RoutedTrain::forward(self.id),
            route: &self.valid_route[FORWARD],
            deadlocks: &self.deadlocks,
            front_index: self.front.route_index.unwrap_or(0),
        };
        reservation::set_occupied(graph, section, &claimant, &mut self.occupied);
    }

    fn update_front_occupancy(&mut self, ctx: &mut TickContext<'_>) {
        let Some(front_index) = self.front.route_index else {
            return;
        };
        let from = self.rear.route_index.unwrap_or(front_index).min(front_index);
        for i in from..=front_index {
            let Some(element) = self.valid_route[FORWARD].get(i).copied() else {
                break;
            };
            if self.occupied.contains(&element.section) {
                continue;
            }

            let held = {
                let st = &ctx.graph.section(element.section).state;
                st.is_reserved_by(self.id) || st.is_occupied_by(self.id)
            };
            if !held {
                log::warn!("{} entered {} without authority", self.id, element.section);
                self.set_out_of_control(OutOfControlReason::OutOfAuthority, ctx);
                return;
            }
            let previous = i
                .checked_sub(1)
                .and_then(|j| self.valid_route[FORWARD].get(j))
                .map(|e| e.section);
            if let Some(previous) = previous {
                if !ctx
                    .graph
                    .section(element.section)
                    .is_aligned_from(element.direction, previous)
                {
                    log::warn!("{} ran through {} set against it", self.id, element.section);
                    self.set_out_of_control(OutOfControlReason::MisalignedSwitch, ctx);
                    return;
                }
            }

            self.occupy(ctx.graph, element.section);
            let end_from_front = ctx.graph.section_length(element.section)
                - self.valid_route[FORWARD].length_of(ctx.graph, i..front_index)
                - self.front.offset_m;
            self.schedule_clear(
                ctx.graph,
                ctx.config,
                element.section,
                element.direction,
                self.config.length_m + end_from_front,
            );
        }
    }

    /// Schedules the release of `section` once the rear is `rear_to_end_m`
    /// plus the clearing overlap further on.
    pub(crate) fn schedule_clear(
        &mut self,
        graph: &TrackGraph,
        config: &ControlConfig,
        section: SectionId,
        direction: Direction,
        rear_to_end_m: f32,
    ) {
        let overlap = clear_overlap(graph, config, section, direction);
        let trigger = self
            .actions
            .schedule_clear(section, self.travelled_m + rear_to_end_m + overlap);
        log::trace!("{} releases {} at {:.1} m", self.id, section, trigger);
    }

    /// Runs actions due at the current distance. With `all` false only
    /// speed-limit actions apply and section releases stay queued.
    pub(crate) fn process_due_actions(&mut self, ctx: &mut TickContext<'_>, all: bool) {
        let due = self.actions.take_due(self.travelled_m);
        if due.is_empty() {
            return;
        }
        for action in due {
            match action {
                PendingAction::ClearSection { section } if all => {
                    if section == self.front.section {
                        let rear_to_end = self.config.length_m + self.front.distance_to_end(ctx.graph);
                        let direction = self.front.direction;
                        self.schedule_clear(ctx.graph, ctx.config, section, direction, rear_to_end);
                        continue;
                    }
                    if section == self.rear.section {
                        let rear_to_end = self.rear.distance_to_end(ctx.graph);
                        let direction = self.rear.direction;
                        self.schedule_clear(ctx.graph, ctx.config, section, direction, rear_to_end);
                        continue;
                    }
                    reservation::clear_occupied(
                        ctx.graph,
                        section,
                        self.id,
                        &mut self.occupied,
                        ctx.fleet,
                    );
                }
                PendingAction::ClearSection { section } => {
                    self.actions.schedule(self.travelled_m, PendingAction::ClearSection { section });
                }
                PendingAction::ActivateSpeedLimit { limit_mps } => {
                    log::debug!("{} speed limit raised to {:.1} m/s", self.id, limit_mps);
                    self.speed_post_limit_mps = limit_mps;
                }
            }
        }
        if all {
            self.trim_route_behind();
        }
    }

    /// Drops window elements the rear has left.
    fn trim_route_behind(&mut self) {
        let keep_from = {
            let route = &self.valid_route[FORWARD];
            let first_held = route
                .iter()
                .position(|e| self.occupied.contains(&e.section))
                .unwrap_or(0);
            first_held.min(self.rear.route_index.unwrap_or(first_held))
        };
        if keep_from > 0 {
            self.valid_route[FORWARD].drop_front(keep_from);
            self.locate();
        }
    }

    /// Sections under the train from rear to front, and the first junction
    /// entered trailing while set against the train, if any.
    pub(crate) fn body_sections(
        &self,
        graph: &TrackGraph,
    ) -> (Vec<(SectionId, Direction)>, Option<SectionId>) {
        let route = self.rear.route_index.map(|_| &self.valid_route[FORWARD]);
        let mut body: Vec<(SectionId, Direction)> = Vec::new();
        let mut misaligned = None;
        for step in graph.walk(&self.rear, route) {
            if let Some(&(previous, _)) = body.last() {
                if misaligned.is_none()
                    && !graph
                        .section(step.section)
                        .is_aligned_from(step.direction, previous)
                {
                    misaligned = Some(step.section);
                }
            }
            body.push((step.section, step.direction));
            if step.section == self.front.section || step.start_m > self.config.length_m {
                break;
            }
        }
        (body, misaligned)
    }

    /// Re-derives occupation from the body and reschedules every release.
    /// Returns the first misaligned junction under the train.
    pub(crate) fn rebuild_occupation(&mut self, ctx: &mut TickContext<'_>) -> Option<SectionId> {
        let (body, misaligned) = self.body_sections(ctx.graph);
        let stale: Vec<SectionId> = self
            .occupied
            .iter()
            .copied()
            .filter(|s| !body.iter().any(|(b, _)| b == s))
            .collect();
        for section in stale {
            reservation::clear_occupied(ctx.graph, section, self.id, &mut self.occupied, ctx.fleet);
        }

        self.actions.clear_sections();
        let mut rear_to_end = self.rear.distance_to_end(ctx.graph);
        for (k, &(section, direction)) in body.iter().enumerate() {
            if k > 0 {
                rear_to_end += ctx.graph.section_length(section);
            }
            if !self.occupied.contains(&section) {
                self.occupy(ctx.graph, section);
            }
            self.schedule_clear(ctx.graph, ctx.config, section, direction, rear_to_end);
        }
        misaligned
    }

    /// Lengthens the train by `extra_m` behind its rear, keeping the front
    /// where it is, and re-derives its window and occupation.
    pub(crate) fn lengthen(&mut self, extra_m: f32, ctx: &mut TickContext<'_>) {
        self.config.length_m += extra_m.max(0.0);
        let behind = self.front.reversed(ctx.graph);
        let tail = ctx.graph.advance(&behind, self.config.length_m, None);
        self.rear = tail.reversed(ctx.graph);
        self.previous_rear = self.rear;

        if !self.rebuild_route_from_path() {
            let mut window = build_temp_route(ctx.graph, &self.rear, self.config.length_m);
            if let Some(front_index) = self.front.route_index {
                for element in self.valid_route[FORWARD].iter().skip(front_index + 1) {
                    window.push(*element);
                }
            }
            self.valid_route[FORWARD] = window;
            self.locate();
        }
        self.rebuild_occupation(ctx);
    }

    /// Drops every reservation, claim and pre-reservation the train holds
    /// outside its body, and resets the signals cleared for it.
    pub(crate) fn release_authority(&mut self, ctx: &mut TickContext<'_>) {
        self.release_claims(ctx.graph, false);
        let me = self.id;
        for section in ctx.graph.sections_mut() {
            let st = &mut section.state;
            if st.is_reserved_by(me) && !st.is_occupied_by(me) {
                st.reserved_by = None;
            }
            st.claimed.retain(|r| r.train != me);
            st.pre_reserved.retain(|r| r.train != me);
        }
        let cleared: Vec<SignalId> = ctx
            .graph
            .signals()
            .iter()
            .filter(|s| s.is_enabled_for(me))
            .map(|s| s.id)
            .collect();
        for signal in cleared {
            ctx.interlocking.reset_signal(ctx.graph, signal);
        }
        self.lookahead.clear();
        self.next_signal = [None; 2];
        self.end_authority = [EndAuthority::default(); 2];
        self.misaligned_switch = [None; 2];
    }

    // ========================================================================
    // Waiting Points and Lookahead
    // ========================================================================

    fn update_waiting_points(&mut self, ctx: &mut TickContext<'_>) {
        let active = self.route.active_subpath;
        let stationary = ctx.config.is_stationary(self.speed_mps);
        let pending = self
            .route
            .waiting_points
            .iter()
            .enumerate()
            .find(|(i, wp)| wp.subpath == active && !self.waiting.done.contains(i))
            .map(|(i, wp)| (i, *wp));
        let Some((index, point)) = pending else {
            return;
        };

        if let Some(signal) = point.hold_signal {
            if ctx.graph.signal(signal).hold_for != Some(self.id) {
                if ctx.graph.signal(signal).is_enabled_for(self.id) {
                    ctx.interlocking.reset_signal(ctx.graph, signal);
                }
                ctx.graph.signal_mut(signal).hold_for = Some(self.id);
                log::debug!("{} holding {} for waiting point", self.id, signal);
            }
        }

        if self.front.section == point.section && stationary {
            self.waiting.waited_s += ctx.dt_s;
            if self.waiting.waited_s >= point.wait_s {
                self.waiting.done.push(index);
                self.waiting.waited_s = 0.0;
                if let Some(signal) = point.hold_signal {
                    let s = ctx.graph.signal_mut(signal);
                    if s.hold_for == Some(self.id) {
                        s.hold_for = None;
                    }
                }
                log::info!("{} completed wait in {}", self.id, point.section);
            }
        }
    }

    pub(crate) fn refresh_lookahead(&mut self, ctx: &TickContext<'_>, backward: bool) {
        let threshold = if self.mode.is_manual() {
            ctx.config.min_check_distance_manual_m
        } else {
            ctx.config.min_check_distance_m
        };
        let params = LookaheadParams {
            graph: &*ctx.graph,
            route: &self.valid_route[FORWARD],
            front: &self.front,
            train: self.id,
            freight: self.config.is_freight,
            threshold_m: threshold,
            route_max_mps: ctx.config.route_max_speed_mps,
            speed_post_limit_mps: self.speed_post_limit_mps,
            passed_speeds: &self.passed_signal_speeds,
            backward,
        };
        self.lookahead.refresh(&params);
    }

    // ========================================================================
    // Reversal
    // ========================================================================

    fn check_reversal(&mut self, ctx: &mut TickContext<'_>) {
        if self.mode == ControlMode::OutOfControl
            || !self.route.has_next_subpath()
            || !ctx.config.is_stationary(self.speed_mps)
        {
            return;
        }
        let Some(front_index) = self.front.route_index else {
            return;
        };
        let overlap = ctx.config.standard_overlap_m;
        let at_end = front_index + 1 >= self.valid_route[FORWARD].len()
            && self.front.distance_to_end(ctx.graph) <= overlap;
        let at_point = self
            .route
            .reversals
            .get(self.route.active_subpath)
            .map_or(false, |rp| {
                rp.diverge_section == self.front.section && self.front.offset_m + overlap >= rp.offset_m
            });
        if at_end || at_point {
            self.reverse(ctx);
        }
    }

    fn reverse(&mut self, ctx: &mut TickContext<'_>) {
        self.release_authority(ctx);
        self.route.active_subpath += 1;
        log::info!(
            "{} reversing onto subpath {}",
            self.id,
            self.route.active_subpath
        );

        let front = self.rear.reversed(ctx.graph);
        let rear = self.front.reversed(ctx.graph);
        self.front = front;
        self.rear = rear;
        self.previous_front = front;
        self.previous_rear = rear;
        self.backward_m = 0.0;

        if !self.rebuild_route_from_path() {
            log::warn!("{} reversed off its next subpath", self.id);
            self.set_out_of_control(OutOfControlReason::OutOfPath, ctx);
            return;
        }
        self.rebuild_occupation(ctx);
        self.switch_mode(ControlMode::NodeGoverned);
        crate::deadlock::check_deadlock(self, ctx.graph, ctx.fleet);
    }

    /// Sets the authority in a direction.
    pub(crate) fn set_authority(&mut self, direction_index: usize, kind: EndAuthorityType, distance_m: f32) {
        self.end_authority[direction_index.min(BACKWARD)] = EndAuthority::new(kind, distance_m);
    }
}

/// Clearing overlap for leaving `section` travelling `direction`.
fn clear_overlap(
    graph: &TrackGraph,
    config: &ControlConfig,
    section: SectionId,
    direction: Direction,
) -> f32 {
    let s = graph.section(section);
    let junction = match s.kind {
        SectionKind::Crossover => true,
        SectionKind::Junction => s.is_facing_point(direction),
        _ => false,
    };
    if junction {
        s.overlap_m.unwrap_or(config.junction_overlap_m)
    } else {
        config.standard_overlap_m
    }
}

// ============================================================================
// Fleet
// ============================================================================

/// Arena of active trains indexed by [`TrainId`].
#[derive(Clone, Debug, Default)]
pub struct Fleet {
    slots: Vec<Option<Train>>,
}

impl Fleet {
    /// Empty fleet
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next inserted train gets
    pub fn next_id(&self) -> TrainId {
        TrainId(self.slots.len())
    }

    /// Stores a train in the slot of its id.
    pub(crate) fn insert(&mut self, train: Train) {
        let index = train.id.index();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(train);
    }

    /// Train by id
    pub fn get(&self, id: TrainId) -> Option<&Train> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Mutable train by id
    pub fn get_mut(&mut self, id: TrainId) -> Option<&mut Train> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Takes a train out for its update; put it back with [`Self::restore`].
    pub(crate) fn take(&mut self, id: TrainId) -> Option<Train> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    /// Returns a taken train to its slot.
    pub(crate) fn restore(&mut self, train: Train) {
        self.insert(train);
    }

    /// Removes a train for good.
    pub(crate) fn remove(&mut self, id: TrainId) -> Option<Train> {
        self.take(id)
    }

    /// Ids of the trains present, ascending
    pub fn ids(&self) -> Vec<TrainId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_some())
            .map(|(i, _)| TrainId(i))
            .collect()
    }

    /// Trains present, ascending by id
    pub fn iter(&self) -> impl Iterator<Item = &Train> {
        self.slots.iter().flatten()
    }

    /// Mutable trains present, ascending by id
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Train> {
        self.slots.iter_mut().flatten()
    }

    /// Number of trains present
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True if no train is present
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::SubpathRoute;
    use crate::track::{Direction, SectionKind};

    fn line(n: usize, length: f32) -> (TrackGraph, Vec<SectionId>) {
        let mut g = TrackGraph::new();
        let ids: Vec<_> = (0..n).map(|_| g.add_section(SectionKind::Normal, length)).collect();
        for pair in ids.windows(2) {
            g.link(pair[0], pair[1]).unwrap();
        }
        (g, ids)
    }

    fn placed(g: &TrackGraph, ids: &[SectionId], rear: TrackPosition, length: f32) -> Train {
        let route = TrainRoute::single(SubpathRoute::forward(g, ids).unwrap());
        Train::place(
            TrainId(0),
            TrainConfig::default().with_length_m(length),
            route,
            rear,
            g,
            &ControlConfig::default(),
        )
        .unwrap()
    }

    // === Placement Tests ===

    #[test]
    fn front_follows_route_from_rear() {
        let (g, ids) = line(3, 100.0);
        let train = placed(&g, &ids, TrackPosition::new(ids[0], Direction::Forward, 60.0), 80.0);
        assert_eq!(train.front().section, ids[1]);
        assert!((train.front().offset_m - 40.0).abs() < 1e-3);
        assert_eq!(train.front().route_index, Some(1));
        assert_eq!(train.rear().route_index, Some(0));
        assert_eq!(train.mode(), ControlMode::Uninitialized);
    }

    #[test]
    fn placement_off_route_fails() {
        let (g, ids) = line(3, 100.0);
        let route = TrainRoute::single(SubpathRoute::forward(&g, &ids[1..]).unwrap());
        let err = Train::place(
            TrainId(0),
            TrainConfig::default(),
            route,
            TrackPosition::new(ids[0], Direction::Forward, 10.0),
            &g,
            &ControlConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, DispatchError::NotOnRoute(ids[0]));
    }

    #[test]
    fn placement_offset_checked() {
        let (g, ids) = line(2, 100.0);
        let route = TrainRoute::single(SubpathRoute::forward(&g, &ids).unwrap());
        let err = Train::place(
            TrainId(0),
            TrainConfig::default(),
            route,
            TrackPosition::new(ids[0], Direction::Forward, 120.0),
            &g,
            &ControlConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::OffsetOutOfRange { .. }));
    }

    // === Geometry Tests ===

    #[test]
    fn body_spans_rear_to_front() {
        let (g, ids) = line(4, 100.0);
        let train = placed(&g, &ids, TrackPosition::new(ids[0], Direction::Forward, 50.0), 180.0);
        let (body, misaligned) = train.body_sections(&g);
        let sections: Vec<_> = body.iter().map(|(s, _)| *s).collect();
        assert_eq!(sections, vec![ids[0], ids[1], ids[2]]);
        assert!(misaligned.is_none());
    }

    #[test]
    fn extent_mirrors_for_opposite_direction() {
        let (g, ids) = line(2, 100.0);
        let train = placed(&g, &ids, TrackPosition::new(ids[0], Direction::Forward, 10.0), 30.0);
        assert_eq!(train.extent_in(&g, ids[0], Direction::Forward), Some((10.0, 40.0)));
        assert_eq!(train.extent_in(&g, ids[0], Direction::Reverse), Some((60.0, 90.0)));
        assert_eq!(train.extent_in(&g, ids[1], Direction::Forward), None);
    }

    #[test]
    fn overlap_longer_for_facing_junction() {
        let mut g = TrackGraph::new();
        let a = g.add_section(SectionKind::Normal, 100.0);
        let sw = g.add_section(SectionKind::Junction, 30.0);
        let b = g.add_section(SectionKind::Normal, 100.0);
        let c = g.add_section(SectionKind::Normal, 100.0);
        g.link(a, sw).unwrap();
        g.link(sw, b).unwrap();
        g.link(sw, c).unwrap();
        let config = ControlConfig::default();
        assert_eq!(clear_overlap(&g, &config, a, Direction::Forward), 15.0);
        assert_eq!(clear_overlap(&g, &config, sw, Direction::Forward), 75.0);
        assert_eq!(clear_overlap(&g, &config, sw, Direction::Reverse), 15.0);
    }

    // === Action Tests ===

    #[test]
    fn due_release_of_front_section_is_rescheduled() {
        let (mut g, ids) = line(3, 100.0);
        let mut train = placed(&g, &ids, TrackPosition::new(ids[0], Direction::Forward, 80.0), 50.0);
        assert_eq!(train.front().section, ids[1]);
        train.actions.schedule_clear(ids[1], 0.0);

        let mut fleet = Fleet::new();
        let mut interlocking = crate::providers::MockInterlocking::new();
        let config = ControlConfig::default();
        let mut ctx = TickContext {
            graph: &mut g,
            fleet: &mut fleet,
            interlocking: &mut interlocking,
            config: &config,
            dt_s: 0.0,
        };
        train.process_due_actions(&mut ctx, true);

        // Length 50, 70 m left in the section, 15 m overlap.
        let pending: Vec<_> = train.actions.iter().copied().collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, PendingAction::ClearSection { section: ids[1] });
        assert!((pending[0].trigger_m - 135.0).abs() < 1e-3);
    }

    // === Fleet Tests ===

    #[test]
    fn fleet_take_and_restore() {
        let (g, ids) = line(2, 100.0);
        let mut fleet = Fleet::new();
        assert_eq!(fleet.next_id(), TrainId(0));
        fleet.insert(placed(&g, &ids, TrackPosition::new(ids[0], Direction::Forward, 10.0), 30.0));
        assert_eq!(fleet.len(), 1);

        let train = fleet.take(TrainId(0)).unwrap();
        assert!(fleet.is_empty());
        assert!(fleet.get(TrainId(0)).is_none());
        fleet.restore(train);
        assert_eq!(fleet.ids(), vec![TrainId(0)]);
        assert_eq!(fleet.next_id(), TrainId(1));
    }
}
