//! Node-governed authority: reserve section by section along the route.
//!
//! With no cleared signal ahead the train extends its own reservations.
//! The walk starts at the front and runs along the forward window; once it
//! reaches a section it does not hold it reserves ahead while closer than
//! the extension threshold, `max(allowed speed × lookahead time, minimum
//! lookahead)`, and stops at the first refusal. A signal at the end of a
//! walked section is asked to clear; if it does the train switches to
//! signal mode.

use std::collections::BTreeSet;

use crate::control::{ControlMode, EndAuthorityType};
use crate::ids::{SectionId, FORWARD};
use crate::reservation::{self, Availability};
use crate::track::Direction;
use crate::train::{TickContext, Train};

impl Train {
    pub(crate) fn update_node_mode(&mut self, ctx: &mut TickContext<'_>) {
        let Some(front_index) = self.front.route_index else {
            return;
        };
        let config = ctx.config;
        let threshold = (self.allowed_speed_mps * config.lookahead_time_s).max(config.min_lookahead_m);
        let stored = self.end_authority[FORWARD].kind;
        let me = self.id;

        let mut distance = -self.front.offset_m;
        let mut visited = BTreeSet::new();
        let mut extending = false;
        let mut index = front_index;

        loop {
            let Some(element) = self.valid_route[FORWARD].get(index).copied() else {
                let kind = self.route_end_kind(ctx);
                self.set_authority(FORWARD, kind, distance);
                return;
            };
            if !visited.insert(element.section) {
                self.set_authority(FORWARD, EndAuthorityType::Loop, distance);
                return;
            }

            let held = {
                let st = &ctx.graph.section(element.section).state;
                st.is_reserved_by(me) || st.is_occupied_by(me)
            };
            if !held {
                if distance >= config.min_check_distance_m {
                    self.set_authority(FORWARD, EndAuthorityType::MaxDistance, distance);
                    return;
                }
                if distance >= threshold && !extending {
                    self.set_authority(FORWARD, stored, distance);
                    return;
                }
                extending = true;
                if let Some((kind, extra)) = self.try_reserve_ahead(ctx, element.section, element.direction) {
                    log::trace!("{} stopped at {}: {}", me, element.section, kind.as_str());
                    self.set_authority(FORWARD, kind, distance + extra);
                    return;
                }
            }

            distance += ctx.graph.section_length(element.section);

            let end_signal = ctx.graph.section(element.section).end_signals[element.direction.index()];
            if let Some(signal) = end_signal {
                let aspect = if ctx.graph.signal(signal).is_enabled_for(me) {
                    ctx.graph.signal(signal).aspect
                } else {
                    ctx.interlocking.request_clear(ctx.graph, signal, self)
                };
                if aspect.is_stop() {
                    self.set_authority(FORWARD, EndAuthorityType::Signal, distance);
                } else {
                    self.next_signal[FORWARD] = Some(signal);
                    self.switch_mode(ControlMode::SignalGoverned);
                }
                return;
            }
            index += 1;
        }
    }

    /// Reserves `section` if it is available. Returns the end-of-authority
    /// type and the distance into the section it applies at otherwise.
    fn try_reserve_ahead(
        &self,
        ctx: &mut TickContext<'_>,
        section: SectionId,
        direction: Direction,
    ) -> Option<(EndAuthorityType, f32)> {
        let claimant = self.claimant(FORWARD);
        let result = reservation::check_available(ctx.graph, section, &claimant);
        let is_switch = ctx.graph.section(section).is_switch();
        match result {
            Availability::Available => {
                reservation::reserve(ctx.graph, section, &claimant);
                None
            }
            Availability::OccupiedByOther => {
                let ahead = reservation::test_train_ahead(
                    ctx.graph, ctx.fleet, section, self.id, 0.0, direction,
                );
                Some((EndAuthorityType::TrainAhead, ahead.map_or(0.0, |t| t.distance_m)))
            }
            Availability::ReservedByOther | Availability::Claimed if is_switch => {
                Some((EndAuthorityType::ReservedSwitch, 0.0))
            }
            Availability::ReservedByOther | Availability::Claimed => {
                Some((EndAuthorityType::TrainAhead, 0.0))
            }
            Availability::SignalReserved => Some((EndAuthorityType::Signal, 0.0)),
            Availability::DeadlockTrap | Availability::AlternativePathAwaited => {
                Some((EndAuthorityType::NoPathReserved, 0.0))
            }
        }
    }

    /// Buffer stop or plain end of route at the last window element.
    pub(crate) fn route_end_kind(&self, ctx: &TickContext<'_>) -> EndAuthorityType {
        let route = &self.valid_route[FORWARD];
        let Some(last) = route.last() else {
            return EndAuthorityType::EndOfPath;
        };
        let previous = route
            .len()
            .checked_sub(2)
            .and_then(|i| route.get(i))
            .map(|e| e.section);
        if ctx.graph.section(last.section).exit_pin(last.direction, previous).is_none() {
            EndAuthorityType::EndOfTrack
        } else {
            EndAuthorityType::EndOfPath
        }
    }
}
