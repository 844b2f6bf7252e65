//! Signal-governed authority and claims.
//!
//! While a signal ahead is cleared for the train, its authority runs to the
//! first signal at stop in the lookahead cache, or to the end of the
//! sections reserved for it. The train keeps asking the interlocking to
//! clear that signal each tick.
//!
//! # Claims
//!
//! A train standing at a red signal for longer than the claim wait raises a
//! claim on the sections beyond it, up to the next signal. Claimed sections
//! are refused to everyone else, so the blocking train's successors cannot
//! overtake the waiting one. An automatic train standing in the window
//! will move on and does not stop the claim. A claim is dropped once the
//! window holds something that will not move: a train between the front
//! and the signal, a manual, explorer or out-of-control train in the
//! window, or a deadlock trap or record covering it.

use crate::control::{ControlMode, EndAuthorityType};
use crate::ids::{RoutedTrain, SectionId, SignalId, TrainId, FORWARD};
use crate::reservation;
use crate::track::TrackGraph;
use crate::train::{TickContext, Train};

impl Train {
    pub(crate) fn update_signal_mode(&mut self, ctx: &mut TickContext<'_>) {
        let governing = self
            .next_signal[FORWARD]
            .filter(|&s| ctx.graph.signal(s).is_enabled_for(self.id));
        if governing.is_none() {
            if let Some(lost) = self.next_signal[FORWARD].take() {
                log::debug!("{} lost clearance of {}", self.id, lost);
            }
            self.switch_mode(ControlMode::NodeGoverned);
            self.update_node_mode(ctx);
            return;
        }

        if let Some(stop) = self.lookahead.first_stop_signal().map(|e| e.object) {
            let aspect = ctx.interlocking.request_clear(ctx.graph, stop, self);
            if !aspect.is_stop() {
                log::debug!("{} cleared {} ahead", self.id, stop);
            }
        }
    }

    /// Authority to the first signal at stop, else to the end of the
    /// sections held along the window.
    pub(crate) fn update_signal_authority(&mut self, ctx: &TickContext<'_>) {
        if let Some(stop) = self.lookahead.first_stop_signal() {
            let distance = stop.distance_m;
            self.set_authority(FORWARD, EndAuthorityType::Signal, distance);
            return;
        }
        let Some(front_index) = self.front.route_index else {
            return;
        };

        let max = ctx.config.min_check_distance_m;
        let route = &self.valid_route[FORWARD];
        let mut distance = -self.front.offset_m;
        let mut kind = EndAuthorityType::EndOfAuthority;
        for (i, element) in route.iter().enumerate().skip(front_index) {
            let st = &ctx.graph.section(element.section).state;
            if !(st.is_reserved_by(self.id) || st.is_occupied_by(self.id)) {
                break;
            }
            distance += ctx.graph.section_length(element.section);
            if distance >= max {
                kind = EndAuthorityType::MaxDistance;
                distance = max;
                break;
            }
            if i + 1 == route.len() {
                kind = self.route_end_kind(ctx);
            }
        }
        self.set_authority(FORWARD, kind, distance);
    }

    // ========================================================================
    // Claims
    // ========================================================================

    pub(crate) fn update_claims(&mut self, ctx: &mut TickContext<'_>) {
        if !self.mode.is_automatic() {
            return;
        }
        let Some(stop) = self
            .lookahead
            .next_signal()
            .filter(|e| e.is_stop_signal())
            .map(|e| e.object)
        else {
            self.release_claims(ctx.graph, false);
            return;
        };

        let window = self.claim_window(ctx.graph, stop);
        if window.is_empty() {
            self.release_claims(ctx.graph, false);
            return;
        }
        if self.claim_blocked(ctx, stop, &window) {
            if self.claim.active {
                log::info!("{} drops its claim beyond {}", self.id, stop);
            }
            self.release_claims(ctx.graph, true);
            return;
        }

        let routed = RoutedTrain::forward(self.id);
        if self.claim.active {
            for &section in &window {
                if !self.claim.sections.contains(&section) {
                    reservation::claim(ctx.graph, section, routed);
                    self.claim.sections.push(section);
                }
            }
            return;
        }

        if !ctx.config.is_stationary(self.speed_mps) {
            return;
        }
        self.claim.wait_s += ctx.dt_s;
        if self.claim.wait_s >= ctx.config.claim_wait_s {
            for &section in &window {
                reservation::claim(ctx.graph, section, routed);
            }
            log::info!(
                "{} claims {} sections beyond {} after {:.0} s",
                self.id,
                window.len(),
                stop,
                self.claim.wait_s
            );
            self.claim.active = true;
            self.claim.sections = window;
        }
    }

    /// Withdraws every claim. With `drop_reservations`, sections reserved
    /// under the claim and not occupied are released too.
    pub(crate) fn release_claims(&mut self, graph: &mut TrackGraph, drop_reservations: bool) {
        for section in std::mem::take(&mut self.claim.sections) {
            reservation::unclaim(graph, section, self.id);
            if drop_reservations {
                reservation::unreserve(graph, section, self.id);
            }
        }
        self.claim.active = false;
        self.claim.wait_s = 0.0;
    }

    /// Route sections after `signal` up to the next signal or route end.
    fn claim_window(&self, graph: &TrackGraph, signal: SignalId) -> Vec<SectionId> {
        let route = &self.valid_route[FORWARD];
        let from = self.front.route_index.unwrap_or(0);
        let Some(start) = route.index_of(graph.signal(signal).section, from) else {
            return Vec::new();
        };
        let mut window = Vec::new();
        for element in route.iter().skip(start + 1) {
            window.push(element.section);
            if graph.section(element.section).end_signals[element.direction.index()].is_some() {
                break;
            }
        }
        window
    }

    fn claim_blocked(&self, ctx: &TickContext<'_>, signal: SignalId, window: &[SectionId]) -> bool {
        let me = self.id;
        let route = &self.valid_route[FORWARD];
        let from = self.front.route_index.unwrap_or(0);
        let signal_index = route.index_of(ctx.graph.signal(signal).section, from);
        let train_before_signal = signal_index.map_or(false, |end| {
            route
                .iter()
                .skip(from)
                .take(end + 1 - from)
                .any(|e| ctx.graph.section(e.section).state.is_occupied_by_other(me))
        });
        if train_before_signal {
            return true;
        }

        let stays_put = |train: TrainId| {
            train != me
                && ctx.fleet.get(train).map_or(false, |t| {
                    t.mode.is_manual() || t.mode == ControlMode::OutOfControl
                })
        };
        window.iter().any(|&id| {
            let section = ctx.graph.section(id);
            let st = &section.state;
            st.occupied_by.iter().any(|r| stays_put(r.train))
                || st.reserved_by.map_or(false, |r| stays_put(r.train))
                || section.has_trap_for(me)
                || self.deadlocks.contains_key(id)
        })
    }
}
