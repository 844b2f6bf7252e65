//! Safety violations and recovery.
//!
//! A train goes out of control when it passes a signal at stop, enters a
//! section it holds no reservation for, leaves its route, rolls back into
//! someone else's track or runs through a switch set against it. The core
//! then demands an emergency stop. Once the train stands still it gives up
//! every reservation outside its body and, if both ends are back on the
//! active subpath, returns to node mode.

use crate::control::{ControlMode, EndAuthority, EndAuthorityType, OutOfControlReason};
use crate::deadlock;
use crate::ids::FORWARD;
use crate::route::RouteElement;
use crate::train::{TickContext, Train};

impl Train {
    /// Puts the train out of control and starts emergency braking.
    pub(crate) fn set_out_of_control(&mut self, reason: OutOfControlReason, ctx: &mut TickContext<'_>) {
        log::warn!(
            "{} ({}) out of control: {}",
            self.id,
            self.config.name,
            reason.as_str()
        );
        self.out_of_control_reason = Some(reason);
        self.emergency_braking = true;
        self.release_claims(ctx.graph, true);
        self.end_authority = [EndAuthority::new(EndAuthorityType::NoPathReserved, 0.0); 2];
        self.switch_mode(ControlMode::OutOfControl);
    }

    pub(crate) fn update_out_of_control(&mut self, ctx: &mut TickContext<'_>) {
        if !ctx.config.is_stationary(self.speed_mps) {
            self.emergency_braking = true;
            return;
        }
        self.emergency_braking = false;

        self.release_authority(ctx);
        self.actions.clear();
        self.rebuild_occupation(ctx);

        if self.rebuild_route_from_path() {
            log::info!("{} back on its path, recovering", self.id);
            self.out_of_control_reason = None;
            self.switch_mode(ControlMode::NodeGoverned);
            deadlock::check_deadlock(self, ctx.graph, ctx.fleet);
        }
    }

    /// Detects backward movement beyond the hysteresis. Returns true if
    /// the train moved backwards this tick.
    pub(crate) fn check_backward_slip(&mut self, ctx: &mut TickContext<'_>) -> bool {
        let config = ctx.config;
        if self.backward_m <= config.backward_threshold_m {
            return false;
        }
        self.backward_m = 0.0;
        let me = self.id;
        let rear = self.rear;
        log::debug!("{} moving backwards, rear in {}", me, rear.section);

        let held_by_other = {
            let st = &ctx.graph.section(rear.section).state;
            st.is_occupied_by_other(me) || st.is_reserved_by_other(me)
        };
        if held_by_other {
            self.set_out_of_control(OutOfControlReason::SlippedIntoPath, ctx);
            return true;
        }

        let behind = rear.reversed(ctx.graph);
        let buffer = ctx
            .graph
            .section(rear.section)
            .exit_pin(behind.direction, None)
            .is_none();
        if buffer && rear.offset_m < config.backward_threshold_m {
            self.set_out_of_control(OutOfControlReason::SlippedOffTrack, ctx);
            return true;
        }

        // Track behind is safe up to the first signal protecting it.
        let mut slipped_into = None;
        for step in ctx.graph.walk(&behind, None).skip(1) {
            if step.start_m > config.rear_signal_overlap_m {
                break;
            }
            let section = ctx.graph.section(step.section);
            if section.end_signals[step.direction.reverse().index()].is_some() {
                break;
            }
            if section.state.is_occupied_by_other(me) || section.state.is_reserved_by_other(me) {
                slipped_into = Some(step.section);
                break;
            }
        }
        if let Some(section) = slipped_into {
            log::warn!("{} rolling back towards {}", me, section);
            self.set_out_of_control(OutOfControlReason::SlippedIntoPath, ctx);
            return true;
        }

        if !self.occupied.contains(&rear.section) {
            log::warn!("{} rear rolled back into {}", me, rear.section);
            self.valid_route[FORWARD].prepend(RouteElement::new(rear.section, rear.direction));
            self.locate();
            self.occupy(ctx.graph, rear.section);
        }
        true
    }
}
