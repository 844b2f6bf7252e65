//! Operator commands and their outcomes.
//!
//! This module defines the discrete requests an operator can make of a
//! train, and how the core answers them.
//!
//! # Command Flow
//!
//! 1. A command arrives through [`crate::Simulation::command`] for one train
//! 2. Every command requires the train to be stationary
//! 3. The command is checked against the train's mode and the track state
//! 4. It is applied, or rejected with a [`RejectReason`] and no state change
//!
//! # Commands
//!
//! | Command | Effect |
//! |---------|--------|
//! | [`ToggleManual`](OperatorCommand::ToggleManual) | enter manual mode, or return to automatic |
//! | [`ToggleExplorer`](OperatorCommand::ToggleExplorer) | enter explorer mode, or return to automatic |
//! | [`RequestSignalPermission`](OperatorCommand::RequestSignalPermission) | pass the next signal at stop |
//! | [`SetSwitchByDirection`](OperatorCommand::SetSwitchByDirection) | throw the first switch ahead or behind |
//! | [`SetSwitch`](OperatorCommand::SetSwitch) | throw a named switch |
//! | [`SetHandbrake`](OperatorCommand::SetHandbrake) | apply or release the handbrake |
//! | [`SetRetainers`](OperatorCommand::SetRetainers) | set the retainer valves |
//!
//! # Example
//!
//! ```rust
//! use rs_authority::{CommandOutcome, OperatorCommand, RejectReason};
//!
//! fn report(outcome: &CommandOutcome) -> String {
//!     match outcome {
//!         CommandOutcome::Applied => "done".to_string(),
//!         CommandOutcome::ModeChanged { to, .. } => format!("now {}", to.as_str()),
//!         CommandOutcome::Rejected { reason } => reason.message().to_string(),
//!     }
//! }
//!
//! let outcome = CommandOutcome::Rejected { reason: RejectReason::NotStationary };
//! assert_eq!(report(&outcome), "train must be stationary");
//! let _ = OperatorCommand::SetSwitchByDirection { ahead: true };
//! ```

use crate::control::ControlMode;
use crate::deadlock;
use crate::error::DispatchError;
use crate::ids::{SectionId, BACKWARD, FORWARD};
use crate::position::TrackPosition;
use crate::route::SubpathRoute;
use crate::track::{ObjectFilter, SectionKind};
use crate::train::{TickContext, Train};

// ============================================================================
// Commands
// ============================================================================

/// Discrete operator request for one train.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OperatorCommand {
    /// Switch to manual mode, or back to automatic from manual.
    ToggleManual,
    /// Switch to explorer mode, or back to automatic from explorer.
    ToggleExplorer,
    /// Ask the interlocking for permission to pass the next signal at stop.
    RequestSignalPermission,
    /// Throw the first switch in the window ahead (`true`) or behind.
    ///
    /// Manual and explorer modes only.
    SetSwitchByDirection {
        /// Window to search.
        ahead: bool,
    },
    /// Throw the junction in `section`.
    SetSwitch {
        /// Junction section.
        section: SectionId,
    },
    /// Apply (`true`) or release the handbrake.
    SetHandbrake(bool),
    /// Set the retainer valves.
    SetRetainers(RetainerSetting),
}

/// Retainer valve setting of a freight consist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RetainerSetting {
    /// Brake cylinders exhaust normally.
    #[default]
    Exhaust,
    /// Retain high pressure.
    HighPressure,
    /// Retain low pressure.
    LowPressure,
    /// Slow direct release.
    SlowDirect,
}

impl RetainerSetting {
    /// Returns the setting as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RetainerSetting::Exhaust => "exhaust",
            RetainerSetting::HighPressure => "high_pressure",
            RetainerSetting::LowPressure => "low_pressure",
            RetainerSetting::SlowDirect => "slow_direct",
        }
    }
}

// ============================================================================
// Command Outcome
// ============================================================================

/// Result of applying an operator command.
///
/// Returned by [`crate::Simulation::command`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CommandOutcome {
    /// Command was applied; the mode did not change.
    Applied,

    /// Command was applied and changed the control mode.
    ModeChanged {
        /// Mode before the command.
        from: ControlMode,
        /// Mode after the command.
        to: ControlMode,
    },

    /// Command was refused; nothing changed.
    ///
    /// See [`RejectReason`] for why.
    Rejected {
        /// Why the command was rejected.
        reason: RejectReason,
    },
}

impl CommandOutcome {
    /// True unless the command was rejected.
    pub fn is_applied(&self) -> bool {
        !matches!(self, CommandOutcome::Rejected { .. })
    }
}

impl From<RejectReason> for CommandOutcome {
    fn from(reason: RejectReason) -> Self {
        CommandOutcome::Rejected { reason }
    }
}

/// Reason an operator command was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RejectReason {
    /// The train is moving.
    NotStationary,

    /// The front is not on the train's path.
    NotOnPath,

    /// Returning to the path implies a reversal and the rear is not on it.
    RearNotOnPath,

    /// No signal within the lookahead distance.
    NoSignalAhead,

    /// The next signal is already cleared for the train.
    SignalNotAtStop,

    /// The interlocking refused permission.
    PermissionRefused,

    /// No switch in the requested window.
    NoSwitchFound,

    /// The named section is not a junction.
    NotASwitch,

    /// A train stands on the switch.
    SwitchOccupied,

    /// The switch is reserved, by another train or by this one's
    /// automatic route.
    SwitchReserved,

    /// The command needs manual or explorer mode.
    NotInManualMode,
}

impl RejectReason {
    /// Human-readable explanation.
    pub const fn message(&self) -> &'static str {
        match self {
            RejectReason::NotStationary => "train must be stationary",
            RejectReason::NotOnPath => "train is not on its path",
            RejectReason::RearNotOnPath => "rear of train is not on its path",
            RejectReason::NoSignalAhead => "no signal ahead",
            RejectReason::SignalNotAtStop => "signal is not at stop",
            RejectReason::PermissionRefused => "permission refused",
            RejectReason::NoSwitchFound => "no switch found",
            RejectReason::NotASwitch => "section is not a switch",
            RejectReason::SwitchOccupied => "switch is occupied",
            RejectReason::SwitchReserved => "switch is reserved",
            RejectReason::NotInManualMode => "train is not in manual mode",
        }
    }
}

// ============================================================================
// Applying Commands
// ============================================================================

impl Train {
    /// Validates and applies an operator command.
    pub(crate) fn apply_command(
        &mut self,
        command: OperatorCommand,
        ctx: &mut TickContext<'_>,
    ) -> Result<CommandOutcome, DispatchError> {
        if !ctx.config.is_stationary(self.speed_mps) {
            return Ok(RejectReason::NotStationary.into());
        }

        let outcome = match command {
            OperatorCommand::ToggleManual => self.toggle_manual(ControlMode::Manual, ctx),
            OperatorCommand::ToggleExplorer => self.toggle_manual(ControlMode::Explorer, ctx),
            OperatorCommand::RequestSignalPermission => self.request_signal_permission(ctx),
            OperatorCommand::SetSwitchByDirection { ahead } => {
                self.set_switch_by_direction(ahead, ctx)
            }
            OperatorCommand::SetSwitch { section } => self.throw_switch(section, None, ctx)?,
            OperatorCommand::SetHandbrake(applied) => {
                self.handbrake = applied;
                log::info!("{} handbrake {}", self.id, if applied { "applied" } else { "released" });
                CommandOutcome::Applied
            }
            OperatorCommand::SetRetainers(setting) => {
                self.retainers = setting;
                log::info!("{} retainers {}", self.id, setting.as_str());
                CommandOutcome::Applied
            }
        };
        if let CommandOutcome::Rejected { reason } = &outcome {
            log::info!("{} command {:?} rejected: {}", self.id, command, reason.message());
        }
        Ok(outcome)
    }

    fn toggle_manual(&mut self, target: ControlMode, ctx: &mut TickContext<'_>) -> CommandOutcome {
        if self.mode == target {
            return self.return_to_automatic(ctx);
        }
        let from = self.mode;
        if from.is_manual() {
            // Manual and explorer share their windows.
            self.switch_mode(target);
            self.rebuild_windows(ctx);
            return CommandOutcome::ModeChanged { from, to: target };
        }

        self.release_authority(ctx);
        self.actions.clear_sections();
        for section in ctx.graph.sections_mut() {
            section.forget_deadlocks_of(self.id);
        }
        self.valid_route[FORWARD] = SubpathRoute::new();
        self.locate();
        self.out_of_control_reason = None;
        self.emergency_braking = false;
        self.switch_mode(target);
        deadlock::check_deadlock(self, ctx.graph, ctx.fleet);

        self.rebuild_occupation(ctx);
        self.rebuild_windows(ctx);
        self.refresh_lookahead(ctx, false);
        CommandOutcome::ModeChanged { from, to: target }
    }

    fn return_to_automatic(&mut self, ctx: &mut TickContext<'_>) -> CommandOutcome {
        let Some(active) = self.route.active() else {
            return RejectReason::NotOnPath.into();
        };
        let front_direction = active
            .index_of(self.front.section, 0)
            .and_then(|i| active.get(i))
            .map(|e| e.direction);

        let (front, rear): (TrackPosition, TrackPosition) = match front_direction {
            Some(d) if d == self.front.direction => (self.front, self.rear),
            Some(_) => (self.rear.reversed(ctx.graph), self.front.reversed(ctx.graph)),
            None => return RejectReason::NotOnPath.into(),
        };
        let Some(window) = self.path_window(&rear, &front) else {
            return RejectReason::RearNotOnPath.into();
        };

        let from = self.mode;
        self.release_authority(ctx);
        if front.section != self.front.section || front.direction != self.front.direction {
            log::info!("{} reversing to rejoin its path", self.id);
        }
        self.front = front;
        self.rear = rear;
        self.previous_front = front;
        self.previous_rear = rear;
        self.valid_route = [window, SubpathRoute::new()];
        self.locate();
        self.rebuild_occupation(ctx);
        self.switch_mode(ControlMode::NodeGoverned);
        deadlock::check_deadlock(self, ctx.graph, ctx.fleet);
        CommandOutcome::ModeChanged {
            from,
            to: ControlMode::NodeGoverned,
        }
    }

    fn request_signal_permission(&mut self, ctx: &mut TickContext<'_>) -> CommandOutcome {
        let signal = self.lookahead.next_signal().map(|e| e.object).or_else(|| {
            ctx.graph
                .find_next_object(
                    &self.front,
                    Some(&self.valid_route[FORWARD]),
                    ctx.config.min_check_distance_m,
                    ObjectFilter::Signals,
                )
                .map(|hit| hit.object)
        });
        let Some(signal) = signal else {
            return RejectReason::NoSignalAhead.into();
        };
        if !ctx.graph.signal(signal).aspect_for(self.id).is_stop() {
            return RejectReason::SignalNotAtStop.into();
        }
        if !ctx.interlocking.request_permission(ctx.graph, signal, self) {
            return RejectReason::PermissionRefused.into();
        }

        log::info!("{} granted permission to pass {}", self.id, signal);
        self.next_signal[FORWARD] = Some(signal);
        if self.mode == ControlMode::NodeGoverned {
            let from = self.mode;
            self.switch_mode(ControlMode::SignalGoverned);
            return CommandOutcome::ModeChanged {
                from,
                to: ControlMode::SignalGoverned,
            };
        }
        CommandOutcome::Applied
    }

    fn set_switch_by_direction(&mut self, ahead: bool, ctx: &mut TickContext<'_>) -> CommandOutcome {
        if !self.mode.is_manual() {
            return RejectReason::NotInManualMode.into();
        }
        let d = if ahead { FORWARD } else { BACKWARD };
        let window = &self.valid_route[d];

        // A switch set against the window is aligned for it; otherwise the
        // first junction on or just beyond the window is thrown.
        let target = match self.misaligned_switch[d] {
            Some(switch) => Some((switch, window.last().map(|e| e.section))),
            None => window
                .iter()
                .skip(1)
                .find(|e| ctx.graph.section(e.section).kind == SectionKind::Junction)
                .map(|e| e.section)
                .or_else(|| {
                    let last = window.last()?;
                    let previous = window
                        .len()
                        .checked_sub(2)
                        .and_then(|i| window.get(i))
                        .map(|e| e.section);
                    let pin = ctx.graph.section(last.section).exit_pin(last.direction, previous)?;
                    (ctx.graph.section(pin.section).kind == SectionKind::Junction).then_some(pin.section)
                })
                .map(|switch| (switch, None)),
        };
        let Some((switch, align_from)) = target else {
            return RejectReason::NoSwitchFound.into();
        };
        match self.throw_switch(switch, align_from, ctx) {
            Ok(outcome) => outcome,
            Err(_) => RejectReason::NoSwitchFound.into(),
        }
    }

    /// Throws `section`, or aligns it for a trailing move from `align_from`.
    fn throw_switch(
        &mut self,
        section: SectionId,
        align_from: Option<SectionId>,
        ctx: &mut TickContext<'_>,
    ) -> Result<CommandOutcome, DispatchError> {
        let me = self.id;
        let s = ctx
            .graph
            .get_section(section)
            .ok_or(DispatchError::UnknownSection(section))?;
        if s.kind != SectionKind::Junction {
            return Ok(RejectReason::NotASwitch.into());
        }
        if s.state.is_occupied() {
            return Ok(RejectReason::SwitchOccupied.into());
        }
        if s.state.is_reserved_by_other(me) || (s.state.is_reserved_by(me) && !self.mode.is_manual()) {
            return Ok(RejectReason::SwitchReserved.into());
        }

        let s = ctx.graph.section_mut(section);
        let aligned = match (align_from, s.facing_direction()) {
            (Some(from), Some(facing)) => {
                s.align(facing.reverse(), Some(from), None);
                true
            }
            _ => false,
        };
        if !aligned {
            s.switch_position = 1 - s.switch_position.min(1);
        }
        log::info!("{} set {} to slot {}", me, section, s.switch_position);

        if self.mode.is_manual() {
            self.rebuild_windows(ctx);
            self.refresh_lookahead(ctx, false);
        }
        Ok(CommandOutcome::Applied)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // === RejectReason Tests ===

    #[test]
    fn reject_reason_messages() {
        assert_eq!(RejectReason::NotStationary.message(), "train must be stationary");
        assert_eq!(RejectReason::SwitchOccupied.message(), "switch is occupied");
        assert_ne!(RejectReason::NotOnPath, RejectReason::RearNotOnPath);
    }

    // === CommandOutcome Tests ===

    #[test]
    fn outcome_from_reason() {
        let outcome: CommandOutcome = RejectReason::NoSwitchFound.into();
        assert_eq!(
            outcome,
            CommandOutcome::Rejected {
                reason: RejectReason::NoSwitchFound
            }
        );
        assert!(!outcome.is_applied());
        assert!(CommandOutcome::Applied.is_applied());
    }

    #[test]
    fn mode_change_is_applied() {
        let outcome = CommandOutcome::ModeChanged {
            from: ControlMode::NodeGoverned,
            to: ControlMode::Manual,
        };
        assert!(outcome.is_applied());
    }

    // === RetainerSetting Tests ===

    #[test]
    fn retainers_default_to_exhaust() {
        assert_eq!(RetainerSetting::default(), RetainerSetting::Exhaust);
        assert_eq!(RetainerSetting::HighPressure.as_str(), "high_pressure");
    }
}
