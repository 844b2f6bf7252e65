//! Control-mode state machine and end-of-authority types.
//!
//! Every train runs in exactly one [`ControlMode`]. The mode decides how
//! its authority (how far it may go, and why it must stop there) is
//! refreshed each tick:
//!
//! | Mode | Authority from | Module |
//! |------|----------------|--------|
//! | [`SignalGoverned`](ControlMode::SignalGoverned) | first signal at stop in the lookahead cache | [`signal_mode`] |
//! | [`NodeGoverned`](ControlMode::NodeGoverned) | last section reserved along the route | [`node_mode`] |
//! | [`Manual`](ControlMode::Manual) / [`Explorer`](ControlMode::Explorer) | path windows rebuilt from both train ends | [`manual`] |
//! | [`OutOfControl`](ControlMode::OutOfControl) | none; emergency braking, then recovery | [`out_of_control`] |
//!
//! # Transitions
//!
//! ```text
//!  Uninitialized ──first tick──▶ NodeGoverned ◀──next signal missing / refused── SignalGoverned
//!                                   │  ▲                                                 ▲
//!                                   │  └────────────── signal cleared ───────────────────┘
//!   any automatic mode ──safety violation──▶ OutOfControl ──stationary, back on path──▶ NodeGoverned
//!   stationary automatic ──operator──▶ Manual / Explorer ──operator, on path──▶ NodeGoverned
//! ```
//!
//! The per-mode logic lives in `impl Train` blocks in the submodules.

pub mod manual;
pub mod node_mode;
pub mod out_of_control;
pub mod signal_mode;

use crate::train::Train;

/// Operating mode of a train.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ControlMode {
    /// Placed but not yet asked for authority.
    #[default]
    Uninitialized,
    /// Authority granted by a cleared signal ahead.
    SignalGoverned,
    /// Authority from reserved sections, no cleared signal ahead.
    NodeGoverned,
    /// Operator-directed, path windows in both directions.
    Manual,
    /// Manual with automatic clearance requests for signals ahead.
    Explorer,
    /// Safety violation; braking and waiting for recovery.
    OutOfControl,
}

impl ControlMode {
    /// True for signal- and node-governed modes.
    #[inline]
    pub const fn is_automatic(self) -> bool {
        matches!(self, ControlMode::SignalGoverned | ControlMode::NodeGoverned)
    }

    /// True for manual and explorer modes.
    #[inline]
    pub const fn is_manual(self) -> bool {
        matches!(self, ControlMode::Manual | ControlMode::Explorer)
    }

    /// Returns the mode as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ControlMode::Uninitialized => "uninitialized",
            ControlMode::SignalGoverned => "signal_governed",
            ControlMode::NodeGoverned => "node_governed",
            ControlMode::Manual => "manual",
            ControlMode::Explorer => "explorer",
            ControlMode::OutOfControl => "out_of_control",
        }
    }
}

/// Why a train went out of control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OutOfControlReason {
    /// Passed a signal at stop without permission.
    PassedSignalAtStop,
    /// Entered a section it held no reservation for.
    OutOfAuthority,
    /// Left its validated route and no route could be rebuilt.
    OutOfPath,
    /// Rolled back into a section held by another train.
    SlippedIntoPath,
    /// Rolled back off the end of the track.
    SlippedOffTrack,
    /// Occupied a switch set against it.
    MisalignedSwitch,
}

impl OutOfControlReason {
    /// Returns the reason as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OutOfControlReason::PassedSignalAtStop => "passed_signal_at_stop",
            OutOfControlReason::OutOfAuthority => "out_of_authority",
            OutOfControlReason::OutOfPath => "out_of_path",
            OutOfControlReason::SlippedIntoPath => "slipped_into_path",
            OutOfControlReason::SlippedOffTrack => "slipped_off_track",
            OutOfControlReason::MisalignedSwitch => "misaligned_switch",
        }
    }
}

/// Why authority ends where it does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EndAuthorityType {
    /// Buffer stop.
    EndOfTrack,
    /// Last section of the route.
    EndOfPath,
    /// Switch ahead held by another train or set against this one.
    ReservedSwitch,
    /// Route runs back into itself.
    Loop,
    /// Another train ahead.
    TrainAhead,
    /// Lookahead distance reached.
    MaxDistance,
    /// Nothing could be reserved.
    #[default]
    NoPathReserved,
    /// Signal at stop.
    Signal,
    /// End of the reservations granted with the last cleared signal.
    EndOfAuthority,
}

impl EndAuthorityType {
    /// Returns the type as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndAuthorityType::EndOfTrack => "end_of_track",
            EndAuthorityType::EndOfPath => "end_of_path",
            EndAuthorityType::ReservedSwitch => "reserved_switch",
            EndAuthorityType::Loop => "loop",
            EndAuthorityType::TrainAhead => "train_ahead",
            EndAuthorityType::MaxDistance => "max_distance",
            EndAuthorityType::NoPathReserved => "no_path_reserved",
            EndAuthorityType::Signal => "signal",
            EndAuthorityType::EndOfAuthority => "end_of_authority",
        }
    }
}

/// Authority in one direction.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndAuthority {
    /// Why it ends.
    pub kind: EndAuthorityType,
    /// Distance from the train end in metres.
    pub distance_m: f32,
}

impl EndAuthority {
    /// Authority of `kind` at `distance_m`, never negative.
    pub fn new(kind: EndAuthorityType, distance_m: f32) -> Self {
        Self {
            kind,
            distance_m: distance_m.max(0.0),
        }
    }
}

impl Train {
    /// Changes mode, logging the transition.
    pub(crate) fn switch_mode(&mut self, mode: ControlMode) {
        if self.mode != mode {
            log::info!(
                "{} ({}) {} -> {}",
                self.id,
                self.config.name,
                self.mode.as_str(),
                mode.as_str()
            );
            self.mode = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_groups() {
        assert!(ControlMode::SignalGoverned.is_automatic());
        assert!(ControlMode::NodeGoverned.is_automatic());
        assert!(!ControlMode::Manual.is_automatic());
        assert!(ControlMode::Explorer.is_manual());
        assert!(!ControlMode::OutOfControl.is_manual());
        assert_eq!(ControlMode::default(), ControlMode::Uninitialized);
    }

    #[test]
    fn authority_never_negative() {
        let a = EndAuthority::new(EndAuthorityType::Signal, -4.0);
        assert_eq!(a.distance_m, 0.0);
        assert_eq!(a.kind.as_str(), "signal");
    }
}
