//! Read-only train snapshots for UI and API consumers.

use crate::config::ShortString;
use crate::control::{ControlMode, EndAuthority, OutOfControlReason};
use crate::ids::{SectionId, SignalId, TrainId, BACKWARD, FORWARD};
use crate::position::TrackPosition;
use crate::train::Train;

/// Snapshot of a train's control state.
///
/// Serializable with the `serde` feature; use [`Train::status`] or
/// [`crate::Simulation::status`] to take one.
///
/// # Example
///
/// ```rust
/// use rs_authority::config::{Config, TrainConfig};
/// use rs_authority::providers::{MockInterlocking, ScriptedMotion};
/// use rs_authority::route::{SubpathRoute, TrainRoute};
/// use rs_authority::track::{Direction, SectionKind, TrackGraph};
/// use rs_authority::{ControlMode, Simulation, TrackPosition};
///
/// let mut graph = TrackGraph::new();
/// let s = graph.add_section(SectionKind::Normal, 300.0);
/// let mut sim = Simulation::new(graph, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
/// let route = TrainRoute::single(SubpathRoute::forward(sim.graph(), &[s]).unwrap());
/// let id = sim
///     .add_train(TrainConfig::default().with_length_m(50.0), route, TrackPosition::new(s, Direction::Forward, 0.0))
///     .unwrap();
///
/// let status = sim.status(id).unwrap();
/// assert_eq!(status.mode, ControlMode::Uninitialized);
/// assert_eq!(status.occupied, vec![s]);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainStatus {
    /// Train id.
    pub id: TrainId,
    /// Display name.
    pub name: ShortString,
    /// Current control mode.
    pub mode: ControlMode,
    /// Why the train is out of control, if it is.
    pub out_of_control_reason: Option<OutOfControlReason>,
    /// Front end.
    pub front: TrackPosition,
    /// Rear end.
    pub rear: TrackPosition,
    /// Current speed (m/s, negative when running backwards).
    pub speed_mps: f32,
    /// Speed the train may run at.
    pub allowed_speed_mps: f32,
    /// Authority ahead of the front.
    pub authority_forward: EndAuthority,
    /// Authority behind the rear (manual modes only).
    pub authority_backward: EndAuthority,
    /// Next signal ahead, cleared or not.
    pub next_signal: Option<SignalId>,
    /// Sections under the train.
    pub occupied: Vec<SectionId>,
    /// True while the train holds a claim.
    pub claiming: bool,
    /// True while the train is braking to a stand.
    pub emergency_braking: bool,
}

impl Train {
    /// Takes a snapshot of the train's control state.
    pub fn status(&self) -> TrainStatus {
        TrainStatus {
            id: self.id,
            name: self.config.name.clone(),
            mode: self.mode,
            out_of_control_reason: self.out_of_control_reason,
            front: self.front,
            rear: self.rear,
            speed_mps: self.speed_mps,
            allowed_speed_mps: self.allowed_speed_mps,
            authority_forward: self.end_authority[FORWARD],
            authority_backward: self.end_authority[BACKWARD],
            next_signal: self.next_signal[FORWARD]
                .or_else(|| self.lookahead.next_signal().map(|e| e.object)),
            occupied: self.occupied.clone(),
            claiming: self.claim.active,
            emergency_braking: self.emergency_braking,
        }
    }
}
