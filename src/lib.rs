//! # rs-authority
//!
//! Movement authority for trains sharing a graph-structured track network:
//! section reservation, a lookahead cache of signals and speed posts, the
//! per-train control-mode state machine, deadlock detection and the
//! end-of-authority calculator.
//!
//! ## Features
//!
//! - **Section reservation**: at most one train holds a section; pre-reservations
//!   queue behind occupied sections, claims stop starvation at red signals
//! - **Control modes**: signal-governed, node-governed, manual, explorer and
//!   out-of-control, with a defined recovery from out-of-control
//! - **Deadlock detection**: opposing route overlaps recorded on both trains,
//!   with traps armed on the far end of each region
//! - **Authority**: distance and reason for every train, in both directions
//!   for manual trains
//! - **Deterministic ticks**: trains update in ascending id order
//!
//! ## Architecture
//!
//! Sections, signals and trains live in integer-indexed arenas; every
//! cross-reference is an id.
//!
//! - `track` - Track-circuit graph, section state, signals, traversal
//! - `route` - Routes, subpaths, reversal and waiting points
//! - `reservation` - Per-section reservation protocol
//! - `lookahead` - Cache of upcoming control objects
//! - `control` - Control-mode state machine and per-mode authority
//! - `deadlock` - Opposing-route detector
//! - `train` - Per-train state and the tick pipeline
//! - `simulation` - Context object owning the graph, fleet and collaborators
//! - `traits` - Interlocking and motion seams
//! - `providers` - Concrete interlocking and motion, plus test doubles
//!
//! ## Example
//!
//! ```rust
//! use rs_authority::config::{Config, TrainConfig};
//! use rs_authority::providers::{MockInterlocking, ScriptedMotion};
//! use rs_authority::route::{SubpathRoute, TrainRoute};
//! use rs_authority::track::{Direction, SectionKind, SpeedLimit, TrackGraph};
//! use rs_authority::{ControlMode, EndAuthorityType, Simulation, TrackPosition};
//!
//! // A 500 m section and three 300 m sections, signal at the far end
//! let mut graph = TrackGraph::new();
//! let s0 = graph.add_section(SectionKind::Normal, 500.0);
//! let s1 = graph.add_section(SectionKind::Normal, 300.0);
//! let s2 = graph.add_section(SectionKind::Normal, 300.0);
//! let s3 = graph.add_section(SectionKind::Normal, 300.0);
//! let s4 = graph.add_section(SectionKind::Normal, 300.0);
//! for pair in [s0, s1, s2, s3, s4].windows(2) {
//!     graph.link(pair[0], pair[1]).unwrap();
//! }
//! graph.add_signal(s3, Direction::Forward, SpeedLimit::unrestricted()).unwrap();
//!
//! let mut sim = Simulation::new(graph, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
//! let route = TrainRoute::single(SubpathRoute::forward(sim.graph(), &[s0, s1, s2, s3, s4]).unwrap());
//! let id = sim
//!     .add_train(TrainConfig::default().with_length_m(50.0), route, TrackPosition::new(s0, Direction::Forward, 50.0))
//!     .unwrap();
//!
//! // Update in your main loop
//! sim.tick();
//!
//! let status = sim.status(id).unwrap();
//! assert_eq!(status.mode, ControlMode::NodeGoverned);
//! assert_eq!(status.authority_forward.kind, EndAuthorityType::Signal);
//! assert_eq!(status.authority_forward.distance_m, 1300.0);
//! ```

#![warn(missing_docs)]

/// Distance-triggered pending actions.
pub mod actions;
/// Operator commands and their outcomes.
pub mod commands;
/// Configuration for the control core, trains and the scheduler.
pub mod config;
/// Control-mode state machine and per-mode authority.
pub mod control;
/// Opposing-route deadlock detector.
pub mod deadlock;
/// Error type for setup and lookup failures.
pub mod error;
/// Arena ids.
pub mod ids;
/// Cache of upcoming signals and speed posts.
pub mod lookahead;
/// Positions on the track.
pub mod position;
/// Concrete collaborators and test doubles.
pub mod providers;
/// Per-section reservation protocol.
pub mod reservation;
/// Routes, subpaths, reversal and waiting points.
pub mod route;
/// Simulation context and tick scheduler.
pub mod simulation;
/// Train snapshots for UI/API.
pub mod status;
/// Track-circuit graph.
pub mod track;
/// Per-train state and the tick pipeline.
pub mod train;
/// Collaborator seams.
pub mod traits;

// Re-exports for convenience
pub use commands::{CommandOutcome, OperatorCommand, RejectReason, RetainerSetting};
pub use config::{Config, ControlConfig, SimulationConfig, TrainConfig};
pub use control::{ControlMode, EndAuthority, EndAuthorityType, OutOfControlReason};
pub use deadlock::DeadlockRecord;
pub use error::DispatchError;
pub use ids::{RoutedTrain, SectionId, SignalId, TrainId, BACKWARD, FORWARD};
pub use position::TrackPosition;
pub use simulation::Simulation;
pub use status::TrainStatus;
pub use train::{Fleet, TickContext, Train};
