//! Simulation context: the track, the fleet and the collaborators.
//!
//! This module provides [`Simulation`], the object that owns everything a
//! tick touches and runs the trains one after another.
//!
//! # Overview
//!
//! The simulation:
//! - Places trains on the network and releases them on removal
//! - Runs each tick in ascending [`TrainId`] order, so reservation races and
//!   deadlock outcomes are reproducible
//! - Routes operator commands to the train they address
//! - Provides [`TrainStatus`] snapshots for UI/API
//!
//! # Example
//!
//! ```rust
//! use rs_authority::config::{Config, TrainConfig};
//! use rs_authority::providers::{MockInterlocking, ScriptedMotion};
//! use rs_authority::route::{SubpathRoute, TrainRoute};
//! use rs_authority::track::{Direction, SectionKind, TrackGraph};
//! use rs_authority::{ControlMode, Simulation, TrackPosition};
//!
//! // Three sections in a line
//! let mut graph = TrackGraph::new();
//! let a = graph.add_section(SectionKind::Normal, 500.0);
//! let b = graph.add_section(SectionKind::Normal, 500.0);
//! let c = graph.add_section(SectionKind::EndOfTrack, 200.0);
//! graph.link(a, b).unwrap();
//! graph.link(b, c).unwrap();
//!
//! let mut sim = Simulation::new(graph, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
//!
//! let route = TrainRoute::single(SubpathRoute::forward(sim.graph(), &[a, b, c]).unwrap());
//! let rear = TrackPosition::new(a, Direction::Forward, 10.0);
//! let id = sim.add_train(TrainConfig::default().with_length_m(80.0), route, rear).unwrap();
//!
//! // Main loop - call tick() every simulation step
//! sim.tick();
//!
//! let status = sim.status(id).unwrap();
//! assert_eq!(status.mode, ControlMode::NodeGoverned);
//! ```

use crate::commands::{CommandOutcome, OperatorCommand};
use crate::config::{Config, ControlConfig, TrainConfig};
use crate::deadlock;
use crate::error::DispatchError;
use crate::ids::TrainId;
use crate::position::TrackPosition;
use crate::reservation;
use crate::route::TrainRoute;
use crate::status::TrainStatus;
use crate::track::TrackGraph;
use crate::traits::{Interlocking, MotionModel};
use crate::train::{Fleet, TickContext, Train};

/// Track network, trains and collaborators under one tick loop.
///
/// # Type Parameters
///
/// - `I`: the signal interlocking ([`Interlocking`] trait)
/// - `M`: the source of train movement ([`MotionModel`] trait)
///
/// # Thread Safety
///
/// Ticks are strictly sequential and the simulation is not thread-safe. A
/// caller sharing it between threads wraps it in `Arc<Mutex<Simulation>>`.
pub struct Simulation<I: Interlocking, M: MotionModel> {
    graph: TrackGraph,
    fleet: Fleet,
    interlocking: I,
    motion: M,
    config: Config,
    elapsed_s: f32,
}

impl<I: Interlocking, M: MotionModel> Simulation<I, M> {
    /// Create a simulation over a built network
    pub fn new(graph: TrackGraph, interlocking: I, motion: M, config: Config) -> Self {
        Self {
            graph,
            fleet: Fleet::new(),
            interlocking,
            motion,
            config,
            elapsed_s: 0.0,
        }
    }

    // ========================================================================
    // Trains
    // ========================================================================

    /// Places a train with its rear at `rear` on the active subpath of
    /// `route`.
    ///
    /// Every section under the train must be free of other trains. The
    /// train occupies its body at once and takes authority on the next
    /// tick.
    pub fn add_train(
        &mut self,
        config: TrainConfig,
        route: TrainRoute,
        rear: TrackPosition,
    ) -> Result<TrainId, DispatchError> {
        let id = self.fleet.next_id();
        let mut train = Train::place(id, config, route, rear, &self.graph, &self.config.control)?;

        let (body, _) = train.body_sections(&self.graph);
        for &(section, _) in &body {
            let st = &self.graph.section(section).state;
            if st.is_occupied_by_other(id) || st.is_reserved_by_other(id) {
                return Err(DispatchError::SectionUnavailable { section, train: id });
            }
        }

        {
            let mut ctx = TickContext {
                graph: &mut self.graph,
                fleet: &mut self.fleet,
                interlocking: &mut self.interlocking,
                config: &self.config.control,
                dt_s: 0.0,
            };
            train.rebuild_occupation(&mut ctx);
            deadlock::check_deadlock(&mut train, ctx.graph, ctx.fleet);
        }
        log::info!(
            "{} ({}) placed with rear in {}",
            id,
            train.name(),
            train.rear().section
        );
        self.fleet.insert(train);
        Ok(id)
    }

    /// Removes a train and every trace it left on the network.
    pub fn remove_train(&mut self, id: TrainId) -> Result<Train, DispatchError> {
        let train = self.fleet.remove(id).ok_or(DispatchError::UnknownTrain(id))?;
        self.release_train(id);
        log::info!("{} ({}) removed", id, train.name());
        Ok(train)
    }

    /// Couples `absorb` onto the rear of `keep`.
    ///
    /// The absorbed train is removed; `keep` grows by its length and its
    /// occupation is rebuilt from the new body.
    pub fn couple(&mut self, keep: TrainId, absorb: TrainId) -> Result<(), DispatchError> {
        if keep == absorb || self.fleet.get(keep).is_none() {
            return Err(DispatchError::UnknownTrain(keep));
        }
        let absorbed = self.remove_train(absorb)?;
        let mut train = self.fleet.take(keep).ok_or(DispatchError::UnknownTrain(keep))?;
        {
            let mut ctx = TickContext {
                graph: &mut self.graph,
                fleet: &mut self.fleet,
                interlocking: &mut self.interlocking,
                config: &self.config.control,
                dt_s: 0.0,
            };
            train.lengthen(absorbed.config().length_m, &mut ctx);
            deadlock::check_deadlock(&mut train, ctx.graph, ctx.fleet);
        }
        log::info!("{} coupled {}, now {:.0} m", keep, absorb, train.config().length_m);
        self.fleet.restore(train);
        Ok(())
    }

    /// Applies an operator command to a train.
    pub fn command(
        &mut self,
        id: TrainId,
        command: OperatorCommand,
    ) -> Result<CommandOutcome, DispatchError> {
        let mut train = self.fleet.take(id).ok_or(DispatchError::UnknownTrain(id))?;
        let result = {
            let mut ctx = TickContext {
                graph: &mut self.graph,
                fleet: &mut self.fleet,
                interlocking: &mut self.interlocking,
                config: &self.config.control,
                dt_s: 0.0,
            };
            train.apply_command(command, &mut ctx)
        };
        self.fleet.restore(train);
        result
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advances every train by one tick interval.
    pub fn tick(&mut self) {
        let dt_s = self.config.simulation.tick_interval_s;
        for id in self.fleet.ids() {
            let Some(mut train) = self.fleet.take(id) else {
                continue;
            };
            if !train.config().is_static {
                let movement = self.motion.step(&self.graph, &train, dt_s);
                let mut ctx = TickContext {
                    graph: &mut self.graph,
                    fleet: &mut self.fleet,
                    interlocking: &mut self.interlocking,
                    config: &self.config.control,
                    dt_s,
                };
                train.update(movement, &mut ctx);
            }
            self.fleet.restore(train);
        }
        self.elapsed_s += dt_s;
    }

    /// Runs ticks until `duration_s` has elapsed. Returns the ticks run.
    pub fn tick_for(&mut self, duration_s: f32) -> usize {
        let dt_s = self.config.simulation.tick_interval_s;
        let end = self.elapsed_s + duration_s;
        let mut ticks = 0;
        while self.elapsed_s + dt_s / 2.0 < end {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// A train by id
    pub fn train(&self, id: TrainId) -> Option<&Train> {
        self.fleet.get(id)
    }

    /// Snapshot of a train for UI/API
    pub fn status(&self, id: TrainId) -> Option<TrainStatus> {
        self.fleet.get(id).map(Train::status)
    }

    /// Track network
    pub fn graph(&self) -> &TrackGraph {
        &self.graph
    }

    /// Mutable track network, for setting up sections between ticks
    pub fn graph_mut(&mut self) -> &mut TrackGraph {
        &mut self.graph
    }

    /// Every active train
    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    /// Signal interlocking
    pub fn interlocking(&self) -> &I {
        &self.interlocking
    }

    /// Mutable signal interlocking
    pub fn interlocking_mut(&mut self) -> &mut I {
        &mut self.interlocking
    }

    /// Mutable motion model, for steering trains between ticks
    pub fn motion_mut(&mut self) -> &mut M {
        &mut self.motion
    }

    /// Control parameters
    pub fn config(&self) -> &ControlConfig {
        &self.config.control
    }

    /// Simulated time since creation
    pub fn elapsed_s(&self) -> f32 {
        self.elapsed_s
    }

    // ========================================================================
    // Removal
    // ========================================================================

    fn release_train(&mut self, id: TrainId) {
        let sections: Vec<_> = self.graph.sections().iter().map(|s| s.id).collect();
        for section in sections {
            reservation::remove_train(&mut self.graph, section, id);
        }

        let signals: Vec<_> = self
            .graph
            .signals()
            .iter()
            .filter(|s| s.enabled_train.map_or(false, |r| r.train == id))
            .map(|s| s.id)
            .collect();
        for signal in signals {
            self.interlocking.reset_signal(&mut self.graph, signal);
        }
        for signal in self.graph.signals_mut() {
            if signal.hold_for == Some(id) {
                signal.hold_for = None;
            }
        }

        for other in self.fleet.iter_mut() {
            other.deadlocks.remove_train(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MockInterlocking, ScriptedMotion};
    use crate::route::SubpathRoute;
    use crate::track::{Direction, SectionKind};

    type TestSim = Simulation<MockInterlocking, ScriptedMotion>;

    fn line_sim(n: usize, length: f32) -> (TestSim, Vec<crate::ids::SectionId>) {
        let mut g = TrackGraph::new();
        let ids: Vec<_> = (0..n).map(|_| g.add_section(SectionKind::Normal, length)).collect();
        for pair in ids.windows(2) {
            g.link(pair[0], pair[1]).unwrap();
        }
        let sim = Simulation::new(g, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
        (sim, ids)
    }

    fn route(sim: &TestSim, ids: &[crate::ids::SectionId]) -> TrainRoute {
        TrainRoute::single(SubpathRoute::forward(sim.graph(), ids).unwrap())
    }

    // === Placement Tests ===

    #[test]
    fn placed_train_occupies_its_body() {
        let (mut sim, ids) = line_sim(3, 100.0);
        let r = route(&sim, &ids);
        let id = sim
            .add_train(
                TrainConfig::default().with_length_m(150.0),
                r,
                TrackPosition::new(ids[0], Direction::Forward, 20.0),
            )
            .unwrap();
        let train = sim.train(id).unwrap();
        assert_eq!(train.occupied(), &[ids[0], ids[1]]);
        assert!(sim.graph().section(ids[0]).state.is_occupied_by(id));
        assert!(sim.graph().section(ids[1]).state.is_reserved_by(id));
    }

    #[test]
    fn placement_on_held_section_fails() {
        let (mut sim, ids) = line_sim(3, 100.0);
        let r = route(&sim, &ids);
        sim.add_train(
            TrainConfig::default().with_length_m(50.0),
            r.clone(),
            TrackPosition::new(ids[1], Direction::Forward, 10.0),
        )
        .unwrap();
        let err = sim
            .add_train(
                TrainConfig::default().with_length_m(150.0),
                r,
                TrackPosition::new(ids[0], Direction::Forward, 20.0),
            )
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::SectionUnavailable {
                section: ids[1],
                train: TrainId(1),
            }
        );
        assert_eq!(sim.fleet().len(), 1);
    }

    // === Removal Tests ===

    #[test]
    fn removal_leaves_no_trace() {
        let (mut sim, ids) = line_sim(4, 100.0);
        let r = route(&sim, &ids);
        let id = sim
            .add_train(
                TrainConfig::default().with_length_m(50.0),
                r,
                TrackPosition::new(ids[0], Direction::Forward, 10.0),
            )
            .unwrap();
        sim.tick();
        assert!(sim.graph().section(ids[2]).state.is_reserved_by(id));

        sim.remove_train(id).unwrap();
        for section in sim.graph().sections() {
            assert!(section.state.is_free());
        }
        assert!(sim.train(id).is_none());
        assert_eq!(sim.remove_train(id).unwrap_err(), DispatchError::UnknownTrain(id));
    }

    #[test]
    fn coupling_lengthens_the_kept_train() {
        let (mut sim, ids) = line_sim(4, 100.0);
        let r = route(&sim, &ids);
        let back = sim
            .add_train(
                TrainConfig::default().with_length_m(40.0),
                r.clone(),
                TrackPosition::new(ids[0], Direction::Forward, 10.0),
            )
            .unwrap();
        let front = sim
            .add_train(
                TrainConfig::default().with_length_m(60.0),
                r,
                TrackPosition::new(ids[1], Direction::Forward, 20.0),
            )
            .unwrap();

        sim.couple(front, back).unwrap();
        let train = sim.train(front).unwrap();
        assert_eq!(train.config().length_m, 100.0);
        assert_eq!(train.rear().section, ids[0]);
        assert!((train.rear().offset_m - 80.0).abs() < 1e-3);
        assert!(train.occupied().contains(&ids[0]));
        assert!(sim.train(back).is_none());
    }

    // === Tick Tests ===

    #[test]
    fn tick_advances_time() {
        let (mut sim, _) = line_sim(1, 100.0);
        assert_eq!(sim.tick_for(3.0), 3);
        assert!((sim.elapsed_s() - 3.0).abs() < 1e-4);
    }

    #[test]
    fn command_for_unknown_train_fails() {
        let (mut sim, _) = line_sim(1, 100.0);
        let err = sim
            .command(TrainId(7), OperatorCommand::SetHandbrake(true))
            .unwrap_err();
        assert_eq!(err, DispatchError::UnknownTrain(TrainId(7)));
    }
}
