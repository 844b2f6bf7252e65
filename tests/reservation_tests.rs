//! Integration tests for section reservation across trains.
//!
//! These run whole ticks through [`Simulation`] and check the reservation
//! rules on the shared track state.

use rs_authority::config::{Config, TrainConfig};
use rs_authority::providers::{MockInterlocking, RouteInterlocking, ScriptedMotion};
use rs_authority::route::{SubpathRoute, TrainRoute};
use rs_authority::track::{Aspect, Direction, SectionKind, SpeedLimit, TrackGraph};
use rs_authority::traits::{Interlocking, MotionModel};
use rs_authority::{
    CommandOutcome, ControlMode, EndAuthorityType, OperatorCommand, SectionId, Simulation,
    TrackPosition, TrainId,
};

fn line(n: usize, length: f32) -> (TrackGraph, Vec<SectionId>) {
    let mut g = TrackGraph::new();
    let ids: Vec<_> = (0..n).map(|_| g.add_section(SectionKind::Normal, length)).collect();
    for pair in ids.windows(2) {
        g.link(pair[0], pair[1]).unwrap();
    }
    (g, ids)
}

fn add<I: Interlocking, M: MotionModel>(
    sim: &mut Simulation<I, M>,
    sections: &[SectionId],
    rear: SectionId,
    offset_m: f32,
    length_m: f32,
) -> TrainId {
    let route = TrainRoute::single(SubpathRoute::forward(sim.graph(), sections).unwrap());
    sim.add_train(
        TrainConfig::default().with_length_m(length_m),
        route,
        TrackPosition::new(rear, Direction::Forward, offset_m),
    )
    .unwrap()
}

/// Every occupied section is reserved by one of its occupants.
fn assert_occupation_reserved<I: Interlocking, M: MotionModel>(sim: &Simulation<I, M>) {
    for train in sim.fleet().iter() {
        for &section in train.occupied() {
            let st = &sim.graph().section(section).state;
            assert!(st.is_occupied_by(train.id()), "{} lost {}", train.id(), section);
            let holder = st.reserved_by.map(|r| r.train);
            assert!(
                holder.map_or(false, |h| st.is_occupied_by(h)),
                "{} occupied but reserved by {:?}",
                section,
                holder
            );
        }
    }
}

// ============================================================================
// Exclusivity Tests
// ============================================================================

#[test]
fn following_train_stops_short_of_the_leader() {
    let (g, ids) = line(6, 200.0);
    let mut sim = Simulation::new(g, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
    let leader = add(&mut sim, &ids[2..], ids[2], 20.0, 80.0);
    let follower = add(&mut sim, &ids, ids[0], 10.0, 80.0);

    sim.tick();

    // The leader holds everything ahead of it to the end of the line.
    for &s in &ids[2..] {
        assert!(sim.graph().section(s).state.is_reserved_by(leader));
    }
    // The follower gets the gap and no more.
    assert!(sim.graph().section(ids[1]).state.is_reserved_by(follower));
    let authority = sim.train(follower).unwrap().end_authority(0);
    assert_eq!(authority.kind, EndAuthorityType::TrainAhead);
    // 110 m to the end of s0, 200 m of s1, 20 m into s2.
    assert!((authority.distance_m - 330.0).abs() < 1e-3);
    assert_occupation_reserved(&sim);
}

#[test]
fn reservations_stay_exclusive_while_trains_move() {
    let (g, ids) = line(8, 150.0);
    let mut sim = Simulation::new(g, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
    let leader = add(&mut sim, &ids[3..], ids[3], 10.0, 60.0);
    let follower = add(&mut sim, &ids, ids[0], 10.0, 60.0);

    for _ in 0..6 {
        sim.motion_mut().push(leader, 40.0, 10.0);
        sim.motion_mut().push(follower, 20.0, 5.0);
    }
    for _ in 0..6 {
        sim.tick();
        assert_occupation_reserved(&sim);
        for section in sim.graph().sections() {
            let holders: Vec<_> = sim
                .fleet()
                .iter()
                .filter(|t| section.state.is_reserved_by(t.id()))
                .collect();
            assert!(holders.len() <= 1, "{} held twice", section.id);
        }
    }
    assert_eq!(sim.train(leader).unwrap().mode(), ControlMode::NodeGoverned);
    assert_eq!(sim.train(follower).unwrap().mode(), ControlMode::NodeGoverned);
}

// ============================================================================
// Release Tests
// ============================================================================

#[test]
fn sections_behind_are_released_after_the_overlap() {
    let (g, ids) = line(4, 100.0);
    let mut sim = Simulation::new(g, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
    let id = add(&mut sim, &ids, ids[0], 10.0, 50.0);
    sim.tick();

    // Rear needs 90 m to leave s0 and 15 m more for the overlap.
    sim.motion_mut().push(id, 100.0, 10.0);
    sim.tick();
    assert!(sim.train(id).unwrap().occupied().contains(&ids[0]));

    sim.motion_mut().push(id, 10.0, 10.0);
    sim.tick();
    let train = sim.train(id).unwrap();
    assert!(!train.occupied().contains(&ids[0]));
    assert!(sim.graph().section(ids[0]).state.is_free());
    assert_eq!(train.occupied(), &[ids[1]]);
}

#[test]
fn waiting_manual_train_receives_the_section_left_by_the_train_ahead() {
    let (g, ids) = line(4, 100.0);
    let mut sim = Simulation::new(g, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
    let ahead = add(&mut sim, &ids[1..], ids[1], 10.0, 50.0);
    let waiting = add(&mut sim, &ids, ids[0], 10.0, 50.0);
    sim.tick();

    let outcome = sim.command(waiting, OperatorCommand::ToggleManual).unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::ModeChanged {
            from: ControlMode::NodeGoverned,
            to: ControlMode::Manual
        }
    );
    let st = &sim.graph().section(ids[1]).state;
    assert!(st.pre_reserved.iter().any(|r| r.train == waiting));
    assert_eq!(
        sim.train(waiting).unwrap().end_authority(0).kind,
        EndAuthorityType::TrainAhead
    );

    // The train ahead runs clear of s1 and its overlap.
    sim.motion_mut().push(ahead, 110.0, 10.0);
    sim.tick();

    assert!(!sim.train(ahead).unwrap().occupied().contains(&ids[1]));
    assert!(sim.graph().section(ids[1]).state.is_reserved_by(waiting));
}

#[test]
fn removed_train_frees_everything() {
    let (g, ids) = line(5, 100.0);
    let mut sim = Simulation::new(g, MockInterlocking::new(), ScriptedMotion::new(), Config::default());
    let first = add(&mut sim, &ids[2..], ids[2], 10.0, 50.0);
    let second = add(&mut sim, &ids[..2], ids[0], 10.0, 50.0);
    sim.tick();

    sim.remove_train(first).unwrap();
    for &s in &ids[2..] {
        assert!(sim.graph().section(s).state.is_free());
    }
    assert!(sim.train(second).unwrap().deadlocks().is_empty());
}

// ============================================================================
// Signal Block Tests
// ============================================================================

#[test]
fn signal_block_is_refused_to_other_trains() {
    let mut g = TrackGraph::new();
    let approach = g.add_section(SectionKind::Normal, 300.0);
    let block = g.add_section(SectionKind::Normal, 300.0);
    let beyond = g.add_section(SectionKind::EndOfTrack, 300.0);
    g.link(approach, block).unwrap();
    g.link(block, beyond).unwrap();
    let signal = g
        .add_signal(approach, Direction::Forward, SpeedLimit::uniform(20.0))
        .unwrap();

    let mut sim = Simulation::new(g, RouteInterlocking::new(), ScriptedMotion::new(), Config::default());
    let id = add(&mut sim, &[approach, block, beyond], approach, 100.0, 80.0);
    sim.tick();

    let s = sim.graph().signal(signal);
    assert!(s.is_enabled_for(id));
    assert_eq!(s.aspect, Aspect::Clear);
    assert_eq!(sim.graph().section(block).state.signal_reserved, Some(signal));
    assert_eq!(sim.train(id).unwrap().mode(), ControlMode::SignalGoverned);
    assert_eq!(s.aspect_for(TrainId(9)), Aspect::Stop);
}
