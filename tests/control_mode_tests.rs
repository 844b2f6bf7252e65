//! Integration tests for the control-mode state machine and authority.

use rs_authority::config::{Config, ControlConfig, TrainConfig};
use rs_authority::providers::{MockInterlocking, ScriptedMotion};
use rs_authority::route::{ReversalPoint, SubpathRoute, TrainRoute, WaitingPoint};
use rs_authority::track::{Aspect, Direction, SectionKind, SpeedLimit, TrackGraph};
use rs_authority::{
    CommandOutcome, ControlMode, DispatchError, EndAuthorityType, OperatorCommand,
    OutOfControlReason, RejectReason, RoutedTrain, SectionId, SignalId, Simulation, TrackPosition,
    TrainId, BACKWARD, FORWARD,
};

type TestSim = Simulation<MockInterlocking, ScriptedMotion>;

/// Sections of the given lengths linked in a line.
fn line(lengths: &[f32]) -> (TrackGraph, Vec<SectionId>) {
    let mut g = TrackGraph::new();
    let ids: Vec<_> = lengths
        .iter()
        .map(|l| g.add_section(SectionKind::Normal, *l))
        .collect();
    for pair in ids.windows(2) {
        g.link(pair[0], pair[1]).unwrap();
    }
    (g, ids)
}

fn sim(graph: TrackGraph, interlocking: MockInterlocking) -> TestSim {
    Simulation::new(graph, interlocking, ScriptedMotion::new(), Config::default())
}

fn add(sim: &mut TestSim, route: TrainRoute, rear: TrackPosition, length_m: f32) -> TrainId {
    sim.add_train(TrainConfig::default().with_length_m(length_m), route, rear)
        .unwrap()
}

fn forward(sim: &TestSim, sections: &[SectionId]) -> TrainRoute {
    TrainRoute::single(SubpathRoute::forward(sim.graph(), sections).unwrap())
}

/// 200 m approach with a signal at its end, then three 300 m sections.
fn signalled_line() -> (TrackGraph, Vec<SectionId>, SignalId) {
    let (mut g, ids) = line(&[200.0, 300.0, 300.0, 300.0]);
    let signal = g
        .add_signal(ids[0], Direction::Forward, SpeedLimit::uniform(20.0))
        .unwrap();
    (g, ids, signal)
}

// ============================================================================
// Node Mode Tests
// ============================================================================

#[test]
fn authority_ends_at_signal_at_stop() {
    let (mut g, ids) = line(&[500.0, 300.0, 300.0, 300.0, 300.0]);
    g.add_signal(ids[3], Direction::Forward, SpeedLimit::unrestricted())
        .unwrap();
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 50.0), 50.0);

    sim.tick();

    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::NodeGoverned);
    let authority = train.end_authority(FORWARD);
    assert_eq!(authority.kind, EndAuthorityType::Signal);
    assert!((authority.distance_m - (400.0 + 3.0 * 300.0)).abs() < 1e-3);
    // Nothing beyond the signal is reserved.
    assert!(sim.graph().section(ids[4]).state.is_free());
}

#[test]
fn first_tick_initializes_into_node_mode() {
    let (g, ids) = line(&[300.0, 300.0]);
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 0.0), 50.0);
    assert_eq!(sim.train(id).unwrap().mode(), ControlMode::Uninitialized);

    sim.tick();
    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::NodeGoverned);
    assert_eq!(train.end_authority(FORWARD).kind, EndAuthorityType::EndOfTrack);
    assert!((train.end_authority(FORWARD).distance_m - 550.0).abs() < 1e-3);
}

// ============================================================================
// Signal Mode Tests
// ============================================================================

#[test]
fn cleared_signal_switches_to_signal_mode() {
    let (g, ids, signal) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new().with_aspect(signal, Aspect::Clear));
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 100.0), 50.0);

    sim.tick();

    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::SignalGoverned);
    assert_eq!(train.next_signal(FORWARD), Some(signal));
    assert!(sim.graph().signal(signal).is_enabled_for(id));
    for &s in &ids[1..] {
        assert!(sim.graph().section(s).state.is_reserved_by(id));
    }
    assert_eq!(train.end_authority(FORWARD).kind, EndAuthorityType::EndOfTrack);
}

#[test]
fn passing_last_signal_returns_to_node_mode() {
    let (g, ids, signal) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new().with_aspect(signal, Aspect::Clear));
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 100.0), 50.0);
    sim.tick();
    assert_eq!(sim.train(id).unwrap().mode(), ControlMode::SignalGoverned);

    // Front runs 10 m past the signal.
    sim.motion_mut().push(id, 60.0, 5.0);
    sim.tick();

    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::NodeGoverned);
    assert_eq!(train.next_signal(FORWARD), None);
    assert!(train.occupied().contains(&ids[1]));
    assert_eq!(sim.interlocking().resets, vec![signal]);
    assert!(!sim.graph().signal(signal).is_enabled_for(id));
}

// ============================================================================
// Out Of Control Tests
// ============================================================================

#[test]
fn passing_signal_at_stop_is_out_of_control() {
    let (g, ids, _) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 100.0), 50.0);
    sim.tick();

    sim.motion_mut().push(id, 60.0, 5.0);
    sim.tick();

    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::OutOfControl);
    assert_eq!(
        train.out_of_control_reason(),
        Some(OutOfControlReason::PassedSignalAtStop)
    );
    assert!(train.is_emergency_braking());
    assert_eq!(train.allowed_speed_mps(), 0.0);
}

#[test]
fn out_of_control_train_recovers_once_stationary_on_its_path() {
    let (g, ids, _) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 100.0), 50.0);
    sim.tick();
    sim.motion_mut().push(id, 60.0, 5.0);
    sim.tick();
    assert_eq!(sim.train(id).unwrap().mode(), ControlMode::OutOfControl);

    // Standing still: emergency braking ends and the train rejoins its path.
    sim.tick();

    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::NodeGoverned);
    assert_eq!(train.out_of_control_reason(), None);
    assert!(!train.is_emergency_braking());
    assert!(train.occupied().contains(&ids[0]));
    assert!(train.occupied().contains(&ids[1]));
}

#[test]
fn rolling_back_into_reserved_section_is_out_of_control() {
    let (g, ids) = line(&[100.0, 100.0, 100.0, 100.0]);
    let (sb, s0, s1, s2) = (ids[0], ids[1], ids[2], ids[3]);
    let mut sim = sim(g, MockInterlocking::new());

    let a_route = forward(&sim, &[s1, s2]);
    let a = add(&mut sim, a_route, TrackPosition::new(s1, Direction::Forward, 3.0), 50.0);
    let b_route = forward(&sim, &[sb, s0]);
    let b = add(&mut sim, b_route, TrackPosition::new(sb, Direction::Forward, 10.0), 50.0);
    sim.tick();
    assert!(sim.graph().section(s0).state.is_reserved_by(b));

    // Beyond the 5 m hysteresis, rear into s0.
    sim.motion_mut().push(a, -10.0, -1.0);
    sim.tick();

    let train = sim.train(a).unwrap();
    assert_eq!(train.mode(), ControlMode::OutOfControl);
    assert_eq!(
        train.out_of_control_reason(),
        Some(OutOfControlReason::SlippedIntoPath)
    );
    assert!(train.is_emergency_braking());
}

#[test]
fn small_roll_back_within_hysteresis_is_ignored() {
    let (g, ids) = line(&[100.0, 100.0]);
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 20.0), 50.0);
    sim.tick();

    sim.motion_mut().push(id, -3.0, -0.5);
    sim.tick();

    assert_eq!(sim.train(id).unwrap().mode(), ControlMode::NodeGoverned);
}

// ============================================================================
// Manual Mode Tests
// ============================================================================

/// Junction facing forwards: toe behind, main on slot 0, side on slot 1.
fn junction() -> (TrackGraph, SectionId, SectionId, SectionId, SectionId) {
    let mut g = TrackGraph::new();
    let toe = g.add_section(SectionKind::Normal, 100.0);
    let sw = g.add_section(SectionKind::Junction, 30.0);
    let main = g.add_section(SectionKind::Normal, 100.0);
    let side = g.add_section(SectionKind::Normal, 100.0);
    g.link(toe, sw).unwrap();
    g.link(sw, main).unwrap();
    g.link(sw, side).unwrap();
    (g, toe, sw, main, side)
}

#[test]
fn manual_window_stops_at_misaligned_switch() {
    let (g, _, sw, _, side) = junction();
    let mut sim = sim(g, MockInterlocking::new());
    let route = TrainRoute::single(SubpathRoute::reverse(sim.graph(), &[side]).unwrap());
    let id = add(&mut sim, route, TrackPosition::new(side, Direction::Reverse, 10.0), 50.0);
    sim.tick();

    let outcome = sim.command(id, OperatorCommand::ToggleManual).unwrap();
    assert!(outcome.is_applied());

    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::Manual);
    assert_eq!(train.misaligned_switch(FORWARD), Some(sw));
    let authority = train.end_authority(FORWARD);
    assert_eq!(authority.kind, EndAuthorityType::ReservedSwitch);
    assert!((authority.distance_m - 40.0).abs() < 1e-3);

    // Running onto the switch set against the train.
    sim.motion_mut().push(id, 45.0, 2.0);
    sim.tick();

    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::OutOfControl);
    assert_eq!(
        train.out_of_control_reason(),
        Some(OutOfControlReason::MisalignedSwitch)
    );
}

#[test]
fn occupied_misaligned_switch_reads_as_train_ahead() {
    let (g, toe, sw, main, side) = junction();
    let mut sim = sim(g, MockInterlocking::new());
    // Standing across the junction, which lies for the main leg.
    let through = forward(&sim, &[toe, sw, main]);
    add(&mut sim, through, TrackPosition::new(toe, Direction::Forward, 80.0), 60.0);
    let route = TrainRoute::single(SubpathRoute::reverse(sim.graph(), &[side]).unwrap());
    let id = add(&mut sim, route, TrackPosition::new(side, Direction::Reverse, 10.0), 50.0);
    sim.tick();

    sim.command(id, OperatorCommand::ToggleManual).unwrap();

    let train = sim.train(id).unwrap();
    assert_eq!(train.misaligned_switch(FORWARD), Some(sw));
    let authority = train.end_authority(FORWARD);
    assert_eq!(authority.kind, EndAuthorityType::TrainAhead);
    assert!((authority.distance_m - 40.0).abs() < 1e-3);
    assert!(sim
        .graph()
        .section(sw)
        .state
        .pre_reserved
        .iter()
        .any(|r| r.train == id));
}

#[test]
fn setting_the_switch_clears_the_misalignment() {
    let (g, toe, sw, _, side) = junction();
    let mut sim = sim(g, MockInterlocking::new());
    let route = TrainRoute::single(SubpathRoute::reverse(sim.graph(), &[side]).unwrap());
    let id = add(&mut sim, route, TrackPosition::new(side, Direction::Reverse, 10.0), 50.0);
    sim.tick();
    sim.command(id, OperatorCommand::ToggleManual).unwrap();

    let outcome = sim
        .command(id, OperatorCommand::SetSwitchByDirection { ahead: true })
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Applied);
    assert_eq!(sim.graph().section(sw).switch_position, 1);

    let train = sim.train(id).unwrap();
    assert_eq!(train.misaligned_switch(FORWARD), None);
    assert!(train.valid_route(FORWARD).contains(toe));
}

#[test]
fn manual_mode_builds_both_windows() {
    let (g, ids) = line(&[200.0, 200.0, 200.0]);
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[1], Direction::Forward, 50.0), 100.0);
    sim.tick();

    sim.command(id, OperatorCommand::ToggleManual).unwrap();

    let train = sim.train(id).unwrap();
    let ahead = train.end_authority(FORWARD);
    let behind = train.end_authority(BACKWARD);
    assert_eq!(ahead.kind, EndAuthorityType::EndOfTrack);
    assert!((ahead.distance_m - 250.0).abs() < 1e-3);
    assert_eq!(behind.kind, EndAuthorityType::EndOfTrack);
    assert!((behind.distance_m - 250.0).abs() < 1e-3);
    assert!(sim.graph().section(ids[0]).state.is_reserved_by(id));
    assert!(sim.graph().section(ids[2]).state.is_reserved_by(id));
}

#[test]
fn explorer_clears_signals_on_its_own() {
    let (mut g, ids) = line(&[200.0, 200.0]);
    let end = g.add_section(SectionKind::EndOfTrack, 200.0);
    g.link(ids[1], end).unwrap();
    let signal = g
        .add_signal(ids[0], Direction::Forward, SpeedLimit::uniform(10.0))
        .unwrap();
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &[ids[0], ids[1], end]);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 50.0), 50.0);
    sim.tick();
    assert_eq!(
        sim.train(id).unwrap().end_authority(FORWARD).kind,
        EndAuthorityType::Signal
    );

    sim.interlocking_mut().aspects.insert(signal, Aspect::Clear);
    sim.command(id, OperatorCommand::ToggleExplorer).unwrap();

    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::Explorer);
    assert_eq!(train.next_signal(FORWARD), Some(signal));
    let authority = train.end_authority(FORWARD);
    assert_eq!(authority.kind, EndAuthorityType::EndOfTrack);
    assert!((authority.distance_m - 500.0).abs() < 1e-3);
}

#[test]
fn manual_mode_needs_a_stationary_train() {
    let (g, ids) = line(&[300.0, 300.0]);
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 10.0), 50.0);
    sim.tick();
    sim.motion_mut().push(id, 5.0, 5.0);
    sim.tick();

    let outcome = sim.command(id, OperatorCommand::ToggleManual).unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Rejected {
            reason: RejectReason::NotStationary
        }
    );
    assert_eq!(sim.train(id).unwrap().mode(), ControlMode::NodeGoverned);
}

#[test]
fn manual_train_returns_to_its_path() {
    let (g, ids) = line(&[300.0, 300.0, 300.0]);
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 10.0), 50.0);
    sim.tick();
    sim.command(id, OperatorCommand::ToggleManual).unwrap();
    sim.tick();

    let outcome = sim.command(id, OperatorCommand::ToggleManual).unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::ModeChanged {
            from: ControlMode::Manual,
            to: ControlMode::NodeGoverned
        }
    );
    sim.tick();
    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::NodeGoverned);
    assert_eq!(train.end_authority(FORWARD).kind, EndAuthorityType::EndOfTrack);
    assert!(train.valid_route(BACKWARD).is_empty());
}

// ============================================================================
// Signal Permission Tests
// ============================================================================

#[test]
fn permission_lets_the_train_pass_at_stop() {
    let (g, ids, signal) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new().with_permission(true));
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 100.0), 50.0);
    sim.tick();

    let outcome = sim
        .command(id, OperatorCommand::RequestSignalPermission)
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::ModeChanged {
            from: ControlMode::NodeGoverned,
            to: ControlMode::SignalGoverned
        }
    );
    assert_eq!(sim.graph().signal(signal).aspect, Aspect::StopAndProceed);

    sim.motion_mut().push(id, 60.0, 3.0);
    sim.tick();
    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::NodeGoverned);
    assert_eq!(train.out_of_control_reason(), None);
}

#[test]
fn refused_permission_is_reported() {
    let (g, ids, signal) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 100.0), 50.0);
    sim.tick();

    let outcome = sim
        .command(id, OperatorCommand::RequestSignalPermission)
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Rejected {
            reason: RejectReason::PermissionRefused
        }
    );
    assert_eq!(sim.interlocking().permission_requests, vec![(signal, id)]);
}

// ============================================================================
// Claim Tests
// ============================================================================

/// Four 200 m sections with signals at the ends of the first and third,
/// and a claim wait of two ticks.
fn claim_line() -> (TestSim, Vec<SectionId>) {
    let (mut g, ids) = line(&[200.0, 200.0, 200.0, 200.0]);
    g.add_signal(ids[0], Direction::Forward, SpeedLimit::unrestricted())
        .unwrap();
    g.add_signal(ids[2], Direction::Forward, SpeedLimit::unrestricted())
        .unwrap();
    let config = Config::default().with_control(ControlConfig::default().with_claim_wait_s(2.0));
    let sim = Simulation::new(g, MockInterlocking::new(), ScriptedMotion::new(), config);
    (sim, ids)
}

#[test]
fn claim_waits_out_an_automatic_train_in_the_next_block() {
    let (mut sim, ids) = claim_line();
    let route = forward(&sim, &ids);
    let a = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 50.0), 50.0);
    let b_route = forward(&sim, &ids[1..]);
    let b = add(&mut sim, b_route, TrackPosition::new(ids[1], Direction::Forward, 50.0), 50.0);

    sim.tick();
    assert_eq!(sim.train(b).unwrap().mode(), ControlMode::NodeGoverned);
    assert!(!sim.train(a).unwrap().is_claiming());
    assert!((sim.train(a).unwrap().claim().wait_s - 1.0).abs() < 1e-3);

    sim.tick();
    let train = sim.train(a).unwrap();
    assert!(train.is_claiming());
    assert_eq!(train.claim().sections, vec![ids[1], ids[2]]);
    assert!(sim.graph().section(ids[1]).state.is_claimed_by(a));
    assert!(sim.graph().section(ids[2]).state.is_claimed_by(a));
}

#[test]
fn manual_train_in_the_window_drops_the_claim() {
    let (mut sim, ids) = claim_line();
    let route = forward(&sim, &ids);
    let a = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 50.0), 50.0);
    sim.tick();
    sim.tick();
    assert!(sim.train(a).unwrap().is_claiming());

    // Reserved for the waiting train under its claim.
    sim.graph_mut().section_mut(ids[1]).state.reserved_by = Some(RoutedTrain::forward(a));

    let b_route = forward(&sim, &ids[2..]);
    let b = add(&mut sim, b_route, TrackPosition::new(ids[2], Direction::Forward, 10.0), 50.0);
    sim.tick();
    assert!(sim.train(a).unwrap().is_claiming());

    let outcome = sim.command(b, OperatorCommand::ToggleManual).unwrap();
    assert!(outcome.is_applied());
    sim.tick();

    let train = sim.train(a).unwrap();
    assert!(!train.is_claiming());
    assert!(train.claim().sections.is_empty());
    assert!(!sim.graph().section(ids[1]).state.is_claimed_by(a));
    assert!(!sim.graph().section(ids[2]).state.is_claimed_by(a));
    assert_eq!(sim.graph().section(ids[1]).state.reserved_by, None);
}

// ============================================================================
// Speed Tests
// ============================================================================

#[test]
fn speed_post_lowers_at_once_and_raises_after_train_length() {
    let (mut g, ids) = line(&[500.0, 500.0]);
    g.add_speed_post(ids[0], Direction::Forward, 200.0, SpeedLimit::uniform(10.0))
        .unwrap();
    g.add_speed_post(ids[0], Direction::Forward, 300.0, SpeedLimit::uniform(25.0))
        .unwrap();
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 0.0), 100.0);
    sim.tick();

    // Front to 210 m.
    sim.motion_mut().push(id, 110.0, 5.0);
    sim.tick();
    assert_eq!(sim.train(id).unwrap().speed_post_limit_mps(), 10.0);
    assert_eq!(sim.train(id).unwrap().allowed_speed_mps(), 10.0);

    // Front past the second post, rear still short of it.
    sim.motion_mut().push(id, 100.0, 5.0).push(id, 80.0, 5.0);
    sim.tick();
    assert_eq!(sim.train(id).unwrap().speed_post_limit_mps(), 10.0);
    sim.tick();
    assert_eq!(sim.train(id).unwrap().speed_post_limit_mps(), 10.0);

    // Rear clears the post at front 400 m.
    sim.motion_mut().push(id, 15.0, 5.0);
    sim.tick();
    let train = sim.train(id).unwrap();
    assert_eq!(train.speed_post_limit_mps(), 25.0);
    assert_eq!(train.allowed_speed_mps(), 25.0);
}

fn limit_after_split_post(freight: bool) -> (f32, f32) {
    let (mut g, ids) = line(&[500.0, 500.0]);
    let post = g
        .add_speed_post(
            ids[0],
            Direction::Forward,
            100.0,
            SpeedLimit {
                passenger_mps: Some(25.0),
                freight_mps: Some(15.0),
            },
        )
        .unwrap();
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids);
    let config = TrainConfig::default().with_length_m(50.0).with_freight(freight);
    let id = sim
        .add_train(config, route, TrackPosition::new(ids[0], Direction::Forward, 0.0))
        .unwrap();
    sim.tick();
    let cached = sim.train(id).unwrap().lookahead().get(post).unwrap().object_speed_mps;

    sim.motion_mut().push(id, 60.0, 5.0);
    sim.tick();
    (cached, sim.train(id).unwrap().speed_post_limit_mps())
}

#[test]
fn freight_trains_read_the_freight_limit() {
    assert_eq!(limit_after_split_post(false), (25.0, 25.0));
    assert_eq!(limit_after_split_post(true), (15.0, 15.0));
}

#[test]
fn passed_signal_speed_is_kept_when_rolling_back_behind_it() {
    let (g, ids, signal) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new().with_aspect(signal, Aspect::Clear));
    let route = forward(&sim, &ids);
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 100.0), 50.0);
    sim.tick();
    sim.motion_mut().push(id, 60.0, 5.0);
    sim.tick();
    assert_eq!(sim.train(id).unwrap().passed_signal_speed(signal), Some(20.0));
    assert!(!sim.train(id).unwrap().lookahead().contains(signal));

    sim.graph_mut().signal_mut(signal).speed = SpeedLimit::uniform(5.0);
    // Front rolls back 15 m, 5 m short of the signal.
    sim.motion_mut().push(id, -15.0, -1.0);
    sim.tick();

    let train = sim.train(id).unwrap();
    let entry = train.lookahead().get(signal).unwrap();
    assert!((entry.distance_m - 5.0).abs() < 1e-3);
    assert_eq!(entry.object_speed_mps, 20.0);
}

// ============================================================================
// Path Feature Tests
// ============================================================================

#[test]
fn waiting_point_holds_signal_for_the_wait() {
    let (g, ids, signal) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new().with_aspect(signal, Aspect::Clear));
    let route = forward(&sim, &ids).with_waiting_point(WaitingPoint {
        subpath: 0,
        section: ids[0],
        wait_s: 3.0,
        hold_signal: Some(signal),
    });
    let id = add(&mut sim, route, TrackPosition::new(ids[0], Direction::Forward, 100.0), 50.0);

    sim.tick();
    sim.tick();
    assert_eq!(sim.train(id).unwrap().mode(), ControlMode::NodeGoverned);
    assert_eq!(sim.graph().signal(signal).hold_for, Some(id));

    sim.tick();
    assert_eq!(sim.train(id).unwrap().mode(), ControlMode::SignalGoverned);
    assert_eq!(sim.graph().signal(signal).hold_for, None);
}

#[test]
fn stationary_train_reverses_at_end_of_subpath() {
    let (g, ids) = line(&[100.0, 100.0, 100.0]);
    let mut sim = sim(g, MockInterlocking::new());
    let out = SubpathRoute::forward(sim.graph(), &ids[..2]).unwrap();
    let back = SubpathRoute::reverse(sim.graph(), &[ids[1], ids[0]]).unwrap();
    let route = TrainRoute::single(out).with_reversal(
        ReversalPoint {
            diverge_section: ids[1],
            offset_m: 100.0,
            signal: None,
        },
        back,
    );
    let id = add(&mut sim, route, TrackPosition::new(ids[1], Direction::Forward, 40.0), 50.0);

    sim.tick();
    let train = sim.train(id).unwrap();
    assert_eq!(train.route().active_subpath, 1);
    assert_eq!(train.front().direction, Direction::Reverse);
    assert!((train.front().offset_m - 60.0).abs() < 1e-3);

    sim.tick();
    let train = sim.train(id).unwrap();
    assert_eq!(train.mode(), ControlMode::NodeGoverned);
    let authority = train.end_authority(FORWARD);
    assert_eq!(authority.kind, EndAuthorityType::EndOfTrack);
    assert!((authority.distance_m - 140.0).abs() < 1e-3);
    assert!(sim.graph().section(ids[0]).state.is_reserved_by(id));
}

#[test]
fn waiting_point_with_unknown_signal_is_refused() {
    let (g, ids, _) = signalled_line();
    let mut sim = sim(g, MockInterlocking::new());
    let route = forward(&sim, &ids).with_waiting_point(WaitingPoint {
        subpath: 0,
        section: ids[0],
        wait_s: 3.0,
        hold_signal: Some(SignalId(99)),
    });
    let err = sim
        .add_train(
            TrainConfig::default().with_length_m(50.0),
            route,
            TrackPosition::new(ids[0], Direction::Forward, 100.0),
        )
        .unwrap_err();
    assert_eq!(err, DispatchError::UnknownSignal(SignalId(99)));
    assert!(sim.fleet().is_empty());
    sim.tick();
}
