//! Desktop demo: two trains following each other along a signalled line.
//!
//! Builds a line of 800 m blocks with a signal at the end of every other
//! section, places two trains on it and runs the block interlocking with
//! the kinematic route follower. Status lines are logged every 10 ticks.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=info cargo run --features demo --bin authority_demo
//! ```

use anyhow::Context;
use rs_authority::config::{Config, SimulationConfig, TrainConfig};
use rs_authority::providers::{RouteFollower, RouteInterlocking};
use rs_authority::route::{SubpathRoute, TrainRoute};
use rs_authority::track::{Direction, SectionKind, SpeedLimit, TrackGraph};
use rs_authority::{SectionId, Simulation, TrackPosition, TrainStatus};

/// Sections on the line
const SECTIONS: usize = 16;

/// Length of every section
const SECTION_LENGTH_M: f32 = 400.0;

/// Ticks to run
const TICKS: usize = 600;

/// Log a status line every this many ticks
const REPORT_INTERVAL: usize = 10;

fn build_line() -> anyhow::Result<(TrackGraph, Vec<SectionId>)> {
    let mut graph = TrackGraph::new();
    let mut ids = Vec::with_capacity(SECTIONS);
    for i in 0..SECTIONS {
        let kind = if i + 1 == SECTIONS {
            SectionKind::EndOfTrack
        } else {
            SectionKind::Normal
        };
        ids.push(graph.add_section(kind, SECTION_LENGTH_M));
    }
    for pair in ids.windows(2) {
        graph.link(pair[0], pair[1])?;
    }
    for (i, &section) in ids.iter().enumerate() {
        if i % 2 == 1 && i + 1 < SECTIONS {
            graph.add_signal(section, Direction::Forward, SpeedLimit::uniform(25.0))?;
        }
    }
    Ok((graph, ids))
}

fn report(tick: usize, status: &TrainStatus) {
    log::info!(
        "t={:>4} {} {:<16} {} @ {:>5.1} m  v={:>4.1}/{:>4.1} m/s  authority {:>6.0} m ({})",
        tick,
        status.name,
        status.mode.as_str(),
        status.front.section,
        status.front.offset_m,
        status.speed_mps,
        status.allowed_speed_mps,
        status.authority_forward.distance_m,
        status.authority_forward.kind.as_str(),
    );
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (graph, ids) = build_line().context("building the line")?;
    let config = Config::default().with_simulation(SimulationConfig::default().with_tick_interval_s(1.0));
    let follower = RouteFollower::new(&config.control);
    let mut sim = Simulation::new(graph, RouteInterlocking::new(), follower, config);

    let route = SubpathRoute::forward(sim.graph(), &ids)?;
    let leader = sim
        .add_train(
            TrainConfig::default().with_name("Express").with_length_m(180.0),
            TrainRoute::single(route.clone()),
            TrackPosition::new(ids[2], Direction::Forward, 20.0),
        )
        .context("placing the leading train")?;
    let follower = sim
        .add_train(
            TrainConfig::default()
                .with_name("Freight")
                .with_length_m(350.0)
                .with_max_speed_mps(18.0)
                .with_freight(true),
            TrainRoute::single(route),
            TrackPosition::new(ids[0], Direction::Forward, 10.0),
        )
        .context("placing the following train")?;

    sim.motion_mut().set_target(leader, 30.0);
    sim.motion_mut().set_target(follower, 30.0);

    for tick in 0..TICKS {
        sim.tick();
        if tick % REPORT_INTERVAL == 0 {
            for id in [leader, follower] {
                if let Some(status) = sim.status(id) {
                    report(tick, &status);
                }
            }
        }
    }
    Ok(())
}
