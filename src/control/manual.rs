//! Manual and explorer authority: path windows from both train ends.
//!
//! An operator-driven train has no route of its own. Each tick it walks the
//! active pins from the front (forward window) and from the rear (backward
//! window), reserving up to the manual check distance. Windows stop at:
//!
//! | Obstacle | Authority type |
//! |----------|----------------|
//! | signal at the end of a section (manual) | `Signal` |
//! | signal refused (explorer) | `Signal` |
//! | window length reached | `MaxDistance` |
//! | buffer stop | `EndOfTrack` |
//! | section occupied by another train | `TrainAhead` |
//! | junction entered trailing, set against the train | `ReservedSwitch` |
//! | section otherwise refused | by section kind |
//!
//! Passing a signal at stop in these modes only warns. Running through a
//! misaligned junction puts the train out of control.

use crate::control::{ControlMode, EndAuthorityType, OutOfControlReason};
use crate::ids::{RoutedTrain, SectionId, BACKWARD, FORWARD};
use crate::reservation::{self, Availability, Claimant};
use crate::route::{RouteElement, SubpathRoute};
use crate::track::{Direction, SectionKind, TrackGraph};
use crate::train::{TickContext, Train};

impl Train {
    pub(crate) fn update_manual(&mut self, ctx: &mut TickContext<'_>, moved_m: f32) {
        if let Some(switch) = self.rebuild_occupation(ctx) {
            log::warn!("{} occupies {} set against it", self.id, switch);
            self.set_out_of_control(OutOfControlReason::MisalignedSwitch, ctx);
            return;
        }

        self.process_passed_objects(ctx);
        self.process_due_actions(ctx, false);
        self.rebuild_windows(ctx);
        self.refresh_lookahead(ctx, moved_m < 0.0);
    }

    /// Releases both windows and builds them again from the train ends.
    pub(crate) fn rebuild_windows(&mut self, ctx: &mut TickContext<'_>) {
        self.release_windows(ctx.graph);
        for d in [FORWARD, BACKWARD] {
            self.build_window(ctx, d);
        }
    }

    fn release_windows(&mut self, graph: &mut TrackGraph) {
        let me = self.id;
        for d in [FORWARD, BACKWARD] {
            let window = std::mem::take(&mut self.valid_route[d]);
            for element in window.iter() {
                reservation::unreserve(graph, element.section, me);
                graph
                    .section_mut(element.section)
                    .state
                    .pre_reserved
                    .retain(|r| r.train != me);
            }
        }
        self.misaligned_switch = [None; 2];
    }

    fn build_window(&mut self, ctx: &mut TickContext<'_>, d: usize) {
        let me = self.id;
        let start = if d == FORWARD {
            self.front
        } else {
            self.rear.reversed(ctx.graph)
        };
        let max = ctx.config.min_check_distance_manual_m;
        let limit = ctx.graph.sections().len() * 2;

        let mut window = SubpathRoute::new();
        window.push(element_for(ctx.graph, start.section, start.direction));
        let mut distance = -start.offset_m;
        let mut section = start.section;
        let mut direction = start.direction;
        let mut previous: Option<SectionId> = None;

        let kind = loop {
            if previous.is_some() {
                if distance >= max {
                    break EndAuthorityType::MaxDistance;
                }
                if window.len() > limit {
                    break EndAuthorityType::Loop;
                }
                let aligned = previous.map_or(true, |p| {
                    ctx.graph.section(section).is_aligned_from(direction, p)
                });
                if !aligned {
                    self.misaligned_switch[d] = Some(section);
                    if ctx.graph.section(section).state.is_occupied_by_other(me) {
                        distance += self.train_ahead_in(ctx, section, direction, d);
                        break EndAuthorityType::TrainAhead;
                    }
                    break EndAuthorityType::ReservedSwitch;
                }

                window.push(element_for(ctx.graph, section, direction));
                let claimant = Claimant {
                    routed: RoutedTrain::new(me, d),
                    route: &window,
                    deadlocks: &self.deadlocks,
                    front_index: 0,
                };
                match reservation::check_available(ctx.graph, section, &claimant) {
                    Availability::Available => {
                        reservation::reserve(ctx.graph, section, &claimant);
                    }
                    Availability::OccupiedByOther => {
                        distance += self.train_ahead_in(ctx, section, direction, d);
                        break EndAuthorityType::TrainAhead;
                    }
                    _ => {
                        window.truncate(window.len() - 1);
                        let s = ctx.graph.section(section);
                        break if s.kind == SectionKind::EndOfTrack {
                            EndAuthorityType::EndOfTrack
                        } else if s.is_switch() {
                            EndAuthorityType::ReservedSwitch
                        } else {
                            EndAuthorityType::EndOfPath
                        };
                    }
                }
            }

            distance += ctx.graph.section_length(section);

            if let Some(signal) = ctx.graph.section(section).end_signals[direction.index()] {
                if self.mode != ControlMode::Explorer || d != FORWARD {
                    break EndAuthorityType::Signal;
                }
                self.valid_route[d] = window.clone();
                let aspect = if ctx.graph.signal(signal).is_enabled_for(me) {
                    ctx.graph.signal(signal).aspect
                } else {
                    ctx.interlocking.request_clear(ctx.graph, signal, self)
                };
                if aspect.is_stop() {
                    break EndAuthorityType::Signal;
                }
                self.next_signal[d] = Some(signal);
            }

            let Some(pin) = ctx.graph.section(section).exit_pin(direction, previous) else {
                break EndAuthorityType::EndOfTrack;
            };
            previous = Some(section);
            section = pin.section;
            direction = pin.direction;
        };

        log::trace!(
            "{} {} window ends after {:.0} m: {}",
            me,
            if d == FORWARD { "forward" } else { "backward" },
            distance,
            kind.as_str()
        );
        self.valid_route[d] = window;
        self.set_authority(d, kind, distance);
        if d == FORWARD {
            self.locate();
        }
    }

    /// Distance into `section` to the train occupying it. Queues this train
    /// for the section once it clears.
    fn train_ahead_in(
        &self,
        ctx: &mut TickContext<'_>,
        section: SectionId,
        direction: Direction,
        d: usize,
    ) -> f32 {
        let me = self.id;
        let ahead = reservation::test_train_ahead(ctx.graph, ctx.fleet, section, me, 0.0, direction);
        reservation::pre_reserve(ctx.graph, section, RoutedTrain::new(me, d));
        ahead.map_or(0.0, |t| t.distance_m)
    }
}

fn element_for(graph: &TrackGraph, section: SectionId, direction: Direction) -> RouteElement {
    RouteElement {
        facing_point: graph.section(section).is_facing_point(direction),
        ..RouteElement::new(section, direction)
    }
}
