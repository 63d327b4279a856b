//! Scenario runner.
//!
//! Drives a [`Simulation`] through a [`Scenario`]: timeline actions are
//! applied at the start of their tick, then the anchor advances and the
//! simulation ticks against it. Every emitted event is written to the
//! output as one JSON object per line, followed by a summary line.

use std::io::Write;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use squadron_core::anchor::PathFollower;
use squadron_core::components::UnitId;
use squadron_core::events::{SimEvent, TickEvents};
use squadron_core::math::Vec3Fixed;
use squadron_core::simulation::{tick_duration, Simulation, UnitSpawnParams};
use squadron_core::unit::UnitState;

use crate::scenario::{to_fixed, to_vec3, Action, Scenario, ScenarioError, UnitPlacement};

/// One line of event output.
#[derive(Debug, Serialize)]
struct EventLine<'a> {
    tick: u64,
    #[serde(flatten)]
    event: &'a SimEvent,
}

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Scenario name.
    pub scenario: String,
    /// Ticks simulated.
    pub ticks: u64,
    /// Live units at the end.
    pub units: usize,
    /// Units holding a slot at the end.
    pub occupied_slots: usize,
    /// Slots in the final layout.
    pub slot_count: usize,
    /// Units in combat at the end.
    pub in_combat: usize,
    /// Events emitted over the run.
    pub events: usize,
    /// Concussions over the run.
    pub concussions: usize,
    /// Deaths over the run.
    pub deaths: usize,
    /// Timeline actions the simulation refused.
    pub rejected_actions: usize,
    /// Final state hash.
    pub state_hash: u64,
}

/// A simulation bound to a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    scenario: Scenario,
    sim: Simulation,
    anchor: PathFollower,
    next_action: usize,
    rejected_actions: usize,
    startup: Option<TickEvents>,
}

impl ScenarioRunner {
    /// Build the simulation: generate the configured layout and spawn the
    /// starting units.
    ///
    /// # Errors
    ///
    /// Fails on out-of-range decimals or an invalid startup layout.
    pub fn new(scenario: Scenario) -> Result<Self, ScenarioError> {
        let half_extents = scenario.half_extents_fixed()?;
        let waypoints = scenario
            .anchor
            .waypoints
            .iter()
            .map(|&w| to_vec3(w))
            .collect::<Result<Vec<_>, _>>()?;
        let anchor = PathFollower::new(waypoints, to_fixed(scenario.anchor.speed)?, half_extents);

        let mut sim = Simulation::new(scenario.config.clone());
        let startup = sim.generate_configured_formation(half_extents)?;

        let mut timeline = scenario.timeline.clone();
        timeline.sort_by_key(|t| t.tick);

        let mut runner = Self {
            scenario: Scenario {
                timeline,
                ..scenario
            },
            sim,
            anchor,
            next_action: 0,
            rejected_actions: 0,
            startup: Some(startup),
        };
        for placement in runner.scenario.units.clone() {
            runner.spawn(&placement)?;
        }

        tracing::info!(
            scenario = %runner.scenario.name,
            units = runner.sim.units().len(),
            slots = runner.sim.formation().slot_count(),
            "Scenario loaded"
        );
        Ok(runner)
    }

    /// The simulation being driven.
    #[must_use]
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// The scenario being run, with the timeline in firing order.
    #[must_use]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Whether the configured tick count has been reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.sim.get_tick() >= self.scenario.ticks
    }

    fn spawn(&mut self, placement: &UnitPlacement) -> Result<(), ScenarioError> {
        let origin = to_vec3(placement.position)?;
        let spawn_point = placement.spawn_point.map(to_vec3).transpose()?;
        for i in 0..placement.count {
            let offset = Vec3Fixed::from_ints(2 * i as i32, 0, 0);
            self.sim.spawn_unit(UnitSpawnParams {
                position: origin + offset,
                spawn_point,
                config: None,
            });
        }
        Ok(())
    }

    /// Apply due actions, advance the anchor and tick once.
    ///
    /// Events produced by actions are merged into the tick's events. The
    /// first step also carries the startup layout's events.
    ///
    /// # Errors
    ///
    /// Fails on out-of-range action values. Actions the simulation refuses
    /// are logged and skipped.
    pub fn step(&mut self) -> Result<TickEvents, ScenarioError> {
        let tick = self.sim.get_tick();
        let mut events = self
            .startup
            .take()
            .unwrap_or_else(|| TickEvents::new(tick));

        while let Some(timed) = self.scenario.timeline.get(self.next_action) {
            if timed.tick > tick {
                break;
            }
            let action = timed.action.clone();
            self.next_action += 1;
            match self.apply(&action) {
                Ok(produced) => events.extend(produced),
                Err(ScenarioError::Simulation(e)) => {
                    tracing::warn!(tick, error = %e, ?action, "Action rejected");
                    self.rejected_actions += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.anchor.advance(tick_duration());
        events.extend(self.sim.tick(&self.anchor));
        Ok(events)
    }

    fn apply(&mut self, action: &Action) -> Result<TickEvents, ScenarioError> {
        let events = match action {
            Action::Spawn(placement) => {
                self.spawn(placement)?;
                TickEvents::new(self.sim.get_tick())
            }
            Action::SpawnWithConfig { position, config } => {
                self.sim.spawn_unit(UnitSpawnParams {
                    position: to_vec3(*position)?,
                    spawn_point: None,
                    config: Some(config.clone()),
                });
                TickEvents::new(self.sim.get_tick())
            }
            Action::Despawn { unit } => self.sim.despawn_unit(UnitId(*unit))?,
            Action::Damage { unit, amount } => self.sim.take_damage(UnitId(*unit), *amount)?,
            Action::Concussion { unit, duration } => self
                .sim
                .apply_concussion(UnitId(*unit), to_fixed(*duration)?)?,
            Action::Force {
                unit,
                direction,
                magnitude,
            } => self
                .sim
                .apply_force(UnitId(*unit), to_vec3(*direction)?, to_fixed(*magnitude)?)?,
            Action::Torque { unit, amount } => {
                self.sim.apply_torque(UnitId(*unit), to_fixed(*amount)?)?
            }
            Action::Reassign { unit } => self.sim.force_reassign_slot(UnitId(*unit))?,
            Action::NotifySlotAvailable { unit } => self.sim.notify_slot_available(UnitId(*unit))?,
            Action::Relayout { layout, params } => {
                let half_extents = self.scenario.half_extents_fixed()?;
                self.sim.generate_formation(*layout, *params, half_extents)?
            }
            Action::Resize { half_extents } => {
                self.scenario.half_extents = *half_extents;
                self.anchor
                    .set_half_extents(self.scenario.half_extents_fixed()?);
                TickEvents::new(self.sim.get_tick())
            }
        };
        Ok(events)
    }

    /// Run to the end, writing events as JSON lines to `out`.
    ///
    /// The final line is the [`RunSummary`].
    ///
    /// # Errors
    ///
    /// Fails if a step fails or `out` cannot be written.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<RunSummary, ScenarioError> {
        let mut totals = Totals::default();
        while !self.is_finished() {
            let events = self.step()?;
            totals.record(&events);
            for event in events.iter() {
                serde_json::to_writer(
                    &mut *out,
                    &EventLine {
                        tick: events.tick,
                        event,
                    },
                )?;
                writeln!(out)?;
            }
        }

        let summary = self.summary(&totals);
        serde_json::to_writer(&mut *out, &summary)?;
        writeln!(out)?;
        out.flush()?;
        Ok(summary)
    }

    /// Run to the end without producing output.
    ///
    /// # Errors
    ///
    /// Fails if a step fails.
    pub fn run_silent(&mut self) -> Result<RunSummary, ScenarioError> {
        let mut totals = Totals::default();
        while !self.is_finished() {
            totals.record(&self.step()?);
        }
        Ok(self.summary(&totals))
    }

    fn summary(&self, totals: &Totals) -> RunSummary {
        let formation = self.sim.formation();
        RunSummary {
            scenario: self.scenario.name.clone(),
            ticks: self.sim.get_tick(),
            units: self.sim.units().len(),
            occupied_slots: formation.occupied_count(),
            slot_count: formation.slot_count(),
            in_combat: self
                .sim
                .units()
                .iter()
                .filter(|u| u.state() == UnitState::InCombat)
                .count(),
            events: totals.events,
            concussions: totals.concussions,
            deaths: totals.deaths,
            rejected_actions: self.rejected_actions,
            state_hash: self.sim.state_hash(),
        }
    }
}

#[derive(Debug, Default)]
struct Totals {
    events: usize,
    concussions: usize,
    deaths: usize,
}

impl Totals {
    fn record(&mut self, events: &TickEvents) {
        self.events += events.events.len();
        self.concussions += events.count(|e| matches!(e, SimEvent::EnteredConcussion { .. }));
        self.deaths += events.deaths().len();
    }
}

/// Outcome of running one scenario several times.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    /// Final state hash of each run.
    pub hashes: Vec<u64>,
}

impl VerifyReport {
    /// Whether every run ended in the same state.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }
}

/// Run the scenario `runs` times in parallel and compare final hashes.
///
/// # Errors
///
/// Fails if any run fails.
pub fn verify(scenario: &Scenario, runs: usize) -> Result<VerifyReport, ScenarioError> {
    let hashes = (0..runs)
        .into_par_iter()
        .map(|_| {
            let mut runner = ScenarioRunner::new(scenario.clone())?;
            Ok(runner.run_silent()?.state_hash)
        })
        .collect::<Result<Vec<_>, ScenarioError>>()?;
    Ok(VerifyReport { hashes })
}

/// Throughput measurement.
#[derive(Debug, Clone)]
pub struct BenchReport {
    /// Ticks measured (after warmup).
    pub ticks: u64,
    /// Wall-clock time for the measured ticks.
    pub elapsed: Duration,
    /// Live units at the end.
    pub units: usize,
    /// Final state hash.
    pub state_hash: u64,
}

impl BenchReport {
    /// Ticks per wall-clock second.
    #[must_use]
    pub fn ticks_per_second(&self) -> f64 {
        self.ticks as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

/// Run `ticks` ticks of the scenario (ignoring its own tick count) and
/// time them.
pub fn bench(scenario: &Scenario, ticks: u64) -> Result<BenchReport, ScenarioError> {
    let mut runner = ScenarioRunner::new(scenario.clone())?;

    // Warmup
    for _ in 0..100 {
        runner.step()?;
    }

    let start = Instant::now();
    for _ in 0..ticks {
        runner.step()?;
    }
    let elapsed = start.elapsed();

    Ok(BenchReport {
        ticks,
        elapsed,
        units: runner.sim.units().len(),
        state_hash: runner.sim.state_hash(),
    })
}
