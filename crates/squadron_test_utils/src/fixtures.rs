//! Test fixtures and helpers.
//!
//! Pre-built formations and unit groups for consistent testing.

use fixed::types::I32F32;
use squadron_core::anchor::{AnchorPose, AnchorSource, PathFollower};
use squadron_core::components::UnitId;
use squadron_core::events::TickEvents;
use squadron_core::formation::{LayoutKind, LayoutParams};
use squadron_core::math::{Vec2Fixed, Vec3Fixed};
use squadron_core::simulation::{tick_duration, Simulation, UnitSpawnParams};
use squadron_core::unit::UnitState;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a vector from integer components.
#[must_use]
pub fn vec3(x: i32, y: i32, z: i32) -> Vec3Fixed {
    Vec3Fixed::from_ints(x, y, z)
}

/// A simulation paired with the anchor that drives it.
///
/// Each [`step`](Self::step) advances the anchor along its path and then
/// ticks the simulation against it.
#[derive(Debug, Clone)]
pub struct Harness {
    /// Simulation under test.
    pub sim: Simulation,
    /// Anchor driving the formation.
    pub anchor: PathFollower,
}

impl Harness {
    /// Simulation with no layout, anchored at the origin.
    #[must_use]
    pub fn empty(half_extents: Vec2Fixed) -> Self {
        Self {
            sim: Simulation::default(),
            anchor: PathFollower::new(vec![Vec3Fixed::ZERO], I32F32::ZERO, half_extents),
        }
    }

    /// Simulation with a generated layout and a stationary anchor.
    ///
    /// # Panics
    ///
    /// Panics if the layout parameters are invalid.
    #[must_use]
    pub fn with_layout(kind: LayoutKind, params: LayoutParams, half_extents: Vec2Fixed) -> Self {
        let mut harness = Self::empty(half_extents);
        harness
            .sim
            .generate_formation(kind, params, half_extents)
            .expect("fixture layout must be valid");
        harness
    }

    /// Simulation with a layout whose anchor travels along `waypoints`.
    #[must_use]
    pub fn moving(
        kind: LayoutKind,
        params: LayoutParams,
        waypoints: Vec<Vec3Fixed>,
        speed: I32F32,
        half_extents: Vec2Fixed,
    ) -> Self {
        let mut harness = Self::with_layout(kind, params, half_extents);
        harness.anchor = PathFollower::new(waypoints, speed, half_extents);
        harness
    }

    /// Spawn `count` units in a row below the anchor.
    pub fn spawn_row(&mut self, count: i32, spawn_point: Option<Vec3Fixed>) -> Vec<UnitId> {
        (0..count)
            .map(|i| {
                self.sim.spawn_unit(UnitSpawnParams {
                    position: vec3(i * 2 - count, -12, 0),
                    spawn_point,
                    config: None,
                })
            })
            .collect()
    }

    /// Advance one tick.
    pub fn step(&mut self) -> TickEvents {
        self.anchor.advance(tick_duration());
        self.sim.tick(&self.anchor)
    }

    /// Advance `ticks` ticks, collecting every tick's events.
    pub fn run(&mut self, ticks: u64) -> Vec<TickEvents> {
        (0..ticks).map(|_| self.step()).collect()
    }

    /// Step until `done` holds, at most `max_ticks` times.
    ///
    /// Returns `true` if the condition was met.
    pub fn run_until(&mut self, max_ticks: u64, done: impl Fn(&Simulation) -> bool) -> bool {
        for _ in 0..max_ticks {
            if done(&self.sim) {
                return true;
            }
            self.step();
        }
        done(&self.sim)
    }

    /// Step until every listed unit is in `state`.
    pub fn run_until_all(&mut self, units: &[UnitId], state: UnitState, max_ticks: u64) -> bool {
        self.run_until(max_ticks, |sim| {
            units
                .iter()
                .all(|&id| sim.unit(id).map(|u| u.state()) == Some(state))
        })
    }

    /// Pose of the anchor right now.
    #[must_use]
    pub fn pose(&self) -> AnchorPose {
        self.anchor.anchor_pose()
    }
}

/// Harness with the default V of five slots and plenty of room.
#[must_use]
pub fn default_harness() -> Harness {
    Harness::with_layout(
        LayoutKind::VShape,
        LayoutParams::default(),
        Vec2Fixed::from_ints(50, 50),
    )
}

/// Layout parameters with only the slot count changed.
#[must_use]
pub fn slots(count: u32) -> LayoutParams {
    LayoutParams {
        slot_count: count,
        ..LayoutParams::default()
    }
}
