//! Per-unit component definitions.
//!
//! Components are plain data. Behaviors in [`crate::unit`] read and write
//! them; the [`crate::simulation::Simulation`] integrates bodies once per
//! physics tick.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::{fixed_serde, Fixed, Vec3Fixed};

/// Unique identifier for a unit.
///
/// Opaque handle; ids are never reused within one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Kinematic body driven by velocity.
///
/// Behaviors never write `position` directly during normal motion; they
/// set `velocity` and the physics step integrates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Body {
    /// World position.
    pub position: Vec3Fixed,
    /// Velocity in world units per second.
    pub velocity: Vec3Fixed,
}

impl Body {
    /// Create a body at rest.
    #[must_use]
    pub const fn at_rest(position: Vec3Fixed) -> Self {
        Self {
            position,
            velocity: Vec3Fixed::ZERO,
        }
    }

    /// Advance position by `velocity * dt`.
    pub fn integrate(&mut self, dt: Fixed) {
        self.position += self.velocity.scale(dt);
    }

    /// Check if the body is stationary.
    #[must_use]
    pub fn is_stationary(&self) -> bool {
        self.velocity.is_zero()
    }
}

/// Health component for damageable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Health {
    /// Current health points.
    pub current: u32,
    /// Maximum health points.
    pub max: u32,
}

impl Health {
    /// Create new health component at full health.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { current: max, max }
    }

    /// Check if the unit is dead (health == 0).
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.current == 0
    }

    /// Apply damage, returning actual damage dealt.
    /// Uses saturating subtraction to prevent underflow.
    pub fn apply_damage(&mut self, amount: u32) -> u32 {
        let actual = amount.min(self.current);
        self.current = self.current.saturating_sub(actual);
        actual
    }

    /// Get health as a percentage (0-100).
    #[must_use]
    pub fn percentage(&self) -> u32 {
        if self.max == 0 {
            0
        } else {
            (self.current * 100) / self.max
        }
    }
}

/// Orientation of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Facing {
    /// Unit-length look direction.
    pub forward: Vec3Fixed,
    /// Cosmetic spin about the vertical axis, radians in `[-PI, PI)`.
    #[serde(with = "fixed_serde")]
    pub spin: Fixed,
}

impl Default for Facing {
    fn default() -> Self {
        Self {
            forward: Vec3Fixed::Z,
            spin: Fixed::ZERO,
        }
    }
}
