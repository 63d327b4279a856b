//! # Squadron Core
//!
//! Deterministic formation simulation: a pool of combat units competing for
//! slots in a shape that follows a moving anchor.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! This separation enables:
//! - Headless scenario runs
//! - Snapshot and restore
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`formation`] - Layout generation and the slot table
//! - [`unit`] - Per-unit state machine and behaviors
//! - [`anchor`] - Sources of the formation's pose and boundary
//! - [`simulation`] - Core simulation loop
//! - [`events`] - Observable events emitted each tick
//! - [`config`] - RON-loadable tuning
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod anchor;
pub mod components;
pub mod config;
pub mod error;
pub mod events;
pub mod formation;
pub mod math;
pub mod simulation;
pub mod unit;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::anchor::{AnchorPose, AnchorSource, PathFollower, StaticAnchor};
    pub use crate::components::{Body, Facing, Health, UnitId};
    pub use crate::config::{FormationConfig, SimulationConfig, UnitConfig};
    pub use crate::error::{Result, SquadronError};
    pub use crate::events::{SimEvent, TickEvents};
    pub use crate::formation::{
        AllocationStrategy, FormationManager, LayoutKind, LayoutParams, OffsetSpace, SlotId,
    };
    pub use crate::math::{Fixed, Vec2Fixed, Vec3Fixed};
    pub use crate::simulation::{Simulation, UnitSpawnParams, TICK_RATE};
    pub use crate::unit::{Unit, UnitState};
}
