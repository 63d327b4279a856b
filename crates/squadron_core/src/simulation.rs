//! Simulation driver.
//!
//! The [`Simulation`] owns the [`FormationManager`] and every [`Unit`] and
//! advances them once per tick: a frame-rate update (acquisition and slot
//! polling) followed by a fixed-timestep physics update.
//!
//! # Determinism
//!
//! All operations in this module are fully deterministic:
//! - No floating-point math (uses fixed-point via [`Fixed`])
//! - No system randomness (one seeded stream per unit)
//! - Consistent iteration order (ascending unit ids)
//! - Same inputs always produce same outputs
//!
//! Processing units in id order also settles which unit wins when several
//! compete for the same slot within one tick: the lower id claims first.
//!
//! # Example
//!
//! ```
//! use squadron_core::anchor::{AnchorPose, StaticAnchor};
//! use squadron_core::formation::{LayoutKind, LayoutParams};
//! use squadron_core::math::{Vec2Fixed, Vec3Fixed};
//! use squadron_core::simulation::{Simulation, UnitSpawnParams};
//! use squadron_core::unit::UnitState;
//!
//! let mut sim = Simulation::default();
//! let anchor = StaticAnchor::new(AnchorPose::default(), Vec2Fixed::from_ints(20, 20));
//!
//! sim.generate_formation(LayoutKind::VShape, LayoutParams::default(), anchor.half_extents)
//!     .unwrap();
//! let unit = sim.spawn_unit(UnitSpawnParams {
//!     position: Vec3Fixed::from_ints(0, -10, 0),
//!     ..Default::default()
//! });
//!
//! sim.tick(&anchor);
//! assert_eq!(sim.unit(unit).unwrap().state(), UnitState::MovingToSlot);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::anchor::AnchorSource;
use crate::components::UnitId;
use crate::config::{SimulationConfig, UnitConfig};
use crate::error::{Result, SquadronError};
use crate::events::{SimEvent, TickEvents};
use crate::formation::{FormationManager, LayoutKind, LayoutParams};
use crate::math::{Fixed, Vec2Fixed, Vec3Fixed};
use crate::unit::Unit;

/// Physics ticks per second.
pub const TICK_RATE: u32 = 50;

/// Duration of one tick in seconds.
#[must_use]
pub fn tick_duration() -> Fixed {
    Fixed::ONE / Fixed::from_num(TICK_RATE)
}

/// Parameters for spawning a unit.
#[derive(Debug, Clone, Default)]
pub struct UnitSpawnParams {
    /// Initial world position.
    pub position: Vec3Fixed,
    /// Where the unit retreats to while no slot is free.
    pub spawn_point: Option<Vec3Fixed>,
    /// Per-unit tuning; the simulation default when `None`.
    pub config: Option<UnitConfig>,
}

/// Storage for all live units.
///
/// Uses a `HashMap` for O(1) lookup by id, with deterministic iteration
/// via sorted keys when processing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStorage {
    units: HashMap<UnitId, Unit>,
    next_id: u64,
}

impl UnitStorage {
    /// Create empty storage. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            units: HashMap::new(),
            next_id: 1,
        }
    }

    /// Build a unit with the next id and store it.
    pub fn insert_with(&mut self, build: impl FnOnce(UnitId) -> Unit) -> UnitId {
        let id = UnitId(self.next_id);
        self.next_id += 1;
        self.units.insert(id, build(id));
        id
    }

    /// Remove a unit by id.
    pub fn remove(&mut self, id: UnitId) -> Option<Unit> {
        self.units.remove(&id)
    }

    /// Get a unit by id.
    #[must_use]
    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    /// Get a mutable reference to a unit by id.
    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    /// Check if a unit exists.
    #[must_use]
    pub fn contains(&self, id: UnitId) -> bool {
        self.units.contains_key(&id)
    }

    /// Number of live units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Get sorted unit ids for deterministic iteration.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<UnitId> {
        let mut ids: Vec<_> = self.units.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over all units (not in deterministic order).
    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }
}

/// The formation simulation.
///
/// # Tick Order
///
/// 1. Refit the layout if the boundary changed (and notify units)
/// 2. Recompute the formation center from the anchor
/// 3. Reclaim slots held by units that no longer exist
/// 4. Frame update for every unit, ascending id
/// 5. Physics update for every unit, ascending id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Simulation {
    tick: u64,
    config: SimulationConfig,
    formation: FormationManager,
    units: UnitStorage,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl Simulation {
    /// Create a simulation with no layout and no units.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            tick: 0,
            formation: FormationManager::new(&config.formation),
            units: UnitStorage::new(),
            config,
        }
    }

    /// Get the current tick number.
    #[must_use]
    pub const fn get_tick(&self) -> u64 {
        self.tick
    }

    /// Configuration the simulation was built with.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The slot table.
    #[must_use]
    pub const fn formation(&self) -> &FormationManager {
        &self.formation
    }

    /// All live units.
    #[must_use]
    pub const fn units(&self) -> &UnitStorage {
        &self.units
    }

    /// Get a unit by id.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    /// Advance the simulation by one tick.
    ///
    /// Returns everything observable that happened during the tick.
    pub fn tick(&mut self, anchor: &dyn AnchorSource) -> TickEvents {
        let mut events = TickEvents::new(self.tick);
        let dt = tick_duration();

        let half_extents = anchor.boundary_half_extents();
        if self.formation.needs_refit(half_extents) {
            match self.formation.refit(half_extents) {
                Ok(_) => self.deliver_layout_changed(&mut events),
                Err(e) => tracing::warn!(error = %e, "Refit failed, keeping current layout"),
            }
        }

        self.formation.update_center(&anchor.anchor_pose());

        let units = &self.units;
        for (slot, unit) in self.formation.reclaim_orphaned(|id| units.contains(id)) {
            events.push(SimEvent::SlotReleased { unit, slot });
        }

        let ids = self.units.sorted_ids();
        for &id in &ids {
            if let Some(unit) = self.units.get_mut(id) {
                unit.frame_update(&mut self.formation, &mut events, dt);
            }
        }
        for &id in &ids {
            if let Some(unit) = self.units.get_mut(id) {
                unit.physics_update(&mut self.formation, &mut events, dt);
            }
        }

        #[cfg(feature = "debug-validation")]
        if let Err(e) = self.validate() {
            tracing::error!(tick = self.tick, error = %e, "Formation invariant violated");
        }

        self.tick += 1;

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }

        events
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Generate a new layout and notify every subscribed unit.
    ///
    /// # Errors
    ///
    /// Returns [`SquadronError::InvalidLayout`] for unusable parameters;
    /// the previous layout stays in place.
    pub fn generate_formation(
        &mut self,
        kind: LayoutKind,
        params: LayoutParams,
        half_extents: Vec2Fixed,
    ) -> Result<TickEvents> {
        self.formation
            .generate_formation(kind, params, half_extents)?;
        let mut events = TickEvents::new(self.tick);
        self.deliver_layout_changed(&mut events);
        Ok(events)
    }

    /// Generate the layout named in the configuration.
    ///
    /// # Errors
    ///
    /// Same as [`generate_formation`](Self::generate_formation).
    pub fn generate_configured_formation(&mut self, half_extents: Vec2Fixed) -> Result<TickEvents> {
        let formation = &self.config.formation;
        self.generate_formation(formation.layout, formation.params, half_extents)
    }

    fn deliver_layout_changed(&mut self, events: &mut TickEvents) {
        let notice = self.formation.broadcast_layout_changed();
        events.push(SimEvent::LayoutChanged {
            generation: notice.generation,
            slot_count: notice.slot_count,
        });
        for id in notice.recipients {
            if let Some(unit) = self.units.get_mut(id) {
                unit.on_layout_changed(&mut self.formation, events);
            }
        }
    }

    // ========================================================================
    // Unit lifecycle
    // ========================================================================

    /// Spawn a unit. It starts in `WaitingForFormation` and is subscribed
    /// to layout changes.
    pub fn spawn_unit(&mut self, params: UnitSpawnParams) -> UnitId {
        let config = params.config.unwrap_or_else(|| self.config.unit.clone());
        let seed = self.config.seed;
        let id = self
            .units
            .insert_with(|id| Unit::new(id, params.position, params.spawn_point, config, seed));
        self.formation.subscribe(id);
        debug!(unit = %id, "Spawned unit");
        id
    }

    /// Remove a unit. Its slot is always released, even while concussed.
    ///
    /// # Errors
    ///
    /// Returns [`SquadronError::UnitNotFound`] if the unit doesn't exist.
    pub fn despawn_unit(&mut self, id: UnitId) -> Result<TickEvents> {
        let mut unit = self.units.remove(id).ok_or(SquadronError::UnitNotFound(id))?;
        let mut events = TickEvents::new(self.tick);
        unit.release_for_teardown(&mut self.formation, &mut events);
        self.formation.unsubscribe(id);
        debug!(unit = %id, "Despawned unit");
        Ok(events)
    }

    /// Damage a unit. At zero health the unit dies: `Death` is emitted, its
    /// slot is released and it is removed.
    ///
    /// # Errors
    ///
    /// Returns [`SquadronError::UnitNotFound`] if the unit doesn't exist.
    pub fn take_damage(&mut self, id: UnitId, amount: u32) -> Result<TickEvents> {
        let unit = self.units.get_mut(id).ok_or(SquadronError::UnitNotFound(id))?;
        let mut events = TickEvents::new(self.tick);
        if unit.apply_damage(amount, &mut events) {
            let position = unit.body().position;
            unit.release_for_teardown(&mut self.formation, &mut events);
            self.formation.unsubscribe(id);
            self.units.remove(id);
            events.push(SimEvent::Death { unit: id, position });
            info!(unit = %id, "Unit destroyed");
        }
        Ok(events)
    }

    // ========================================================================
    // Combat and formation entry points
    // ========================================================================

    /// Concuss a unit for `duration` seconds.
    ///
    /// # Errors
    ///
    /// [`SquadronError::UnitNotFound`], or
    /// [`SquadronError::IneligibleCombatAction`] unless the unit is in
    /// combat and has reached its slot at least once.
    pub fn apply_concussion(&mut self, id: UnitId, duration: Fixed) -> Result<TickEvents> {
        let mut events = TickEvents::new(self.tick);
        let unit = self.units.get_mut(id).ok_or(SquadronError::UnitNotFound(id))?;
        unit.apply_concussion(duration, &mut self.formation, &mut events)?;
        Ok(events)
    }

    /// Push a unit with an impulse.
    ///
    /// # Errors
    ///
    /// Same as [`apply_concussion`](Self::apply_concussion).
    pub fn apply_force(
        &mut self,
        id: UnitId,
        direction: Vec3Fixed,
        magnitude: Fixed,
    ) -> Result<TickEvents> {
        let mut events = TickEvents::new(self.tick);
        let unit = self.units.get_mut(id).ok_or(SquadronError::UnitNotFound(id))?;
        unit.apply_force(direction, magnitude, &mut self.formation, &mut events)?;
        Ok(events)
    }

    /// Set the spin rate of a unit's next concussion.
    ///
    /// # Errors
    ///
    /// Same as [`apply_concussion`](Self::apply_concussion).
    pub fn apply_torque(&mut self, id: UnitId, amount: Fixed) -> Result<TickEvents> {
        let mut events = TickEvents::new(self.tick);
        let unit = self.units.get_mut(id).ok_or(SquadronError::UnitNotFound(id))?;
        unit.apply_torque(amount, &mut self.formation, &mut events)?;
        Ok(events)
    }

    /// Make a unit drop its slot and acquire again from scratch.
    ///
    /// # Errors
    ///
    /// [`SquadronError::UnitNotFound`], or
    /// [`SquadronError::InvalidTransition`] while the unit is concussed.
    pub fn force_reassign_slot(&mut self, id: UnitId) -> Result<TickEvents> {
        let mut events = TickEvents::new(self.tick);
        let unit = self.units.get_mut(id).ok_or(SquadronError::UnitNotFound(id))?;
        unit.force_reassign(&mut self.formation, &mut events)?;
        Ok(events)
    }

    /// Tell a holding unit a slot may be free so it polls right away.
    ///
    /// # Errors
    ///
    /// Returns [`SquadronError::UnitNotFound`] if the unit doesn't exist.
    pub fn notify_slot_available(&mut self, id: UnitId) -> Result<TickEvents> {
        let mut events = TickEvents::new(self.tick);
        let unit = self.units.get_mut(id).ok_or(SquadronError::UnitNotFound(id))?;
        unit.notify_slot_available(&mut self.formation, &mut events);
        Ok(events)
    }

    // ========================================================================
    // Validation, hashing and snapshots
    // ========================================================================

    /// Check the slot ownership invariants.
    ///
    /// - no unit holds more than one slot
    /// - every occupant is a live unit whose own slot handle agrees
    ///
    /// # Errors
    ///
    /// Returns [`SquadronError::InvalidState`] describing the first
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        let mut holders = Vec::new();
        for slot in self.formation.slots() {
            let Some(occupant) = slot.occupant() else {
                continue;
            };
            if holders.contains(&occupant) {
                return Err(SquadronError::InvalidState(format!(
                    "{occupant} holds more than one slot"
                )));
            }
            holders.push(occupant);

            let Some(unit) = self.units.get(occupant) else {
                return Err(SquadronError::InvalidState(format!(
                    "{} is held by missing {occupant}",
                    slot.id()
                )));
            };
            if unit.slot() != Some(slot.id()) {
                return Err(SquadronError::InvalidState(format!(
                    "{} is held by {occupant}, which believes it holds {:?}",
                    slot.id(),
                    unit.slot()
                )));
            }
        }
        Ok(())
    }

    /// Calculate a hash of the current simulation state.
    ///
    /// Two simulations with identical state produce identical hashes.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);

        // Slot table
        self.formation.generation().hash(&mut hasher);
        self.formation.center().hash(&mut hasher);
        for slot in self.formation.slots() {
            slot.hash(&mut hasher);
        }

        // Units in deterministic order
        let ids = self.units.sorted_ids();
        ids.len().hash(&mut hasher);
        for id in ids {
            if let Some(unit) = self.units.get(id) {
                id.hash(&mut hasher);
                unit.state().hash(&mut hasher);
                unit.health().hash(&mut hasher);
                unit.body().hash(&mut hasher);
                unit.facing().hash(&mut hasher);
                unit.slot().hash(&mut hasher);
                unit.stun_timer().map(Fixed::to_bits).hash(&mut hasher);
            }
        }

        hasher.finish()
    }

    /// Serialize the simulation state.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| SquadronError::InvalidState(format!("Failed to serialize simulation: {e}")))
    }

    /// Deserialize simulation state from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| {
            SquadronError::InvalidState(format!("Failed to deserialize simulation: {e}"))
        })
    }
}
