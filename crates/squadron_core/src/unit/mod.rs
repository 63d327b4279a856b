//! Per-unit behaviors.
//!
//! A [`Unit`] bundles the state machine, body and the behaviors that
//! drive it:
//!
//! - [`state`]: authoritative state and transition table
//! - [`formation_behavior`]: slot acquisition, approach and follow motion
//! - [`combat_behavior`]: drift-triggered concussion and external forces
//! - [`idle`]: spawn-point loitering while no slot is free
//! - [`facing`]: orientation
//!
//! Behaviors never talk to each other directly. The unit hands them a
//! [`UnitContext`] with the pieces they may touch and wires their results
//! together.

pub mod combat_behavior;
pub mod facing;
pub mod formation_behavior;
pub mod idle;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::components::{Body, Facing, Health, UnitId};
use crate::config::UnitConfig;
use crate::error::Result;
use crate::events::TickEvents;
use crate::formation::{FormationManager, SlotId};
use crate::math::{Fixed, SimRng, Vec3Fixed};

pub use combat_behavior::CombatBehavior;
pub use formation_behavior::{ApproachKind, FormationBehavior, HoldingPattern};
pub use idle::IdleBehavior;
pub use state::{UnitState, UnitStateMachine};

/// Mutable view of one unit plus the shared formation, handed to behaviors.
pub struct UnitContext<'a> {
    /// Unit tuning.
    pub config: &'a UnitConfig,
    /// State machine.
    pub machine: &'a mut UnitStateMachine,
    /// Physics body.
    pub body: &'a mut Body,
    /// Per-unit random stream.
    pub rng: &'a mut SimRng,
    /// Shared slot table.
    pub manager: &'a mut FormationManager,
    /// Event sink for the current tick.
    pub events: &'a mut TickEvents,
}

impl UnitContext<'_> {
    /// Owning unit.
    #[must_use]
    pub fn unit(&self) -> UnitId {
        self.machine.unit()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> UnitState {
        self.machine.state()
    }
}

/// A combat unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    id: UnitId,
    config: UnitConfig,
    machine: UnitStateMachine,
    body: Body,
    facing: Facing,
    formation: FormationBehavior<IdleBehavior>,
    combat: CombatBehavior,
    rng: SimRng,
}

/// Builds a [`UnitContext`] from disjoint fields of a [`Unit`].
macro_rules! context {
    ($unit:expr, $manager:expr, $events:expr) => {
        UnitContext {
            config: &$unit.config,
            machine: &mut $unit.machine,
            body: &mut $unit.body,
            rng: &mut $unit.rng,
            manager: &mut *$manager,
            events: &mut *$events,
        }
    };
}

impl Unit {
    /// Create a unit waiting for a formation slot.
    #[must_use]
    pub fn new(
        id: UnitId,
        position: Vec3Fixed,
        spawn_point: Option<Vec3Fixed>,
        config: UnitConfig,
        seed: u64,
    ) -> Self {
        Self {
            id,
            machine: UnitStateMachine::new(id, config.max_health),
            body: Body::at_rest(position),
            facing: Facing::default(),
            formation: FormationBehavior::new(IdleBehavior::new(spawn_point)),
            combat: CombatBehavior::default(),
            rng: SimRng::for_stream(seed, id.0),
            config,
        }
    }

    /// Unit identifier.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> UnitState {
        self.machine.state()
    }

    /// Current health.
    #[must_use]
    pub const fn health(&self) -> Health {
        self.machine.health()
    }

    /// Physics body.
    #[must_use]
    pub const fn body(&self) -> &Body {
        &self.body
    }

    /// Orientation.
    #[must_use]
    pub const fn facing(&self) -> &Facing {
        &self.facing
    }

    /// Tuning in effect for this unit.
    #[must_use]
    pub const fn config(&self) -> &UnitConfig {
        &self.config
    }

    /// Slot handle the unit believes it holds.
    #[must_use]
    pub const fn slot(&self) -> Option<SlotId> {
        self.formation.slot()
    }

    /// Whether external force and concussion are accepted once in combat.
    #[must_use]
    pub const fn is_concussable(&self) -> bool {
        self.combat.is_concussable()
    }

    /// Remaining stun time while concussed.
    #[must_use]
    pub fn stun_timer(&self) -> Option<Fixed> {
        self.combat.stun_timer()
    }

    /// Frame-rate update: acquisition and slot polling.
    pub fn frame_update(&mut self, manager: &mut FormationManager, events: &mut TickEvents, dt: Fixed) {
        let mut ctx = context!(self, manager, events);
        self.formation.frame_update(&mut ctx, dt);
    }

    /// Fixed-timestep update: drift check, motion, facing, integration.
    pub fn physics_update(
        &mut self,
        manager: &mut FormationManager,
        events: &mut TickEvents,
        dt: Fixed,
    ) {
        let heading = manager.heading();
        {
            let mut ctx = context!(self, manager, events);
            let slot_position = self
                .formation
                .slot()
                .and_then(|slot| ctx.manager.slot_world_position(slot));
            self.combat.check_drift(&mut ctx, slot_position);

            if ctx.state() == UnitState::Concussed {
                if self.combat.physics_step(&mut ctx, &mut self.facing, dt) {
                    self.formation.begin_return(&mut ctx);
                }
            } else if self.formation.physics_step(&mut ctx, dt).is_some() {
                self.combat.mark_concussable();
            }
        }

        facing::steer(
            &mut self.facing,
            self.machine.state(),
            self.body.velocity,
            heading,
            self.config.turn_rate,
            dt,
        );
        self.body.integrate(dt);
    }

    /// Deliver a layout-changed notice.
    pub fn on_layout_changed(&mut self, manager: &mut FormationManager, events: &mut TickEvents) {
        let mut ctx = context!(self, manager, events);
        self.formation.on_layout_changed(&mut ctx);
    }

    /// Reduce health. Returns `true` if the unit died.
    pub fn apply_damage(&mut self, amount: u32, events: &mut TickEvents) -> bool {
        self.machine.apply_damage(amount, events)
    }

    /// Knock the unit out of formation for `duration` seconds.
    pub fn apply_concussion(
        &mut self,
        duration: Fixed,
        manager: &mut FormationManager,
        events: &mut TickEvents,
    ) -> Result<()> {
        let mut ctx = context!(self, manager, events);
        self.combat.apply_concussion(&mut ctx, duration)
    }

    /// Push the unit with an impulse.
    pub fn apply_force(
        &mut self,
        direction: Vec3Fixed,
        magnitude: Fixed,
        manager: &mut FormationManager,
        events: &mut TickEvents,
    ) -> Result<()> {
        let mut ctx = context!(self, manager, events);
        self.combat.apply_force(&mut ctx, direction, magnitude)
    }

    /// Set the spin rate used by the next concussion.
    pub fn apply_torque(
        &mut self,
        amount: Fixed,
        manager: &mut FormationManager,
        events: &mut TickEvents,
    ) -> Result<()> {
        let mut ctx = context!(self, manager, events);
        self.combat.apply_torque(&mut ctx, amount)
    }

    /// Drop the current slot and start acquisition from scratch.
    pub fn force_reassign(&mut self, manager: &mut FormationManager, events: &mut TickEvents) -> Result<()> {
        let mut ctx = context!(self, manager, events);
        self.formation.force_reassign(&mut ctx)
    }

    /// Poll for a slot right away if the unit is holding.
    pub fn notify_slot_available(
        &mut self,
        manager: &mut FormationManager,
        events: &mut TickEvents,
    ) -> bool {
        let mut ctx = context!(self, manager, events);
        self.formation.notify_slot_available(&mut ctx)
    }

    /// Release the slot on teardown, even while concussed.
    pub fn release_for_teardown(&mut self, manager: &mut FormationManager, events: &mut TickEvents) {
        let mut ctx = context!(self, manager, events);
        self.formation.force_release(&mut ctx);
    }
}
