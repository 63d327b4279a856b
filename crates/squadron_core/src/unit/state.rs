//! Authoritative per-unit state and the validated transition table.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::components::{Health, UnitId};
use crate::error::{Result, SquadronError};
use crate::events::{SimEvent, TickEvents};

/// Lifecycle state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitState {
    /// Looking for a free slot.
    WaitingForFormation,
    /// No slot available; travelling to the spawn point.
    MovingToSpawnPoint,
    /// Loitering at the spawn point, polling for a slot.
    AtSpawnPoint,
    /// First approach to a claimed slot.
    MovingToSlot,
    /// Holding the slot and following it.
    InCombat,
    /// Knocked out of formation; floating until the stun wears off.
    Concussed,
    /// Flying back to the reserved slot after a concussion.
    ReturningToSlot,
    /// No slot and nowhere to go; polling for a slot.
    Idle,
}

impl UnitState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::WaitingForFormation,
        Self::MovingToSpawnPoint,
        Self::AtSpawnPoint,
        Self::MovingToSlot,
        Self::InCombat,
        Self::Concussed,
        Self::ReturningToSlot,
        Self::Idle,
    ];

    /// Whether the transition table allows `self -> to`.
    ///
    /// `Concussed` only resolves into `ReturningToSlot`; `InCombat` is only
    /// left through a concussion or a formation reset. Every other state
    /// may move anywhere.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        match self {
            Self::Concussed => matches!(to, Self::ReturningToSlot),
            Self::InCombat => matches!(to, Self::Concussed | Self::WaitingForFormation),
            _ => true,
        }
    }

    /// States in which a unit is parked without a slot and polls for one.
    #[must_use]
    pub const fn is_holding(self) -> bool {
        matches!(self, Self::MovingToSpawnPoint | Self::AtSpawnPoint | Self::Idle)
    }

    /// States driven by the interpolated approach.
    #[must_use]
    pub const fn is_approaching(self) -> bool {
        matches!(self, Self::MovingToSlot | Self::ReturningToSlot)
    }
}

/// Per-unit state machine.
///
/// All state changes go through [`UnitStateMachine::set_state`], which
/// consults the transition table and emits lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitStateMachine {
    unit: UnitId,
    state: UnitState,
    health: Health,
}

impl UnitStateMachine {
    /// New machine in `WaitingForFormation` at full health.
    #[must_use]
    pub const fn new(unit: UnitId, max_health: u32) -> Self {
        Self {
            unit,
            state: UnitState::WaitingForFormation,
            health: Health::new(max_health),
        }
    }

    /// Owning unit.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> UnitState {
        self.state
    }

    /// Current health.
    #[must_use]
    pub const fn health(&self) -> Health {
        self.health
    }

    /// Request a state change.
    ///
    /// Returns `Ok(false)` if the unit is already in `new`, `Ok(true)` on
    /// success. On success emits `StateChanged`, plus `EnteredCombat` /
    /// `ExitedCombat` when crossing the combat boundary, `EnteredConcussion`
    /// on entering `Concussed` and `Recovered` on `Concussed ->
    /// ReturningToSlot`.
    ///
    /// # Errors
    ///
    /// Returns [`SquadronError::InvalidTransition`] if the table forbids
    /// the change. The state is left unchanged.
    pub fn set_state(&mut self, new: UnitState, events: &mut TickEvents) -> Result<bool> {
        let old = self.state;
        if old == new {
            return Ok(false);
        }
        if !old.can_transition_to(new) {
            warn!(unit = %self.unit, from = ?old, to = ?new, "Rejected state transition");
            return Err(SquadronError::InvalidTransition {
                unit: self.unit,
                from: old,
                to: new,
            });
        }

        self.state = new;
        debug!(unit = %self.unit, from = ?old, to = ?new, "State changed");

        let unit = self.unit;
        events.push(SimEvent::StateChanged {
            unit,
            from: old,
            to: new,
        });
        if old == UnitState::InCombat {
            events.push(SimEvent::ExitedCombat { unit });
        }
        if new == UnitState::InCombat {
            events.push(SimEvent::EnteredCombat { unit });
        }
        if new == UnitState::Concussed {
            events.push(SimEvent::EnteredConcussion { unit });
        }
        if old == UnitState::Concussed && new == UnitState::ReturningToSlot {
            events.push(SimEvent::Recovered { unit });
        }
        Ok(true)
    }

    /// Reduce health, emitting `HealthChanged`. Returns `true` if the unit
    /// is now dead.
    pub fn apply_damage(&mut self, amount: u32, events: &mut TickEvents) -> bool {
        self.health.apply_damage(amount);
        events.push(SimEvent::HealthChanged {
            unit: self.unit,
            current: self.health.current,
            max: self.health.max,
        });
        self.health.is_dead()
    }
}
