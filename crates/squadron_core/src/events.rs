//! Observable events emitted by the simulation.
//!
//! Every state change a presentation layer may care about is reported
//! here. Events are collected per tick in [`TickEvents`] and never carry
//! references back into simulation state.

use serde::{Deserialize, Serialize};

use crate::components::UnitId;
use crate::formation::SlotId;
use crate::math::Vec3Fixed;
use crate::unit::UnitState;

/// A single observable occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    /// A new layout replaced the slot table.
    LayoutChanged {
        /// Generation of the new slot table.
        generation: u32,
        /// Number of slots in the new table.
        slot_count: usize,
    },
    /// A unit's state machine moved to a new state.
    StateChanged {
        /// Unit that changed.
        unit: UnitId,
        /// Previous state.
        from: UnitState,
        /// New state.
        to: UnitState,
    },
    /// A unit entered `InCombat`.
    EnteredCombat {
        /// Unit that entered combat.
        unit: UnitId,
    },
    /// A unit left `InCombat`.
    ExitedCombat {
        /// Unit that left combat.
        unit: UnitId,
    },
    /// A unit was knocked out of formation.
    EnteredConcussion {
        /// Concussed unit.
        unit: UnitId,
    },
    /// A concussion ran out and the unit is heading back.
    Recovered {
        /// Recovered unit.
        unit: UnitId,
    },
    /// A unit reached zero health and was removed.
    Death {
        /// Dead unit.
        unit: UnitId,
        /// Where it died.
        position: Vec3Fixed,
    },
    /// A unit's health changed.
    HealthChanged {
        /// Damaged unit.
        unit: UnitId,
        /// Health after the change.
        current: u32,
        /// Maximum health.
        max: u32,
    },
    /// A unit finished its first approach to a slot.
    ArrivedAtSlot {
        /// Arriving unit.
        unit: UnitId,
        /// Slot reached.
        slot: SlotId,
    },
    /// A slot was given up by its occupant.
    SlotReleased {
        /// Former occupant.
        unit: UnitId,
        /// Released slot.
        slot: SlotId,
    },
}

impl SimEvent {
    /// Unit this event concerns, if any.
    #[must_use]
    pub const fn unit(&self) -> Option<UnitId> {
        match self {
            Self::LayoutChanged { .. } => None,
            Self::StateChanged { unit, .. }
            | Self::EnteredCombat { unit }
            | Self::ExitedCombat { unit }
            | Self::EnteredConcussion { unit }
            | Self::Recovered { unit }
            | Self::Death { unit, .. }
            | Self::HealthChanged { unit, .. }
            | Self::ArrivedAtSlot { unit, .. }
            | Self::SlotReleased { unit, .. } => Some(*unit),
        }
    }
}

/// Events produced during a simulation tick (or by a direct command).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvents {
    /// Tick that produced the events.
    pub tick: u64,
    /// Events in emission order.
    pub events: Vec<SimEvent>,
}

impl TickEvents {
    /// Empty event list for a tick.
    #[must_use]
    pub const fn new(tick: u64) -> Self {
        Self {
            tick,
            events: Vec::new(),
        }
    }

    /// Record an event.
    pub fn push(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    /// Move all events out of `other` into this list.
    pub fn extend(&mut self, other: TickEvents) {
        self.events.extend(other.events);
    }

    /// Whether nothing happened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate over events.
    pub fn iter(&self) -> impl Iterator<Item = &SimEvent> {
        self.events.iter()
    }

    /// Events concerning one unit.
    pub fn for_unit(&self, unit: UnitId) -> impl Iterator<Item = &SimEvent> {
        self.events.iter().filter(move |e| e.unit() == Some(unit))
    }

    /// Units that died this tick.
    #[must_use]
    pub fn deaths(&self) -> Vec<UnitId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Death { unit, .. } => Some(*unit),
                _ => None,
            })
            .collect()
    }

    /// Count events matching a predicate.
    pub fn count(&self, predicate: impl Fn(&SimEvent) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_unit_filters_layout_events() {
        let mut events = TickEvents::new(3);
        events.push(SimEvent::LayoutChanged {
            generation: 1,
            slot_count: 4,
        });
        events.push(SimEvent::EnteredCombat { unit: UnitId(1) });
        events.push(SimEvent::EnteredCombat { unit: UnitId(2) });

        assert_eq!(events.for_unit(UnitId(2)).count(), 1);
        assert_eq!(
            events.count(|e| matches!(e, SimEvent::EnteredCombat { .. })),
            2
        );
        assert!(events.deaths().is_empty());
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let event = SimEvent::Recovered { unit: UnitId(9) };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"recovered","unit":9}"#);
    }
}
