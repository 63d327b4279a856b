//! Formation invariant checks.
//!
//! Each check returns `Err` with a readable description on the first
//! violation so tests can `assert!(check(..).is_ok(), ..)` or feed the
//! result into `prop_assert!`.

use std::collections::BTreeMap;

use squadron_core::components::UnitId;
use squadron_core::events::{SimEvent, TickEvents};
use squadron_core::math::{Fixed, Vec2Fixed};
use squadron_core::simulation::Simulation;
use squadron_core::unit::UnitState;

/// No slot has two occupants and no unit holds two slots; every occupant
/// agrees it holds the slot.
pub fn check_exclusivity(sim: &Simulation) -> Result<(), String> {
    sim.validate().map_err(|e| e.to_string())
}

/// Occupied plus free slots equals the table size, and there are never
/// more occupied slots than live units.
pub fn check_conservation(sim: &Simulation) -> Result<(), String> {
    let formation = sim.formation();
    let occupied = formation.occupied_count();
    let available = formation.available_count();
    if occupied + available != formation.slot_count() {
        return Err(format!(
            "{occupied} occupied + {available} free != {} slots",
            formation.slot_count()
        ));
    }
    if occupied > sim.units().len() {
        return Err(format!(
            "{occupied} occupied slots but only {} units",
            sim.units().len()
        ));
    }
    Ok(())
}

/// Every reported state change is allowed by the transition table.
pub fn check_transitions(events: &TickEvents) -> Result<(), String> {
    for event in events.iter() {
        if let SimEvent::StateChanged { unit, from, to } = event {
            if !from.can_transition_to(*to) {
                return Err(format!(
                    "tick {}: {unit} moved {from:?} -> {to:?}",
                    events.tick
                ));
            }
        }
    }
    Ok(())
}

/// Every slot offset lies inside the boundary the layout was fitted to.
///
/// Non-positive extents are unconstrained.
pub fn check_containment(sim: &Simulation, half_extents: Vec2Fixed) -> Result<(), String> {
    for slot in sim.formation().slots() {
        let offset = slot.local_offset();
        let outside = |reach: Fixed, extent: Fixed| extent > Fixed::ZERO && reach.abs() > extent;
        if outside(offset.x, half_extents.x) || outside(offset.y, half_extents.y) {
            return Err(format!(
                "{} at ({}, {}) outside +/-({}, {})",
                slot.id(),
                offset.x,
                offset.y,
                half_extents.x,
                half_extents.y
            ));
        }
    }
    Ok(())
}

/// Tracks stun timers across ticks.
///
/// Within one concussion the timer never increases and the unit stays
/// concussed until it reaches zero.
#[derive(Debug, Clone, Default)]
pub struct StunWatch {
    timers: BTreeMap<UnitId, Fixed>,
}

impl StunWatch {
    /// Create an empty watch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the current timers against the previous observation.
    ///
    /// A fresh concussion reported in `events` resets that unit's record.
    pub fn observe(&mut self, sim: &Simulation, events: &TickEvents) -> Result<(), String> {
        for event in events.iter() {
            if let SimEvent::EnteredConcussion { unit } = event {
                self.timers.remove(unit);
            }
        }

        let mut next = BTreeMap::new();
        for id in sim.units().sorted_ids() {
            let Some(unit) = sim.unit(id) else {
                continue;
            };
            match (unit.state(), unit.stun_timer()) {
                (UnitState::Concussed, Some(timer)) => {
                    if let Some(&previous) = self.timers.get(&id) {
                        if timer > previous {
                            return Err(format!("{id} stun timer rose {previous} -> {timer}"));
                        }
                    }
                    next.insert(id, timer);
                }
                (UnitState::Concussed, None) => {
                    return Err(format!("{id} concussed without a stun timer"));
                }
                (state, Some(_)) => {
                    return Err(format!("{id} has a stun timer while {state:?}"));
                }
                (_, None) => {}
            }
        }
        self.timers = next;
        Ok(())
    }
}

/// Run every per-tick check.
pub fn check_all(sim: &Simulation, events: &TickEvents, half_extents: Vec2Fixed) -> Result<(), String> {
    check_exclusivity(sim)?;
    check_conservation(sim)?;
    check_transitions(events)?;
    check_containment(sim, half_extents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{default_harness, fixed};

    #[test]
    fn test_checks_pass_on_settled_formation() {
        let mut harness = default_harness();
        let units = harness.spawn_row(7, None);
        let extents = Vec2Fixed::from_ints(50, 50);
        let mut watch = StunWatch::new();

        for _ in 0..300 {
            let events = harness.step();
            check_all(&harness.sim, &events, extents).unwrap();
            watch.observe(&harness.sim, &events).unwrap();
        }
        assert_eq!(harness.sim.formation().occupied_count(), 5);
        assert_eq!(units.len(), 7);
    }

    #[test]
    fn test_transition_check_flags_illegal_change() {
        let mut events = TickEvents::new(3);
        events.push(SimEvent::StateChanged {
            unit: UnitId(1),
            from: UnitState::Concussed,
            to: UnitState::InCombat,
        });
        let err = check_transitions(&events).unwrap_err();
        assert!(err.contains("Concussed"));
    }

    #[test]
    fn test_containment_ignores_unconstrained_axes() {
        let harness = default_harness();
        assert!(check_containment(&harness.sim, Vec2Fixed::ZERO).is_ok());
        assert!(check_containment(&harness.sim, Vec2Fixed::new(fixed(1), fixed(0))).is_err());
    }
}
