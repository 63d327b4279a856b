//! Orientation.
//!
//! Purely presentational: nothing in the simulation reads facing back.

use crate::components::Facing;
use crate::math::{Fixed, Vec3Fixed};
use crate::unit::UnitState;

/// Turn `facing` toward its target direction at `turn_rate`.
///
/// In combat the target is the formation heading; otherwise it is the
/// direction of travel. A stationary unit keeps its facing. While
/// concussed the combat behavior owns the spin and the look direction is
/// frozen; in every other state the spin settles back to zero.
pub fn steer(
    facing: &mut Facing,
    state: UnitState,
    velocity: Vec3Fixed,
    heading: Vec3Fixed,
    turn_rate: Fixed,
    dt: Fixed,
) {
    if state == UnitState::Concussed {
        return;
    }

    let blend = (turn_rate * dt).min(Fixed::ONE);
    facing.spin = facing.spin * (Fixed::ONE - blend);

    let target = if state == UnitState::InCombat {
        heading.normalize()
    } else {
        velocity.normalize()
    };
    if target.is_zero() {
        return;
    }

    let turned = facing.forward.lerp(target, blend).normalize();
    // Exactly opposite directions cancel out; snap instead.
    facing.forward = if turned.is_zero() { target } else { turned };
}
