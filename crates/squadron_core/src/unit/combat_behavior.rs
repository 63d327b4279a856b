//! Concussion: drift-triggered incapacitation and external knock-back.
//!
//! A unit in combat that drifts further than `concussion_range` from its
//! slot is concussed. While concussed it floats on the velocity it had when
//! the concussion started, decaying exponentially, until the stun timer
//! runs out and it heads back to its reserved slot.
//!
//! External mutators ([`CombatBehavior::apply_concussion`],
//! [`CombatBehavior::apply_force`], [`CombatBehavior::apply_torque`]) are
//! accepted only from units that are in combat and have reached their slot
//! at least once.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::components::Facing;
use crate::error::{Result, SquadronError};
use crate::math::{fixed_serde, option_fixed_serde, wrap_angle, Fixed, Vec3Fixed};
use crate::unit::{UnitContext, UnitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Stun {
    #[serde(with = "fixed_serde")]
    timer: Fixed,
    velocity: Vec3Fixed,
    #[serde(with = "fixed_serde")]
    spin_rate: Fixed,
}

/// Per-unit concussion state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombatBehavior {
    concussable: bool,
    stun: Option<Stun>,
    #[serde(with = "option_fixed_serde")]
    pending_spin: Option<Fixed>,
}

impl CombatBehavior {
    /// Whether external force and concussion are accepted in combat.
    #[must_use]
    pub const fn is_concussable(&self) -> bool {
        self.concussable
    }

    /// Flag the unit concussable. Called on arrival at a slot.
    pub fn mark_concussable(&mut self) {
        self.concussable = true;
    }

    /// Remaining stun time, while concussed.
    #[must_use]
    pub fn stun_timer(&self) -> Option<Fixed> {
        self.stun.map(|s| s.timer)
    }

    /// Concuss the unit if it drifted out of range of its slot.
    ///
    /// Only checked in `InCombat`, so one violation yields one concussion.
    /// Returns `true` if the unit was concussed.
    pub fn check_drift(&mut self, ctx: &mut UnitContext<'_>, slot_position: Option<Vec3Fixed>) -> bool {
        if ctx.state() != UnitState::InCombat {
            return false;
        }
        let Some(target) = slot_position else {
            return false;
        };
        let range = ctx.config.concussion_range;
        let drift_sq = ctx.body.position.distance_squared(target);
        if drift_sq <= range * range {
            return false;
        }

        debug!(unit = %ctx.unit(), drift = %drift_sq, "Drifted out of formation");
        let velocity = ctx.body.velocity;
        let duration = ctx.config.stun_duration;
        self.enter_concussion(ctx, velocity, duration).is_ok()
    }

    fn enter_concussion(
        &mut self,
        ctx: &mut UnitContext<'_>,
        velocity: Vec3Fixed,
        duration: Fixed,
    ) -> Result<()> {
        ctx.machine.set_state(UnitState::Concussed, ctx.events)?;
        let spin_rate = self
            .pending_spin
            .take()
            .unwrap_or(ctx.config.stun_spin_rate);
        self.stun = Some(Stun {
            timer: duration.max(Fixed::ZERO),
            velocity,
            spin_rate,
        });
        Ok(())
    }

    /// Advance the stun: float, decay, spin, count down.
    ///
    /// Returns `true` when the stun ended this step and the unit moved to
    /// `ReturningToSlot`.
    pub fn physics_step(&mut self, ctx: &mut UnitContext<'_>, facing: &mut Facing, dt: Fixed) -> bool {
        if ctx.state() != UnitState::Concussed {
            return false;
        }
        let Some(stun) = self.stun.as_mut() else {
            return self.recover(ctx);
        };

        ctx.body.velocity = stun.velocity;
        let decay = (Fixed::ONE - ctx.config.stun_drag * dt).max(Fixed::ZERO);
        stun.velocity = stun.velocity.scale(decay);
        stun.timer = (stun.timer - dt).max(Fixed::ZERO);
        facing.spin = wrap_angle(facing.spin + stun.spin_rate * dt);

        if stun.timer == Fixed::ZERO {
            return self.recover(ctx);
        }
        false
    }

    fn recover(&mut self, ctx: &mut UnitContext<'_>) -> bool {
        self.stun = None;
        ctx.machine
            .set_state(UnitState::ReturningToSlot, ctx.events)
            .is_ok()
    }

    fn ensure_eligible(&self, ctx: &UnitContext<'_>, action: &'static str) -> Result<()> {
        let state = ctx.state();
        if state == UnitState::InCombat && self.concussable {
            return Ok(());
        }
        warn!(unit = %ctx.unit(), action, state = ?state, "Rejected combat action");
        Err(SquadronError::IneligibleCombatAction {
            unit: ctx.unit(),
            action,
            state,
        })
    }

    /// Concuss the unit for `duration` seconds, floating on its current
    /// velocity.
    ///
    /// # Errors
    ///
    /// [`SquadronError::IneligibleCombatAction`] unless the unit is in
    /// combat and concussable.
    pub fn apply_concussion(&mut self, ctx: &mut UnitContext<'_>, duration: Fixed) -> Result<()> {
        self.ensure_eligible(ctx, "concussion")?;
        let velocity = ctx.body.velocity;
        self.enter_concussion(ctx, velocity, duration)
    }

    /// Add an impulse of `magnitude` along `direction` to the body.
    ///
    /// A strong enough push carries the unit out of range and the drift
    /// check concusses it.
    ///
    /// # Errors
    ///
    /// [`SquadronError::IneligibleCombatAction`] unless the unit is in
    /// combat and concussable.
    pub fn apply_force(
        &mut self,
        ctx: &mut UnitContext<'_>,
        direction: Vec3Fixed,
        magnitude: Fixed,
    ) -> Result<()> {
        self.ensure_eligible(ctx, "force")?;
        ctx.body.velocity += direction.normalize().scale(magnitude);
        Ok(())
    }

    /// Set the spin rate (radians per second) of the next concussion.
    ///
    /// # Errors
    ///
    /// [`SquadronError::IneligibleCombatAction`] unless the unit is in
    /// combat and concussable.
    pub fn apply_torque(&mut self, ctx: &mut UnitContext<'_>, amount: Fixed) -> Result<()> {
        self.ensure_eligible(ctx, "torque")?;
        self.pending_spin = Some(amount);
        Ok(())
    }
}
