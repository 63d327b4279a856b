//! Spawn-point loitering while no slot is free.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::math::{fixed_serde, Fixed, Vec3Fixed};
use crate::unit::formation_behavior::HoldingPattern;
use crate::unit::{UnitContext, UnitState};

/// Default holding pattern: fly back to the spawn point (or stay put when
/// there is none) and poll for a slot on a fixed interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdleBehavior {
    spawn_point: Option<Vec3Fixed>,
    #[serde(with = "fixed_serde")]
    poll_timer: Fixed,
}

impl IdleBehavior {
    /// Create the behavior. Units without a spawn point idle in place.
    #[must_use]
    pub const fn new(spawn_point: Option<Vec3Fixed>) -> Self {
        Self {
            spawn_point,
            poll_timer: Fixed::ZERO,
        }
    }

    /// Where the unit retreats to.
    #[must_use]
    pub const fn spawn_point(&self) -> Option<Vec3Fixed> {
        self.spawn_point
    }
}

impl HoldingPattern for IdleBehavior {
    fn begin(&mut self, ctx: &mut UnitContext<'_>) {
        self.poll_timer = Fixed::ZERO;
        let target = if self.spawn_point.is_some() {
            UnitState::MovingToSpawnPoint
        } else {
            UnitState::Idle
        };
        if let Err(e) = ctx.machine.set_state(target, ctx.events) {
            warn!(unit = %ctx.unit(), error = %e, "Could not enter holding");
        }
    }

    fn poll_due(&mut self, dt: Fixed, interval: Fixed) -> bool {
        self.poll_timer += dt;
        if self.poll_timer >= interval {
            self.poll_timer = Fixed::ZERO;
            true
        } else {
            false
        }
    }

    fn steer(&mut self, ctx: &mut UnitContext<'_>, dt: Fixed) {
        let Some(spawn_point) = self.spawn_point else {
            ctx.body.velocity = Vec3Fixed::ZERO;
            return;
        };
        if ctx.state() != UnitState::MovingToSpawnPoint {
            ctx.body.velocity = Vec3Fixed::ZERO;
            return;
        }

        let to_spawn = spawn_point - ctx.body.position;
        let step = ctx.config.loiter_speed * dt;
        if to_spawn.length_squared() <= step * step {
            ctx.body.velocity = to_spawn.div_scalar(dt);
            if let Err(e) = ctx.machine.set_state(UnitState::AtSpawnPoint, ctx.events) {
                warn!(unit = %ctx.unit(), error = %e, "Could not settle at spawn point");
            }
        } else {
            ctx.body.velocity = to_spawn.normalize().scale(ctx.config.loiter_speed);
        }
    }

    fn cancel(&mut self) {
        self.poll_timer = Fixed::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Body, UnitId};
    use crate::config::UnitConfig;
    use crate::events::TickEvents;
    use crate::formation::FormationManager;
    use crate::math::SimRng;
    use crate::unit::UnitStateMachine;

    #[test]
    fn test_poll_fires_on_interval() {
        let mut idle = IdleBehavior::new(None);
        let dt = Fixed::from_num(0.25);
        let interval = Fixed::from_num(0.5);
        assert!(!idle.poll_due(dt, interval));
        assert!(idle.poll_due(dt, interval));
        assert!(!idle.poll_due(dt, interval));
        assert!(idle.poll_due(dt, interval));
    }

    #[test]
    fn test_travels_to_spawn_point_and_stops() {
        let config = UnitConfig::default();
        let mut machine = UnitStateMachine::new(UnitId(1), 10);
        let mut body = Body::at_rest(Vec3Fixed::ZERO);
        let mut rng = SimRng::new(0);
        let mut manager = FormationManager::default();
        let mut events = TickEvents::default();
        let mut idle = IdleBehavior::new(Some(Vec3Fixed::from_ints(0, 0, 2)));
        let dt = Fixed::from_num(0.125);

        let mut ctx = UnitContext {
            config: &config,
            machine: &mut machine,
            body: &mut body,
            rng: &mut rng,
            manager: &mut manager,
            events: &mut events,
        };
        idle.begin(&mut ctx);
        assert_eq!(ctx.state(), UnitState::MovingToSpawnPoint);

        // 4 units/s * 0.125 s = 0.5 per step
        for _ in 0..4 {
            idle.steer(&mut ctx, dt);
            ctx.body.integrate(dt);
        }
        assert_eq!(ctx.state(), UnitState::AtSpawnPoint);
        assert_eq!(ctx.body.position, Vec3Fixed::from_ints(0, 0, 2));

        idle.steer(&mut ctx, dt);
        assert!(ctx.body.is_stationary());
    }

    #[test]
    fn test_without_spawn_point_goes_idle() {
        let config = UnitConfig::default();
        let mut machine = UnitStateMachine::new(UnitId(1), 10);
        let mut body = Body::at_rest(Vec3Fixed::ZERO);
        let mut rng = SimRng::new(0);
        let mut manager = FormationManager::default();
        let mut events = TickEvents::default();
        let mut ctx = UnitContext {
            config: &config,
            machine: &mut machine,
            body: &mut body,
            rng: &mut rng,
            manager: &mut manager,
            events: &mut events,
        };

        IdleBehavior::new(None).begin(&mut ctx);
        assert_eq!(ctx.state(), UnitState::Idle);
    }

    #[test]
    fn test_refused_holding_transition_leaves_state_alone() {
        let config = UnitConfig::default();
        let mut machine = UnitStateMachine::new(UnitId(1), 10);
        let mut body = Body::at_rest(Vec3Fixed::ZERO);
        let mut rng = SimRng::new(0);
        let mut manager = FormationManager::default();
        let mut events = TickEvents::default();
        machine.set_state(UnitState::Concussed, &mut events).unwrap();
        let before = events.iter().count();

        let mut ctx = UnitContext {
            config: &config,
            machine: &mut machine,
            body: &mut body,
            rng: &mut rng,
            manager: &mut manager,
            events: &mut events,
        };
        let mut idle = IdleBehavior::new(Some(Vec3Fixed::from_ints(0, 0, 2)));
        idle.begin(&mut ctx);
        assert_eq!(ctx.state(), UnitState::Concussed);

        // Steering only settles a unit flying to the spawn point.
        ctx.body.position = Vec3Fixed::from_ints(0, 0, 2);
        idle.steer(&mut ctx, Fixed::from_num(0.125));
        assert_eq!(ctx.state(), UnitState::Concussed);
        assert_eq!(events.iter().count(), before);
    }
}
