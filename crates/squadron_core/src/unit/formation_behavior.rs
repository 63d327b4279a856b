//! Slot acquisition and formation motion.
//!
//! The acquisition wait and the holding poll are explicit sub-tasks
//! advanced once per frame. Cancelling one means dropping it; nothing is
//! suspended across ticks.
//!
//! Motion is velocity-driven. Approaches interpolate from the phase start
//! toward the live slot position and convert the interpolated point into a
//! velocity for the next integration step; in-combat follow blends the
//! velocity toward a damped catch-up velocity.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Result, SquadronError};
use crate::events::SimEvent;
use crate::formation::SlotId;
use crate::math::{fixed_serde, Fixed, Vec3Fixed};
use crate::unit::{UnitContext, UnitState};

/// Fallback used while no slot is available.
///
/// Resolved once when the [`FormationBehavior`] is built.
pub trait HoldingPattern {
    /// Enter a holding state after acquisition failed or timed out.
    fn begin(&mut self, ctx: &mut UnitContext<'_>);

    /// Advance the poll timer. Returns `true` when a slot poll is due.
    fn poll_due(&mut self, dt: Fixed, interval: Fixed) -> bool;

    /// Set the body velocity while holding.
    fn steer(&mut self, ctx: &mut UnitContext<'_>, dt: Fixed);

    /// Abandon any pending holding work.
    fn cancel(&mut self);
}

/// Which approach a unit is flying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApproachKind {
    /// First flight to a freshly claimed slot.
    Initial,
    /// Flight back to a reserved slot after a concussion.
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
struct AcquisitionTask {
    #[serde(with = "fixed_serde")]
    elapsed: Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Approach {
    kind: ApproachKind,
    start: Vec3Fixed,
    #[serde(with = "fixed_serde")]
    elapsed: Fixed,
    #[serde(with = "fixed_serde")]
    duration: Fixed,
}

/// Per-unit slot acquisition, approach and follow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormationBehavior<H> {
    slot: Option<SlotId>,
    acquisition: Option<AcquisitionTask>,
    approach: Option<Approach>,
    holding: H,
}

impl<H: HoldingPattern> FormationBehavior<H> {
    /// Create the behavior with its holding fallback.
    #[must_use]
    pub const fn new(holding: H) -> Self {
        Self {
            slot: None,
            acquisition: None,
            approach: None,
            holding,
        }
    }

    /// Slot handle held by this unit.
    #[must_use]
    pub const fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    /// Whether an approach is in flight.
    #[must_use]
    pub fn approach_kind(&self) -> Option<ApproachKind> {
        self.approach.map(|a| a.kind)
    }

    /// Holding fallback.
    #[must_use]
    pub const fn holding(&self) -> &H {
        &self.holding
    }

    // ========================================================================
    // Frame update
    // ========================================================================

    /// Advance the acquisition wait or the holding poll.
    pub fn frame_update(&mut self, ctx: &mut UnitContext<'_>, dt: Fixed) {
        let state = ctx.state();
        if state == UnitState::WaitingForFormation {
            self.advance_acquisition(ctx, dt);
        } else if state.is_holding()
            && self.holding.poll_due(dt, ctx.config.retry_interval)
            && ctx.manager.has_layout()
        {
            trace!(unit = %ctx.unit(), "Polling for a free slot");
            if self.try_claim(ctx) {
                self.holding.cancel();
            }
        }
    }

    fn advance_acquisition(&mut self, ctx: &mut UnitContext<'_>, dt: Fixed) {
        let task = self.acquisition.get_or_insert_with(AcquisitionTask::default);

        if task.elapsed >= ctx.config.max_wait_time {
            debug!(unit = %ctx.unit(), "Gave up waiting for a formation");
            self.acquisition = None;
            self.holding.begin(ctx);
            return;
        }

        if ctx.manager.has_layout() {
            self.acquisition = None;
            if !self.try_claim(ctx) {
                debug!(unit = %ctx.unit(), "No free slot, holding");
                self.holding.begin(ctx);
            }
            return;
        }

        task.elapsed += dt;
    }

    fn try_claim(&mut self, ctx: &mut UnitContext<'_>) -> bool {
        let unit = ctx.unit();
        let Some(slot) = ctx
            .manager
            .acquire(unit, ctx.body.position, ctx.config.allocation)
        else {
            return false;
        };

        if ctx.machine.set_state(UnitState::MovingToSlot, ctx.events).is_err() {
            ctx.manager.release_slot(slot);
            return false;
        }

        let duration = ctx.config.approach_time
            + ctx.rng.next_range(Fixed::ZERO, ctx.config.approach_variance);
        self.slot = Some(slot);
        self.approach = Some(Approach {
            kind: ApproachKind::Initial,
            start: ctx.body.position,
            elapsed: Fixed::ZERO,
            duration,
        });
        debug!(unit = %unit, slot = %slot, duration = %duration, "Approaching slot");
        true
    }

    // ========================================================================
    // Physics
    // ========================================================================

    /// Set the body velocity for this physics step.
    ///
    /// Returns the kind of approach that completed, if the unit arrived.
    pub fn physics_step(&mut self, ctx: &mut UnitContext<'_>, dt: Fixed) -> Option<ApproachKind> {
        match ctx.state() {
            UnitState::MovingToSlot | UnitState::ReturningToSlot => self.step_approach(ctx, dt),
            UnitState::InCombat => {
                self.follow(ctx, dt);
                None
            }
            UnitState::MovingToSpawnPoint | UnitState::AtSpawnPoint | UnitState::Idle => {
                self.holding.steer(ctx, dt);
                None
            }
            UnitState::WaitingForFormation => {
                ctx.body.velocity = ctx.body.velocity.scale(Fixed::from_num(0.5));
                None
            }
            UnitState::Concussed => None,
        }
    }

    /// Start the post-concussion flight back to the reserved slot.
    pub fn begin_return(&mut self, ctx: &mut UnitContext<'_>) {
        self.approach = Some(Approach {
            kind: ApproachKind::Return,
            start: ctx.body.position,
            elapsed: Fixed::ZERO,
            duration: ctx.config.approach_time / 2,
        });
    }

    /// World position of the held slot, if it is still ours.
    fn live_slot_position(&self, ctx: &UnitContext<'_>) -> Option<Vec3Fixed> {
        let id = self.slot?;
        match ctx.manager.resolve(id) {
            Ok(slot) if slot.occupant() == Some(ctx.unit()) => ctx.manager.slot_world_position(id),
            Ok(_) => None,
            Err(e) => {
                debug!(unit = %ctx.unit(), error = %e, "Held slot outlived its layout");
                None
            }
        }
    }

    fn step_approach(&mut self, ctx: &mut UnitContext<'_>, dt: Fixed) -> Option<ApproachKind> {
        let Some(target) = self.live_slot_position(ctx) else {
            self.lose_slot(ctx);
            return None;
        };

        let position = ctx.body.position;
        let approach = self.approach.get_or_insert_with(|| {
            let (kind, duration) = if ctx.machine.state() == UnitState::ReturningToSlot {
                (ApproachKind::Return, ctx.config.approach_time / 2)
            } else {
                (ApproachKind::Initial, ctx.config.approach_time)
            };
            Approach {
                kind,
                start: position,
                elapsed: Fixed::ZERO,
                duration,
            }
        });

        approach.elapsed += dt;
        let t = if approach.duration > Fixed::ZERO {
            (approach.elapsed / approach.duration).min(Fixed::ONE)
        } else {
            Fixed::ONE
        };
        let eased = ctx.config.approach_curve.apply(t);
        let waypoint = approach.start.lerp(target, eased);
        ctx.body.velocity = (waypoint - position).div_scalar(dt);

        let threshold = ctx.config.arrival_threshold;
        let arrived = t >= Fixed::ONE || position.distance_squared(target) < threshold * threshold;
        if !arrived {
            return None;
        }

        let kind = approach.kind;
        self.approach = None;
        if ctx.machine.set_state(UnitState::InCombat, ctx.events).is_err() {
            return None;
        }
        if kind == ApproachKind::Initial {
            if let Some(slot) = self.slot {
                ctx.events.push(SimEvent::ArrivedAtSlot {
                    unit: ctx.unit(),
                    slot,
                });
            }
        }
        Some(kind)
    }

    fn follow(&mut self, ctx: &mut UnitContext<'_>, dt: Fixed) {
        let Some(target) = self.live_slot_position(ctx) else {
            self.lose_slot(ctx);
            return;
        };

        let position = ctx.body.position;
        let dead_zone = ctx.config.dead_zone;
        if position.distance_squared(target) < dead_zone * dead_zone {
            ctx.body.velocity = ctx.body.velocity.scale(Fixed::from_num(0.5));
            return;
        }

        let desired = position.lerp(target, (ctx.config.follow_rate * dt).min(Fixed::ONE));
        let desired_velocity = (desired - position).div_scalar(dt);
        let blend = (ctx.config.velocity_damping * dt).min(Fixed::ONE);
        ctx.body.velocity = ctx.body.velocity.lerp(desired_velocity, blend);
    }

    /// The held slot vanished or was taken; start over.
    fn lose_slot(&mut self, ctx: &mut UnitContext<'_>) {
        debug!(unit = %ctx.unit(), slot = ?self.slot, "Lost slot");
        self.slot = None;
        self.approach = None;
        if ctx
            .machine
            .set_state(UnitState::WaitingForFormation, ctx.events)
            .is_ok()
        {
            self.acquisition = Some(AcquisitionTask::default());
        }
    }

    // ========================================================================
    // Release and reassignment
    // ========================================================================

    /// Give up the slot unless the unit is concussed.
    ///
    /// A concussed unit keeps its reservation until it recovers.
    pub fn release(&mut self, ctx: &mut UnitContext<'_>) -> Option<SlotId> {
        if ctx.state() == UnitState::Concussed {
            debug!(unit = %ctx.unit(), "Release suppressed while concussed");
            return None;
        }
        self.force_release(ctx)
    }

    /// Give up the slot regardless of state. Used on death and despawn.
    pub fn force_release(&mut self, ctx: &mut UnitContext<'_>) -> Option<SlotId> {
        let slot = self.slot.take()?;
        self.approach = None;
        let unit = ctx.unit();
        if ctx.manager.occupant_of(slot) == Some(unit) {
            ctx.manager.release_slot(slot);
        }
        ctx.events.push(SimEvent::SlotReleased { unit, slot });
        Some(slot)
    }

    /// React to a new layout: drop the stale slot and re-acquire.
    ///
    /// Ignored while concussed; the stale handle is noticed after recovery.
    pub fn on_layout_changed(&mut self, ctx: &mut UnitContext<'_>) {
        if ctx.state() == UnitState::Concussed {
            debug!(unit = %ctx.unit(), "Layout change ignored while concussed");
            return;
        }
        self.release(ctx);
        self.restart_acquisition(ctx);
    }

    /// Abandon everything in flight and start acquisition from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`SquadronError::InvalidTransition`] while concussed. The
    /// slot is kept in that case.
    pub fn force_reassign(&mut self, ctx: &mut UnitContext<'_>) -> Result<()> {
        let state = ctx.state();
        if !state.can_transition_to(UnitState::WaitingForFormation) {
            return Err(SquadronError::InvalidTransition {
                unit: ctx.unit(),
                from: state,
                to: UnitState::WaitingForFormation,
            });
        }
        self.force_release(ctx);
        self.restart_acquisition(ctx);
        Ok(())
    }

    fn restart_acquisition(&mut self, ctx: &mut UnitContext<'_>) {
        self.approach = None;
        self.holding.cancel();
        if ctx
            .machine
            .set_state(UnitState::WaitingForFormation, ctx.events)
            .is_ok()
        {
            self.acquisition = Some(AcquisitionTask::default());
        }
    }

    /// Poll immediately if the unit is holding. Returns `true` on a claim.
    pub fn notify_slot_available(&mut self, ctx: &mut UnitContext<'_>) -> bool {
        if !ctx.state().is_holding() || !ctx.manager.has_layout() {
            return false;
        }
        let claimed = self.try_claim(ctx);
        if claimed {
            self.holding.cancel();
        }
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Body, UnitId};
    use crate::config::UnitConfig;
    use crate::events::TickEvents;
    use crate::formation::{FormationManager, LayoutKind, LayoutParams};
    use crate::math::{SimRng, Vec2Fixed};
    use crate::unit::{IdleBehavior, UnitStateMachine};

    struct Harness {
        config: UnitConfig,
        machine: UnitStateMachine,
        body: Body,
        rng: SimRng,
        manager: FormationManager,
        events: TickEvents,
        behavior: FormationBehavior<IdleBehavior>,
    }

    impl Harness {
        fn new(slots: u32) -> Self {
            let mut manager = FormationManager::default();
            let params = LayoutParams {
                columns: slots,
                rows: 1,
                ..LayoutParams::default()
            };
            manager
                .generate_formation(LayoutKind::Grid, params, Vec2Fixed::ZERO)
                .unwrap();
            Self {
                config: UnitConfig {
                    approach_variance: Fixed::ZERO,
                    ..UnitConfig::default()
                },
                machine: UnitStateMachine::new(UnitId(1), 10),
                body: Body::at_rest(Vec3Fixed::from_ints(0, -10, 0)),
                rng: SimRng::new(1),
                manager,
                events: TickEvents::default(),
                behavior: FormationBehavior::new(IdleBehavior::new(None)),
            }
        }

        fn ctx(&mut self) -> (UnitContext<'_>, &mut FormationBehavior<IdleBehavior>) {
            (
                UnitContext {
                    config: &self.config,
                    machine: &mut self.machine,
                    body: &mut self.body,
                    rng: &mut self.rng,
                    manager: &mut self.manager,
                    events: &mut self.events,
                },
                &mut self.behavior,
            )
        }

        fn tick(&mut self) -> Option<ApproachKind> {
            let dt = Fixed::ONE / 50;
            let (mut ctx, behavior) = self.ctx();
            behavior.frame_update(&mut ctx, dt);
            let arrived = behavior.physics_step(&mut ctx, dt);
            ctx.body.integrate(dt);
            arrived
        }
    }

    #[test]
    fn test_acquires_then_arrives() {
        let mut h = Harness::new(1);
        h.tick();
        assert_eq!(h.machine.state(), UnitState::MovingToSlot);
        assert!(h.behavior.slot().is_some());

        let mut arrival = None;
        for _ in 0..200 {
            if let Some(kind) = h.tick() {
                arrival = Some(kind);
                break;
            }
        }
        assert_eq!(arrival, Some(ApproachKind::Initial));
        assert_eq!(h.machine.state(), UnitState::InCombat);
        assert!(h
            .events
            .iter()
            .any(|e| matches!(e, SimEvent::ArrivedAtSlot { .. })));
        // Grid of one slot sits on the center.
        assert!(h.body.position.distance(Vec3Fixed::ZERO) < h.config.arrival_threshold * 2);
    }

    #[test]
    fn test_initial_duration_drawn_from_rng() {
        let base = UnitConfig::default().approach_time;
        let variance = Fixed::ONE;
        let mut durations = Vec::new();
        for seed in 1..=16 {
            let mut h = Harness::new(1);
            h.config.approach_variance = variance;
            h.rng = SimRng::new(seed);
            let expected = base + SimRng::new(seed).next_range(Fixed::ZERO, variance);

            h.tick();
            let approach = h.behavior.approach.unwrap();
            assert_eq!(approach.kind, ApproachKind::Initial);
            assert_eq!(approach.duration, expected);
            assert!(approach.duration >= base && approach.duration < base + variance);
            durations.push(approach.duration);
        }
        durations.dedup();
        assert!(durations.len() > 1);
    }

    #[test]
    fn test_approach_velocity_tracks_waypoint() {
        let mut h = Harness::new(1);
        h.tick();
        let dt = Fixed::ONE / 50;
        let approach = h.behavior.approach.unwrap();
        let target = h.manager.slot_world_position(h.behavior.slot().unwrap()).unwrap();
        let position = h.body.position;

        let (mut ctx, behavior) = h.ctx();
        assert_eq!(behavior.physics_step(&mut ctx, dt), None);

        let eased = h.config.approach_curve.apply((approach.elapsed + dt) / approach.duration);
        let waypoint = approach.start.lerp(target, eased);
        assert_eq!(h.body.velocity, (waypoint - position).div_scalar(dt));
        assert!(h.body.velocity.y > Fixed::ZERO);
    }

    #[test]
    fn test_arrival_measured_from_body_not_waypoint() {
        let mut h = Harness::new(1);
        h.config.arrival_threshold = Fixed::ONE;
        h.tick();
        let target = h.manager.slot_world_position(h.behavior.slot().unwrap()).unwrap();
        let dt = Fixed::ONE / 50;

        // Waypoint already on the slot, body still far behind.
        h.behavior.approach = Some(Approach {
            kind: ApproachKind::Initial,
            start: target,
            elapsed: Fixed::ZERO,
            duration: Fixed::from_num(10),
        });
        h.body.position = target + Vec3Fixed::from_ints(0, -10, 0);
        let (mut ctx, behavior) = h.ctx();
        assert_eq!(behavior.physics_step(&mut ctx, dt), None);
        assert_eq!(h.machine.state(), UnitState::MovingToSlot);

        // Body inside the threshold arrives before the timer runs out.
        h.body.position = target + Vec3Fixed::new(Fixed::ZERO, Fixed::from_num(-0.5), Fixed::ZERO);
        let (mut ctx, behavior) = h.ctx();
        assert_eq!(behavior.physics_step(&mut ctx, dt), Some(ApproachKind::Initial));
        assert_eq!(h.machine.state(), UnitState::InCombat);
    }

    #[test]
    fn test_return_approach_takes_half_the_approach_time() {
        let mut h = Harness::new(1);
        while h.tick().is_none() {}
        h.config.arrival_threshold = Fixed::ZERO;
        h.machine
            .set_state(UnitState::Concussed, &mut h.events)
            .unwrap();
        h.machine
            .set_state(UnitState::ReturningToSlot, &mut h.events)
            .unwrap();
        h.body = Body::at_rest(Vec3Fixed::from_ints(0, -5, 0));

        let (mut ctx, behavior) = h.ctx();
        behavior.begin_return(&mut ctx);
        let approach = h.behavior.approach.unwrap();
        assert_eq!(approach.kind, ApproachKind::Return);
        assert_eq!(approach.duration, h.config.approach_time / 2);

        // 0.75s: 37 ticks fall just short, the 38th completes it.
        let mut ticks = 0;
        let arrival = loop {
            ticks += 1;
            if let Some(kind) = h.tick() {
                break kind;
            }
            assert!(ticks < 100);
        };
        assert_eq!(arrival, ApproachKind::Return);
        assert_eq!(ticks, 38);
        assert_eq!(h.machine.state(), UnitState::InCombat);
    }

    #[test]
    fn test_dead_zone_halves_velocity() {
        let mut h = Harness::new(1);
        while h.tick().is_none() {}
        let target = h.manager.slot_world_position(h.behavior.slot().unwrap()).unwrap();
        let dt = Fixed::ONE / 50;
        h.body.position = target;
        h.body.velocity = Vec3Fixed::from_ints(2, 0, -4);

        let (mut ctx, behavior) = h.ctx();
        behavior.physics_step(&mut ctx, dt);
        assert_eq!(h.body.velocity, Vec3Fixed::from_ints(1, 0, -2));

        let (mut ctx, behavior) = h.ctx();
        behavior.physics_step(&mut ctx, dt);
        assert_eq!(h.body.velocity, Vec3Fixed::new(Fixed::from_num(0.5), Fixed::ZERO, -Fixed::ONE));

        // Outside the dead zone the velocity is steered, not halved.
        h.body.position = target + Vec3Fixed::from_ints(3, 0, 0);
        let (mut ctx, behavior) = h.ctx();
        behavior.physics_step(&mut ctx, dt);
        assert!(h.body.velocity.x < Fixed::ZERO);
    }

    #[test]
    fn test_no_slot_falls_back_to_holding() {
        let mut h = Harness::new(1);
        h.manager.try_occupy_slot(UnitId(99));
        h.tick();
        assert_eq!(h.machine.state(), UnitState::Idle);
        assert!(h.behavior.slot().is_none());
    }

    #[test]
    fn test_waits_without_layout_until_timeout() {
        let mut h = Harness::new(1);
        h.manager = FormationManager::default();
        // 3s at 50Hz
        for _ in 0..150 {
            h.tick();
            assert_eq!(h.machine.state(), UnitState::WaitingForFormation);
        }
        for _ in 0..5 {
            h.tick();
        }
        assert_eq!(h.machine.state(), UnitState::Idle);
    }

    #[test]
    fn test_release_suppressed_while_concussed() {
        let mut h = Harness::new(1);
        while h.tick().is_none() {}
        h.machine
            .set_state(UnitState::Concussed, &mut h.events)
            .unwrap();

        let (mut ctx, behavior) = h.ctx();
        assert_eq!(behavior.release(&mut ctx), None);
        assert!(behavior.slot().is_some());

        behavior.on_layout_changed(&mut ctx);
        assert!(behavior.slot().is_some());
        assert_eq!(ctx.state(), UnitState::Concussed);

        let slot = behavior.force_release(&mut ctx);
        assert!(slot.is_some());
        assert_eq!(h.manager.occupied_count(), 0);
    }

    #[test]
    fn test_force_reassign_rejected_while_concussed() {
        let mut h = Harness::new(1);
        while h.tick().is_none() {}
        h.machine
            .set_state(UnitState::Concussed, &mut h.events)
            .unwrap();
        let (mut ctx, behavior) = h.ctx();
        assert!(behavior.force_reassign(&mut ctx).is_err());
        assert!(behavior.slot().is_some());
    }

    #[test]
    fn test_layout_change_restarts_acquisition() {
        let mut h = Harness::new(2);
        while h.tick().is_none() {}
        let old = h.behavior.slot().unwrap();

        h.manager
            .generate_formation(LayoutKind::VShape, LayoutParams::default(), Vec2Fixed::ZERO)
            .unwrap();
        let (mut ctx, behavior) = h.ctx();
        behavior.on_layout_changed(&mut ctx);
        assert_eq!(ctx.state(), UnitState::WaitingForFormation);
        assert!(behavior.slot().is_none());
        assert!(h
            .events
            .iter()
            .any(|e| *e == SimEvent::SlotReleased { unit: UnitId(1), slot: old }));

        h.tick();
        assert_eq!(h.machine.state(), UnitState::MovingToSlot);
        assert_eq!(h.behavior.slot().unwrap().generation, 2);
    }

    #[test]
    fn test_follow_pulls_toward_moving_slot() {
        let mut h = Harness::new(1);
        while h.tick().is_none() {}
        for _ in 0..10 {
            h.tick();
        }

        h.manager
            .update_center(&crate::anchor::AnchorPose::at(Vec3Fixed::from_ints(1, 0, 0)));
        let before = h.body.position.distance(Vec3Fixed::from_ints(1, 0, 0));
        for _ in 0..25 {
            h.tick();
        }
        let after = h.body.position.distance(Vec3Fixed::from_ints(1, 0, 0));
        assert!(after < before);
        assert_eq!(h.machine.state(), UnitState::InCombat);
    }
}
