//! Slot ownership broker.
//!
//! The [`FormationManager`] exclusively owns the slot table. Units hold
//! only [`SlotId`] handles and go through the manager for every claim,
//! release and lookup. Every claim re-checks occupancy at call time, so
//! as long as claims are made from one thread within one tick no two
//! units can end up in the same slot.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::anchor::AnchorPose;
use crate::components::UnitId;
use crate::config::FormationConfig;
use crate::error::{Result, SquadronError};
use crate::formation::layout::{fit_to_bounds, generate_offsets, LayoutKind, LayoutParams};
use crate::formation::slot::{Slot, SlotId};
use crate::math::{fixed_serde, Fixed, Vec2Fixed, Vec3Fixed};

/// Axes in which the formation center offset is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OffsetSpace {
    /// Offset is added in world axes.
    #[default]
    World,
    /// Offset is rotated by the anchor's local basis first.
    AnchorLocal,
}

/// How a waiting unit chooses a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// First free slot in table order, nearest free slot if that fails.
    #[default]
    FirstFitThenNearest,
    /// Free slot closest to the unit; ties go to table order.
    NearestOnly,
    /// First free slot in table order.
    FirstFitOnly,
}

/// Layout currently backing the slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveLayout {
    /// Shape.
    pub kind: LayoutKind,
    /// Shape parameters.
    pub params: LayoutParams,
    /// Uniform scale applied to fit the boundary (1 when unscaled).
    #[serde(with = "fixed_serde")]
    pub scale: Fixed,
    /// Boundary the layout was fitted against.
    pub fitted_extents: Vec2Fixed,
}

/// Notice produced by [`FormationManager::broadcast_layout_changed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutChanged {
    /// Generation of the new slot table.
    pub generation: u32,
    /// Slots in the new table.
    pub slot_count: usize,
    /// Subscribed units, in ascending id order.
    pub recipients: Vec<UnitId>,
}

/// Owns the slot table, the moving center and the layout observer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationManager {
    slots: Vec<Slot>,
    layout: Option<ActiveLayout>,
    generation: u32,
    center: Vec3Fixed,
    heading: Vec3Fixed,
    center_offset: Vec3Fixed,
    offset_space: OffsetSpace,
    #[serde(with = "fixed_serde")]
    fit_margin: Fixed,
    subscribers: BTreeSet<UnitId>,
}

impl Default for FormationManager {
    fn default() -> Self {
        Self::new(&FormationConfig::default())
    }
}

impl FormationManager {
    /// Create a manager with no layout.
    #[must_use]
    pub fn new(config: &FormationConfig) -> Self {
        Self {
            slots: Vec::new(),
            layout: None,
            generation: 0,
            center: Vec3Fixed::ZERO,
            heading: Vec3Fixed::Z,
            center_offset: config.center_offset,
            offset_space: config.offset_space,
            fit_margin: config.fit_margin,
            subscribers: BTreeSet::new(),
        }
    }

    // ========================================================================
    // Layout
    // ========================================================================

    /// Replace the slot table with a freshly generated layout.
    ///
    /// Offsets are scaled down uniformly if they do not fit inside
    /// `half_extents`. All previous occupancy is dropped and every old
    /// [`SlotId`] becomes stale; the caller must broadcast the change so
    /// units re-acquire.
    ///
    /// Returns the number of slots generated.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::SquadronError::InvalidLayout`] for unusable
    /// parameters. The current table is left untouched in that case.
    pub fn generate_formation(
        &mut self,
        kind: LayoutKind,
        params: LayoutParams,
        half_extents: Vec2Fixed,
    ) -> Result<usize> {
        let mut offsets = generate_offsets(kind, &params)?;

        let scale = match fit_to_bounds(&offsets, half_extents, self.fit_margin) {
            Some(factor) => {
                warn!(
                    ?kind,
                    scale = %factor,
                    half_x = %half_extents.x,
                    half_y = %half_extents.y,
                    "Layout exceeds boundary, scaling down"
                );
                for offset in &mut offsets {
                    *offset = offset.scale(factor);
                }
                factor
            }
            None => Fixed::ONE,
        };

        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.slots = offsets
            .into_iter()
            .enumerate()
            .map(|(index, offset)| Slot::new(SlotId::new(generation, index as u32), offset))
            .collect();
        self.layout = Some(ActiveLayout {
            kind,
            params,
            scale,
            fitted_extents: half_extents,
        });

        info!(
            ?kind,
            generation,
            slots = self.slots.len(),
            "Generated formation"
        );
        Ok(self.slots.len())
    }

    /// Whether the boundary has changed since the layout was fitted.
    #[must_use]
    pub fn needs_refit(&self, half_extents: Vec2Fixed) -> bool {
        self.layout
            .is_some_and(|layout| layout.fitted_extents != half_extents)
    }

    /// Regenerate the current layout against a new boundary.
    ///
    /// Returns `Ok(None)` when there is no layout to refit.
    pub fn refit(&mut self, half_extents: Vec2Fixed) -> Result<Option<usize>> {
        let Some(layout) = self.layout else {
            return Ok(None);
        };
        self.generate_formation(layout.kind, layout.params, half_extents)
            .map(Some)
    }

    /// Whether a layout has been generated.
    #[must_use]
    pub const fn has_layout(&self) -> bool {
        self.layout.is_some()
    }

    /// Layout backing the current table.
    #[must_use]
    pub const fn layout(&self) -> Option<&ActiveLayout> {
        self.layout.as_ref()
    }

    /// Generation of the current slot table (0 before the first layout).
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    // ========================================================================
    // Center
    // ========================================================================

    /// Recompute the formation center from the anchor pose.
    pub fn update_center(&mut self, anchor: &AnchorPose) {
        let offset = match self.offset_space {
            OffsetSpace::World => self.center_offset,
            OffsetSpace::AnchorLocal => anchor.local_to_world(self.center_offset),
        };
        self.center = anchor.position + offset;
        self.heading = anchor.forward;
    }

    /// Current world-space formation center.
    #[must_use]
    pub const fn center(&self) -> Vec3Fixed {
        self.center
    }

    /// Direction of travel of the anchor at the last center update.
    #[must_use]
    pub const fn heading(&self) -> Vec3Fixed {
        self.heading
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Claim the first free slot in table order.
    pub fn try_occupy_slot(&mut self, unit: UnitId) -> Option<SlotId> {
        let slot = self.slots.iter_mut().find(|s| !s.is_occupied())?;
        slot.occupy(unit);
        debug!(unit = %unit, slot = %slot.id(), "Slot claimed (first fit)");
        Some(slot.id())
    }

    /// Free slot whose world position is closest to `position`.
    ///
    /// Ties go to the slot earlier in the table. Does not claim.
    #[must_use]
    pub fn nearest_available_slot(&self, position: Vec3Fixed) -> Option<SlotId> {
        let mut best: Option<(SlotId, Fixed)> = None;
        for slot in self.slots.iter().filter(|s| !s.is_occupied()) {
            let distance = (self.center + slot.local_offset()).distance_squared(position);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((slot.id(), distance));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Claim `slot` if it is still free.
    ///
    /// Returns `false` for occupied or stale slots.
    pub fn occupy_specific_slot(&mut self, slot: SlotId, unit: UnitId) -> bool {
        match self.resolve_mut(slot) {
            Ok(s) if !s.is_occupied() => {
                s.occupy(unit);
                debug!(unit = %unit, slot = %slot, "Slot claimed");
                true
            }
            _ => false,
        }
    }

    /// Claim a slot for `unit` according to `strategy`.
    ///
    /// A unit that already holds a slot gets that slot back, so a unit
    /// can never end up holding two.
    pub fn acquire(
        &mut self,
        unit: UnitId,
        position: Vec3Fixed,
        strategy: AllocationStrategy,
    ) -> Option<SlotId> {
        if let Some(held) = self.slot_of(unit) {
            return Some(held);
        }
        match strategy {
            AllocationStrategy::FirstFitOnly => self.try_occupy_slot(unit),
            AllocationStrategy::NearestOnly => self.claim_nearest(unit, position),
            AllocationStrategy::FirstFitThenNearest => self
                .try_occupy_slot(unit)
                .or_else(|| self.claim_nearest(unit, position)),
        }
    }

    fn claim_nearest(&mut self, unit: UnitId, position: Vec3Fixed) -> Option<SlotId> {
        let slot = self.nearest_available_slot(position)?;
        self.occupy_specific_slot(slot, unit).then_some(slot)
    }

    /// Clear occupancy of `slot`, returning the previous occupant.
    ///
    /// No-op for free or stale slots.
    pub fn release_slot(&mut self, slot: SlotId) -> Option<UnitId> {
        let previous = match self.resolve_mut(slot) {
            Ok(s) => s.vacate(),
            Err(e) => {
                debug!(error = %e, "Release ignored");
                return None;
            }
        };
        if let Some(unit) = previous {
            debug!(unit = %unit, slot = %slot, "Slot released");
        }
        previous
    }

    /// Release every slot whose occupant is no longer alive.
    ///
    /// Returns the reclaimed slots with their former occupants.
    pub fn reclaim_orphaned(&mut self, is_alive: impl Fn(UnitId) -> bool) -> Vec<(SlotId, UnitId)> {
        let mut reclaimed = Vec::new();
        for slot in &mut self.slots {
            if let Some(unit) = slot.occupant() {
                if !is_alive(unit) {
                    slot.vacate();
                    warn!(unit = %unit, slot = %slot.id(), "Reclaimed orphaned slot");
                    reclaimed.push((slot.id(), unit));
                }
            }
        }
        reclaimed
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Look up a slot by handle.
    ///
    /// # Errors
    ///
    /// Returns [`SquadronError::StaleSlot`] when the handle belongs to an
    /// earlier layout or points past the slot table.
    pub fn resolve(&self, id: SlotId) -> Result<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.id().generation == id.generation)
            .ok_or(SquadronError::StaleSlot(id))
    }

    fn resolve_mut(&mut self, id: SlotId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.id().generation == id.generation)
            .ok_or(SquadronError::StaleSlot(id))
    }

    /// Look up a slot. Stale handles resolve to `None`.
    #[must_use]
    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.resolve(id).ok()
    }

    /// All slots in table order.
    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Snapshot of the free slots in table order.
    #[must_use]
    pub fn available_slots(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter(|s| !s.is_occupied())
            .map(Slot::id)
            .collect()
    }

    /// World position of a slot: formation center plus its offset.
    #[must_use]
    pub fn slot_world_position(&self, id: SlotId) -> Option<Vec3Fixed> {
        self.slot(id).map(|s| self.center + s.local_offset())
    }

    /// Unit holding `slot`.
    #[must_use]
    pub fn occupant_of(&self, slot: SlotId) -> Option<UnitId> {
        self.slot(slot).and_then(Slot::occupant)
    }

    /// Slot held by `unit`.
    #[must_use]
    pub fn slot_of(&self, unit: UnitId) -> Option<SlotId> {
        self.slots
            .iter()
            .find(|s| s.occupant() == Some(unit))
            .map(Slot::id)
    }

    /// Total slots in the current table.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slots with an occupant.
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    /// Slots without an occupant.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.slot_count() - self.occupied_count()
    }

    // ========================================================================
    // Layout observers
    // ========================================================================

    /// Register a unit for layout-changed notices.
    pub fn subscribe(&mut self, unit: UnitId) {
        self.subscribers.insert(unit);
    }

    /// Remove a unit from the observer list.
    pub fn unsubscribe(&mut self, unit: UnitId) {
        self.subscribers.remove(&unit);
    }

    /// Subscribed units in ascending id order.
    pub fn subscribers(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.subscribers.iter().copied()
    }

    /// Build the layout-changed notice for every subscriber.
    #[must_use]
    pub fn broadcast_layout_changed(&self) -> LayoutChanged {
        LayoutChanged {
            generation: self.generation,
            slot_count: self.slots.len(),
            recipients: self.subscribers.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(count: u32) -> FormationManager {
        // Single row along x with spacing 2, unconstrained boundary
        let mut manager = FormationManager::default();
        let params = LayoutParams {
            columns: count,
            rows: 1,
            ..LayoutParams::default()
        };
        manager
            .generate_formation(LayoutKind::Grid, params, Vec2Fixed::ZERO)
            .unwrap();
        manager
    }

    #[test]
    fn test_first_fit_claims_in_order() {
        let mut manager = manager_with(3);
        assert_eq!(manager.try_occupy_slot(UnitId(1)), Some(SlotId::new(1, 0)));
        assert_eq!(manager.try_occupy_slot(UnitId(2)), Some(SlotId::new(1, 1)));
        assert_eq!(manager.try_occupy_slot(UnitId(3)), Some(SlotId::new(1, 2)));
        assert_eq!(manager.try_occupy_slot(UnitId(4)), None);
        assert_eq!(manager.available_count(), 0);
    }

    #[test]
    fn test_stale_handle_is_reported_and_ignored() {
        let mut manager = manager_with(2);
        let old = manager.try_occupy_slot(UnitId(1)).unwrap();
        assert_eq!(manager.resolve(old).unwrap().occupant(), Some(UnitId(1)));

        manager
            .generate_formation(LayoutKind::Grid, LayoutParams::default(), Vec2Fixed::ZERO)
            .unwrap();
        assert_eq!(manager.resolve(old).unwrap_err(), SquadronError::StaleSlot(old));
        assert!(manager.slot(old).is_none());
        assert_eq!(manager.release_slot(old), None);
        assert!(!manager.occupy_specific_slot(old, UnitId(2)));

        let past_end = SlotId::new(manager.generation(), 999);
        assert_eq!(manager.resolve(past_end).unwrap_err(), SquadronError::StaleSlot(past_end));
    }

    #[test]
    fn test_nearest_uses_world_position_and_scan_order_ties() {
        // Grid of 3 along x: offsets -2, 0, 2
        let mut manager = manager_with(3);
        manager.update_center(&AnchorPose::at(Vec3Fixed::from_ints(10, 0, 0)));

        let near_right = manager.nearest_available_slot(Vec3Fixed::from_ints(13, 0, 0));
        assert_eq!(near_right, Some(SlotId::new(1, 2)));

        // Equidistant from slots 0 and 1: the earlier one wins.
        let tie = manager.nearest_available_slot(Vec3Fixed::from_ints(9, 0, 0));
        assert_eq!(tie, Some(SlotId::new(1, 0)));
    }

    #[test]
    fn test_occupy_specific_rejects_taken_slot() {
        let mut manager = manager_with(2);
        let slot = SlotId::new(1, 1);
        assert!(manager.occupy_specific_slot(slot, UnitId(1)));
        assert!(!manager.occupy_specific_slot(slot, UnitId(2)));
        assert_eq!(manager.occupant_of(slot), Some(UnitId(1)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut manager = manager_with(1);
        let slot = manager.try_occupy_slot(UnitId(5)).unwrap();
        assert_eq!(manager.release_slot(slot), Some(UnitId(5)));
        assert_eq!(manager.release_slot(slot), None);
        assert_eq!(manager.available_slots(), vec![slot]);
    }

    #[test]
    fn test_regeneration_invalidates_old_handles() {
        let mut manager = manager_with(2);
        let old = manager.try_occupy_slot(UnitId(1)).unwrap();

        manager
            .generate_formation(LayoutKind::VShape, LayoutParams::default(), Vec2Fixed::ZERO)
            .unwrap();

        assert_eq!(manager.generation(), 2);
        assert_eq!(manager.occupied_count(), 0);
        assert!(manager.slot(old).is_none());
        assert_eq!(manager.release_slot(old), None);
        assert!(!manager.occupy_specific_slot(old, UnitId(1)));
        assert_eq!(manager.slot_world_position(old), None);
    }

    #[test]
    fn test_acquire_never_double_claims() {
        let mut manager = manager_with(3);
        let first = manager
            .acquire(UnitId(1), Vec3Fixed::ZERO, AllocationStrategy::FirstFitThenNearest)
            .unwrap();
        let again = manager
            .acquire(UnitId(1), Vec3Fixed::ZERO, AllocationStrategy::NearestOnly)
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(manager.occupied_count(), 1);
    }

    #[test]
    fn test_acquire_strategies() {
        let mut manager = manager_with(3);
        let position = Vec3Fixed::from_ints(2, 0, 0);

        let nearest = manager.acquire(UnitId(1), position, AllocationStrategy::NearestOnly);
        assert_eq!(nearest, Some(SlotId::new(1, 2)));

        let first = manager.acquire(UnitId(2), position, AllocationStrategy::FirstFitOnly);
        assert_eq!(first, Some(SlotId::new(1, 0)));
    }

    #[test]
    fn test_reclaim_orphaned() {
        let mut manager = manager_with(3);
        manager.try_occupy_slot(UnitId(1));
        manager.try_occupy_slot(UnitId(2));

        let reclaimed = manager.reclaim_orphaned(|unit| unit != UnitId(2));
        assert_eq!(reclaimed, vec![(SlotId::new(1, 1), UnitId(2))]);
        assert_eq!(manager.slot_of(UnitId(1)), Some(SlotId::new(1, 0)));
        assert_eq!(manager.slot_of(UnitId(2)), None);
    }

    #[test]
    fn test_center_offset_spaces() {
        let config = FormationConfig {
            center_offset: Vec3Fixed::from_ints(0, 0, 5),
            offset_space: OffsetSpace::AnchorLocal,
            ..FormationConfig::default()
        };
        let mut manager = FormationManager::new(&config);
        let pose = AnchorPose::looking(Vec3Fixed::from_ints(1, 0, 0), Vec3Fixed::X);
        manager.update_center(&pose);
        assert_eq!(manager.center(), Vec3Fixed::from_ints(6, 0, 0));
        assert_eq!(manager.heading(), Vec3Fixed::X);

        let config = FormationConfig {
            offset_space: OffsetSpace::World,
            ..config
        };
        let mut manager = FormationManager::new(&config);
        manager.update_center(&pose);
        assert_eq!(manager.center(), Vec3Fixed::from_ints(1, 0, 5));
    }

    #[test]
    fn test_refit_on_extent_change() {
        let mut manager = FormationManager::default();
        let extents = Vec2Fixed::from_ints(100, 100);
        manager
            .generate_formation(LayoutKind::Circle, LayoutParams::default(), extents)
            .unwrap();
        assert!(!manager.needs_refit(extents));

        let smaller = Vec2Fixed::from_ints(2, 2);
        assert!(manager.needs_refit(smaller));
        assert_eq!(manager.refit(smaller).unwrap(), Some(5));
        assert_eq!(manager.generation(), 2);
        assert!(manager.layout().unwrap().scale < Fixed::ONE);
    }

    #[test]
    fn test_broadcast_lists_subscribers_sorted() {
        let mut manager = manager_with(1);
        manager.subscribe(UnitId(3));
        manager.subscribe(UnitId(1));
        manager.subscribe(UnitId(2));
        manager.unsubscribe(UnitId(2));

        let notice = manager.broadcast_layout_changed();
        assert_eq!(notice.generation, 1);
        assert_eq!(notice.slot_count, 1);
        assert_eq!(notice.recipients, vec![UnitId(1), UnitId(3)]);
    }
}
