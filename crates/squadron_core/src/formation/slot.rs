//! Slot values owned by the formation manager.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::components::UnitId;
use crate::math::Vec3Fixed;

/// Opaque handle to a slot.
///
/// The generation ties the handle to one slot table. After the layout is
/// regenerated, handles from the previous table no longer resolve, so a
/// stale handle can never alias a slot in the new layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId {
    /// Layout generation that produced the slot.
    pub generation: u32,
    /// Position of the slot in its table.
    pub index: u32,
}

impl SlotId {
    /// Create a slot handle.
    #[must_use]
    pub const fn new(generation: u32, index: u32) -> Self {
        Self { generation, index }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}.{}", self.generation, self.index)
    }
}

/// A single position within a formation, occupiable by one unit.
///
/// Occupancy is derived from `occupant`, so the flag and the handle can
/// never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    id: SlotId,
    local_offset: Vec3Fixed,
    occupant: Option<UnitId>,
}

impl Slot {
    pub(crate) const fn new(id: SlotId, local_offset: Vec3Fixed) -> Self {
        Self {
            id,
            local_offset,
            occupant: None,
        }
    }

    /// Handle of this slot.
    #[must_use]
    pub const fn id(&self) -> SlotId {
        self.id
    }

    /// Offset from the formation center, fixed at generation.
    #[must_use]
    pub const fn local_offset(&self) -> Vec3Fixed {
        self.local_offset
    }

    /// Unit holding the slot.
    #[must_use]
    pub const fn occupant(&self) -> Option<UnitId> {
        self.occupant
    }

    /// Whether a unit holds the slot.
    #[must_use]
    pub const fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    pub(crate) fn occupy(&mut self, unit: UnitId) {
        self.occupant = Some(unit);
    }

    pub(crate) fn vacate(&mut self) -> Option<UnitId> {
        self.occupant.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_occupancy_follows_occupant() {
        let mut slot = Slot::new(SlotId::new(1, 0), Vec3Fixed::from_ints(2, 0, 0));
        assert!(!slot.is_occupied());

        slot.occupy(UnitId(4));
        assert!(slot.is_occupied());
        assert_eq!(slot.occupant(), Some(UnitId(4)));

        assert_eq!(slot.vacate(), Some(UnitId(4)));
        assert!(!slot.is_occupied());
        assert_eq!(slot.vacate(), None);
    }

    #[test]
    fn test_slot_id_display() {
        assert_eq!(SlotId::new(3, 11).to_string(), "slot#3.11");
    }
}
