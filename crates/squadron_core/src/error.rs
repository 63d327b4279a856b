//! Error types for the formation simulation.
//!
//! Nothing in the core is fatal. Every variant describes a request that was
//! rejected without mutating state; callers may log and carry on.

use thiserror::Error;

use crate::components::UnitId;
use crate::formation::SlotId;
use crate::unit::UnitState;

/// Result type alias using [`SquadronError`].
pub type Result<T> = std::result::Result<T, SquadronError>;

/// Top-level error type for all simulation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SquadronError {
    /// No live unit with this identifier.
    #[error("Unit not found: {0}")]
    UnitNotFound(UnitId),

    /// The transition table does not allow this state change.
    #[error("Invalid transition for unit {unit}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Unit whose transition was rejected.
        unit: UnitId,
        /// State the unit is in.
        from: UnitState,
        /// State that was requested.
        to: UnitState,
    },

    /// A combat mutator was called on a unit that cannot accept it.
    #[error("Unit {unit} cannot accept {action} while {state:?}")]
    IneligibleCombatAction {
        /// Target unit.
        unit: UnitId,
        /// Name of the rejected action.
        action: &'static str,
        /// State the unit was in.
        state: UnitState,
    },

    /// Slot handle belongs to a layout that has since been replaced.
    #[error("Stale slot handle: {0}")]
    StaleSlot(SlotId),

    /// Layout parameters cannot produce a formation.
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// Configuration text failed to parse.
    #[error("Failed to parse config '{source_name}': {message}")]
    ConfigParse {
        /// Name of the config source (file path or label).
        source_name: String,
        /// Parser message.
        message: String,
    },

    /// Invalid simulation state.
    #[error("Invalid simulation state: {0}")]
    InvalidState(String),
}
