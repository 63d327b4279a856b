//! Formation layouts and slot ownership.
//!
//! - [`layout`]: procedural offset generation and boundary fitting
//! - [`slot`]: slot values and generational handles
//! - [`manager`]: the [`FormationManager`] that brokers slot ownership

pub mod layout;
pub mod manager;
pub mod slot;

pub use layout::{LayoutKind, LayoutParams};
pub use manager::{ActiveLayout, AllocationStrategy, FormationManager, LayoutChanged, OffsetSpace};
pub use slot::{Slot, SlotId};
