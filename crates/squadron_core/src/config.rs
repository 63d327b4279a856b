//! Tunable simulation parameters.
//!
//! Everything here is plain data designed to be deserialized from RON.
//! All structs use `#[serde(default)]`, so a config file only needs to
//! name the values it changes.
//!
//! # Example RON
//!
//! ```ron
//! SimulationConfig(
//!     seed: 7,
//!     formation: (
//!         layout: Circle,
//!         params: (slot_count: 12, radius: 5.0),
//!         center_offset: (0.0, 1.5, 12.0),
//!         offset_space: AnchorLocal,
//!     ),
//!     unit: (
//!         concussion_range: 4.0,
//!         allocation: NearestOnly,
//!     ),
//! )
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, SquadronError};
use crate::formation::{AllocationStrategy, LayoutKind, LayoutParams, OffsetSpace};
use crate::math::{decimal_serde, decimal_vec3_serde, ApproachCurve, Fixed, Vec3Fixed};

/// Top-level simulation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for every per-unit random stream.
    pub seed: u64,
    /// Formation layout and placement.
    pub formation: FormationConfig,
    /// Default behavior tuning for spawned units.
    pub unit: UnitConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            formation: FormationConfig::default(),
            unit: UnitConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Parse a configuration from RON text.
    ///
    /// `source_name` only labels errors (usually the file path).
    pub fn from_ron_str(text: &str, source_name: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| SquadronError::ConfigParse {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Formation layout and placement relative to the anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormationConfig {
    /// Shape generated on startup.
    pub layout: LayoutKind,
    /// Shape parameters.
    pub params: LayoutParams,
    /// Offset of the formation center from the anchor.
    #[serde(with = "decimal_vec3_serde")]
    pub center_offset: Vec3Fixed,
    /// Axes in which `center_offset` is expressed.
    pub offset_space: OffsetSpace,
    /// Safety margin applied when a layout is scaled to fit the boundary.
    #[serde(with = "decimal_serde")]
    pub fit_margin: Fixed,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            layout: LayoutKind::VShape,
            params: LayoutParams::default(),
            center_offset: Vec3Fixed::ZERO,
            offset_space: OffsetSpace::World,
            fit_margin: Fixed::from_num(0.9),
        }
    }
}

/// Per-unit behavior tuning. Times are in seconds, distances in world units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    /// Health at spawn.
    pub max_health: u32,
    /// How long a waiting unit keeps trying before it falls back to holding.
    #[serde(with = "decimal_serde")]
    pub max_wait_time: Fixed,
    /// Interval between slot polls while holding.
    #[serde(with = "decimal_serde")]
    pub retry_interval: Fixed,
    /// Base duration of the first approach to a slot.
    #[serde(with = "decimal_serde")]
    pub approach_time: Fixed,
    /// Upper bound of the random extra time added to the first approach.
    #[serde(with = "decimal_serde")]
    pub approach_variance: Fixed,
    /// Curve mapping approach time to progress.
    pub approach_curve: ApproachCurve,
    /// Distance under which a unit counts as arrived.
    #[serde(with = "decimal_serde")]
    pub arrival_threshold: Fixed,
    /// Distance under which in-combat correction stops.
    #[serde(with = "decimal_serde")]
    pub dead_zone: Fixed,
    /// Fraction of the remaining gap closed per second while following.
    #[serde(with = "decimal_serde")]
    pub follow_rate: Fixed,
    /// Rate at which velocity blends toward the follow velocity.
    #[serde(with = "decimal_serde")]
    pub velocity_damping: Fixed,
    /// Drift from the slot beyond which an in-combat unit is concussed.
    #[serde(with = "decimal_serde")]
    pub concussion_range: Fixed,
    /// Concussion length when triggered by drift or force.
    #[serde(with = "decimal_serde")]
    pub stun_duration: Fixed,
    /// Exponential drag on the floating velocity while concussed.
    #[serde(with = "decimal_serde")]
    pub stun_drag: Fixed,
    /// Cosmetic spin while concussed, radians per second. Zero disables.
    #[serde(with = "decimal_serde")]
    pub stun_spin_rate: Fixed,
    /// Travel speed toward the spawn point.
    #[serde(with = "decimal_serde")]
    pub loiter_speed: Fixed,
    /// Rate at which facing turns toward its target direction.
    #[serde(with = "decimal_serde")]
    pub turn_rate: Fixed,
    /// How a waiting unit picks a slot.
    pub allocation: AllocationStrategy,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            max_health: 100,
            max_wait_time: Fixed::from_num(3),
            retry_interval: Fixed::from_num(0.5),
            approach_time: Fixed::from_num(1.5),
            approach_variance: Fixed::from_num(0.5),
            approach_curve: ApproachCurve::EaseOutCubic,
            arrival_threshold: Fixed::from_num(0.1),
            dead_zone: Fixed::from_num(0.05),
            follow_rate: Fixed::from_num(5),
            velocity_damping: Fixed::from_num(8),
            concussion_range: Fixed::from_num(3),
            stun_duration: Fixed::from_num(1.5),
            stun_drag: Fixed::from_num(2),
            stun_spin_rate: Fixed::from_num(6),
            loiter_speed: Fixed::from_num(4),
            turn_rate: Fixed::from_num(6),
            allocation: AllocationStrategy::FirstFitThenNearest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_uses_defaults() {
        let text = r#"
            SimulationConfig(
                seed: 7,
                formation: (
                    layout: Circle,
                    params: (slot_count: 12, radius: 5.0),
                    center_offset: (0.0, 1.5, 12.0),
                    offset_space: AnchorLocal,
                ),
                unit: (
                    concussion_range: 4.0,
                    allocation: NearestOnly,
                ),
            )
        "#;

        let config = SimulationConfig::from_ron_str(text, "inline").unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.formation.layout, LayoutKind::Circle);
        assert_eq!(config.formation.params.slot_count, 12);
        assert_eq!(config.formation.params.radius, Fixed::from_num(5));
        assert_eq!(config.formation.params.spacing, LayoutParams::default().spacing);
        assert_eq!(config.formation.center_offset.y, Fixed::from_num(1.5));
        assert_eq!(config.formation.offset_space, OffsetSpace::AnchorLocal);
        assert_eq!(config.unit.concussion_range, Fixed::from_num(4));
        assert_eq!(config.unit.allocation, AllocationStrategy::NearestOnly);
        assert_eq!(config.unit.max_health, UnitConfig::default().max_health);
    }

    #[test]
    fn test_invalid_ron_reports_source() {
        let err = SimulationConfig::from_ron_str("SimulationConfig(seed: \"x\")", "bad.ron")
            .unwrap_err();
        match err {
            SquadronError::ConfigParse { source_name, .. } => assert_eq!(source_name, "bad.ron"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ron_roundtrip_is_exact() {
        let config = SimulationConfig::default();
        let text = ron::to_string(&config).unwrap();
        let parsed = SimulationConfig::from_ron_str(&text, "roundtrip").unwrap();
        assert_eq!(config, parsed);
    }
}
