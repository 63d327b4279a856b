//! Scenario loading and configuration.
//!
//! Scenarios bundle everything a headless run needs: the simulation
//! configuration, the anchor's path, the boundary, the starting units and a
//! timeline of scripted actions.
//!
//! Positions and durations are written as decimals for readability and
//! converted to fixed point once, when the runner is built.

use std::path::Path;

use serde::{Deserialize, Serialize};
use squadron_core::config::{SimulationConfig, UnitConfig};
use squadron_core::error::SquadronError;
use squadron_core::formation::{LayoutKind, LayoutParams};
use squadron_core::math::{Fixed, Vec2Fixed, Vec3Fixed};
use thiserror::Error;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// A decimal does not fit the simulation's fixed-point range.
    #[error("Value out of range: {0}")]
    OutOfRange(String),
    /// Failed to write JSON output.
    #[error("Failed to write output: {0}")]
    OutputError(#[from] serde_json::Error),
    /// The simulation rejected the scenario setup.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SquadronError),
}

/// A complete scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Simulation tuning, including the startup layout.
    #[serde(default)]
    pub config: SimulationConfig,
    /// Path the formation anchor travels.
    pub anchor: AnchorPath,
    /// Boundary half-extents (x, y) in the formation plane.
    pub half_extents: (f64, f64),
    /// Number of ticks to run.
    pub ticks: u64,
    /// Units present at tick 0.
    #[serde(default)]
    pub units: Vec<UnitPlacement>,
    /// Scripted actions.
    #[serde(default)]
    pub timeline: Vec<TimedAction>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::patrol()
    }
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let scenario: Scenario = ron::from_str(&contents)?;
        Ok(scenario)
    }

    /// Load from a RON string (useful for embedded scenarios).
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        Ok(scenario)
    }

    /// Built-in patrol: seven units compete for a five-slot V while the
    /// anchor flies a dog-leg, with a few scripted knocks along the way.
    #[must_use]
    pub fn patrol() -> Self {
        Self {
            name: "Patrol".to_string(),
            description: "Seven units, five slots, moving anchor".to_string(),
            config: SimulationConfig::default(),
            anchor: AnchorPath {
                waypoints: vec![(0.0, 0.0, 0.0), (0.0, 0.0, 60.0), (40.0, 0.0, 60.0)],
                speed: 4.0,
            },
            half_extents: (12.0, 8.0),
            ticks: 1500,
            units: vec![
                UnitPlacement::new((-6.0, -12.0, 0.0), 5),
                UnitPlacement {
                    position: (6.0, -12.0, 0.0),
                    spawn_point: Some((0.0, -20.0, 0.0)),
                    count: 2,
                },
            ],
            timeline: vec![
                TimedAction::new(300, Action::Concussion { unit: 2, duration: 1.0 }),
                TimedAction::new(
                    450,
                    Action::Force {
                        unit: 4,
                        direction: (1.0, 0.0, 0.0),
                        magnitude: 250.0,
                    },
                ),
                TimedAction::new(600, Action::Damage { unit: 1, amount: 1000 }),
                TimedAction::new(
                    900,
                    Action::Relayout {
                        layout: LayoutKind::Circle,
                        params: LayoutParams {
                            slot_count: 6,
                            ..LayoutParams::default()
                        },
                    },
                ),
                TimedAction::new(1200, Action::Resize { half_extents: (4.0, 4.0) }),
            ],
        }
    }

    /// Boundary as fixed point.
    pub fn half_extents_fixed(&self) -> Result<Vec2Fixed, ScenarioError> {
        let (x, y) = self.half_extents;
        Ok(Vec2Fixed::new(to_fixed(x)?, to_fixed(y)?))
    }
}

/// Waypoint path followed by the anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorPath {
    /// Waypoints (x, y, z). The anchor starts at the first.
    pub waypoints: Vec<(f64, f64, f64)>,
    /// Travel speed in units per second.
    pub speed: f64,
}

/// Units spawned at scenario start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitPlacement {
    /// Position (x, y, z) of the first unit; the rest line up along x.
    pub position: (f64, f64, f64),
    /// Retreat point while no slot is free.
    #[serde(default)]
    pub spawn_point: Option<(f64, f64, f64)>,
    /// How many units to spawn.
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

impl UnitPlacement {
    /// Create a placement without a spawn point.
    #[must_use]
    pub fn new(position: (f64, f64, f64), count: u32) -> Self {
        Self {
            position,
            spawn_point: None,
            count,
        }
    }
}

/// An action fired at a given tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedAction {
    /// Tick before which the action is applied.
    pub tick: u64,
    /// What to do.
    pub action: Action,
}

impl TimedAction {
    /// Create a timed action.
    #[must_use]
    pub fn new(tick: u64, action: Action) -> Self {
        Self { tick, action }
    }
}

/// Scripted actions. Units are addressed by their numeric id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    /// Spawn more units.
    Spawn(UnitPlacement),
    /// Spawn one unit with its own tuning.
    SpawnWithConfig {
        /// Position (x, y, z).
        position: (f64, f64, f64),
        /// Per-unit tuning.
        config: UnitConfig,
    },
    /// Remove a unit.
    Despawn {
        /// Unit id.
        unit: u64,
    },
    /// Damage a unit.
    Damage {
        /// Unit id.
        unit: u64,
        /// Damage amount.
        amount: u32,
    },
    /// Concuss a unit.
    Concussion {
        /// Unit id.
        unit: u64,
        /// Stun length in seconds.
        duration: f64,
    },
    /// Push a unit.
    Force {
        /// Unit id.
        unit: u64,
        /// Push direction (x, y, z).
        direction: (f64, f64, f64),
        /// Impulse magnitude.
        magnitude: f64,
    },
    /// Set the spin of a unit's next concussion.
    Torque {
        /// Unit id.
        unit: u64,
        /// Spin rate in radians per second.
        amount: f64,
    },
    /// Make a unit drop its slot and re-acquire.
    Reassign {
        /// Unit id.
        unit: u64,
    },
    /// Prompt a holding unit to poll now.
    NotifySlotAvailable {
        /// Unit id.
        unit: u64,
    },
    /// Generate a new layout.
    Relayout {
        /// Shape.
        layout: LayoutKind,
        /// Shape parameters.
        #[serde(default)]
        params: LayoutParams,
    },
    /// Change the boundary.
    Resize {
        /// New half-extents (x, y).
        half_extents: (f64, f64),
    },
}

/// Convert a scenario decimal to fixed point.
pub fn to_fixed(value: f64) -> Result<Fixed, ScenarioError> {
    Fixed::checked_from_num(value).ok_or_else(|| ScenarioError::OutOfRange(value.to_string()))
}

/// Convert a scenario decimal triple to a fixed-point vector.
pub fn to_vec3((x, y, z): (f64, f64, f64)) -> Result<Vec3Fixed, ScenarioError> {
    Ok(Vec3Fixed::new(to_fixed(x)?, to_fixed(y)?, to_fixed(z)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        Scenario(
            name: "Test",
            anchor: (waypoints: [(0.0, 0.0, 0.0)], speed: 0.0),
            half_extents: (10.0, 10.0),
            ticks: 50,
            units: [(position: (0.0, -5.0, 0.0), count: 3)],
            timeline: [
                (tick: 10, action: Concussion(unit: 1, duration: 0.5)),
                (tick: 20, action: Relayout(layout: Grid)),
            ],
        )
    "#;

    #[test]
    fn test_default_scenario() {
        let scenario = Scenario::default();
        assert_eq!(scenario.name, "Patrol");
        assert_eq!(scenario.units.iter().map(|u| u.count).sum::<u32>(), 7);
        assert_eq!(scenario.config.formation.params.slot_count, 5);
    }

    #[test]
    fn test_parse_from_ron() {
        let scenario = Scenario::from_ron_str(MINIMAL).unwrap();
        assert_eq!(scenario.name, "Test");
        assert_eq!(scenario.units[0].count, 3);
        assert!(scenario.units[0].spawn_point.is_none());
        assert_eq!(scenario.timeline.len(), 2);
        assert!(matches!(
            scenario.timeline[1].action,
            Action::Relayout { layout: LayoutKind::Grid, .. }
        ));
        assert_eq!(scenario.config.seed, SimulationConfig::default().seed);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let scenario = Scenario::load(file.path()).unwrap();
        assert_eq!(scenario.ticks, 50);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ron");
        assert!(matches!(
            Scenario::load(&missing),
            Err(ScenarioError::FileNotFound(_))
        ));

        let broken = dir.path().join("broken.ron");
        std::fs::write(&broken, "Scenario(name: ").unwrap();
        assert!(matches!(
            Scenario::load(&broken),
            Err(ScenarioError::ParseError(_))
        ));
    }

    #[test]
    fn test_patrol_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/patrol.ron");
        let scenario = Scenario::load(path).unwrap();
        assert!(scenario.ticks > 0);
        assert!(scenario.half_extents_fixed().is_ok());
    }

    #[test]
    fn test_out_of_range_decimal() {
        assert!(matches!(to_fixed(1e12), Err(ScenarioError::OutOfRange(_))));
        assert_eq!(to_fixed(2.5).unwrap(), Fixed::from_num(2.5));
    }
}
