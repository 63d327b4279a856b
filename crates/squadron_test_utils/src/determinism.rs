//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation
//! produces identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Formation runs must replay bit-for-bit from a seed and an input log.
//! Sources of non-determinism include:
//!
//! - **Floating-point math**: Different CPUs can produce different results.
//!   We use fixed-point arithmetic via [`squadron_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   We always iterate in sorted unit id order.
//!
//! - **System randomness**: Approach variance comes from per-unit seeded
//!   streams, never from the OS.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual behavior determinism (approach, stun, etc.)
//! 2. **Property tests**: Random inputs must still produce deterministic outputs
//! 3. **Integration tests**: Full formation scenarios are reproducible
//! 4. **Parallel tests**: Running N simulations in parallel all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use squadron_core::simulation::Simulation;

use crate::fixtures::Harness;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one tick
/// * `hash` - Function to compute state hash
///
/// # Example
///
/// ```
/// use squadron_test_utils::determinism::verify_determinism;
/// use squadron_test_utils::fixtures::default_harness;
///
/// let result = verify_determinism(
///     3,  // Run 3 times
///     100, // 100 ticks each
///     || {
///         let mut harness = default_harness();
///         harness.spawn_row(7, None);
///         harness
///     },
///     |h| { h.step(); },
///     |h| h.sim.state_hash(),
/// );
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Runs a harness twice with identical setup and compares final hashes.
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Harness,
{
    verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |harness| {
            harness.step();
        },
        |harness| harness.sim.state_hash(),
    )
    .is_deterministic
}

/// Result of parallel simulation runs.
#[derive(Debug, Clone)]
pub struct ParallelSimResult {
    /// Final state hash from each simulation.
    pub hashes: Vec<u64>,
    /// Number of ticks each simulation ran.
    pub ticks: u64,
    /// Number of simulations run.
    pub num_sims: usize,
}

impl ParallelSimResult {
    /// Check if all simulations produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all simulations matched.
    ///
    /// # Panics
    ///
    /// Panics if simulations produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel simulations diverged!\n\
                 Simulations: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.num_sims,
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run N harnesses on scoped threads and collect final hashes.
///
/// # Panics
///
/// Panics if a simulation thread panics.
pub fn run_parallel_simulations_scoped<F>(
    setup_fn: F,
    num_sims: usize,
    num_ticks: u64,
) -> ParallelSimResult
where
    F: Fn() -> Harness + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut harness = setup_fn();
                    for _ in 0..num_ticks {
                        harness.step();
                    }
                    harness.sim.state_hash()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    ParallelSimResult {
        hashes,
        ticks: num_ticks,
        num_sims,
    }
}

/// Compare two runs tick-by-tick, finding the first divergence.
///
/// # Returns
///
/// `None` if the runs are deterministic, `Some(tick)` if they diverge
/// at that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> Harness,
{
    let mut first = setup_fn();
    let mut second = setup_fn();

    if first.sim.state_hash() != second.sim.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        first.step();
        second.step();

        if first.sim.state_hash() != second.sim.state_hash() {
            tracing::warn!(tick, "Simulations diverged");
            return Some(tick);
        }
    }

    None
}

/// Verify that a snapshot taken mid-run and restored continues identically.
pub fn verify_serialization_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Harness,
{
    let mut original = setup_fn();
    for _ in 0..num_ticks {
        original.step();
    }

    let Ok(bytes) = original.sim.serialize() else {
        return false;
    };
    let Ok(sim) = Simulation::deserialize(&bytes) else {
        return false;
    };
    if sim.state_hash() != original.sim.state_hash() {
        return false;
    }

    let mut restored = Harness {
        sim,
        anchor: original.anchor.clone(),
    };
    for _ in 0..num_ticks {
        original.step();
        restored.step();
    }
    original.sim.state_hash() == restored.sim.state_hash()
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for formation testing.
///
/// These strategies generate random but reproducible inputs for
/// property-based testing.
pub mod strategies {
    use proptest::prelude::*;
    use squadron_core::formation::{LayoutKind, LayoutParams};
    use squadron_core::math::{Fixed, Vec2Fixed, Vec3Fixed};

    /// Any layout shape.
    pub fn arb_layout_kind() -> impl Strategy<Value = LayoutKind> {
        prop_oneof![
            Just(LayoutKind::VShape),
            Just(LayoutKind::Square),
            Just(LayoutKind::Triangle),
            Just(LayoutKind::Circle),
            Just(LayoutKind::Grid),
        ]
    }

    /// Valid layout parameters with up to `max_slots` slots.
    pub fn arb_layout_params(max_slots: u32) -> impl Strategy<Value = LayoutParams> {
        (1..=max_slots, 1i32..5, 1u32..6, 1u32..6, 1i32..10).prop_map(
            |(slot_count, spacing, columns, rows, radius)| LayoutParams {
                slot_count,
                spacing: Fixed::from_num(spacing),
                columns,
                rows,
                radius: Fixed::from_num(radius),
            },
        )
    }

    /// Boundary half-extents, sometimes tight enough to force scaling.
    pub fn arb_half_extents() -> impl Strategy<Value = Vec2Fixed> {
        (1i32..40, 1i32..40).prop_map(|(x, y)| Vec2Fixed::from_ints(x, y))
    }

    /// Spawn position around the formation.
    pub fn arb_spawn_position() -> impl Strategy<Value = Vec3Fixed> {
        (-30i32..30, -30i32..30, -5i32..5).prop_map(|(x, y, z)| Vec3Fixed::from_ints(x, y, z))
    }

    /// A command issued against a unit mid-run.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Disturbance {
        /// Concuss for the given whole seconds.
        Concussion(i32),
        /// Push along a direction with a magnitude.
        Force(Vec3Fixed, i32),
        /// Drop the slot and re-acquire.
        Reassign,
        /// Damage.
        Damage(u32),
    }

    /// Any disturbance.
    pub fn arb_disturbance() -> impl Strategy<Value = Disturbance> {
        prop_oneof![
            (1i32..4).prop_map(Disturbance::Concussion),
            (arb_spawn_position(), 1i32..200).prop_map(|(dir, mag)| Disturbance::Force(dir, mag)),
            Just(Disturbance::Reassign),
            (1u32..60).prop_map(Disturbance::Damage),
        ]
    }

    /// Timed disturbances: (tick, unit index, disturbance).
    pub fn arb_disturbance_schedule(
        max_len: usize,
    ) -> impl Strategy<Value = Vec<(u64, usize, Disturbance)>> {
        proptest::collection::vec((0u64..300, 0usize..16, arb_disturbance()), 0..max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{default_harness, slots, Harness};
    use proptest::prelude::*;
    use squadron_core::formation::LayoutKind;
    use squadron_core::math::{Fixed, Vec2Fixed, Vec3Fixed};
    use squadron_core::simulation::UnitSpawnParams;

    fn crowded_patrol() -> Harness {
        let mut harness = Harness::moving(
            LayoutKind::Circle,
            slots(8),
            vec![
                Vec3Fixed::ZERO,
                Vec3Fixed::from_ints(0, 0, 40),
                Vec3Fixed::from_ints(30, 0, 40),
            ],
            Fixed::from_num(6),
            Vec2Fixed::from_ints(6, 6),
        );
        harness.spawn_row(12, Some(Vec3Fixed::from_ints(0, -20, 0)));
        harness
    }

    // =========================================================================
    // Basic determinism tests
    // =========================================================================

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_empty_simulation_determinism() {
        assert!(verify_simulation_determinism(
            || Harness::empty(Vec2Fixed::from_ints(10, 10)),
            100
        ));
    }

    #[test]
    fn test_crowded_patrol_determinism() {
        assert!(verify_simulation_determinism(crowded_patrol, 400));
    }

    #[test]
    fn test_find_divergence_on_deterministic_sim() {
        let divergence = find_first_divergence(crowded_patrol, 200);
        assert!(divergence.is_none(), "Expected no divergence");
    }

    #[test]
    fn test_serialization_mid_run() {
        assert!(verify_serialization_determinism(crowded_patrol, 120));
    }

    #[test]
    fn test_parallel_simulations() {
        let result = run_parallel_simulations_scoped(crowded_patrol, 4, 300);
        result.assert_deterministic();
    }

    #[test]
    fn test_compute_hash_is_stable() {
        assert_eq!(compute_hash(&(1u32, "slot")), compute_hash(&(1u32, "slot")));
    }

    // =========================================================================
    // Property-based tests using proptest
    // =========================================================================

    proptest! {
        /// Any spawn position should produce deterministic results.
        #[test]
        fn prop_random_spawn_positions_are_deterministic(
            position in strategies::arb_spawn_position(),
        ) {
            let setup = move || {
                let mut harness = default_harness();
                harness.sim.spawn_unit(UnitSpawnParams {
                    position,
                    ..Default::default()
                });
                harness
            };

            let result = verify_determinism(2, 150, setup, |h| { h.step(); }, |h| h.sim.state_hash());
            prop_assert!(result.is_deterministic);
        }

        /// Disturbance schedules replay identically.
        #[test]
        fn prop_disturbances_are_replayable(
            schedule in strategies::arb_disturbance_schedule(12),
        ) {
            let setup = || {
                let mut harness = default_harness();
                harness.spawn_row(8, None);
                harness
            };
            let step = |h: &mut Harness| {
                let tick = h.sim.get_tick();
                let ids = h.sim.units().sorted_ids();
                for (at, index, disturbance) in &schedule {
                    if *at != tick || ids.is_empty() {
                        continue;
                    }
                    let id = ids[index % ids.len()];
                    let _ = match disturbance {
                        strategies::Disturbance::Concussion(secs) => {
                            h.sim.apply_concussion(id, Fixed::from_num(*secs))
                        }
                        strategies::Disturbance::Force(dir, mag) => {
                            h.sim.apply_force(id, *dir, Fixed::from_num(*mag))
                        }
                        strategies::Disturbance::Reassign => h.sim.force_reassign_slot(id),
                        strategies::Disturbance::Damage(amount) => h.sim.take_damage(id, *amount),
                    };
                }
                h.step();
            };

            let result = verify_determinism(2, 300, setup, step, |h| h.sim.state_hash());
            prop_assert!(result.is_deterministic);
        }
    }

    // =========================================================================
    // Stress tests (only run explicitly with --ignored)
    // =========================================================================

    #[test]
    #[ignore = "Long-running stress test"]
    fn stress_test_many_units() {
        let setup = || {
            let mut harness = Harness::with_layout(
                LayoutKind::Grid,
                squadron_core::formation::LayoutParams {
                    columns: 10,
                    rows: 10,
                    ..Default::default()
                },
                Vec2Fixed::from_ints(30, 30),
            );
            harness.spawn_row(150, Some(Vec3Fixed::from_ints(0, -40, 0)));
            harness
        };

        let result = verify_determinism(3, 2000, setup, |h| { h.step(); }, |h| h.sim.state_hash());
        result.assert_deterministic();
    }
}
