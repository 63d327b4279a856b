//! Fixed-point math utilities for deterministic simulation.
//!
//! All formation and unit simulation uses fixed-point arithmetic so that
//! two runs with the same seed and inputs produce bit-identical results.
//! Square roots and trigonometry are evaluated in fixed point as well;
//! nothing in here touches `f32`/`f64` at simulation time.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Serde support for optional fixed-point numbers, as raw bits.
pub mod option_fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize an optional fixed-point number as optional raw bits.
    pub fn serialize<S>(value: &Option<Fixed>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(Fixed::to_bits).serialize(serializer)
    }

    /// Deserialize an optional fixed-point number from optional raw bits.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Fixed>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<i64>::deserialize(deserializer)?.map(Fixed::from_bits))
    }
}

/// Serde support for human-authored fixed-point values.
///
/// Config and scenario files are written by hand, so they carry decimal
/// numbers (`2.5`) rather than raw bits. The decimal is converted exactly
/// once at load time; simulation state itself always uses [`fixed_serde`].
pub mod decimal_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a fixed-point number as a decimal.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.to_num::<f64>())
    }

    /// Deserialize a fixed-point number from a decimal.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(value)
            .ok_or_else(|| serde::de::Error::custom(format!("{value} is out of fixed-point range")))
    }
}

/// Serde support for human-authored vectors, written as `(x, y, z)` decimals.
pub mod decimal_vec3_serde {
    use super::{Fixed, Vec3Fixed};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a vector as a tuple of decimals.
    pub fn serialize<S>(value: &Vec3Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (
            value.x.to_num::<f64>(),
            value.y.to_num::<f64>(),
            value.z.to_num::<f64>(),
        )
            .serialize(serializer)
    }

    /// Deserialize a vector from a tuple of decimals.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec3Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (x, y, z) = <(f64, f64, f64)>::deserialize(deserializer)?;
        let convert = |v: f64| {
            Fixed::checked_from_num(v)
                .ok_or_else(|| serde::de::Error::custom(format!("{v} is out of fixed-point range")))
        };
        Ok(Vec3Fixed::new(convert(x)?, convert(y)?, convert(z)?))
    }
}

/// Serde support for human-authored 2D vectors, written as `(x, y)` decimals.
pub mod decimal_vec2_serde {
    use super::{Fixed, Vec2Fixed};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a vector as a tuple of decimals.
    pub fn serialize<S>(value: &Vec2Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (value.x.to_num::<f64>(), value.y.to_num::<f64>()).serialize(serializer)
    }

    /// Deserialize a vector from a tuple of decimals.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec2Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (x, y) = <(f64, f64)>::deserialize(deserializer)?;
        let convert = |v: f64| {
            Fixed::checked_from_num(v)
                .ok_or_else(|| serde::de::Error::custom(format!("{v} is out of fixed-point range")))
        };
        Ok(Vec2Fixed::new(convert(x)?, convert(y)?))
    }
}

/// Fixed-point 2D vector.
///
/// Used for planar quantities such as boundary half-extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Create a vector from integer components.
    #[must_use]
    pub fn from_ints(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }
}

/// Largest component magnitude whose squares can be summed without
/// leaving the `Fixed` range.
const SAFE_COMPONENT: Fixed = Fixed::from_bits(16_384 << 32);

/// Fixed-point 3D vector.
///
/// Formation layouts live in the XY plane (x right, y up); z is depth
/// along the anchor's direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec3Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
    /// Z coordinate.
    #[serde(with = "fixed_serde")]
    pub z: Fixed,
}

impl Vec3Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self { x, y, z }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
        z: Fixed::ZERO,
    };

    /// World X axis.
    pub const X: Self = Self {
        x: Fixed::ONE,
        y: Fixed::ZERO,
        z: Fixed::ZERO,
    };

    /// World Y axis (vertical).
    pub const Y: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ONE,
        z: Fixed::ZERO,
    };

    /// World Z axis.
    pub const Z: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
        z: Fixed::ONE,
    };

    /// Create a vector from integer components.
    #[must_use]
    pub fn from_ints(x: i32, y: i32, z: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y), Fixed::from_num(z))
    }

    /// Dot product of two vectors. Saturates instead of overflowing.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x
            .saturating_mul(other.x)
            .saturating_add(self.y.saturating_mul(other.y))
            .saturating_add(self.z.saturating_mul(other.z))
    }

    /// Cross product (`Y x Z = X`).
    #[must_use]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Squared length (avoids sqrt for comparisons).
    ///
    /// Saturates at `Fixed::MAX` for lengths beyond roughly 46 000.
    #[must_use]
    pub fn length_squared(self) -> Fixed {
        self.dot(self)
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> Fixed {
        let largest = self.max_abs();
        if largest <= SAFE_COMPONENT {
            return fixed_sqrt(self.length_squared());
        }
        // Scale into [-1, 1] first so the squares stay in range.
        let unit = self.div_scalar(largest);
        largest.saturating_mul(fixed_sqrt(unit.length_squared()))
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    ///
    /// Saturates like [`length_squared`](Self::length_squared).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        (self - other).length_squared()
    }

    /// Straight-line distance between two points.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        (self - other).length()
    }

    /// Largest absolute component.
    #[must_use]
    pub fn max_abs(self) -> Fixed {
        self.x
            .saturating_abs()
            .max(self.y.saturating_abs())
            .max(self.z.saturating_abs())
    }

    /// Multiply every component by a scalar.
    #[must_use]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Divide every component by a scalar. Division by zero yields zero.
    #[must_use]
    pub fn div_scalar(self, divisor: Fixed) -> Self {
        if divisor == Fixed::ZERO {
            return Self::ZERO;
        }
        Self::new(self.x / divisor, self.y / divisor, self.z / divisor)
    }

    /// Linearly interpolate between two vectors.
    #[must_use]
    pub fn lerp(self, other: Self, t: Fixed) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let largest = self.max_abs();
        let scaled = if largest > SAFE_COMPONENT {
            self.div_scalar(largest)
        } else {
            self
        };
        let len = fixed_sqrt(scaled.length_squared());
        if len == Fixed::ZERO {
            return Self::ZERO;
        }
        scaled.div_scalar(len)
    }

    /// Check whether every component is zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

impl std::ops::Add for Vec3Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl std::ops::Sub for Vec3Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl std::ops::Neg for Vec3Fixed {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

impl std::ops::AddAssign for Vec3Fixed {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Computes the square root of a fixed-point number using binary search.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    // Upper bound strictly above the root so exact roots (including 1) are reachable.
    let mut low = Fixed::ZERO;
    let mut high = value.saturating_add(Fixed::ONE);

    for _ in 0..48 {
        let mid = low + (high - low) / 2;
        let fits = mid.checked_mul(mid).is_some_and(|sq| sq <= value);

        if fits {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

/// Wrap an angle in radians into `[-PI, PI)`.
#[must_use]
pub fn wrap_angle(angle: Fixed) -> Fixed {
    let mut wrapped = angle % Fixed::TAU;
    if wrapped >= Fixed::PI {
        wrapped -= Fixed::TAU;
    } else if wrapped < -Fixed::PI {
        wrapped += Fixed::TAU;
    }
    wrapped
}

/// Sine of an angle in radians, evaluated with a Taylor series.
///
/// The argument is reduced to `[-PI/2, PI/2]` first, where eight terms
/// keep the error below 1e-9.
#[must_use]
pub fn fixed_sin(angle: Fixed) -> Fixed {
    let mut x = wrap_angle(angle);
    if x > Fixed::FRAC_PI_2 {
        x = Fixed::PI - x;
    } else if x < -Fixed::FRAC_PI_2 {
        x = -Fixed::PI - x;
    }

    let x2 = x * x;
    let mut term = x;
    let mut sum = x;
    for n in 1..8 {
        let denom = Fixed::from_num((2 * n) * (2 * n + 1));
        term = -(term * x2) / denom;
        sum += term;
    }
    sum
}

/// Cosine of an angle in radians.
#[must_use]
pub fn fixed_cos(angle: Fixed) -> Fixed {
    fixed_sin(angle + Fixed::FRAC_PI_2)
}

/// Interpolation curve applied to normalized approach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ApproachCurve {
    /// `1 - (1 - t)^3`: fast start, gentle settle.
    #[default]
    EaseOutCubic,
    /// Constant speed.
    Linear,
    /// `t^2 (3 - 2t)`: gentle start and settle.
    SmoothStep,
}

impl ApproachCurve {
    /// Map normalized time `t` (clamped to `[0, 1]`) through the curve.
    #[must_use]
    pub fn apply(self, t: Fixed) -> Fixed {
        let t = t.clamp(Fixed::ZERO, Fixed::ONE);
        match self {
            Self::EaseOutCubic => {
                let inv = Fixed::ONE - t;
                Fixed::ONE - inv * inv * inv
            }
            Self::Linear => t,
            Self::SmoothStep => t * t * (Fixed::from_num(3) - Fixed::from_num(2) * t),
        }
    }
}

/// Simple deterministic RNG for per-unit jitter.
///
/// Linear congruential generator; one stream per unit keeps results
/// independent of the order in which units draw numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a generator from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0x9E37_79B9_7F4A_7C15),
        }
    }

    /// Create a generator for one stream derived from a base seed.
    #[must_use]
    pub fn for_stream(seed: u64, stream: u64) -> Self {
        Self::new(seed ^ stream.wrapping_mul(0xBF58_476D_1CE4_E5B9))
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }

    /// Uniform value in `[0, 1)`.
    pub fn next_unit(&mut self) -> Fixed {
        // High 32 bits of the state become the fractional part.
        Fixed::from_bits((self.next_u64() >> 32) as i64)
    }

    /// Uniform value in `[min, max)`. Returns `min` for empty ranges.
    pub fn next_range(&mut self, min: Fixed, max: Fixed) -> Fixed {
        if max <= min {
            return min;
        }
        min + (max - min) * self.next_unit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Fixed, b: Fixed, epsilon: Fixed) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_vec3_distance_squared() {
        let a = Vec3Fixed::from_ints(3, 0, 0);
        let b = Vec3Fixed::from_ints(0, 4, 0);
        // 3² + 4² = 25
        assert_eq!(a.distance_squared(b), Fixed::from_num(25));
    }

    #[test]
    fn test_fixed_determinism() {
        let a = Fixed::from_num(1) / Fixed::from_num(3);
        let b = Fixed::from_num(1) / Fixed::from_num(3);
        assert_eq!(a, b);
        assert_eq!(a * Fixed::from_num(7), b * Fixed::from_num(7));
    }

    #[test]
    fn test_fixed_sqrt() {
        let epsilon = Fixed::ONE / Fixed::from_num(100_000);
        assert!(approx(fixed_sqrt(Fixed::from_num(25)), Fixed::from_num(5), epsilon));
        assert!(approx(fixed_sqrt(Fixed::from_num(2)), Fixed::from_num(1.414_213_56), epsilon));
        assert!(approx(fixed_sqrt(Fixed::from_num(0.25)), Fixed::from_num(0.5), epsilon));
        assert_eq!(fixed_sqrt(Fixed::from_num(-4)), Fixed::ZERO);
        assert_eq!(fixed_sqrt(Fixed::ONE), Fixed::ONE);
        assert_eq!(fixed_sqrt(Fixed::from_num(100)), Fixed::from_num(10));
    }

    #[test]
    fn test_fixed_sqrt_near_range_limit() {
        let root = fixed_sqrt(Fixed::MAX);
        assert!(root > Fixed::from_num(46_340) && root < Fixed::from_num(46_341));
    }

    #[test]
    fn test_large_vectors_saturate_instead_of_overflowing() {
        let far = Vec3Fixed::from_ints(50_000, 0, 0);
        assert_eq!(far.length_squared(), Fixed::MAX);
        assert_eq!(far.distance_squared(Vec3Fixed::ZERO), Fixed::MAX);
        assert_eq!(far.dot(-far), Fixed::MIN);

        let epsilon = Fixed::ONE / Fixed::from_num(100);
        assert!(approx(far.length(), Fixed::from_num(50_000), epsilon));
        assert!(approx(
            Vec3Fixed::from_ints(30_000, 40_000, 0).distance(Vec3Fixed::ZERO),
            Fixed::from_num(50_000),
            epsilon
        ));
    }

    #[test]
    fn test_normalize_large_vector() {
        let epsilon = Fixed::ONE / Fixed::from_num(10_000);
        let norm = Vec3Fixed::from_ints(300_000, -400_000, 0).normalize();
        assert!(approx(norm.x, Fixed::from_num(0.6), epsilon));
        assert!(approx(norm.y, Fixed::from_num(-0.8), epsilon));
        assert_eq!(norm.z, Fixed::ZERO);
    }

    #[test]
    fn test_option_fixed_serde_keeps_bits() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Holder {
            #[serde(with = "option_fixed_serde")]
            value: Option<Fixed>,
        }

        for value in [None, Some(Fixed::from_bits(85_899_345)), Some(-Fixed::PI)] {
            let holder = Holder { value };
            let json = serde_json::to_string(&holder).unwrap();
            assert_eq!(serde_json::from_str::<Holder>(&json).unwrap(), holder);
        }
        let json = serde_json::to_string(&Holder { value: Some(Fixed::ONE) }).unwrap();
        assert_eq!(json, format!("{{\"value\":{}}}", Fixed::ONE.to_bits()));
    }

    #[test]
    fn test_vec3_lerp() {
        let a = Vec3Fixed::ZERO;
        let b = Vec3Fixed::from_ints(10, 20, -4);
        let mid = a.lerp(b, Fixed::from_num(0.5));
        assert_eq!(mid, Vec3Fixed::from_ints(5, 10, -2));
    }

    #[test]
    fn test_vec3_normalize() {
        let v = Vec3Fixed::from_ints(3, 4, 0);
        let norm = v.normalize();
        let epsilon = Fixed::ONE / Fixed::from_num(10_000);
        assert!(approx(norm.length_squared(), Fixed::ONE, epsilon));
        assert!(approx(norm.x * Fixed::from_num(4), norm.y * Fixed::from_num(3), epsilon));
        assert_eq!(Vec3Fixed::ZERO.normalize(), Vec3Fixed::ZERO);
    }

    #[test]
    fn test_sin_cos_reference_points() {
        let epsilon = Fixed::ONE / Fixed::from_num(1_000_000);
        assert!(approx(fixed_sin(Fixed::ZERO), Fixed::ZERO, epsilon));
        assert!(approx(fixed_sin(Fixed::FRAC_PI_2), Fixed::ONE, epsilon));
        assert!(approx(fixed_sin(Fixed::PI), Fixed::ZERO, epsilon));
        assert!(approx(fixed_sin(-Fixed::FRAC_PI_2), -Fixed::ONE, epsilon));
        assert!(approx(fixed_cos(Fixed::ZERO), Fixed::ONE, epsilon));
        assert!(approx(fixed_cos(Fixed::PI), -Fixed::ONE, epsilon));
        // Beyond one turn
        assert!(approx(
            fixed_sin(Fixed::TAU + Fixed::FRAC_PI_2),
            Fixed::ONE,
            epsilon
        ));
    }

    #[test]
    fn test_wrap_angle_range() {
        for raw in [-20, -7, -3, 0, 3, 4, 7, 20] {
            let wrapped = wrap_angle(Fixed::from_num(raw));
            assert!(wrapped >= -Fixed::PI && wrapped < Fixed::PI, "{raw} -> {wrapped}");
        }
    }

    #[test]
    fn test_ease_out_cubic_endpoints() {
        let curve = ApproachCurve::EaseOutCubic;
        assert_eq!(curve.apply(Fixed::ZERO), Fixed::ZERO);
        assert_eq!(curve.apply(Fixed::ONE), Fixed::ONE);
        // 1 - 0.5^3 = 0.875
        assert_eq!(curve.apply(Fixed::from_num(0.5)), Fixed::from_num(0.875));
        // Clamped outside [0, 1]
        assert_eq!(curve.apply(Fixed::from_num(3)), Fixed::ONE);
    }

    #[test]
    fn test_rng_is_seeded_and_bounded() {
        let mut a = SimRng::for_stream(42, 7);
        let mut b = SimRng::for_stream(42, 7);
        let mut c = SimRng::for_stream(42, 8);

        let seq_a: Vec<Fixed> = (0..16).map(|_| a.next_unit()).collect();
        let seq_b: Vec<Fixed> = (0..16).map(|_| b.next_unit()).collect();
        let seq_c: Vec<Fixed> = (0..16).map(|_| c.next_unit()).collect();

        assert_eq!(seq_a, seq_b);
        assert_ne!(seq_a, seq_c);
        assert!(seq_a.iter().all(|v| *v >= Fixed::ZERO && *v < Fixed::ONE));

        let ranged = a.next_range(Fixed::from_num(2), Fixed::from_num(3));
        assert!(ranged >= Fixed::from_num(2) && ranged < Fixed::from_num(3));
        assert_eq!(a.next_range(Fixed::ONE, Fixed::ONE), Fixed::ONE);
    }
}
