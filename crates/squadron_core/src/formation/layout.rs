//! Procedural slot layouts.
//!
//! Offsets lie in the XY plane around the formation center (x right,
//! y up). Generation is a pure function of [`LayoutKind`] and
//! [`LayoutParams`]; boundary fitting is applied afterwards by
//! [`fit_to_bounds`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, SquadronError};
use crate::math::{decimal_serde, fixed_cos, fixed_sin, Fixed, Vec2Fixed, Vec3Fixed};

/// Upper bound on slots in a single layout.
pub const MAX_SLOTS: u32 = 4096;

/// Available formation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LayoutKind {
    /// Apex slot with alternating wings trailing behind it.
    #[default]
    VShape,
    /// Smallest square lattice that holds `slot_count` slots.
    Square,
    /// Rows growing by one slot each.
    Triangle,
    /// `slot_count` slots evenly spaced on a circle of `radius`.
    Circle,
    /// `columns` x `rows` rectangular lattice.
    Grid,
}

/// Shape parameters. Each kind reads the subset it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutParams {
    /// Number of slots (all kinds except `Grid`).
    pub slot_count: u32,
    /// Distance between neighbouring lattice points.
    #[serde(with = "decimal_serde")]
    pub spacing: Fixed,
    /// Grid columns.
    pub columns: u32,
    /// Grid rows.
    pub rows: u32,
    /// Circle radius.
    #[serde(with = "decimal_serde")]
    pub radius: Fixed,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            slot_count: 5,
            spacing: Fixed::from_num(2),
            columns: 4,
            rows: 3,
            radius: Fixed::from_num(5),
        }
    }
}

impl LayoutParams {
    /// Number of slots `kind` produces with these parameters.
    #[must_use]
    pub fn slot_count_for(&self, kind: LayoutKind) -> u32 {
        match kind {
            LayoutKind::Grid => self.columns.saturating_mul(self.rows),
            _ => self.slot_count,
        }
    }

    /// Check that `kind` can be generated from these parameters.
    pub fn validate(&self, kind: LayoutKind) -> Result<()> {
        let count = self.slot_count_for(kind);
        if count == 0 {
            return Err(SquadronError::InvalidLayout(format!(
                "{kind:?} needs at least one slot"
            )));
        }
        if count > MAX_SLOTS {
            return Err(SquadronError::InvalidLayout(format!(
                "{kind:?} would produce {count} slots (max {MAX_SLOTS})"
            )));
        }
        match kind {
            LayoutKind::Circle if self.radius <= Fixed::ZERO => Err(SquadronError::InvalidLayout(
                "circle radius must be positive".to_string(),
            )),
            LayoutKind::Circle => Ok(()),
            _ if self.spacing <= Fixed::ZERO => Err(SquadronError::InvalidLayout(
                "spacing must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Compute unscaled slot offsets for a layout.
///
/// # Errors
///
/// Returns [`SquadronError::InvalidLayout`] if the parameters fail
/// [`LayoutParams::validate`].
pub fn generate_offsets(kind: LayoutKind, params: &LayoutParams) -> Result<Vec<Vec3Fixed>> {
    params.validate(kind)?;
    let offsets = match kind {
        LayoutKind::VShape => center_on_bounds(v_shape(params.slot_count, params.spacing)),
        LayoutKind::Square => {
            let side = square_side(params.slot_count);
            lattice(side, side, params.spacing)
                .into_iter()
                .take(params.slot_count as usize)
                .collect()
        }
        LayoutKind::Triangle => center_on_bounds(triangle(params.slot_count, params.spacing)),
        LayoutKind::Circle => circle(params.slot_count, params.radius),
        LayoutKind::Grid => lattice(params.columns, params.rows, params.spacing),
    };
    Ok(offsets)
}

fn v_shape(count: u32, spacing: Fixed) -> Vec<Vec3Fixed> {
    (0..count)
        .map(|i| {
            if i == 0 {
                return Vec3Fixed::ZERO;
            }
            let row = Fixed::from_num((i + 1) / 2);
            let side = if i % 2 == 1 { -Fixed::ONE } else { Fixed::ONE };
            Vec3Fixed::new(side * row * spacing, -row * spacing, Fixed::ZERO)
        })
        .collect()
}

fn square_side(count: u32) -> u32 {
    let mut side = 1;
    while side * side < count {
        side += 1;
    }
    side
}

/// Row-major lattice centered on the origin, first row on top.
fn lattice(columns: u32, rows: u32, spacing: Fixed) -> Vec<Vec3Fixed> {
    let half_width = Fixed::from_num(columns - 1) / 2;
    let half_height = Fixed::from_num(rows - 1) / 2;
    let mut offsets = Vec::with_capacity((columns * rows) as usize);
    for row in 0..rows {
        for col in 0..columns {
            offsets.push(Vec3Fixed::new(
                (Fixed::from_num(col) - half_width) * spacing,
                (half_height - Fixed::from_num(row)) * spacing,
                Fixed::ZERO,
            ));
        }
    }
    offsets
}

fn triangle(count: u32, spacing: Fixed) -> Vec<Vec3Fixed> {
    let mut offsets = Vec::with_capacity(count as usize);
    let mut row = 0u32;
    while (offsets.len() as u32) < count {
        let half = Fixed::from_num(row) / 2;
        for k in 0..=row {
            if offsets.len() as u32 == count {
                break;
            }
            offsets.push(Vec3Fixed::new(
                (Fixed::from_num(k) - half) * spacing,
                -Fixed::from_num(row) * spacing,
                Fixed::ZERO,
            ));
        }
        row += 1;
    }
    offsets
}

/// First slot at the top of the circle, then counter-clockwise.
fn circle(count: u32, radius: Fixed) -> Vec<Vec3Fixed> {
    let step = Fixed::TAU / Fixed::from_num(count);
    (0..count)
        .map(|i| {
            let angle = step * Fixed::from_num(i) + Fixed::FRAC_PI_2;
            Vec3Fixed::new(
                radius * fixed_cos(angle),
                radius * fixed_sin(angle),
                Fixed::ZERO,
            )
        })
        .collect()
}

/// Shift offsets so their bounding box is centered on the origin.
fn center_on_bounds(offsets: Vec<Vec3Fixed>) -> Vec<Vec3Fixed> {
    let Some((min, max)) = bounding_box(&offsets) else {
        return offsets;
    };
    let mid = min.lerp(max, Fixed::from_num(0.5));
    let shift = Vec3Fixed::new(mid.x, mid.y, Fixed::ZERO);
    offsets.into_iter().map(|o| o - shift).collect()
}

/// Axis-aligned bounds of a set of offsets as `(min, max)`.
#[must_use]
pub fn bounding_box(offsets: &[Vec3Fixed]) -> Option<(Vec3Fixed, Vec3Fixed)> {
    let first = *offsets.first()?;
    Some(offsets.iter().skip(1).fold((first, first), |(min, max), o| {
        (
            Vec3Fixed::new(min.x.min(o.x), min.y.min(o.y), min.z.min(o.z)),
            Vec3Fixed::new(max.x.max(o.x), max.y.max(o.y), max.z.max(o.z)),
        )
    }))
}

/// Uniform scale needed to fit `offsets` inside `half_extents`.
///
/// Returns `None` when the offsets already fit. Otherwise the result is
/// the smaller of the per-axis factors multiplied by `margin`. A
/// non-positive extent leaves that axis unconstrained.
#[must_use]
pub fn fit_to_bounds(offsets: &[Vec3Fixed], half_extents: Vec2Fixed, margin: Fixed) -> Option<Fixed> {
    let (max_x, max_y) = offsets.iter().fold((Fixed::ZERO, Fixed::ZERO), |(x, y), o| {
        (x.max(o.x.abs()), y.max(o.y.abs()))
    });

    let required = |extent: Fixed, reach: Fixed| {
        (extent > Fixed::ZERO && reach > extent).then(|| extent / reach)
    };

    let factor = match (required(half_extents.x, max_x), required(half_extents.y, max_y)) {
        (None, None) => return None,
        (Some(a), None) | (None, Some(a)) => a,
        (Some(a), Some(b)) => a.min(b),
    };
    Some(factor * margin)
}
