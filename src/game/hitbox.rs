//! Logical hitbox geometry
//!
//! Definitions carry a [`HitboxTemplate`] in local coordinates (origin at the
//! obstacle's anchor, scale 1, no rotation). Placing an obstacle transforms the
//! template into a world-space [`Hitbox`]: rotate first, then scale, both about
//! the anchor. Later rescales reuse the same order with zero extra rotation, so
//! the hitbox and the physics body shape derived from it never disagree.

use std::f32::consts::{FRAC_PI_2, PI};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::util::vec2::Vec2;

/// How an obstacle definition may be rotated, and how that rotation is sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Never rotated, nothing on the wire
    #[default]
    None,
    /// Two orientations (0 or 90 degrees), one bit
    Binary,
    /// Four quarter turns, two bits
    Limited,
    /// Any angle in [-PI, PI]
    Full,
}

/// A concrete rotation, always consistent with some [`RotationMode`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Rotation {
    #[default]
    None,
    /// Quarter turns counter-clockwise
    Orientation(u8),
    /// Radians in [-PI, PI]
    Angle(f32),
}

/// Wrap an angle into [-PI, PI]
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    wrapped.clamp(-PI, PI)
}

impl Rotation {
    /// Build a full-mode rotation, wrapping the angle into range
    pub fn angle(radians: f32) -> Self {
        Rotation::Angle(normalize_angle(radians))
    }

    /// Rotation in radians
    pub fn radians(&self) -> f32 {
        match *self {
            Rotation::None => 0.0,
            Rotation::Orientation(o) => o as f32 * FRAC_PI_2,
            Rotation::Angle(a) => a,
        }
    }

    /// Quarter turns for rectangle placement (0 for continuous or no rotation)
    pub fn quarter_turns(&self) -> u8 {
        match *self {
            Rotation::Orientation(o) => o % 4,
            _ => 0,
        }
    }

    /// Whether this rotation can be expressed under `mode`
    pub fn fits(&self, mode: RotationMode) -> bool {
        match (*self, mode) {
            (Rotation::None, RotationMode::None) => true,
            (Rotation::Orientation(o), RotationMode::Binary) => o < 2,
            (Rotation::Orientation(o), RotationMode::Limited) => o < 4,
            (Rotation::Angle(a), RotationMode::Full) => a.is_finite() && (-PI..=PI).contains(&a),
            _ => false,
        }
    }

    /// Draw a uniformly random rotation for `mode`
    pub fn random<R: Rng + ?Sized>(mode: RotationMode, rng: &mut R) -> Self {
        match mode {
            RotationMode::None => Rotation::None,
            RotationMode::Binary => Rotation::Orientation(rng.gen_range(0..2)),
            RotationMode::Limited => Rotation::Orientation(rng.gen_range(0..4)),
            RotationMode::Full => Rotation::Angle(rng.gen_range(-PI..PI)),
        }
    }
}

/// Hitbox shape in local definition space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HitboxTemplate {
    Circle {
        radius: f32,
        #[serde(default)]
        center: Vec2,
    },
    Rectangle { min: Vec2, max: Vec2 },
}

impl HitboxTemplate {
    pub fn is_rectangle(&self) -> bool {
        matches!(self, HitboxTemplate::Rectangle { .. })
    }

    /// Local extents are positive and well-formed
    pub fn is_valid(&self) -> bool {
        match *self {
            HitboxTemplate::Circle { radius, center } => {
                radius.is_finite() && radius > 0.0 && center.is_finite()
            }
            HitboxTemplate::Rectangle { min, max } => {
                min.is_finite() && max.is_finite() && min.x < max.x && min.y < max.y
            }
        }
    }

    /// Place the template in the world: rotate, then scale, about `position`
    pub fn transform(&self, position: Vec2, scale: f32, rotation: Rotation) -> Hitbox {
        match *self {
            HitboxTemplate::Circle { radius, center } => Hitbox::Circle {
                center: position + center.rotate(rotation.radians()) * scale,
                radius: radius * scale,
            },
            HitboxTemplate::Rectangle { min, max } => {
                let turns = rotation.quarter_turns();
                let a = min.rotate_quarter(turns) * scale;
                let b = max.rotate_quarter(turns) * scale;
                Hitbox::Rectangle {
                    min: position + a.min(b),
                    max: position + a.max(b),
                }
            }
        }
    }
}

/// World-space hitbox
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hitbox {
    Circle { center: Vec2, radius: f32 },
    Rectangle { min: Vec2, max: Vec2 },
}

impl Hitbox {
    /// Re-apply the placement transform to an already placed hitbox:
    /// rotate by `rotation` then scale by `factor`, both about `anchor`.
    ///
    /// Rescaling after damage passes `Rotation::None`.
    pub fn transform(&self, anchor: Vec2, factor: f32, rotation: Rotation) -> Hitbox {
        match *self {
            Hitbox::Circle { center, radius } => {
                let offset = (center - anchor).rotate(rotation.radians());
                Hitbox::Circle {
                    center: anchor + offset * factor,
                    radius: radius * factor,
                }
            }
            Hitbox::Rectangle { min, max } => {
                let turns = rotation.quarter_turns();
                let a = (min - anchor).rotate_quarter(turns) * factor;
                let b = (max - anchor).rotate_quarter(turns) * factor;
                Hitbox::Rectangle {
                    min: anchor + a.min(b),
                    max: anchor + a.max(b),
                }
            }
        }
    }

    /// Translate the hitbox so that `from` lands on `to`
    pub fn translate(&self, from: Vec2, to: Vec2) -> Hitbox {
        let delta = to - from;
        match *self {
            Hitbox::Circle { center, radius } => Hitbox::Circle {
                center: center + delta,
                radius,
            },
            Hitbox::Rectangle { min, max } => Hitbox::Rectangle {
                min: min + delta,
                max: max + delta,
            },
        }
    }

    /// Axis-aligned bounds as (min, max)
    pub fn bounds(&self) -> (Vec2, Vec2) {
        match *self {
            Hitbox::Circle { center, radius } => (
                center - Vec2::new(radius, radius),
                center + Vec2::new(radius, radius),
            ),
            Hitbox::Rectangle { min, max } => (min, max),
        }
    }

    /// Squared distance from `point` to the hitbox, zero inside it
    pub fn distance_sq_to(&self, point: Vec2) -> f32 {
        match *self {
            Hitbox::Circle { center, radius } => {
                let gap = ((point - center).length() - radius).max(0.0);
                gap * gap
            }
            Hitbox::Rectangle { .. } => {
                let (min, max) = self.bounds();
                (point - point.max(min).min(max)).length_sq()
            }
        }
    }

    /// Same shape kind with extents within `epsilon`
    pub fn approx_eq(&self, other: &Hitbox, epsilon: f32) -> bool {
        match (self, other) {
            (
                Hitbox::Circle { center, radius },
                Hitbox::Circle {
                    center: c2,
                    radius: r2,
                },
            ) => center.approx_eq(*c2, epsilon) && (radius - r2).abs() < epsilon,
            (Hitbox::Rectangle { min, max }, Hitbox::Rectangle { min: m2, max: x2 }) => {
                min.approx_eq(*m2, epsilon) && max.approx_eq(*x2, epsilon)
            }
            _ => false,
        }
    }
}
