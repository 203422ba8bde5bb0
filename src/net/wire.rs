//! Typed field encoders on top of the bit stream
//!
//! Every field's width is fixed by [`WireConfig`] (world extent, scale range,
//! bit counts) or by the obstacle definition (rotation mode, variation count).
//! Peers must agree on all of it; [`WireConfig::bit_widths`] and
//! [`WireConfig::fingerprint`] let a caller check that before exchanging data.

use std::f32::consts::PI;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::game::constants::wire;
use crate::game::hitbox::{Rotation, RotationMode};
use crate::net::bitstream::{float_tolerance, BitReader, BitWriter, CodecError};
use crate::util::vec2::Vec2;

/// Bit widths of every field in the obstacle wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitWidths {
    /// Per coordinate
    pub position: u8,
    /// Continuous (full-mode) rotation
    pub rotation_full: u8,
    pub rotation_limited: u8,
    pub rotation_binary: u8,
    pub scale: u8,
    pub dead: u8,
    pub object_id: u8,
    pub definition_id: u8,
    pub record_count: u8,
}

/// Wire layout shared by server and clients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireConfig {
    /// Positions are encoded over [0, world_extent] on both axes
    pub world_extent: f32,
    pub position_bits: u8,
    pub rotation_bits: u8,
    pub scale_bits: u8,
    pub scale_min: f32,
    pub scale_max: f32,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            world_extent: wire::WORLD_EXTENT,
            position_bits: wire::POSITION_BITS,
            rotation_bits: wire::ROTATION_BITS,
            scale_bits: wire::SCALE_BITS,
            scale_min: wire::MIN_OBJECT_SCALE,
            scale_max: wire::MAX_OBJECT_SCALE,
        }
    }
}

impl WireConfig {
    /// Validate ranges and widths
    pub fn validate(&self) -> Result<(), String> {
        if !(self.world_extent.is_finite() && self.world_extent > 0.0) {
            return Err("world_extent must be a positive number".to_string());
        }
        for (name, bits) in [
            ("position_bits", self.position_bits),
            ("rotation_bits", self.rotation_bits),
            ("scale_bits", self.scale_bits),
        ] {
            if bits == 0 || bits > 32 {
                return Err(format!("{} must be 1-32, got {}", name, bits));
            }
        }
        if !(self.scale_min.is_finite() && self.scale_max.is_finite()) {
            return Err("scale range must be finite".to_string());
        }
        if self.scale_min <= 0.0 || self.scale_min >= self.scale_max {
            return Err(format!(
                "scale range [{}, {}] must satisfy 0 < min < max",
                self.scale_min, self.scale_max
            ));
        }
        Ok(())
    }

    pub fn bit_widths(&self) -> BitWidths {
        BitWidths {
            position: self.position_bits,
            rotation_full: self.rotation_bits,
            rotation_limited: 2,
            rotation_binary: 1,
            scale: self.scale_bits,
            dead: 1,
            object_id: wire::OBJECT_ID_BITS,
            definition_id: wire::DEFINITION_ID_BITS,
            record_count: wire::RECORD_COUNT_BITS,
        }
    }

    /// Hash of every layout-relevant value, for a cheap compatibility handshake
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.bit_widths().hash(&mut hasher);
        self.world_extent.to_bits().hash(&mut hasher);
        self.scale_min.to_bits().hash(&mut hasher);
        self.scale_max.to_bits().hash(&mut hasher);
        hasher.finish()
    }

    /// Bits used by a rotation under `mode`
    pub fn rotation_bits_for(&self, mode: RotationMode) -> u8 {
        match mode {
            RotationMode::None => 0,
            RotationMode::Binary => 1,
            RotationMode::Limited => 2,
            RotationMode::Full => self.rotation_bits,
        }
    }

    pub fn position_tolerance(&self) -> f32 {
        float_tolerance(0.0, self.world_extent, self.position_bits)
    }

    pub fn rotation_tolerance(&self) -> f32 {
        float_tolerance(-PI, PI, self.rotation_bits)
    }

    pub fn scale_tolerance(&self) -> f32 {
        float_tolerance(self.scale_min, self.scale_max, self.scale_bits)
    }

    pub fn contains_position(&self, position: Vec2) -> bool {
        let range = 0.0..=self.world_extent;
        range.contains(&position.x) && range.contains(&position.y)
    }

    pub fn contains_scale(&self, scale: f32) -> bool {
        (self.scale_min..=self.scale_max).contains(&scale)
    }
}

/// Bits needed to address `count` variations (0 when there is nothing to choose)
pub fn variation_bits(count: u8) -> u8 {
    if count <= 1 {
        0
    } else {
        (u8::BITS - (count - 1).leading_zeros()) as u8
    }
}

impl BitWriter<'_> {
    pub fn write_position(&mut self, config: &WireConfig, position: Vec2) -> Result<(), CodecError> {
        // Both coordinates are checked before either is written
        if !config.contains_position(position) {
            let value = if (0.0..=config.world_extent).contains(&position.x) {
                position.y
            } else {
                position.x
            };
            return Err(CodecError::OutOfRange {
                field: "position",
                value,
                min: 0.0,
                max: config.world_extent,
            });
        }
        let (extent, bits) = (config.world_extent, config.position_bits);
        self.write_float("position", position.x, 0.0, extent, bits)?;
        self.write_float("position", position.y, 0.0, extent, bits)
    }

    pub fn write_rotation(
        &mut self,
        config: &WireConfig,
        mode: RotationMode,
        rotation: Rotation,
    ) -> Result<(), CodecError> {
        match (mode, rotation) {
            (RotationMode::None, Rotation::None) => Ok(()),
            (RotationMode::Binary, Rotation::Orientation(o)) if o < 2 => self.write_bits(o as u32, 1),
            (RotationMode::Limited, Rotation::Orientation(o)) if o < 4 => self.write_bits(o as u32, 2),
            (RotationMode::Full, Rotation::Angle(a)) => {
                self.write_float("rotation", a, -PI, PI, config.rotation_bits)
            }
            (_, rotation) => Err(CodecError::OutOfRange {
                field: "rotation",
                value: rotation.radians(),
                min: -PI,
                max: PI,
            }),
        }
    }

    pub fn write_scale(&mut self, config: &WireConfig, scale: f32) -> Result<(), CodecError> {
        self.write_float(
            "scale",
            scale,
            config.scale_min,
            config.scale_max,
            config.scale_bits,
        )
    }

    /// Write a variation index for a definition with `count` variations
    pub fn write_variation(&mut self, variation: u8, count: u8) -> Result<(), CodecError> {
        if variation >= count.max(1) {
            return Err(CodecError::InvalidValue {
                field: "variation",
                value: variation as u32,
            });
        }
        match variation_bits(count) {
            0 => Ok(()),
            bits => self.write_bits(variation as u32, bits),
        }
    }
}

impl BitReader<'_> {
    pub fn read_position(&mut self, config: &WireConfig) -> Result<Vec2, CodecError> {
        let (extent, bits) = (config.world_extent, config.position_bits);
        let x = self.read_float(0.0, extent, bits)?;
        let y = self.read_float(0.0, extent, bits)?;
        Ok(Vec2::new(x, y))
    }

    pub fn read_rotation(
        &mut self,
        config: &WireConfig,
        mode: RotationMode,
    ) -> Result<Rotation, CodecError> {
        Ok(match mode {
            RotationMode::None => Rotation::None,
            RotationMode::Binary => Rotation::Orientation(self.read_bits(1)? as u8),
            RotationMode::Limited => Rotation::Orientation(self.read_bits(2)? as u8),
            RotationMode::Full => Rotation::Angle(self.read_float(-PI, PI, config.rotation_bits)?),
        })
    }

    pub fn read_scale(&mut self, config: &WireConfig) -> Result<f32, CodecError> {
        self.read_float(config.scale_min, config.scale_max, config.scale_bits)
    }

    /// Read a variation index, rejecting values past `count`
    pub fn read_variation(&mut self, count: u8) -> Result<u8, CodecError> {
        let value = match variation_bits(count) {
            0 => 0,
            bits => self.read_bits(bits)?,
        };
        if value >= count.max(1) as u32 {
            return Err(CodecError::InvalidValue {
                field: "variation",
                value,
            });
        }
        Ok(value as u8)
    }
}
