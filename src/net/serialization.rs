//! Partial and full obstacle records
//!
//! Partial records carry what damage changes (scale, dead flag) and are sent
//! whenever an obstacle is dirty. Full records carry what never changes after
//! spawn (definition, position, rotation, variation) and are sent once per
//! observer, always together with a partial.
//!
//! Each record is written all-or-nothing: a record that does not fit is rolled
//! back so the writer is left exactly where the record began.

use serde::{Deserialize, Serialize};

use crate::game::constants::wire::DEFINITION_ID_BITS;
use crate::game::definitions::{Definitions, ObstacleDefId, ObstacleDefinition};
use crate::game::hitbox::Rotation;
use crate::game::obstacle::Obstacle;
use crate::net::bitstream::{BitReader, BitWriter, CodecError};
use crate::net::wire::{variation_bits, WireConfig};
use crate::util::vec2::Vec2;

/// Fields that change with damage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialState {
    pub scale: f32,
    pub dead: bool,
}

/// Fields fixed at spawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FullState {
    pub definition: ObstacleDefId,
    pub position: Vec2,
    pub rotation: Rotation,
    pub variation: Option<u8>,
}

/// Bits written by one partial record
pub fn required_partial_bits(wire: &WireConfig) -> usize {
    wire.scale_bits as usize + 1
}

/// Bits written by one full record of an obstacle using `definition`
pub fn required_full_bits(wire: &WireConfig, definition: &ObstacleDefinition) -> usize {
    let variation = definition.variations.map_or(0, variation_bits);
    DEFINITION_ID_BITS as usize
        + 2 * wire.position_bits as usize
        + wire.rotation_bits_for(definition.rotation_mode) as usize
        + variation as usize
}

/// Run `write`, rolling the writer back if it fails
pub(crate) fn all_or_nothing<'a, F>(writer: &mut BitWriter<'a>, write: F) -> Result<(), CodecError>
where
    F: FnOnce(&mut BitWriter<'a>) -> Result<(), CodecError>,
{
    let checkpoint = writer.checkpoint();
    let result = write(writer);
    if result.is_err() {
        writer.rollback(checkpoint);
    }
    result
}

impl PartialState {
    pub fn encode(&self, writer: &mut BitWriter, wire: &WireConfig) -> Result<(), CodecError> {
        all_or_nothing(writer, |w| {
            w.write_scale(wire, self.scale)?;
            w.write_bool(self.dead)
        })
    }

    pub fn decode(reader: &mut BitReader, wire: &WireConfig) -> Result<Self, CodecError> {
        let scale = reader.read_scale(wire)?;
        let dead = reader.read_bool()?;
        Ok(Self { scale, dead })
    }
}

impl FullState {
    pub fn encode(
        &self,
        writer: &mut BitWriter,
        wire: &WireConfig,
        definition: &ObstacleDefinition,
    ) -> Result<(), CodecError> {
        all_or_nothing(writer, |w| {
            w.write_bits(self.definition.0 as u32, DEFINITION_ID_BITS)?;
            w.write_position(wire, self.position)?;
            w.write_rotation(wire, definition.rotation_mode, self.rotation)?;
            if let Some(count) = definition.variations {
                let variation = self.variation.ok_or(CodecError::InvalidValue {
                    field: "variation",
                    value: u32::from(count),
                })?;
                w.write_variation(variation, count)?;
            }
            Ok(())
        })
    }

    /// Decode a full record. The definition id selects how rotation and
    /// variation were encoded, so it must name a known definition.
    pub fn decode(
        reader: &mut BitReader,
        wire: &WireConfig,
        definitions: &Definitions,
    ) -> Result<Self, CodecError> {
        let raw = reader.read_bits(DEFINITION_ID_BITS)?;
        let id = ObstacleDefId(raw as u16);
        let definition = definitions.obstacle(id).ok_or(CodecError::InvalidValue {
            field: "definition",
            value: raw,
        })?;
        let position = reader.read_position(wire)?;
        let rotation = reader.read_rotation(wire, definition.rotation_mode)?;
        let variation = match definition.variations {
            Some(count) => Some(reader.read_variation(count)?),
            None => None,
        };
        Ok(Self {
            definition: id,
            position,
            rotation,
            variation,
        })
    }
}

impl Obstacle {
    pub fn partial_state(&self) -> PartialState {
        PartialState {
            scale: self.scale(),
            dead: self.is_dead(),
        }
    }

    pub fn full_state(&self) -> FullState {
        FullState {
            definition: self.definition().id,
            position: self.position(),
            rotation: self.rotation(),
            variation: self.variation(),
        }
    }

    /// Write scale and dead flag
    pub fn serialize_partial(&self, writer: &mut BitWriter, wire: &WireConfig) -> Result<(), CodecError> {
        self.partial_state().encode(writer, wire)
    }

    /// Write definition, position, rotation and (if declared) variation
    pub fn serialize_full(&self, writer: &mut BitWriter, wire: &WireConfig) -> Result<(), CodecError> {
        self.full_state().encode(writer, wire, self.definition())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::loot::LootList;
    use crate::game::obstacle::{DamageSource, ObjectId, Placement};
    use crate::game::physics::BodyRegistry;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn spawn(defs: &Definitions, name: &str, rng: &mut StdRng) -> Obstacle {
        let def = defs.obstacle_by_name(name).unwrap().clone();
        let placement = Placement {
            position: Vec2::new(rng.gen_range(0.0..1924.0), rng.gen_range(0.0..1924.0)),
            rotation: Rotation::random(def.rotation_mode, rng),
            scale: rng.gen_range(def.scale.spawn_min..=def.scale.spawn_max),
            variation: def.variations.map(|c| rng.gen_range(0..c)),
        };
        Obstacle::spawn(ObjectId(1), def, placement, LootList::new(), &mut BodyRegistry::new()).unwrap()
    }

    #[test]
    fn test_partial_roundtrip() {
        let defs = Definitions::bundled().unwrap();
        let wire = WireConfig::default();
        let mut rng = StdRng::seed_from_u64(11);
        let mut rock = spawn(&defs, "rock", &mut rng);
        rock.damage(70.0, DamageSource::World, None);

        let mut buf = [0u8; 4];
        let mut writer = BitWriter::new(&mut buf);
        rock.serialize_partial(&mut writer, &wire).unwrap();
        assert_eq!(writer.position(), required_partial_bits(&wire));

        let decoded = PartialState::decode(&mut BitReader::new(&buf), &wire).unwrap();
        assert!(!decoded.dead);
        assert!((decoded.scale - rock.scale()).abs() <= wire.scale_tolerance() + 1e-6);
    }

    #[test]
    fn test_dead_partial_carries_destroy_scale() {
        let defs = Definitions::bundled().unwrap();
        let wire = WireConfig::default();
        let mut rng = StdRng::seed_from_u64(12);
        let mut crate_ = spawn(&defs, "regular_crate", &mut rng);
        crate_.damage(1000.0, DamageSource::World, None);

        let mut buf = [0u8; 4];
        crate_.serialize_partial(&mut BitWriter::new(&mut buf), &wire).unwrap();
        let decoded = PartialState::decode(&mut BitReader::new(&buf), &wire).unwrap();
        assert!(decoded.dead);
        assert!((decoded.scale - 0.5).abs() <= wire.scale_tolerance() + 1e-6);
    }

    #[test]
    fn test_full_roundtrip_for_every_definition() {
        let defs = Definitions::bundled().unwrap();
        let wire = WireConfig::default();
        let mut rng = StdRng::seed_from_u64(13);
        for def in defs.obstacles() {
            for _ in 0..10 {
                let obstacle = spawn(&defs, &def.id_string, &mut rng);
                let mut buf = [0u8; 16];
                let mut writer = BitWriter::new(&mut buf);
                obstacle.serialize_full(&mut writer, &wire).unwrap();
                assert_eq!(writer.position(), required_full_bits(&wire, def));

                let decoded = FullState::decode(&mut BitReader::new(&buf), &wire, &defs).unwrap();
                let original = obstacle.full_state();
                assert_eq!(decoded.definition, original.definition);
                assert_eq!(decoded.variation, original.variation);
                let tolerance = wire.position_tolerance() + 1e-3;
                assert!((decoded.position.x - original.position.x).abs() <= tolerance);
                assert!((decoded.position.y - original.position.y).abs() <= tolerance);
                match (decoded.rotation, original.rotation) {
                    (Rotation::Angle(a), Rotation::Angle(b)) => {
                        assert!((a - b).abs() <= wire.rotation_tolerance() + 1e-5)
                    }
                    (a, b) => assert_eq!(a, b),
                }
            }
        }
    }

    #[test]
    fn test_variation_only_sent_when_declared() {
        let defs = Definitions::bundled().unwrap();
        let wire = WireConfig::default();
        let tree = defs.obstacle_by_name("tree").unwrap();
        let crate_ = defs.obstacle_by_name("regular_crate").unwrap();
        // tree: 3 variations -> 2 bits, full rotation -> 16 bits
        assert_eq!(required_full_bits(&wire, tree), 16 + 32 + 16 + 2);
        // crate: no variations, limited rotation -> 2 bits
        assert_eq!(required_full_bits(&wire, crate_), 16 + 32 + 2);
    }

    #[test]
    fn test_overflow_rolls_back_record() {
        let defs = Definitions::bundled().unwrap();
        let wire = WireConfig::default();
        let mut rng = StdRng::seed_from_u64(14);
        let tree = spawn(&defs, "tree", &mut rng);

        let mut buf = [0u8; 8];
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(0x3FF, 10).unwrap();
        // 10 + 66 bits does not fit in 64
        assert!(matches!(
            tree.serialize_full(&mut writer, &wire),
            Err(CodecError::Overflow { .. })
        ));
        assert_eq!(writer.position(), 10);
        // Partial still fits after the failed full record
        tree.serialize_partial(&mut writer, &wire).unwrap();
        assert_eq!(writer.position(), 10 + required_partial_bits(&wire));
    }

    #[test]
    fn test_unknown_definition_rejected() {
        let defs = Definitions::bundled().unwrap();
        let wire = WireConfig::default();
        let buf = [0xFFu8; 16];
        assert!(matches!(
            FullState::decode(&mut BitReader::new(&buf), &wire, &defs),
            Err(CodecError::InvalidValue { field: "definition", .. })
        ));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let wire = WireConfig::default();
        let buf = [0u8; 1];
        assert!(matches!(
            PartialState::decode(&mut BitReader::new(&buf), &wire),
            Err(CodecError::UnexpectedEnd { .. })
        ));
    }
}
