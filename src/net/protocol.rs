use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::definitions::{ExplosionId, ItemId};
use crate::game::state::{SpawnedExplosion, SpawnedLoot};
use crate::net::wire::{BitWidths, WireConfig};
use crate::util::vec2::Vec2;

/// Messages from server to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// First message to a new observer: the wire layout it must decode with
    Welcome {
        observer_id: Uuid,
        wire: WireConfig,
        widths: BitWidths,
        fingerprint: u64,
    },
    /// Bit-packed obstacle records for one tick
    ObjectUpdate(ObjectUpdate),
    /// Items dropped this tick
    LootSpawned(Vec<LootSnapshot>),
    /// Explosions triggered this tick
    Explosions(Vec<ExplosionSnapshot>),
}

/// One tick of obstacle records for one observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUpdate {
    pub tick: u64,
    /// Fingerprint of the wire layout the payload was written with
    pub fingerprint: u64,
    /// Number of records in the payload
    pub records: u16,
    /// Meaningful bits in the payload; the last byte is zero padded
    pub bits: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LootSnapshot {
    pub id: u64,
    pub item: ItemId,
    pub count: u16,
    pub position: Vec2,
}

impl LootSnapshot {
    pub fn from_loot(loot: &SpawnedLoot) -> Self {
        Self {
            id: loot.id,
            item: loot.item.item,
            count: loot.item.count,
            position: loot.position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplosionSnapshot {
    pub explosion: ExplosionId,
    pub position: Vec2,
}

impl ExplosionSnapshot {
    pub fn from_explosion(explosion: &SpawnedExplosion) -> Self {
        Self {
            explosion: explosion.explosion,
            position: explosion.position,
        }
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::loot::LootItem;

    #[test]
    fn test_welcome_message() {
        let wire = WireConfig::default();
        let observer_id = Uuid::new_v4();
        let msg = ServerMessage::Welcome {
            observer_id,
            wire,
            widths: wire.bit_widths(),
            fingerprint: wire.fingerprint(),
        };
        let encoded = encode(&msg).unwrap();
        let decoded: ServerMessage = decode(&encoded).unwrap();
        match decoded {
            ServerMessage::Welcome {
                observer_id: id,
                widths,
                fingerprint,
                ..
            } => {
                assert_eq!(id, observer_id);
                assert_eq!(widths, wire.bit_widths());
                assert_eq!(fingerprint, wire.fingerprint());
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_object_update_keeps_payload_bytes() {
        let update = ObjectUpdate {
            tick: 77,
            fingerprint: 0xDEAD_BEEF,
            records: 2,
            bits: 45,
            payload: vec![0xAB, 0xCD, 0x00, 0x12, 0x34, 0x80],
        };
        let encoded = encode(&ServerMessage::ObjectUpdate(update.clone())).unwrap();
        let decoded: ServerMessage = decode(&encoded).unwrap();
        assert_eq!(decoded, ServerMessage::ObjectUpdate(update));
    }

    #[test]
    fn test_loot_snapshot_from_spawned() {
        let spawned = SpawnedLoot {
            id: 5,
            item: LootItem {
                item: ItemId(3),
                count: 60,
            },
            position: Vec2::new(12.5, 80.0),
        };
        let snapshot = LootSnapshot::from_loot(&spawned);
        assert_eq!(snapshot.item, ItemId(3));
        assert_eq!(snapshot.count, 60);

        let encoded = encode(&ServerMessage::LootSpawned(vec![snapshot])).unwrap();
        let decoded: ServerMessage = decode(&encoded).unwrap();
        assert_eq!(decoded, ServerMessage::LootSpawned(vec![snapshot]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<ServerMessage, _> = decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(result.is_err());
    }
}
