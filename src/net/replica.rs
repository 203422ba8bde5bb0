//! Observer-side mirror of the obstacle world
//!
//! Decodes [`ObjectUpdate`] payloads and keeps the last known full and partial
//! state of every obstacle. An update is validated as a whole before any of it
//! is applied.

use hashbrown::HashMap;

use crate::game::constants::wire::{OBJECT_ID_BITS, RECORD_COUNT_BITS};
use crate::game::definitions::Definitions;
use crate::game::hitbox::Hitbox;
use crate::game::obstacle::ObjectId;
use crate::net::bitstream::{BitReader, CodecError};
use crate::net::protocol::{self, DecodeError, ObjectUpdate, ServerMessage};
use crate::net::serialization::{FullState, PartialState};
use crate::net::wire::WireConfig;

/// One decoded record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub full: Option<FullState>,
    pub partial: PartialState,
}

/// What the observer currently knows about one obstacle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicatedObstacle {
    pub full: FullState,
    pub partial: PartialState,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Partial record for unknown object {0:?}")]
    UnknownObject(ObjectId),
    #[error("Wire fingerprint mismatch: expected {expected:#x}, got {actual:#x}")]
    FingerprintMismatch { expected: u64, actual: u64 },
    #[error("Header announces {announced} records, payload holds {actual}")]
    RecordCount { announced: u16, actual: u16 },
    #[error("Invalid wire layout: {0}")]
    InvalidWire(String),
}

/// Decode every record in an update payload
pub fn decode_update(
    payload: &[u8],
    wire: &WireConfig,
    definitions: &Definitions,
) -> Result<Vec<ObjectRecord>, CodecError> {
    let mut reader = BitReader::new(payload);
    let count = reader.read_bits(RECORD_COUNT_BITS)? as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let id = ObjectId(reader.read_bits(OBJECT_ID_BITS)? as u16);
        let full = if reader.read_bool()? {
            Some(FullState::decode(&mut reader, wire, definitions)?)
        } else {
            None
        };
        let partial = PartialState::decode(&mut reader, wire)?;
        records.push(ObjectRecord { id, full, partial });
    }
    Ok(records)
}

pub struct Replica {
    wire: WireConfig,
    objects: HashMap<ObjectId, ReplicatedObstacle>,
    last_tick: u64,
}

impl Replica {
    pub fn new(wire: WireConfig) -> Self {
        Self {
            wire,
            objects: HashMap::new(),
            last_tick: 0,
        }
    }

    pub fn wire(&self) -> &WireConfig {
        &self.wire
    }

    pub fn object(&self, id: ObjectId) -> Option<&ReplicatedObstacle> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = (&ObjectId, &ReplicatedObstacle)> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    /// Apply one update. Returns the number of records applied.
    ///
    /// Nothing is applied if any record fails to decode or names an object
    /// the replica has never received a full record for.
    pub fn apply_update(
        &mut self,
        update: &ObjectUpdate,
        definitions: &Definitions,
    ) -> Result<usize, ReplicaError> {
        let expected = self.wire.fingerprint();
        if update.fingerprint != expected {
            return Err(ReplicaError::FingerprintMismatch {
                expected,
                actual: update.fingerprint,
            });
        }

        let records = decode_update(&update.payload, &self.wire, definitions)?;
        if records.len() != update.records as usize {
            return Err(ReplicaError::RecordCount {
                announced: update.records,
                actual: records.len() as u16,
            });
        }
        for (i, record) in records.iter().enumerate() {
            let introduced = records[..i]
                .iter()
                .any(|r| r.id == record.id && r.full.is_some());
            if record.full.is_none() && !introduced && !self.objects.contains_key(&record.id) {
                return Err(ReplicaError::UnknownObject(record.id));
            }
        }

        for record in &records {
            match record.full {
                Some(full) => {
                    self.objects.insert(
                        record.id,
                        ReplicatedObstacle {
                            full,
                            partial: record.partial,
                        },
                    );
                }
                None => {
                    if let Some(object) = self.objects.get_mut(&record.id) {
                        object.partial = record.partial;
                    }
                }
            }
        }
        self.last_tick = update.tick;
        tracing::debug!(tick = update.tick, records = records.len(), "Replica updated");
        Ok(records.len())
    }

    /// Decode and apply an encoded [`ServerMessage`].
    ///
    /// A `Welcome` replaces the wire layout and forgets every known object.
    pub fn apply_message(&mut self, bytes: &[u8], definitions: &Definitions) -> Result<usize, ReplicaError> {
        let message: ServerMessage = protocol::decode(bytes)?;
        match message {
            ServerMessage::Welcome {
                wire, fingerprint, ..
            } => {
                wire.validate().map_err(ReplicaError::InvalidWire)?;
                if wire.fingerprint() != fingerprint {
                    return Err(ReplicaError::FingerprintMismatch {
                        expected: wire.fingerprint(),
                        actual: fingerprint,
                    });
                }
                self.wire = wire;
                self.objects.clear();
                Ok(0)
            }
            ServerMessage::ObjectUpdate(update) => self.apply_update(&update, definitions),
            ServerMessage::LootSpawned(_) | ServerMessage::Explosions(_) => Ok(0),
        }
    }

    /// Rebuild an object's world-space hitbox from what was received
    pub fn hitbox(&self, id: ObjectId, definitions: &Definitions) -> Option<Hitbox> {
        let object = self.objects.get(&id)?;
        let definition = definitions.obstacle(object.full.definition)?;
        Some(definition.hitbox.transform(
            object.full.position,
            object.partial.scale,
            object.full.rotation,
        ))
    }
}
