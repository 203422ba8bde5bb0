//! Per-tick obstacle broadcaster
//!
//! Tracks which obstacles each observer has seen. Once per tick it builds one
//! [`ObjectUpdate`] per observer:
//! - objects the observer has never received get a full record plus a partial
//! - known objects that are dirty (or were deferred last tick) get a partial
//!
//! Payload layout, MSB first:
//!
//! ```text
//! record_count:16
//! repeated record_count times:
//!     object_id:16  has_full:1  [full record]  partial record
//! ```
//!
//! Records that do not fit in the payload budget are deferred to the next tick
//! rather than dropped.

use hashbrown::HashMap;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use uuid::Uuid;

use crate::game::constants::wire::{OBJECT_ID_BITS, RECORD_COUNT_BITS};
use crate::game::obstacle::{ObjectId, Obstacle};
use crate::game::physics::PhysicsWorld;
use crate::game::state::GameState;
use crate::net::bitstream::{max_value, BitWriter, CodecError};
use crate::net::protocol::ObjectUpdate;
use crate::net::serialization::{all_or_nothing, required_full_bits, required_partial_bits};
use crate::net::wire::WireConfig;

pub type ObserverId = Uuid;

/// What one observer has been told so far
#[derive(Debug, Default)]
struct ObserverView {
    known: FxHashSet<ObjectId>,
    /// Partials that did not fit in an earlier update
    pending: FxHashSet<ObjectId>,
}

/// Totals for one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub updates: u64,
    pub full_records: u64,
    pub partial_records: u64,
    pub bytes: u64,
    pub deferred: u64,
    /// Records that could not be encoded; they stay owed to the observer
    pub failed: u64,
}

pub struct Broadcaster {
    observers: HashMap<ObserverId, ObserverView>,
    max_payload_bytes: usize,
    last_stats: BroadcastStats,
}

/// Bits for one record of `obstacle`
pub fn record_bits(wire: &WireConfig, obstacle: &Obstacle, full: bool) -> usize {
    let full_bits = if full {
        required_full_bits(wire, obstacle.definition())
    } else {
        0
    };
    OBJECT_ID_BITS as usize + 1 + full_bits + required_partial_bits(wire)
}

/// Write one record all-or-nothing
pub fn write_record(
    writer: &mut BitWriter,
    wire: &WireConfig,
    obstacle: &Obstacle,
    full: bool,
) -> Result<(), CodecError> {
    all_or_nothing(writer, |w| {
        w.write_bits(obstacle.id().0 as u32, OBJECT_ID_BITS)?;
        w.write_bool(full)?;
        if full {
            obstacle.serialize_full(w, wire)?;
        }
        obstacle.serialize_partial(w, wire)
    })
}

impl ObserverView {
    /// Account for one attempted record. Returns whether it was written.
    ///
    /// Unwritten records stay owed: unknown objects get another full record
    /// next tick, known ones are kept pending.
    fn settle(
        &mut self,
        id: ObjectId,
        full: bool,
        result: Result<(), CodecError>,
        stats: &mut BroadcastStats,
    ) -> bool {
        match result {
            Ok(()) => {
                if full {
                    self.known.insert(id);
                    stats.full_records += 1;
                } else {
                    stats.partial_records += 1;
                }
                true
            }
            Err(e) => {
                if !full {
                    self.pending.insert(id);
                }
                if matches!(e, CodecError::Overflow { .. }) {
                    stats.deferred += 1;
                } else {
                    tracing::error!("Record for {:?} cannot be encoded: {}", id, e);
                    stats.failed += 1;
                }
                false
            }
        }
    }
}

struct ObserverOutput {
    update: Option<ObjectUpdate>,
    stats: BroadcastStats,
}

impl Broadcaster {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self {
            observers: HashMap::new(),
            max_payload_bytes,
            last_stats: BroadcastStats::default(),
        }
    }

    pub fn add_observer(&mut self, id: ObserverId) {
        self.observers.entry(id).or_default();
        tracing::info!("Observer {} joined", id);
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let removed = self.observers.remove(&id).is_some();
        if removed {
            tracing::info!("Observer {} left", id);
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn observers(&self) -> impl Iterator<Item = ObserverId> + '_ {
        self.observers.keys().copied()
    }

    /// Whether `observer` has received a full record for `object`
    pub fn knows(&self, observer: ObserverId, object: ObjectId) -> bool {
        self.observers
            .get(&observer)
            .is_some_and(|v| v.known.contains(&object))
    }

    pub fn last_stats(&self) -> BroadcastStats {
        self.last_stats
    }

    /// Build this tick's updates and clear the world's dirty sets.
    ///
    /// Observers with nothing to receive get no update.
    pub fn broadcast<P: PhysicsWorld + Sync>(
        &mut self,
        state: &mut GameState<'_, P>,
    ) -> Vec<(ObserverId, ObjectUpdate)> {
        let max_bits = self.max_payload_bytes * 8;
        let world: &GameState<'_, P> = state;

        let outputs: Vec<(ObserverId, ObserverOutput)> = self
            .observers
            .par_iter_mut()
            .map(|(id, view)| (*id, build_update(world, view, max_bits)))
            .collect();

        state.clear_dirty();

        let mut stats = BroadcastStats::default();
        let mut updates = Vec::with_capacity(outputs.len());
        for (id, output) in outputs {
            stats.full_records += output.stats.full_records;
            stats.partial_records += output.stats.partial_records;
            stats.bytes += output.stats.bytes;
            stats.deferred += output.stats.deferred;
            stats.failed += output.stats.failed;
            if let Some(update) = output.update {
                stats.updates += 1;
                updates.push((id, update));
            }
        }
        if stats.failed > 0 {
            tracing::warn!(failed = stats.failed, "Records failed to encode");
        }
        if stats.deferred > 0 {
            tracing::debug!(deferred = stats.deferred, "Records deferred to next tick");
        }
        self.last_stats = stats;
        updates
    }
}

fn build_update<P: PhysicsWorld>(
    state: &GameState<'_, P>,
    view: &mut ObserverView,
    max_bits: usize,
) -> ObserverOutput {
    let wire = state.wire();
    let mut stats = BroadcastStats::default();

    let mut records: Vec<(&Obstacle, bool)> = state
        .obstacles()
        .filter(|o| !view.known.contains(&o.id()))
        .map(|o| (o, true))
        .collect();
    let mut partials: Vec<ObjectId> = state
        .dirty_partial()
        .iter()
        .chain(view.pending.iter())
        .copied()
        .filter(|id| view.known.contains(id))
        .collect::<FxHashSet<_>>()
        .into_iter()
        .collect();
    partials.sort_unstable();
    records.sort_unstable_by_key(|(o, _)| o.id());
    records.extend(
        partials
            .into_iter()
            .filter_map(|id| state.obstacle(id))
            .map(|o| (o, false)),
    );
    view.pending.clear();

    if records.is_empty() {
        return ObserverOutput {
            update: None,
            stats,
        };
    }

    let needed = RECORD_COUNT_BITS as usize
        + records
            .iter()
            .map(|(o, full)| record_bits(wire, o, *full))
            .sum::<usize>();
    let mut buffer = vec![0u8; needed.min(max_bits).div_ceil(8)];
    let mut writer = BitWriter::new(&mut buffer);
    let count_slot = writer.checkpoint();
    if writer.write_bits(0, RECORD_COUNT_BITS).is_err() {
        // Budget cannot even hold the count; everything waits
        for (obstacle, full) in records {
            if !full {
                view.pending.insert(obstacle.id());
            }
            stats.deferred += 1;
        }
        return ObserverOutput {
            update: None,
            stats,
        };
    }

    let max_records = max_value(RECORD_COUNT_BITS) as usize;
    let mut written = 0usize;
    for (obstacle, full) in records {
        let result = if written < max_records {
            write_record(&mut writer, wire, obstacle, full)
        } else {
            Err(CodecError::Overflow {
                requested: record_bits(wire, obstacle, full),
                remaining: writer.remaining_bits(),
            })
        };
        if view.settle(obstacle.id(), full, result, &mut stats) {
            written += 1;
        }
    }

    let bits = writer.position();
    let used = writer.bytes_written();
    if let Err(e) = writer.patch_bits(count_slot, written as u32, RECORD_COUNT_BITS) {
        tracing::warn!("Failed to patch record count: {}", e);
        return ObserverOutput {
            update: None,
            stats,
        };
    }
    buffer.truncate(used);
    stats.bytes = used as u64;

    ObserverOutput {
        update: (written > 0).then(|| ObjectUpdate {
            tick: state.tick,
            fingerprint: wire.fingerprint(),
            records: written as u16,
            bits: bits as u32,
            payload: buffer,
        }),
        stats,
    }
}
