//! Lock-free damage submission
//!
//! Any thread may submit damage through a [`DamageSender`]; only the tick
//! thread drains the queue and applies it to obstacles.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::definitions::ItemId;
use crate::game::obstacle::{DamageSource, ObjectId};

/// Damage waiting to be applied on the next tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageEvent {
    pub target: ObjectId,
    pub amount: f32,
    pub source: DamageSource,
    pub weapon: Option<ItemId>,
}

/// Bounded MPSC queue of damage events
pub struct DamageQueue {
    sender: Sender<DamageEvent>,
    receiver: Receiver<DamageEvent>,
    capacity: usize,
}

impl DamageQueue {
    /// Capacity should cover the burst of hits expected between two ticks
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Handle for a producer thread
    pub fn sender(&self) -> DamageSender {
        DamageSender {
            sender: self.sender.clone(),
        }
    }

    /// Non-blocking submit. Returns false if the queue is full.
    #[inline]
    pub fn try_submit(&self, event: DamageEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    /// Take everything submitted so far, in submission order
    pub fn drain(&self) -> Vec<DamageEvent> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DamageQueue {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Clonable producer handle
#[derive(Clone)]
pub struct DamageSender {
    sender: Sender<DamageEvent>,
}

impl DamageSender {
    #[inline]
    pub fn try_send(&self, event: DamageEvent) -> Result<(), DamageQueueError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DamageQueueError::Full,
            TrySendError::Disconnected(_) => DamageQueueError::Disconnected,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DamageQueueError {
    #[error("Damage queue is full")]
    Full,
    #[error("Damage queue disconnected")]
    Disconnected,
}
