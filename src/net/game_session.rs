//! Tick-driven session tying the world, the damage queue and observers
//!
//! Each tick drains queued damage, applies it, broadcasts the resulting
//! object updates (plus loot and explosion notices) and records metrics.
//! `start_game_loop` drives ticks from a tokio interval until shutdown.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::constants::net::MAX_PACKET_SIZE;
use crate::game::damage_queue::{DamageEvent, DamageQueue, DamageQueueError, DamageSender};
use crate::game::definitions::{Definitions, ItemId, ItemKind};
use crate::game::obstacle::{DamageSource, ObjectId};
use crate::game::state::{GameState, StateError};
use crate::metrics::Metrics;
use crate::net::broadcast::{Broadcaster, ObserverId};
use crate::net::protocol::{encode, EncodeError, ExplosionSnapshot, LootSnapshot, ServerMessage};
use crate::util::vec2::Vec2;

/// Distance kept between scattered obstacles and the world edge
const EDGE_MARGIN: f32 = 16.0;

/// Encoded messages produced by one tick, addressed per observer
pub type Outbox = Vec<(ObserverId, Vec<u8>)>;

pub struct GameSession<'d> {
    state: GameState<'d>,
    queue: DamageQueue,
    broadcaster: Broadcaster,
    metrics: Arc<Metrics>,
    rng: StdRng,
    /// Loot already announced to observers
    loot_announced: usize,
}

impl<'d> GameSession<'d> {
    pub fn new(
        definitions: &'d Definitions,
        config: &ServerConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, StateError> {
        let state = GameState::new(definitions, config.wire())?;
        let rng = match config.sim_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        metrics
            .tick_budget_us
            .store(config.tick_interval().as_micros() as u64, Ordering::Relaxed);
        Ok(Self {
            state,
            queue: DamageQueue::default(),
            broadcaster: Broadcaster::new(MAX_PACKET_SIZE),
            metrics,
            rng,
            loot_announced: 0,
        })
    }

    /// Scatter `count` obstacles over the world, cycling through every
    /// definition. Returns how many were placed.
    pub fn populate(&mut self, count: usize) -> usize {
        let definitions: Vec<_> = self.state.definitions().obstacles().map(|d| d.id).collect();
        if definitions.is_empty() {
            warn!("No obstacle definitions loaded, world left empty");
            return 0;
        }
        // Keep obstacles clear of the world edge
        let extent = self.state.wire().world_extent;
        let margin = EDGE_MARGIN.min(extent / 4.0);
        let mut placed = 0;
        for i in 0..count {
            let position = Vec2::new(
                self.rng.gen_range(margin..extent - margin),
                self.rng.gen_range(margin..extent - margin),
            );
            match self
                .state
                .spawn_obstacle(definitions[i % definitions.len()], position, &mut self.rng)
            {
                Ok(_) => placed += 1,
                Err(e) => warn!("Failed to spawn obstacle: {}", e),
            }
        }
        info!("World populated with {} obstacles", placed);
        self.record_world();
        placed
    }

    pub fn damage_sender(&self) -> DamageSender {
        self.queue.sender()
    }

    pub fn state(&self) -> &GameState<'d> {
        &self.state
    }

    /// Register an observer and return its encoded welcome message
    pub fn add_observer(&mut self) -> Result<(ObserverId, Vec<u8>), EncodeError> {
        let observer_id = Uuid::new_v4();
        let wire = *self.state.wire();
        let welcome = encode(&ServerMessage::Welcome {
            observer_id,
            wire,
            widths: wire.bit_widths(),
            fingerprint: wire.fingerprint(),
        })?;
        self.broadcaster.add_observer(observer_id);
        self.metrics
            .observers
            .store(self.broadcaster.observer_count() as u64, Ordering::Relaxed);
        Ok((observer_id, welcome))
    }

    pub fn remove_observer(&mut self, observer: ObserverId) -> bool {
        let removed = self.broadcaster.remove_observer(observer);
        self.metrics
            .observers
            .store(self.broadcaster.observer_count() as u64, Ordering::Relaxed);
        removed
    }

    /// Run one tick and return the messages to deliver
    pub fn tick(&mut self) -> Result<Outbox, EncodeError> {
        let start = std::time::Instant::now();
        self.state.tick += 1;

        let batch = self.state.apply_damage_events(self.queue.drain());
        let blasted = self.state.resolve_explosions();
        for id in batch.destroyed.iter().chain(&blasted.destroyed) {
            if let Some(obstacle) = self.state.obstacle(*id) {
                self.metrics.record_destroyed(&obstacle.definition().id_string);
            }
        }

        let mut notices = Vec::new();
        let new_loot: Vec<LootSnapshot> = self.state.loot()[self.loot_announced..]
            .iter()
            .map(LootSnapshot::from_loot)
            .collect();
        self.loot_announced = self.state.loot().len();
        if !new_loot.is_empty() {
            notices.push(encode(&ServerMessage::LootSpawned(new_loot))?);
        }
        let explosions: Vec<ExplosionSnapshot> = self
            .state
            .drain_explosions()
            .iter()
            .map(ExplosionSnapshot::from_explosion)
            .collect();
        if !explosions.is_empty() {
            notices.push(encode(&ServerMessage::Explosions(explosions))?);
        }

        let updates = self.broadcaster.broadcast(&mut self.state);
        let mut outbox = Vec::with_capacity(updates.len());
        let mut message_bytes = 0u64;
        for (observer, update) in updates {
            let bytes = encode(&ServerMessage::ObjectUpdate(update))?;
            message_bytes += bytes.len() as u64;
            outbox.push((observer, bytes));
        }
        for notice in &notices {
            for observer in self.broadcaster.observers() {
                message_bytes += notice.len() as u64;
                outbox.push((observer, notice.clone()));
            }
        }

        self.metrics.record_tick_stats(&self.state.take_stats());
        self.metrics.record_broadcast(&self.broadcaster.last_stats(), message_bytes);
        self.metrics
            .damage_queue_pending
            .store(self.queue.pending_count() as u64, Ordering::Relaxed);
        self.record_world();
        self.metrics.record_tick_time(start.elapsed());
        Ok(outbox)
    }

    fn record_world(&self) {
        self.metrics.set_world(
            self.state.obstacle_count(),
            self.state.alive_count(),
            self.state.loot().len(),
        );
    }
}

/// Submit random hits against the world until `shutdown` resolves.
///
/// Stands in for players and projectiles in the simulation binary.
pub async fn run_damage_producer(
    sender: DamageSender,
    definitions: &Definitions,
    targets: Vec<ObjectId>,
    hits_per_second: u32,
    seed: u64,
    metrics: Arc<Metrics>,
    shutdown: impl Future<Output = ()>,
) {
    if targets.is_empty() || hits_per_second == 0 {
        return;
    }
    let weapons: Vec<Option<ItemId>> = std::iter::once(None)
        .chain(
            definitions
                .items()
                .filter(|item| matches!(item.kind, ItemKind::Melee { .. }))
                .map(|item| Some(item.id)),
        )
        .collect();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ticker = interval(Duration::from_secs_f64(1.0 / hits_per_second as f64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }
        let event = DamageEvent {
            target: targets[rng.gen_range(0..targets.len())],
            amount: rng.gen_range(5.0..60.0),
            source: DamageSource::Player(Uuid::from_u128(rng.gen())),
            weapon: weapons[rng.gen_range(0..weapons.len())],
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(DamageQueueError::Full) => {
                metrics
                    .damage_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(DamageQueueError::Disconnected) => break,
        }
    }
    debug!("Damage producer stopped");
}

/// Drive `session` at the configured tick rate until `shutdown` resolves,
/// handing each tick's messages to `deliver`
pub async fn start_game_loop<F>(
    session: &mut GameSession<'_>,
    tick_interval: Duration,
    mut deliver: F,
    shutdown: impl Future<Output = ()>,
) where
    F: FnMut(Outbox),
{
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    info!("Game loop started at {:.1} Hz", 1.0 / tick_interval.as_secs_f64());
    let start = Instant::now();
    let report_every = (30.0 / tick_interval.as_secs_f64()).max(1.0) as u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        match session.tick() {
            Ok(outbox) => deliver(outbox),
            Err(e) => {
                warn!("Game tick error: {}", e);
                continue;
            }
        }

        let state = session.state();
        if state.tick % report_every == 0 {
            info!(
                "Game: {}s, tick {}, {}/{} obstacles alive, {} loot on ground",
                start.elapsed().as_secs(),
                state.tick,
                state.alive_count(),
                state.obstacle_count(),
                state.loot().len()
            );
        }
    }
    info!("Game loop stopped after {} ticks", session.state().tick);
}
