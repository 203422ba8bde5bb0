//! World state owning obstacles, their physics bodies and dropped items
//!
//! All mutation happens on the tick thread. Obstacles report what should happen
//! to the rest of the world as [`Effect`]s; `GameState` executes them right
//! after the transition that produced them.

use hashbrown::HashMap;
use rand::Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::damage_queue::DamageEvent;
use crate::game::definitions::{ConfigError, Definitions, ExplosionId, ItemId, ObstacleDefId};
use crate::game::hitbox::Rotation;
use crate::game::loot::{self, LootError, LootItem, LootList};
use crate::game::obstacle::{
    DamageResult, DamageSource, Effect, Effects, ObjectId, Obstacle, Placement, SpawnError,
};
use crate::game::physics::{BodyRegistry, PhysicsWorld};
use crate::net::wire::WireConfig;
use crate::util::vec2::Vec2;

/// Identifier of a dropped item in the world
pub type LootId = u64;

/// An item lying on the ground
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnedLoot {
    pub id: LootId,
    pub item: LootItem,
    pub position: Vec2,
}

/// An explosion requested during this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnedExplosion {
    pub explosion: ExplosionId,
    /// Obstacle that exploded
    pub origin: ObjectId,
    pub position: Vec2,
    pub source: DamageSource,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Unknown object {0:?}")]
    UnknownObject(ObjectId),
    #[error("Unknown obstacle definition {0:?}")]
    UnknownDefinition(ObstacleDefId),
    #[error("Unknown weapon {0:?}")]
    UnknownWeapon(ItemId),
    #[error("Position {0:?} outside the world")]
    OutOfBounds(Vec2),
    #[error("No free object ids left")]
    WorldFull,
    #[error("Definitions do not fit the wire layout: {0}")]
    Wire(#[source] ConfigError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Loot(#[from] LootError),
}

/// Per-tick counters, reset by [`GameState::take_stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub damage_applied: u64,
    pub damage_ignored: u64,
    pub obstacles_destroyed: u64,
    pub loot_spawned: u64,
    pub explosions: u64,
}

/// Result of [`GameState::apply_damage_events`]
#[derive(Debug, Default)]
pub struct DamageBatch {
    /// Events that damaged or destroyed their target
    pub applied: usize,
    pub destroyed: SmallVec<[ObjectId; 4]>,
}

pub struct GameState<'d, P: PhysicsWorld = BodyRegistry> {
    pub tick: u64,
    definitions: &'d Definitions,
    wire: WireConfig,
    physics: P,
    obstacles: HashMap<ObjectId, Obstacle>,
    loot: Vec<SpawnedLoot>,
    explosions: Vec<SpawnedExplosion>,
    /// Explosions in `explosions` whose area damage has been dealt
    explosions_resolved: usize,
    dirty_partial: FxHashSet<ObjectId>,
    dirty_full: FxHashSet<ObjectId>,
    next_object_id: u16,
    next_loot_id: LootId,
    stats: TickStats,
}

impl<'d> GameState<'d, BodyRegistry> {
    pub fn new(definitions: &'d Definitions, wire: WireConfig) -> Result<Self, StateError> {
        Self::with_physics(definitions, wire, BodyRegistry::new())
    }
}

impl<'d, P: PhysicsWorld> GameState<'d, P> {
    /// Fails if some obstacle scale cannot be encoded with `wire`
    pub fn with_physics(
        definitions: &'d Definitions,
        wire: WireConfig,
        physics: P,
    ) -> Result<Self, StateError> {
        definitions.check_wire_compat(&wire).map_err(StateError::Wire)?;
        Ok(Self {
            tick: 0,
            definitions,
            wire,
            physics,
            obstacles: HashMap::new(),
            loot: Vec::new(),
            explosions: Vec::new(),
            explosions_resolved: 0,
            dirty_partial: FxHashSet::default(),
            dirty_full: FxHashSet::default(),
            next_object_id: 0,
            next_loot_id: 0,
            stats: TickStats::default(),
        })
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Spawn an obstacle with randomly drawn scale, rotation and variation
    pub fn spawn_obstacle<R: Rng + ?Sized>(
        &mut self,
        definition: ObstacleDefId,
        position: Vec2,
        rng: &mut R,
    ) -> Result<ObjectId, StateError> {
        let def = self
            .definitions
            .obstacle(definition)
            .ok_or(StateError::UnknownDefinition(definition))?;
        let range = def.scale;
        let scale = if range.spawn_min < range.spawn_max {
            rng.gen_range(range.spawn_min..=range.spawn_max)
        } else {
            range.spawn_min
        };
        let placement = Placement {
            position,
            rotation: Rotation::random(def.rotation_mode, rng),
            scale,
            variation: def.variations.map(|count| rng.gen_range(0..count)),
        };
        self.spawn_obstacle_at(definition, placement, rng)
    }

    /// Spawn an obstacle with an explicit placement. Loot is resolved now.
    pub fn spawn_obstacle_at<R: Rng + ?Sized>(
        &mut self,
        definition: ObstacleDefId,
        placement: Placement,
        rng: &mut R,
    ) -> Result<ObjectId, StateError> {
        let def = self
            .definitions
            .obstacle(definition)
            .ok_or(StateError::UnknownDefinition(definition))?
            .clone();
        if !self.wire.contains_position(placement.position) {
            return Err(StateError::OutOfBounds(placement.position));
        }
        let id = self.free_object_id()?;
        let loot = match def.loot_table {
            Some(table) => loot::resolve(self.definitions, table, rng)?,
            None => LootList::new(),
        };

        let obstacle = Obstacle::spawn(id, def, placement, loot, &mut self.physics)?;
        self.next_object_id = id.0.wrapping_add(1);
        tracing::debug!(
            id = id.0,
            definition = %obstacle.definition().id_string,
            loot = obstacle.loot().len(),
            "Obstacle spawned"
        );
        self.obstacles.insert(id, obstacle);
        self.dirty_full.insert(id);
        self.dirty_partial.insert(id);
        Ok(id)
    }

    /// Next unused id. Only claimed once the spawn succeeds.
    fn free_object_id(&self) -> Result<ObjectId, StateError> {
        (0..=u16::MAX)
            .map(|offset| ObjectId(self.next_object_id.wrapping_add(offset)))
            .find(|id| !self.obstacles.contains_key(id))
            .ok_or(StateError::WorldFull)
    }

    // ========================================================================
    // Damage
    // ========================================================================

    /// Damage one obstacle and execute the resulting effects
    pub fn apply_damage(
        &mut self,
        target: ObjectId,
        amount: f32,
        source: DamageSource,
        weapon: Option<ItemId>,
    ) -> Result<DamageResult, StateError> {
        let definitions = self.definitions;
        let weapon = weapon
            .map(|id| definitions.item(id).ok_or(StateError::UnknownWeapon(id)))
            .transpose()?;
        let obstacle = self
            .obstacles
            .get_mut(&target)
            .ok_or(StateError::UnknownObject(target))?;

        let outcome = obstacle.damage(amount, source, weapon);
        match outcome.result {
            DamageResult::Damaged => self.stats.damage_applied += 1,
            DamageResult::Destroyed => {
                self.stats.damage_applied += 1;
                self.stats.obstacles_destroyed += 1;
            }
            _ => self.stats.damage_ignored += 1,
        }
        self.execute(outcome.effects);
        Ok(outcome.result)
    }

    /// Apply a batch of queued damage in order. Events for unknown objects
    /// (already removed, stale ids) are skipped.
    pub fn apply_damage_events(&mut self, events: impl IntoIterator<Item = DamageEvent>) -> DamageBatch {
        let mut batch = DamageBatch::default();
        for event in events {
            match self.apply_damage(event.target, event.amount, event.source, event.weapon) {
                Ok(DamageResult::Damaged) => batch.applied += 1,
                Ok(DamageResult::Destroyed) => {
                    batch.applied += 1;
                    batch.destroyed.push(event.target);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Dropped damage event: {}", e),
            }
        }
        batch
    }

    /// Deal area damage for every explosion not yet resolved, including
    /// explosions set off by earlier ones. Each obstacle dies at most once,
    /// so chains end.
    pub fn resolve_explosions(&mut self) -> DamageBatch {
        let mut batch = DamageBatch::default();
        while let Some(explosion) = self.explosions.get(self.explosions_resolved).copied() {
            self.explosions_resolved += 1;
            let Some(def) = self.definitions.explosion(explosion.explosion) else {
                tracing::warn!("Unknown explosion {:?}", explosion.explosion);
                continue;
            };
            let reach = def.radius * def.radius;
            let damage = def.damage;
            let mut targets: SmallVec<[ObjectId; 8]> = self
                .obstacles
                .values()
                .filter(|o| !o.is_dead() && o.hitbox().distance_sq_to(explosion.position) <= reach)
                .map(Obstacle::id)
                .collect();
            targets.sort_unstable();

            let source = DamageSource::Explosion(explosion.origin);
            for target in targets {
                match self.apply_damage(target, damage, source, None) {
                    Ok(DamageResult::Damaged) => batch.applied += 1,
                    Ok(DamageResult::Destroyed) => {
                        batch.applied += 1;
                        batch.destroyed.push(target);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Explosion damage skipped: {}", e),
                }
            }
        }
        batch
    }

    /// Force an obstacle's death
    pub fn kill(&mut self, target: ObjectId, source: DamageSource) -> Result<bool, StateError> {
        let obstacle = self
            .obstacles
            .get_mut(&target)
            .ok_or(StateError::UnknownObject(target))?;
        let effects = obstacle.kill(source);
        let killed = !effects.is_empty();
        if killed {
            self.stats.obstacles_destroyed += 1;
        }
        self.execute(effects);
        Ok(killed)
    }

    fn execute(&mut self, effects: Effects) {
        for effect in effects {
            match effect {
                Effect::ReshapeBody { handle, shape } => {
                    if !self.physics.set_shape(handle, shape) {
                        tracing::warn!("Reshape of missing body {:?}", handle);
                    }
                }
                Effect::DestroyBody(handle) => {
                    self.physics.destroy_body(handle);
                }
                Effect::SpawnExplosion {
                    explosion,
                    origin,
                    position,
                    source,
                } => {
                    self.stats.explosions += 1;
                    self.explosions.push(SpawnedExplosion {
                        explosion,
                        origin,
                        position,
                        source,
                    });
                }
                Effect::SpawnLoot { item, position } => {
                    let id = self.next_loot_id;
                    self.next_loot_id += 1;
                    self.stats.loot_spawned += 1;
                    self.loot.push(SpawnedLoot { id, item, position });
                }
                Effect::MarkDirty { id, full } => {
                    self.dirty_partial.insert(id);
                    if full {
                        self.dirty_full.insert(id);
                    }
                }
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn definitions(&self) -> &'d Definitions {
        self.definitions
    }

    pub fn wire(&self) -> &WireConfig {
        &self.wire
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn obstacle(&self, id: ObjectId) -> Option<&Obstacle> {
        self.obstacles.get(&id)
    }

    pub fn obstacles(&self) -> impl Iterator<Item = &Obstacle> {
        self.obstacles.values()
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    pub fn alive_count(&self) -> usize {
        self.obstacles.values().filter(|o| !o.is_dead()).count()
    }

    /// Items dropped so far
    pub fn loot(&self) -> &[SpawnedLoot] {
        &self.loot
    }

    /// Explosions requested since the last call
    pub fn drain_explosions(&mut self) -> Vec<SpawnedExplosion> {
        self.explosions_resolved = 0;
        std::mem::take(&mut self.explosions)
    }

    /// Objects whose partial state changed since the last broadcast
    pub fn dirty_partial(&self) -> &FxHashSet<ObjectId> {
        &self.dirty_partial
    }

    /// Objects whose full state changed since the last broadcast
    pub fn dirty_full(&self) -> &FxHashSet<ObjectId> {
        &self.dirty_full
    }

    /// Called once the tick's updates have been broadcast
    pub fn clear_dirty(&mut self) {
        self.dirty_partial.clear();
        self.dirty_full.clear();
    }

    pub fn take_stats(&mut self) -> TickStats {
        std::mem::take(&mut self.stats)
    }
}
