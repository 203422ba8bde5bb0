//! Destructible obstacle entity
//!
//! An obstacle is `Alive` until its health reaches zero or it is killed, then
//! `Dead` forever. Damage shrinks it: scale interpolates linearly from the
//! definition's destroy scale (no health) to its spawn scale (full health), and
//! the hitbox and physics body shape are rescaled together by the same factor.
//!
//! The entity never calls into the world directly. Every transition returns a
//! list of [`Effect`]s that the owner executes once the state change is done.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::game::constants::obstacle::GEOMETRY_EPSILON;
use crate::game::definitions::{ExplosionId, ItemDefinition, ObstacleDefinition};
use crate::game::hitbox::{Hitbox, HitboxTemplate, Rotation};
use crate::game::loot::{LootItem, LootList};
use crate::game::physics::{BodyHandle, BodyShape, PhysicsWorld};
use crate::util::vec2::Vec2;

/// Network id of a world object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u16);

/// Who or what dealt damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageSource {
    Player(Uuid),
    Explosion(ObjectId),
    World,
}

/// Deferred side effect of a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Push a rescaled shape into the physics body
    ReshapeBody { handle: BodyHandle, shape: BodyShape },
    /// Remove the physics body; emitted at most once per obstacle
    DestroyBody(BodyHandle),
    SpawnExplosion {
        explosion: ExplosionId,
        origin: ObjectId,
        position: Vec2,
        source: DamageSource,
    },
    SpawnLoot { item: LootItem, position: Vec2 },
    MarkDirty { id: ObjectId, full: bool },
}

pub type Effects = SmallVec<[Effect; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DamageResult {
    Damaged,
    Destroyed,
    /// Already dead
    Dead,
    Invulnerable,
    /// Impenetrable and the weapon cannot pierce
    Impenetrable,
    /// Negative or non-finite amount
    InvalidAmount,
}

#[derive(Debug, Clone)]
pub struct DamageOutcome {
    pub result: DamageResult,
    pub effects: Effects,
}

impl DamageOutcome {
    fn ignored(result: DamageResult) -> Self {
        Self {
            result,
            effects: Effects::new(),
        }
    }

    /// Whether the obstacle's state changed
    pub fn applied(&self) -> bool {
        matches!(self.result, DamageResult::Damaged | DamageResult::Destroyed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Rotation {rotation:?} does not fit rotation mode of '{definition}'")]
    RotationMismatch {
        definition: String,
        rotation: Rotation,
    },
    #[error("Scale {scale} outside spawn range of '{definition}'")]
    InvalidScale { definition: String, scale: f32 },
    #[error("Variation {variation:?} invalid for '{definition}'")]
    InvalidVariation {
        definition: String,
        variation: Option<u8>,
    },
    #[error("Position {0:?} is not finite")]
    InvalidPosition(Vec2),
}

/// Where and how an obstacle is placed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: Vec2,
    pub rotation: Rotation,
    pub scale: f32,
    pub variation: Option<u8>,
}

// ============================================================================
// Geometry
// ============================================================================

/// Hitbox and body shape of one obstacle, rescaled as a unit.
///
/// Both are held relative to the obstacle's anchor so repeated rescaling works
/// on small local coordinates; the world-space hitbox is a translation away.
#[derive(Debug, Clone)]
pub struct ObstacleGeometry {
    position: Vec2,
    local: Hitbox,
    shape: BodyShape,
}

impl ObstacleGeometry {
    pub fn place(template: &HitboxTemplate, position: Vec2, scale: f32, rotation: Rotation) -> Self {
        let local = template.transform(Vec2::ZERO, scale, rotation);
        Self {
            position,
            local,
            shape: BodyShape::from_hitbox(&local, Vec2::ZERO),
        }
    }

    /// Scale hitbox and body shape by `factor` about the anchor
    pub fn rescale(&mut self, factor: f32) {
        self.local = self.local.transform(Vec2::ZERO, factor, Rotation::None);
        self.shape = self.shape.scaled(factor);
        debug_assert!(
            self.is_consistent(),
            "hitbox {:?} and body shape {:?} diverged",
            self.local,
            self.shape
        );
    }

    pub fn is_consistent(&self) -> bool {
        BodyShape::from_hitbox(&self.local, Vec2::ZERO).approx_eq(&self.shape, GEOMETRY_EPSILON)
    }

    /// World-space hitbox
    pub fn hitbox(&self) -> Hitbox {
        self.local.translate(Vec2::ZERO, self.position)
    }

    /// Body shape relative to the body origin (the obstacle position)
    pub fn body_shape(&self) -> &BodyShape {
        &self.shape
    }
}

// ============================================================================
// Obstacle
// ============================================================================

#[derive(Debug)]
pub struct Obstacle {
    id: ObjectId,
    definition: Arc<ObstacleDefinition>,
    position: Vec2,
    rotation: Rotation,
    variation: Option<u8>,
    health: f32,
    max_health: f32,
    health_fraction: f32,
    scale: f32,
    max_scale: f32,
    dead: bool,
    geometry: ObstacleGeometry,
    body: Option<BodyHandle>,
    loot: LootList,
}

impl Obstacle {
    /// Place a new obstacle and create its physics body
    pub fn spawn<P: PhysicsWorld + ?Sized>(
        id: ObjectId,
        definition: Arc<ObstacleDefinition>,
        placement: Placement,
        loot: LootList,
        physics: &mut P,
    ) -> Result<Self, SpawnError> {
        let Placement {
            position,
            rotation,
            scale,
            variation,
        } = placement;
        let name = || definition.id_string.clone();

        if !position.is_finite() {
            return Err(SpawnError::InvalidPosition(position));
        }
        if !rotation.fits(definition.rotation_mode) {
            return Err(SpawnError::RotationMismatch {
                definition: name(),
                rotation,
            });
        }
        let range = definition.scale;
        if !(scale.is_finite() && scale >= range.spawn_min && scale <= range.spawn_max) {
            return Err(SpawnError::InvalidScale {
                definition: name(),
                scale,
            });
        }
        let variation_ok = match (definition.variations, variation) {
            (None, None) => true,
            (Some(count), Some(v)) => v < count,
            _ => false,
        };
        if !variation_ok {
            return Err(SpawnError::InvalidVariation {
                definition: name(),
                variation,
            });
        }

        let geometry = ObstacleGeometry::place(&definition.hitbox, position, scale, rotation);
        let body = physics.create_body(
            position,
            geometry.body_shape().clone(),
            definition.no_collisions,
        );

        Ok(Self {
            id,
            position,
            rotation,
            variation,
            health: definition.health,
            max_health: definition.health,
            health_fraction: 1.0,
            scale,
            max_scale: scale,
            dead: false,
            geometry,
            body: Some(body),
            loot,
            definition,
        })
    }

    /// Apply damage from `source`, dealt with `weapon` if any
    pub fn damage(
        &mut self,
        amount: f32,
        source: DamageSource,
        weapon: Option<&ItemDefinition>,
    ) -> DamageOutcome {
        if self.dead {
            return DamageOutcome::ignored(DamageResult::Dead);
        }
        if self.definition.invulnerable {
            return DamageOutcome::ignored(DamageResult::Invulnerable);
        }
        if self.definition.impenetrable && !weapon.is_some_and(ItemDefinition::pierces) {
            return DamageOutcome::ignored(DamageResult::Impenetrable);
        }
        if !(amount.is_finite() && amount >= 0.0) {
            return DamageOutcome::ignored(DamageResult::InvalidAmount);
        }

        self.health = (self.health - amount).max(0.0);
        if self.health <= 0.0 {
            return DamageOutcome {
                result: DamageResult::Destroyed,
                effects: self.die(source),
            };
        }

        self.health_fraction = self.health / self.max_health;
        let destroy = self.definition.scale.destroy;
        let old_scale = self.scale;
        self.scale = self.health_fraction * (self.max_scale - destroy) + destroy;
        let factor = self.scale / old_scale;
        self.geometry.rescale(factor);

        let mut effects = Effects::new();
        if let Some(handle) = self.body {
            effects.push(Effect::ReshapeBody {
                handle,
                shape: self.geometry.body_shape().clone(),
            });
        }
        effects.push(Effect::MarkDirty {
            id: self.id,
            full: false,
        });

        tracing::debug!(
            id = self.id.0,
            health = self.health,
            scale = self.scale,
            "Obstacle damaged"
        );

        DamageOutcome {
            result: DamageResult::Damaged,
            effects,
        }
    }

    /// Force death regardless of health or invulnerability.
    /// Returns no effects if already dead.
    pub fn kill(&mut self, source: DamageSource) -> Effects {
        if self.dead {
            return Effects::new();
        }
        self.die(source)
    }

    fn die(&mut self, source: DamageSource) -> Effects {
        debug_assert!(!self.dead, "obstacle {:?} died twice", self.id);
        self.health = 0.0;
        self.health_fraction = 0.0;
        self.dead = true;
        self.scale = self.definition.scale.destroy;

        let mut effects = Effects::new();
        if let Some(handle) = self.body.take() {
            effects.push(Effect::DestroyBody(handle));
        }
        effects.push(Effect::MarkDirty {
            id: self.id,
            full: false,
        });
        if let Some(explosion) = self.definition.explosion {
            effects.push(Effect::SpawnExplosion {
                explosion,
                origin: self.id,
                position: self.position,
                source,
            });
        }
        for item in std::mem::take(&mut self.loot) {
            effects.push(Effect::SpawnLoot {
                item,
                position: self.position,
            });
        }

        tracing::debug!(
            id = self.id.0,
            definition = %self.definition.id_string,
            effects = effects.len(),
            "Obstacle destroyed"
        );
        effects
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn definition(&self) -> &Arc<ObstacleDefinition> {
        &self.definition
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn variation(&self) -> Option<u8> {
        self.variation
    }

    pub fn health(&self) -> f32 {
        self.health
    }

    pub fn max_health(&self) -> f32 {
        self.max_health
    }

    pub fn health_fraction(&self) -> f32 {
        self.health_fraction
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn max_scale(&self) -> f32 {
        self.max_scale
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn hitbox(&self) -> Hitbox {
        self.geometry.hitbox()
    }

    pub fn geometry(&self) -> &ObstacleGeometry {
        &self.geometry
    }

    pub fn body(&self) -> Option<BodyHandle> {
        self.body
    }

    /// Loot still waiting to drop
    pub fn loot(&self) -> &[LootItem] {
        &self.loot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::definitions::Definitions;
    use crate::game::physics::BodyRegistry;

    const EPSILON: f32 = 1e-4;

    const TEST_DEFINITIONS: &str = r#"{
        "items": [
            {"id": "9mm", "name": "9mm", "type": "ammo"},
            {"id": "fists", "name": "Fists", "type": "melee"},
            {"id": "axe", "name": "Axe", "type": "melee", "piercing_multiplier": 1.5},
            {"id": "g19", "name": "G19", "type": "gun", "ammo": "9mm", "ammo_spawn_amount": 30}
        ],
        "explosions": [{"id": "boom", "damage": 100, "radius": 10}],
        "obstacles": [
            {
                "id": "crate", "name": "Crate", "health": 100,
                "scale": {"spawn_min": 1.0, "spawn_max": 1.0, "destroy": 0.5},
                "hitbox": {"type": "rectangle", "min": {"x": -4, "y": -2}, "max": {"x": 4, "y": 2}},
                "rotation_mode": "limited"
            },
            {
                "id": "barrel", "name": "Barrel", "health": 100,
                "scale": {"spawn_min": 1.0, "spawn_max": 1.0, "destroy": 0.5},
                "hitbox": {"type": "circle", "radius": 3},
                "rotation_mode": "full",
                "explosion": "boom"
            },
            {
                "id": "wall", "name": "Wall", "health": 100,
                "scale": {"spawn_min": 1.0, "spawn_max": 1.0, "destroy": 0.5},
                "hitbox": {"type": "rectangle", "min": {"x": -5, "y": -1}, "max": {"x": 5, "y": 1}},
                "invulnerable": true
            },
            {
                "id": "vault", "name": "Vault", "health": 100,
                "scale": {"spawn_min": 1.0, "spawn_max": 1.0, "destroy": 0.5},
                "hitbox": {"type": "circle", "radius": 3},
                "impenetrable": true
            }
        ]
    }"#;

    struct Fixture {
        defs: Definitions,
        physics: BodyRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                defs: Definitions::from_json(TEST_DEFINITIONS).unwrap(),
                physics: BodyRegistry::new(),
            }
        }

        fn spawn(&mut self, name: &str, rotation: Rotation, loot: LootList) -> Obstacle {
            let def = self.defs.obstacle_by_name(name).unwrap().clone();
            Obstacle::spawn(
                ObjectId(7),
                def,
                Placement {
                    position: Vec2::new(100.0, 200.0),
                    rotation,
                    scale: 1.0,
                    variation: None,
                },
                loot,
                &mut self.physics,
            )
            .unwrap()
        }

        fn item(&self, name: &str) -> &ItemDefinition {
            self.defs.item_by_name(name).unwrap()
        }
    }

    fn player() -> DamageSource {
        DamageSource::Player(Uuid::nil())
    }

    #[test]
    fn test_non_lethal_damage_shrinks() {
        let mut fx = Fixture::new();
        let mut crate_ = fx.spawn("crate", Rotation::Orientation(1), LootList::new());

        let outcome = crate_.damage(40.0, player(), None);
        assert_eq!(outcome.result, DamageResult::Damaged);
        assert_eq!(crate_.health(), 60.0);
        assert!((crate_.health_fraction() - 0.6).abs() < EPSILON);
        assert!((crate_.scale() - 0.8).abs() < EPSILON);
        assert!(!crate_.is_dead());
        assert!(crate_.geometry().is_consistent());

        // Same geometry as placing the template directly at the new scale
        let template = crate_.definition().hitbox;
        let direct = template.transform(crate_.position(), 0.8, Rotation::Orientation(1));
        assert!(crate_.hitbox().approx_eq(&direct, EPSILON));

        assert!(matches!(
            outcome.effects.as_slice(),
            [
                Effect::ReshapeBody { .. },
                Effect::MarkDirty { id: ObjectId(7), full: false }
            ]
        ));
    }

    #[test]
    fn test_reshape_matches_body_scaled_by_factor() {
        let mut fx = Fixture::new();
        let mut barrel = fx.spawn("barrel", Rotation::Angle(0.3), LootList::new());
        let handle = barrel.body().unwrap();
        let before = fx.physics.shape(handle).unwrap().clone();

        let outcome = barrel.damage(50.0, player(), None);
        let Some(Effect::ReshapeBody { shape, .. }) = outcome.effects.first() else {
            panic!("expected reshape, got {:?}", outcome.effects);
        };
        // 0.5 * (1.0 - 0.5) + 0.5
        assert!(shape.approx_eq(&before.scaled(0.75), EPSILON));
        match barrel.hitbox() {
            Hitbox::Circle { radius, .. } => assert!((radius - 2.25).abs() < EPSILON),
            other => panic!("expected circle, got {:?}", other),
        }
    }

    #[test]
    fn test_repeated_hits_keep_geometry_consistent() {
        let mut fx = Fixture::new();
        let mut crate_ = fx.spawn("crate", Rotation::Orientation(3), LootList::new());
        let mut last_scale = crate_.scale();
        for _ in 0..9 {
            crate_.damage(9.5, player(), None);
            assert!(crate_.scale() < last_scale);
            assert!(crate_.scale() > 0.5);
            assert!(crate_.geometry().is_consistent());
            last_scale = crate_.scale();
        }
        let template = crate_.definition().hitbox;
        let direct = template.transform(crate_.position(), crate_.scale(), Rotation::Orientation(3));
        assert!(crate_.hitbox().approx_eq(&direct, 1e-3));
    }

    #[test]
    fn test_lethal_damage() {
        let mut fx = Fixture::new();
        let gun = fx.item("g19").id;
        let ammo = fx.item("9mm").id;
        let loot: LootList = [
            LootItem::single(gun),
            LootItem {
                item: ammo,
                count: 30,
            },
        ]
        .into_iter()
        .collect();
        let mut crate_ = fx.spawn("crate", Rotation::Orientation(0), loot);
        let handle = crate_.body().unwrap();

        let outcome = crate_.damage(100.0, player(), None);
        assert_eq!(outcome.result, DamageResult::Destroyed);
        assert_eq!(crate_.health(), 0.0);
        assert!(crate_.is_dead());
        assert_eq!(crate_.scale(), 0.5);
        assert!(crate_.body().is_none());
        assert!(crate_.loot().is_empty());

        let position = crate_.position();
        assert_eq!(
            outcome.effects.as_slice(),
            &[
                Effect::DestroyBody(handle),
                Effect::MarkDirty {
                    id: ObjectId(7),
                    full: false
                },
                Effect::SpawnLoot {
                    item: LootItem::single(gun),
                    position
                },
                Effect::SpawnLoot {
                    item: LootItem {
                        item: ammo,
                        count: 30
                    },
                    position
                },
            ]
        );
    }

    #[test]
    fn test_overkill_clamps_health() {
        let mut fx = Fixture::new();
        let mut crate_ = fx.spawn("crate", Rotation::Orientation(0), LootList::new());
        crate_.damage(250.0, player(), None);
        assert_eq!(crate_.health(), 0.0);
        assert!(crate_.is_dead());
    }

    #[test]
    fn test_explosion_attributed_to_source() {
        let mut fx = Fixture::new();
        let mut barrel = fx.spawn("barrel", Rotation::Angle(0.0), LootList::new());
        let source = DamageSource::Player(Uuid::from_u128(42));
        let outcome = barrel.damage(150.0, source, None);
        assert!(outcome.effects.iter().any(|e| matches!(
            e,
            Effect::SpawnExplosion { source: s, position, .. }
                if *s == source && *position == Vec2::new(100.0, 200.0)
        )));
    }

    #[test]
    fn test_dead_obstacle_ignores_everything() {
        let mut fx = Fixture::new();
        let mut crate_ = fx.spawn("crate", Rotation::Orientation(0), LootList::new());
        crate_.damage(100.0, player(), None);

        let outcome = crate_.damage(10.0, player(), None);
        assert_eq!(outcome.result, DamageResult::Dead);
        assert!(outcome.effects.is_empty());
        assert!(crate_.kill(DamageSource::World).is_empty());
        assert_eq!(crate_.scale(), 0.5);
        assert_eq!(crate_.health(), 0.0);
    }

    #[test]
    fn test_invulnerable_ignores_damage() {
        let mut fx = Fixture::new();
        let mut wall = fx.spawn("wall", Rotation::None, LootList::new());
        let outcome = wall.damage(1000.0, player(), None);
        assert_eq!(outcome.result, DamageResult::Invulnerable);
        assert!(!outcome.applied());
        assert_eq!(wall.health(), 100.0);
        assert!(!wall.is_dead());
        assert_eq!(wall.scale(), 1.0);
    }

    #[test]
    fn test_impenetrable_needs_piercing_melee() {
        let mut fx = Fixture::new();
        let mut vault = fx.spawn("vault", Rotation::None, LootList::new());

        let gun = fx.item("g19").clone();
        let fists = fx.item("fists").clone();
        let axe = fx.item("axe").clone();

        assert_eq!(vault.damage(10.0, player(), None).result, DamageResult::Impenetrable);
        assert_eq!(
            vault.damage(10.0, player(), Some(&gun)).result,
            DamageResult::Impenetrable
        );
        assert_eq!(
            vault.damage(10.0, player(), Some(&fists)).result,
            DamageResult::Impenetrable
        );
        assert_eq!(vault.health(), 100.0);

        assert_eq!(vault.damage(10.0, player(), Some(&axe)).result, DamageResult::Damaged);
        assert_eq!(vault.health(), 90.0);
    }

    #[test]
    fn test_kill_bypasses_invulnerability() {
        let mut fx = Fixture::new();
        let mut wall = fx.spawn("wall", Rotation::None, LootList::new());
        let effects = wall.kill(DamageSource::World);
        assert!(wall.is_dead());
        assert!(matches!(effects[0], Effect::DestroyBody(_)));
    }

    #[test]
    fn test_invalid_amount_ignored() {
        let mut fx = Fixture::new();
        let mut crate_ = fx.spawn("crate", Rotation::Orientation(0), LootList::new());
        assert_eq!(
            crate_.damage(-5.0, player(), None).result,
            DamageResult::InvalidAmount
        );
        assert_eq!(
            crate_.damage(f32::NAN, player(), None).result,
            DamageResult::InvalidAmount
        );
        assert_eq!(crate_.health(), 100.0);
    }

    #[test]
    fn test_spawn_validates_placement() {
        let mut fx = Fixture::new();
        let def = fx.defs.obstacle_by_name("crate").unwrap().clone();
        let placement = Placement {
            position: Vec2::new(10.0, 10.0),
            rotation: Rotation::Angle(1.0),
            scale: 1.0,
            variation: None,
        };
        assert!(matches!(
            Obstacle::spawn(ObjectId(1), def.clone(), placement, LootList::new(), &mut fx.physics),
            Err(SpawnError::RotationMismatch { .. })
        ));

        let placement = Placement {
            rotation: Rotation::Orientation(2),
            scale: 2.0,
            ..placement
        };
        assert!(matches!(
            Obstacle::spawn(ObjectId(1), def.clone(), placement, LootList::new(), &mut fx.physics),
            Err(SpawnError::InvalidScale { .. })
        ));

        let placement = Placement {
            scale: 1.0,
            variation: Some(0),
            ..placement
        };
        assert!(matches!(
            Obstacle::spawn(ObjectId(1), def, placement, LootList::new(), &mut fx.physics),
            Err(SpawnError::InvalidVariation { .. })
        ));
        assert_eq!(fx.physics.live_count(), 0);
    }

    #[test]
    fn test_spawn_creates_matching_body() {
        let mut fx = Fixture::new();
        let crate_ = fx.spawn("crate", Rotation::Orientation(1), LootList::new());
        let body = fx.physics.body(crate_.body().unwrap()).unwrap();
        assert_eq!(body.position, crate_.position());
        assert!(body
            .shape
            .approx_eq(&BodyShape::from_hitbox(&crate_.hitbox(), crate_.position()), EPSILON));
        assert!(crate_.loot().is_empty());
    }
}
