//! Static game definitions: items, explosions, obstacles, loot tables
//!
//! Definitions are authored as JSON with string identifiers and resolved at load
//! into compact numeric ids. Loading runs every static check the simulation
//! relies on (unknown references, zero-weight tables, tier cycles, scale ranges,
//! hitbox/rotation compatibility), so nothing downstream re-validates.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::game::constants::{loot, obstacle};
use crate::game::hitbox::{HitboxTemplate, RotationMode};
use crate::net::wire::WireConfig;

/// Definitions shipped with the server
const BUNDLED_DEFINITIONS: &str = include_str!("../../data/definitions.json");

/// Loot entry name that resolves to no item
pub const NOTHING: &str = "nothing";

static DEFINITIONS: OnceLock<Definitions> = OnceLock::new();

// ============================================================================
// Identifiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObstacleDefId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplosionId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LootTableId(pub u16);

// ============================================================================
// Errors
// ============================================================================

/// Problems found while loading or validating definitions
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Definitions parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to read definitions from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Duplicate {kind} id '{id}'")]
    Duplicate { kind: &'static str, id: String },
    #[error("Too many {kind} definitions: {count}")]
    TooMany { kind: &'static str, count: usize },
    #[error("'{owner}' references unknown {kind} '{id}'")]
    UnknownReference {
        owner: String,
        kind: &'static str,
        id: String,
    },
    #[error("Item '{id}': {reason}")]
    InvalidItem { id: String, reason: String },
    #[error("Explosion '{0}' needs non-negative damage and a positive radius")]
    InvalidExplosion(String),
    #[error("Obstacle '{id}': {reason}")]
    InvalidObstacle { id: String, reason: String },
    #[error("Loot table '{table}': {reason}")]
    InvalidLootTable { table: String, reason: String },
    #[error("Loot table '{0}' has zero total weight")]
    ZeroWeight(String),
    #[error("Loot tier cycle: {}", .0.join(" -> "))]
    TierCycle(Vec<String>),
}

// ============================================================================
// Items and explosions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Gun { ammo: ItemId, ammo_spawn_amount: u16 },
    Ammo,
    Melee { piercing_multiplier: f32 },
    Healing,
    Other,
}

#[derive(Debug, Clone)]
pub struct ItemDefinition {
    pub id: ItemId,
    pub id_string: String,
    pub name: String,
    pub kind: ItemKind,
}

impl ItemDefinition {
    /// Companion ammo spawned next to this item, if any
    pub fn companion_ammo(&self) -> Option<(ItemId, u16)> {
        match self.kind {
            ItemKind::Gun {
                ammo,
                ammo_spawn_amount,
            } if ammo_spawn_amount > 0 => Some((ammo, ammo_spawn_amount)),
            _ => None,
        }
    }

    /// Melee weapon able to damage impenetrable obstacles
    pub fn pierces(&self) -> bool {
        matches!(self.kind, ItemKind::Melee { piercing_multiplier } if piercing_multiplier > 0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplosionDefinition {
    pub id: ExplosionId,
    pub id_string: String,
    pub damage: f32,
    pub radius: f32,
}

// ============================================================================
// Obstacles
// ============================================================================

/// Scale bounds of an obstacle definition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    pub spawn_min: f32,
    pub spawn_max: f32,
    /// Scale reported once destroyed, also the floor of damage shrinking
    pub destroy: f32,
}

#[derive(Debug, Clone)]
pub struct ObstacleDefinition {
    pub id: ObstacleDefId,
    pub id_string: String,
    pub name: String,
    pub health: f32,
    pub scale: ScaleRange,
    /// Hitbox at scale 1, no rotation, anchored at the local origin
    pub hitbox: HitboxTemplate,
    pub rotation_mode: RotationMode,
    pub invulnerable: bool,
    pub impenetrable: bool,
    pub explosion: Option<ExplosionId>,
    pub loot_table: Option<LootTableId>,
    /// Number of visual variations; `None` means the field is never sent
    pub variations: Option<u8>,
    pub no_collisions: bool,
}

// ============================================================================
// Loot tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LootEntryKind {
    Item(ItemId),
    Tier(LootTableId),
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LootEntry {
    pub kind: LootEntryKind,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct LootTable {
    pub id: LootTableId,
    pub id_string: String,
    /// Inclusive draw count range
    pub min: u32,
    pub max: u32,
    pub entries: Vec<LootEntry>,
    pub total_weight: f64,
}

impl LootTable {
    /// Build a table directly, bypassing load-time validation
    pub fn new(id: LootTableId, id_string: &str, min: u32, max: u32, entries: Vec<LootEntry>) -> Self {
        let total_weight = entries.iter().map(|e| e.weight).sum();
        Self {
            id,
            id_string: id_string.to_string(),
            min,
            max,
            entries,
            total_weight,
        }
    }
}

// ============================================================================
// Raw JSON forms
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDefinitions {
    #[serde(default)]
    items: Vec<RawItem>,
    #[serde(default)]
    explosions: Vec<RawExplosion>,
    #[serde(default)]
    obstacles: Vec<RawObstacle>,
    #[serde(default)]
    loot_tables: Vec<RawLootTable>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    name: String,
    #[serde(flatten)]
    kind: RawItemKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawItemKind {
    Gun {
        ammo: String,
        #[serde(default)]
        ammo_spawn_amount: u16,
    },
    Ammo,
    Melee {
        #[serde(default)]
        piercing_multiplier: f32,
    },
    Healing,
    Other,
}

#[derive(Debug, Deserialize)]
struct RawExplosion {
    id: String,
    damage: f32,
    radius: f32,
}

#[derive(Debug, Deserialize)]
struct RawObstacle {
    id: String,
    name: String,
    health: f32,
    scale: ScaleRange,
    hitbox: HitboxTemplate,
    #[serde(default)]
    rotation_mode: RotationMode,
    #[serde(default)]
    invulnerable: bool,
    #[serde(default)]
    impenetrable: bool,
    #[serde(default)]
    explosion: Option<String>,
    #[serde(default)]
    loot_table: Option<String>,
    #[serde(default)]
    variations: Option<u8>,
    #[serde(default)]
    no_collisions: bool,
}

#[derive(Debug, Deserialize)]
struct RawLootTable {
    id: String,
    min: u32,
    max: u32,
    entries: Vec<RawLootEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLootEntry {
    Item { item: String, weight: f64 },
    Tier { tier: String, weight: f64 },
}

// ============================================================================
// Registry
// ============================================================================

/// Resolved, validated definition tables
#[derive(Debug)]
pub struct Definitions {
    items: Vec<ItemDefinition>,
    explosions: Vec<ExplosionDefinition>,
    obstacles: Vec<Arc<ObstacleDefinition>>,
    loot_tables: Vec<LootTable>,
    item_index: HashMap<String, ItemId>,
    explosion_index: HashMap<String, ExplosionId>,
    obstacle_index: HashMap<String, ObstacleDefId>,
    loot_index: HashMap<String, LootTableId>,
}

/// Assign sequential ids, rejecting duplicates and tables too large for a u16 id
fn index_names<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, u16>, ConfigError> {
    let mut index = HashMap::new();
    for (i, name) in names.enumerate() {
        let id = u16::try_from(i).map_err(|_| ConfigError::TooMany { kind, count: i + 1 })?;
        if index.insert(name.to_string(), id).is_some() {
            return Err(ConfigError::Duplicate {
                kind,
                id: name.to_string(),
            });
        }
    }
    Ok(index)
}

fn lookup(
    index: &HashMap<String, u16>,
    owner: &str,
    kind: &'static str,
    id: &str,
) -> Result<u16, ConfigError> {
    index
        .get(id)
        .copied()
        .ok_or_else(|| ConfigError::UnknownReference {
            owner: owner.to_string(),
            kind,
            id: id.to_string(),
        })
}

impl Definitions {
    /// Parse and validate a JSON definition document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawDefinitions = serde_json::from_str(json)?;
        Self::resolve(raw)
    }

    /// Load definitions from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Definitions compiled into the binary
    pub fn bundled() -> Result<Self, ConfigError> {
        Self::from_json(BUNDLED_DEFINITIONS)
    }

    /// Install process-wide definitions. The first installation wins;
    /// the installed set is returned either way.
    pub fn install(definitions: Definitions) -> &'static Definitions {
        DEFINITIONS.get_or_init(|| definitions)
    }

    /// Process-wide definitions, installing the bundled set if none are yet
    pub fn global() -> Result<&'static Self, ConfigError> {
        if let Some(definitions) = DEFINITIONS.get() {
            return Ok(definitions);
        }
        Ok(Self::install(Self::bundled()?))
    }

    fn resolve(raw: RawDefinitions) -> Result<Self, ConfigError> {
        if raw.items.iter().any(|i| i.id == NOTHING) {
            return Err(ConfigError::InvalidItem {
                id: NOTHING.to_string(),
                reason: "name is reserved for empty loot entries".to_string(),
            });
        }

        let item_index = index_names("item", raw.items.iter().map(|i| i.id.as_str()))?;
        let explosion_index =
            index_names("explosion", raw.explosions.iter().map(|e| e.id.as_str()))?;
        let obstacle_index = index_names("obstacle", raw.obstacles.iter().map(|o| o.id.as_str()))?;
        let loot_index = index_names("loot table", raw.loot_tables.iter().map(|t| t.id.as_str()))?;

        // Items
        let mut items = Vec::with_capacity(raw.items.len());
        for (i, item) in raw.items.iter().enumerate() {
            let kind = match &item.kind {
                RawItemKind::Gun {
                    ammo,
                    ammo_spawn_amount,
                } => {
                    let ammo_id = lookup(&item_index, &item.id, "item", ammo)?;
                    if !matches!(raw.items[ammo_id as usize].kind, RawItemKind::Ammo) {
                        return Err(ConfigError::InvalidItem {
                            id: item.id.clone(),
                            reason: format!("ammo '{}' is not an ammo item", ammo),
                        });
                    }
                    ItemKind::Gun {
                        ammo: ItemId(ammo_id),
                        ammo_spawn_amount: *ammo_spawn_amount,
                    }
                }
                RawItemKind::Ammo => ItemKind::Ammo,
                RawItemKind::Melee {
                    piercing_multiplier,
                } => {
                    if !piercing_multiplier.is_finite() || *piercing_multiplier < 0.0 {
                        return Err(ConfigError::InvalidItem {
                            id: item.id.clone(),
                            reason: format!("invalid piercing multiplier {}", piercing_multiplier),
                        });
                    }
                    ItemKind::Melee {
                        piercing_multiplier: *piercing_multiplier,
                    }
                }
                RawItemKind::Healing => ItemKind::Healing,
                RawItemKind::Other => ItemKind::Other,
            };
            items.push(ItemDefinition {
                id: ItemId(i as u16),
                id_string: item.id.clone(),
                name: item.name.clone(),
                kind,
            });
        }

        // Explosions
        let mut explosions = Vec::with_capacity(raw.explosions.len());
        for (i, explosion) in raw.explosions.into_iter().enumerate() {
            if !(explosion.damage.is_finite() && explosion.damage >= 0.0)
                || !(explosion.radius.is_finite() && explosion.radius > 0.0)
            {
                return Err(ConfigError::InvalidExplosion(explosion.id));
            }
            explosions.push(ExplosionDefinition {
                id: ExplosionId(i as u16),
                id_string: explosion.id,
                damage: explosion.damage,
                radius: explosion.radius,
            });
        }

        // Loot tables
        let mut loot_tables = Vec::with_capacity(raw.loot_tables.len());
        for (i, table) in raw.loot_tables.iter().enumerate() {
            let invalid = |reason: String| ConfigError::InvalidLootTable {
                table: table.id.clone(),
                reason,
            };
            if table.min > table.max || table.max > loot::MAX_DRAWS {
                return Err(invalid(format!(
                    "draw range [{}, {}] must satisfy min <= max <= {}",
                    table.min,
                    table.max,
                    loot::MAX_DRAWS
                )));
            }
            if table.entries.is_empty() {
                return Err(invalid("no entries".to_string()));
            }
            let mut entries = Vec::with_capacity(table.entries.len());
            for entry in &table.entries {
                let (kind, weight) = match entry {
                    RawLootEntry::Item { item, weight } if item == NOTHING => {
                        (LootEntryKind::Nothing, *weight)
                    }
                    RawLootEntry::Item { item, weight } => (
                        LootEntryKind::Item(ItemId(lookup(&item_index, &table.id, "item", item)?)),
                        *weight,
                    ),
                    RawLootEntry::Tier { tier, weight } => (
                        LootEntryKind::Tier(LootTableId(lookup(
                            &loot_index,
                            &table.id,
                            "loot table",
                            tier,
                        )?)),
                        *weight,
                    ),
                };
                if !weight.is_finite() || weight < 0.0 {
                    return Err(invalid(format!("invalid weight {}", weight)));
                }
                entries.push(LootEntry { kind, weight });
            }
            let resolved =
                LootTable::new(LootTableId(i as u16), &table.id, table.min, table.max, entries);
            if resolved.total_weight <= 0.0 {
                return Err(ConfigError::ZeroWeight(table.id.clone()));
            }
            loot_tables.push(resolved);
        }
        check_tier_cycles(&loot_tables)?;

        // Obstacles
        let mut obstacles = Vec::with_capacity(raw.obstacles.len());
        for (i, obs) in raw.obstacles.into_iter().enumerate() {
            validate_obstacle(&obs)?;
            let explosion = obs
                .explosion
                .as_deref()
                .map(|e| lookup(&explosion_index, &obs.id, "explosion", e).map(ExplosionId))
                .transpose()?;
            let loot_table = obs
                .loot_table
                .as_deref()
                .map(|t| lookup(&loot_index, &obs.id, "loot table", t).map(LootTableId))
                .transpose()?;
            obstacles.push(Arc::new(ObstacleDefinition {
                id: ObstacleDefId(i as u16),
                id_string: obs.id,
                name: obs.name,
                health: obs.health,
                scale: obs.scale,
                hitbox: obs.hitbox,
                rotation_mode: obs.rotation_mode,
                invulnerable: obs.invulnerable,
                impenetrable: obs.impenetrable,
                explosion,
                loot_table,
                variations: obs.variations,
                no_collisions: obs.no_collisions,
            }));
        }

        tracing::debug!(
            items = items.len(),
            obstacles = obstacles.len(),
            loot_tables = loot_tables.len(),
            "Definitions loaded"
        );

        Ok(Self {
            items,
            explosions,
            obstacles,
            loot_tables,
            item_index: item_index.into_iter().map(|(k, v)| (k, ItemId(v))).collect(),
            explosion_index: explosion_index
                .into_iter()
                .map(|(k, v)| (k, ExplosionId(v)))
                .collect(),
            obstacle_index: obstacle_index
                .into_iter()
                .map(|(k, v)| (k, ObstacleDefId(v)))
                .collect(),
            loot_index: loot_index
                .into_iter()
                .map(|(k, v)| (k, LootTableId(v)))
                .collect(),
        })
    }

    /// Every obstacle's scale range must be encodable under `wire`
    pub fn check_wire_compat(&self, wire: &WireConfig) -> Result<(), ConfigError> {
        for def in &self.obstacles {
            let ScaleRange {
                spawn_min,
                spawn_max,
                destroy,
            } = def.scale;
            if ![spawn_min, spawn_max, destroy]
                .iter()
                .all(|s| wire.contains_scale(*s))
            {
                return Err(ConfigError::InvalidObstacle {
                    id: def.id_string.clone(),
                    reason: format!(
                        "scale range outside encodable [{}, {}]",
                        wire.scale_min, wire.scale_max
                    ),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn item(&self, id: ItemId) -> Option<&ItemDefinition> {
        self.items.get(id.0 as usize)
    }

    pub fn item_by_name(&self, name: &str) -> Option<&ItemDefinition> {
        self.item_index.get(name).and_then(|id| self.item(*id))
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.iter()
    }

    pub fn explosion(&self, id: ExplosionId) -> Option<&ExplosionDefinition> {
        self.explosions.get(id.0 as usize)
    }

    pub fn obstacle(&self, id: ObstacleDefId) -> Option<&Arc<ObstacleDefinition>> {
        self.obstacles.get(id.0 as usize)
    }

    pub fn obstacle_by_name(&self, name: &str) -> Option<&Arc<ObstacleDefinition>> {
        self.obstacle_index.get(name).and_then(|id| self.obstacle(*id))
    }

    pub fn obstacles(&self) -> impl Iterator<Item = &Arc<ObstacleDefinition>> {
        self.obstacles.iter()
    }

    pub fn loot_table(&self, id: LootTableId) -> Option<&LootTable> {
        self.loot_tables.get(id.0 as usize)
    }

    pub fn loot_table_by_name(&self, name: &str) -> Option<&LootTable> {
        self.loot_index.get(name).and_then(|id| self.loot_table(*id))
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    /// Register a table without validation. Only for building
    /// deliberately broken tables in tests of the runtime guards.
    #[cfg(test)]
    pub(crate) fn push_unchecked_table(&mut self, mut table: LootTable) -> LootTableId {
        let id = LootTableId(self.loot_tables.len() as u16);
        table.id = id;
        self.loot_index.insert(table.id_string.clone(), id);
        self.loot_tables.push(table);
        id
    }
}

fn validate_obstacle(obs: &RawObstacle) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidObstacle {
        id: obs.id.clone(),
        reason: reason.to_string(),
    };
    if !(obs.health.is_finite() && obs.health > 0.0) {
        return Err(invalid("health must be positive"));
    }
    let ScaleRange {
        spawn_min,
        spawn_max,
        destroy,
    } = obs.scale;
    if ![spawn_min, spawn_max, destroy].iter().all(|s| s.is_finite() && *s > 0.0) {
        return Err(invalid("scales must be positive"));
    }
    if spawn_min > spawn_max {
        return Err(invalid("spawn_min exceeds spawn_max"));
    }
    if destroy > spawn_min {
        return Err(invalid("destroy scale exceeds spawn_min"));
    }
    if !obs.hitbox.is_valid() {
        return Err(invalid("malformed hitbox"));
    }
    if obs.hitbox.is_rectangle() && obs.rotation_mode == RotationMode::Full {
        return Err(invalid("rectangle hitboxes only support quarter-turn rotation"));
    }
    if let Some(count) = obs.variations {
        if count == 0 || count > obstacle::MAX_VARIATIONS {
            return Err(invalid("variations must be 1-128"));
        }
    }
    Ok(())
}

/// Reject tier references that loop back on themselves
fn check_tier_cycles(tables: &[LootTable]) -> Result<(), ConfigError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        tables: &[LootTable],
        index: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Result<(), ConfigError> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = path.iter().position(|&i| i == index).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&i| tables[i].id_string.clone())
                    .collect();
                cycle.push(tables[index].id_string.clone());
                return Err(ConfigError::TierCycle(cycle));
            }
            Mark::Unvisited => {}
        }
        marks[index] = Mark::InProgress;
        path.push(index);
        for entry in &tables[index].entries {
            if let LootEntryKind::Tier(LootTableId(next)) = entry.kind {
                visit(tables, next as usize, marks, path)?;
            }
        }
        path.pop();
        marks[index] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; tables.len()];
    let mut path = Vec::new();
    for index in 0..tables.len() {
        visit(tables, index, &mut marks, &mut path)?;
    }
    Ok(())
}
