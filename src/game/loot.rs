//! Weighted loot resolution
//!
//! A table draws `n` in `[min, max]` times. Each draw selects one entry with
//! probability proportional to its weight. A tier entry makes exactly one more
//! weighted draw in the referenced table (recursing if that lands on another
//! tier), a `nothing` entry yields no item, and guns bring their ammo along.

use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::constants::loot::MAX_TIER_DEPTH;
use crate::game::definitions::{
    Definitions, ItemId, LootEntry, LootEntryKind, LootTable, LootTableId,
};

/// A resolved drop: one item stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LootItem {
    pub item: ItemId,
    pub count: u16,
}

impl LootItem {
    pub fn single(item: ItemId) -> Self {
        Self { item, count: 1 }
    }
}

/// Resolved loot, in spawn order
pub type LootList = SmallVec<[LootItem; 4]>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LootError {
    #[error("Unknown loot table {0:?}")]
    UnknownTable(LootTableId),
    #[error("Unknown item {0:?}")]
    UnknownItem(ItemId),
    #[error("Loot table '{0}' has zero total weight")]
    ZeroWeight(String),
    #[error("Loot table '{table}' exceeded tier depth {depth}")]
    TierDepth { table: String, depth: usize },
}

/// Resolve a table into concrete items.
///
/// Deterministic for a given RNG state.
pub fn resolve<R: Rng + ?Sized>(
    defs: &Definitions,
    table: LootTableId,
    rng: &mut R,
) -> Result<LootList, LootError> {
    let table = defs.loot_table(table).ok_or(LootError::UnknownTable(table))?;
    let mut items = LootList::new();
    let draws = if table.min >= table.max {
        table.min
    } else {
        rng.gen_range(table.min..=table.max)
    };
    for _ in 0..draws {
        draw(defs, table, rng, 0, &mut items)?;
    }
    Ok(items)
}

fn draw<R: Rng + ?Sized>(
    defs: &Definitions,
    table: &LootTable,
    rng: &mut R,
    depth: usize,
    items: &mut LootList,
) -> Result<(), LootError> {
    if depth > MAX_TIER_DEPTH {
        return Err(LootError::TierDepth {
            table: table.id_string.clone(),
            depth,
        });
    }
    match pick(table, rng)?.kind {
        LootEntryKind::Nothing => Ok(()),
        LootEntryKind::Item(id) => push_item(defs, id, items),
        LootEntryKind::Tier(next) => {
            let tier = defs.loot_table(next).ok_or(LootError::UnknownTable(next))?;
            draw(defs, tier, rng, depth + 1, items)
        }
    }
}

/// One weighted selection
fn pick<'t, R: Rng + ?Sized>(table: &'t LootTable, rng: &mut R) -> Result<&'t LootEntry, LootError> {
    let zero = || LootError::ZeroWeight(table.id_string.clone());
    if !(table.total_weight > 0.0) {
        return Err(zero());
    }
    let mut roll = rng.gen::<f64>() * table.total_weight;
    for entry in &table.entries {
        if roll < entry.weight {
            return Ok(entry);
        }
        roll -= entry.weight;
    }
    // Accumulated rounding can leave a sliver past the last bucket
    table.entries.iter().rev().find(|e| e.weight > 0.0).ok_or_else(zero)
}

fn push_item(defs: &Definitions, id: ItemId, items: &mut LootList) -> Result<(), LootError> {
    let item = defs.item(id).ok_or(LootError::UnknownItem(id))?;
    items.push(LootItem::single(id));
    if let Some((ammo, amount)) = item.companion_ammo() {
        items.push(LootItem {
            item: ammo,
            count: amount,
        });
    }
    Ok(())
}
