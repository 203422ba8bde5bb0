/// Simulation pacing constants
pub mod sim {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 30;
}

/// Wire layout defaults - changing any of these is a protocol break
pub mod wire {
    /// Side length of the square world, positions live in [0, WORLD_EXTENT]
    pub const WORLD_EXTENT: f32 = 1924.0;
    /// Bits per position coordinate
    pub const POSITION_BITS: u8 = 16;
    /// Bits for a continuous rotation over [-PI, PI]
    pub const ROTATION_BITS: u8 = 16;
    /// Bits for an object scale
    pub const SCALE_BITS: u8 = 8;
    /// Smallest encodable object scale
    pub const MIN_OBJECT_SCALE: f32 = 0.25;
    /// Largest encodable object scale
    pub const MAX_OBJECT_SCALE: f32 = 3.0;
    /// Bits for an object id inside an update packet
    pub const OBJECT_ID_BITS: u8 = 16;
    /// Bits for an obstacle definition index inside a full record
    pub const DEFINITION_ID_BITS: u8 = 16;
    /// Bits for a record count inside an update packet
    pub const RECORD_COUNT_BITS: u8 = 16;
}

/// Loot resolution limits
pub mod loot {
    /// Deepest tier-in-tier chain the resolver will follow before giving up.
    /// Validated definitions never get close; this only guards hand-built tables.
    pub const MAX_TIER_DEPTH: usize = 16;
    /// Upper bound on a table's `max` draw count
    pub const MAX_DRAWS: u32 = 64;
}

/// Obstacle defaults
pub mod obstacle {
    /// Absolute tolerance used when checking hitbox/body agreement
    pub const GEOMETRY_EPSILON: f32 = 1e-3;
    /// Maximum number of visual variations a definition may declare
    pub const MAX_VARIATIONS: u8 = 128;
}

/// Network limits
pub mod net {
    /// Maximum size of one encoded update payload in bytes
    pub const MAX_PACKET_SIZE: usize = 64 * 1024;
}
