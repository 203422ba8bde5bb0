pub mod constants;
pub mod damage_queue;
pub mod definitions;
pub mod hitbox;
pub mod loot;
pub mod obstacle;
pub mod physics;
pub mod state;
