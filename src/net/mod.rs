pub mod bitstream;
pub mod broadcast;
pub mod game_session;
pub mod protocol;
pub mod replica;
pub mod serialization;
pub mod wire;
