//! Obstacle Server Library
//!
//! Destructible world obstacles replicated to observers over a bit-packed
//! protocol.
//!
//! # Features
//!
//! - `metrics_extended` - Per-definition destruction counters on the metrics endpoint (enabled by default)

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;
