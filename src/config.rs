use std::path::PathBuf;
use std::str::FromStr;

use crate::game::constants::{sim, wire};
use crate::net::wire::WireConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Side length of the square world, in world units
    pub world_extent: f32,
    /// Bits per position axis
    pub position_bits: u8,
    /// Bits for a continuous rotation angle
    pub rotation_bits: u8,
    /// Bits for an obstacle scale
    pub scale_bits: u8,
    /// Lower bound of the encodable scale range
    pub scale_min: f32,
    /// Upper bound of the encodable scale range
    pub scale_max: f32,
    /// Obstacles spawned at startup by the simulation binary
    pub obstacle_count: usize,
    /// Definitions file; bundled definitions are used when unset
    pub definitions_path: Option<PathBuf>,
    /// Port for the metrics endpoint
    pub metrics_port: u16,
    /// Seed for world generation and simulated damage
    pub sim_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: sim::TICK_RATE,
            world_extent: wire::WORLD_EXTENT,
            position_bits: wire::POSITION_BITS,
            rotation_bits: wire::ROTATION_BITS,
            scale_bits: wire::SCALE_BITS,
            scale_min: wire::MIN_OBJECT_SCALE,
            scale_max: wire::MAX_OBJECT_SCALE,
            obstacle_count: 500,
            definitions_path: None,
            metrics_port: 9090,
            sim_seed: None,
        }
    }
}

/// Read `name` from the environment, keeping `None` (and warning) when the
/// value does not parse or fails `check`
fn env_value<T: FromStr>(name: &str, check: impl Fn(&T) -> bool, requirement: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(parsed) if check(&parsed) => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} must be {}, using default", name, requirement);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_value("TICK_RATE", |v: &u32| (1..=240).contains(v), "1-240") {
            config.tick_rate = v;
        }
        if let Some(v) = env_value("WORLD_EXTENT", |v: &f32| v.is_finite() && *v > 0.0, "> 0") {
            config.world_extent = v;
        }
        if let Some(v) = env_value("POSITION_BITS", |v: &u8| (1..=32).contains(v), "1-32") {
            config.position_bits = v;
        }
        if let Some(v) = env_value("ROTATION_BITS", |v: &u8| (1..=32).contains(v), "1-32") {
            config.rotation_bits = v;
        }
        if let Some(v) = env_value("SCALE_BITS", |v: &u8| (1..=32).contains(v), "1-32") {
            config.scale_bits = v;
        }
        if let Some(v) = env_value("SCALE_MIN", |v: &f32| v.is_finite() && *v >= 0.0, ">= 0") {
            config.scale_min = v;
        }
        if let Some(v) = env_value("SCALE_MAX", |v: &f32| v.is_finite() && *v > 0.0, "> 0") {
            config.scale_max = v;
        }
        if let Some(v) = env_value("OBSTACLE_COUNT", |v: &usize| *v <= u16::MAX as usize, "at most 65535") {
            config.obstacle_count = v;
        }
        if let Ok(path) = std::env::var("DEFINITIONS_PATH") {
            config.definitions_path = Some(PathBuf::from(path));
        }
        if let Some(v) = env_value("METRICS_PORT", |v: &u16| *v > 0, "> 0") {
            config.metrics_port = v;
        }
        if let Some(v) = env_value("SIM_SEED", |_: &u64| true, "an integer") {
            config.sim_seed = Some(v);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.metrics_port == 0 {
            return Err("Metrics port cannot be 0".to_string());
        }
        if self.obstacle_count > u16::MAX as usize {
            return Err("obstacle_count exceeds the object id space".to_string());
        }
        self.wire().validate()
    }

    /// Bit layout shared with observers
    pub fn wire(&self) -> WireConfig {
        WireConfig {
            world_extent: self.world_extent,
            position_bits: self.position_bits,
            rotation_bits: self.rotation_bits,
            scale_bits: self.scale_bits,
            scale_min: self.scale_min,
            scale_max: self.scale_max,
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.metrics_port, 9090);
        assert!(config.definitions_path.is_none());
        assert!(config.validate().is_ok());
        assert_eq!(config.wire(), WireConfig::default());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.tick_rate > 0);
        assert!(config.metrics_port > 0);
    }

    #[test]
    fn test_inverted_scale_range_rejected() {
        let config = ServerConfig {
            scale_min: 2.0,
            scale_max: 1.0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_interval() {
        let config = ServerConfig {
            tick_rate: 20,
            ..ServerConfig::default()
        };
        assert_eq!(config.tick_interval().as_millis(), 50);
    }
}
