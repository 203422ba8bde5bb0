//! Prometheus-compatible metrics endpoint
//!
//! Exposes obstacle simulation metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics_extended")]
use hashbrown::HashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::game::state::TickStats;
use crate::net::broadcast::BroadcastStats;

/// Samples kept for tick time percentiles
const TICK_HISTORY: usize = 1000;

/// Metrics registry for the obstacle server
#[derive(Debug)]
pub struct Metrics {
    // World
    pub obstacles_total: AtomicU64,
    pub obstacles_alive: AtomicU64,
    pub loot_on_ground: AtomicU64,
    pub observers: AtomicU64,

    // Damage pipeline
    pub damage_applied: AtomicU64,
    pub damage_ignored: AtomicU64,
    pub damage_dropped: AtomicU64,
    pub damage_queue_pending: AtomicU64,
    pub obstacles_destroyed: AtomicU64,
    pub loot_spawned: AtomicU64,
    pub explosions: AtomicU64,

    // Broadcast
    pub updates_sent: AtomicU64,
    pub full_records: AtomicU64,
    pub partial_records: AtomicU64,
    pub deferred_records: AtomicU64,
    pub failed_records: AtomicU64,
    pub payload_bytes: AtomicU64,
    pub message_bytes: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_budget_us: AtomicU64,
    pub tick_count: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation (VecDeque for O(1) pop_front)
    tick_history: RwLock<VecDeque<u64>>,

    #[cfg(feature = "metrics_extended")]
    destroyed_by_definition: RwLock<HashMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            obstacles_total: AtomicU64::new(0),
            obstacles_alive: AtomicU64::new(0),
            loot_on_ground: AtomicU64::new(0),
            observers: AtomicU64::new(0),
            damage_applied: AtomicU64::new(0),
            damage_ignored: AtomicU64::new(0),
            damage_dropped: AtomicU64::new(0),
            damage_queue_pending: AtomicU64::new(0),
            obstacles_destroyed: AtomicU64::new(0),
            loot_spawned: AtomicU64::new(0),
            explosions: AtomicU64::new(0),
            updates_sent: AtomicU64::new(0),
            full_records: AtomicU64::new(0),
            partial_records: AtomicU64::new(0),
            deferred_records: AtomicU64::new(0),
            failed_records: AtomicU64::new(0),
            payload_bytes: AtomicU64::new(0),
            message_bytes: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_budget_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
            #[cfg(feature = "metrics_extended")]
            destroyed_by_definition: RwLock::new(HashMap::new()),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Fold one tick's state counters in
    pub fn record_tick_stats(&self, stats: &TickStats) {
        self.damage_applied.fetch_add(stats.damage_applied, Ordering::Relaxed);
        self.damage_ignored.fetch_add(stats.damage_ignored, Ordering::Relaxed);
        self.obstacles_destroyed.fetch_add(stats.obstacles_destroyed, Ordering::Relaxed);
        self.loot_spawned.fetch_add(stats.loot_spawned, Ordering::Relaxed);
        self.explosions.fetch_add(stats.explosions, Ordering::Relaxed);
    }

    /// Fold one broadcast pass in. `message_bytes` is the encoded envelope size.
    pub fn record_broadcast(&self, stats: &BroadcastStats, message_bytes: u64) {
        self.updates_sent.fetch_add(stats.updates, Ordering::Relaxed);
        self.full_records.fetch_add(stats.full_records, Ordering::Relaxed);
        self.partial_records.fetch_add(stats.partial_records, Ordering::Relaxed);
        self.deferred_records.fetch_add(stats.deferred, Ordering::Relaxed);
        self.failed_records.fetch_add(stats.failed, Ordering::Relaxed);
        self.payload_bytes.fetch_add(stats.bytes, Ordering::Relaxed);
        self.message_bytes.fetch_add(message_bytes, Ordering::Relaxed);
    }

    pub fn set_world(&self, obstacles: usize, alive: usize, loot: usize) {
        self.obstacles_total.store(obstacles as u64, Ordering::Relaxed);
        self.obstacles_alive.store(alive as u64, Ordering::Relaxed);
        self.loot_on_ground.store(loot as u64, Ordering::Relaxed);
    }

    #[cfg(feature = "metrics_extended")]
    pub fn record_destroyed(&self, definition: &str) {
        *self
            .destroyed_by_definition
            .write()
            .entry_ref(definition)
            .or_insert(0) += 1;
    }

    #[cfg(not(feature = "metrics_extended"))]
    #[inline]
    pub fn record_destroyed(&self, _definition: &str) {}

    /// Tick budget usage of the last tick, in percent
    pub fn budget_usage_percent(&self) -> u64 {
        let budget = self.tick_budget_us.load(Ordering::Relaxed);
        if budget == 0 {
            return 0;
        }
        self.tick_time_us.load(Ordering::Relaxed) * 100 / budget
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // World
        metric!("obstacle_server_obstacles", "Obstacles in the world", "gauge",
            self.obstacles_total.load(Ordering::Relaxed));
        metric!("obstacle_server_obstacles_alive", "Obstacles not yet destroyed", "gauge",
            self.obstacles_alive.load(Ordering::Relaxed));
        metric!("obstacle_server_loot_on_ground", "Dropped items in the world", "gauge",
            self.loot_on_ground.load(Ordering::Relaxed));
        metric!("obstacle_server_observers", "Connected observers", "gauge",
            self.observers.load(Ordering::Relaxed));

        // Damage
        metric!("obstacle_server_damage_applied_total", "Damage events that changed an obstacle", "counter",
            self.damage_applied.load(Ordering::Relaxed));
        metric!("obstacle_server_damage_ignored_total", "Damage events with no effect", "counter",
            self.damage_ignored.load(Ordering::Relaxed));
        metric!("obstacle_server_damage_dropped_total", "Damage events rejected by a full queue", "counter",
            self.damage_dropped.load(Ordering::Relaxed));
        metric!("obstacle_server_damage_queue_pending", "Damage events waiting for the next tick", "gauge",
            self.damage_queue_pending.load(Ordering::Relaxed));
        metric!("obstacle_server_obstacles_destroyed_total", "Obstacles destroyed", "counter",
            self.obstacles_destroyed.load(Ordering::Relaxed));
        metric!("obstacle_server_loot_spawned_total", "Items dropped by destroyed obstacles", "counter",
            self.loot_spawned.load(Ordering::Relaxed));
        metric!("obstacle_server_explosions_total", "Explosions triggered", "counter",
            self.explosions.load(Ordering::Relaxed));

        #[cfg(feature = "metrics_extended")]
        {
            let destroyed = self.destroyed_by_definition.read();
            if !destroyed.is_empty() {
                output.push_str("# HELP obstacle_server_destroyed_by_definition_total Obstacles destroyed per definition\n");
                output.push_str("# TYPE obstacle_server_destroyed_by_definition_total counter\n");
                let mut entries: Vec<_> = destroyed.iter().collect();
                entries.sort();
                for (definition, count) in entries {
                    output.push_str(&format!(
                        "obstacle_server_destroyed_by_definition_total{{definition=\"{}\"}} {}\n",
                        definition, count
                    ));
                }
            }
        }

        // Broadcast
        metric!("obstacle_server_updates_sent_total", "Object updates sent", "counter",
            self.updates_sent.load(Ordering::Relaxed));
        metric!("obstacle_server_full_records_total", "Full records written", "counter",
            self.full_records.load(Ordering::Relaxed));
        metric!("obstacle_server_partial_records_total", "Partial records written", "counter",
            self.partial_records.load(Ordering::Relaxed));
        metric!("obstacle_server_deferred_records_total", "Records deferred for lack of space", "counter",
            self.deferred_records.load(Ordering::Relaxed));
        metric!("obstacle_server_failed_records_total", "Records that could not be encoded", "counter",
            self.failed_records.load(Ordering::Relaxed));
        metric!("obstacle_server_payload_bytes_total", "Bit-packed payload bytes", "counter",
            self.payload_bytes.load(Ordering::Relaxed));
        metric!("obstacle_server_message_bytes_total", "Encoded message bytes", "counter",
            self.message_bytes.load(Ordering::Relaxed));

        // Performance
        metric!("obstacle_server_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("obstacle_server_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("obstacle_server_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("obstacle_server_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("obstacle_server_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent());
        metric!("obstacle_server_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("obstacle_server_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let value = serde_json::json!({
            "world": {
                "obstacles": load(&self.obstacles_total),
                "alive": load(&self.obstacles_alive),
                "loot_on_ground": load(&self.loot_on_ground),
                "observers": load(&self.observers),
            },
            "damage": {
                "applied": load(&self.damage_applied),
                "ignored": load(&self.damage_ignored),
                "dropped": load(&self.damage_dropped),
                "pending": load(&self.damage_queue_pending),
                "destroyed": load(&self.obstacles_destroyed),
                "loot_spawned": load(&self.loot_spawned),
                "explosions": load(&self.explosions),
            },
            "broadcast": {
                "updates": load(&self.updates_sent),
                "full_records": load(&self.full_records),
                "partial_records": load(&self.partial_records),
                "deferred_records": load(&self.deferred_records),
                "failed_records": load(&self.failed_records),
                "payload_bytes": load(&self.payload_bytes),
                "message_bytes": load(&self.message_bytes),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "budget_percent": self.budget_usage_percent(),
                "tick_count": load(&self.tick_count),
                "uptime_seconds": self.uptime_seconds(),
            },
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the HTTP response for one raw request
fn respond(metrics: &Metrics, request: &str) -> String {
    let ok = |content_type: &str, body: String| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        )
    };

    if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
        ok("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ok("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
        ok("text/plain", "OK".to_string())
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on http://{}/metrics", addr);
    serve(listener, metrics).await
}

async fn serve(listener: TcpListener, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = respond(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.obstacles_total.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.budget_usage_percent(), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1040);
        assert!(metrics.tick_time_p99_us.load(Ordering::Relaxed) >= 1080);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        let tick = TickStats {
            damage_applied: 3,
            damage_ignored: 1,
            obstacles_destroyed: 1,
            loot_spawned: 2,
            explosions: 1,
        };
        metrics.record_tick_stats(&tick);
        metrics.record_tick_stats(&tick);
        let broadcast = BroadcastStats {
            updates: 1,
            full_records: 5,
            partial_records: 2,
            bytes: 64,
            deferred: 0,
            failed: 1,
        };
        metrics.record_broadcast(&broadcast, 90);

        assert_eq!(metrics.damage_applied.load(Ordering::Relaxed), 6);
        assert_eq!(metrics.loot_spawned.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.full_records.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.message_bytes.load(Ordering::Relaxed), 90);
        assert_eq!(metrics.failed_records.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.set_world(120, 100, 7);
        metrics.record_destroyed("barrel");

        let output = metrics.to_prometheus();
        assert!(output.contains("obstacle_server_obstacles 120"));
        assert!(output.contains("obstacle_server_obstacles_alive 100"));
        assert!(output.contains("obstacle_server_loot_on_ground 7"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
        #[cfg(feature = "metrics_extended")]
        assert!(output.contains("obstacle_server_destroyed_by_definition_total{definition=\"barrel\"} 1"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.set_world(50, 40, 0);

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["world"]["obstacles"], 50);
        assert_eq!(parsed["world"]["alive"], 40);
        assert!(parsed["performance"].is_object());
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new();
        assert!(respond(&metrics, "GET /metrics/json HTTP/1.1").contains("application/json"));
        assert!(respond(&metrics, "GET /metrics HTTP/1.1").contains("version=0.0.4"));
        assert!(respond(&metrics, "GET /health HTTP/1.1").ends_with("OK"));
        assert!(respond(&metrics, "GET /nope HTTP/1.1").starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_server_answers_health() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, Arc::new(Metrics::new())));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /health HTTP/1.1\r\n\r\n").await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK"));
        server.abort();
    }
}
