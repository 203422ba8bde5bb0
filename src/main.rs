use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use obstacle_server::config::ServerConfig;
use obstacle_server::game::definitions::Definitions;
use obstacle_server::metrics::{self, Metrics};
use obstacle_server::net::game_session::{run_damage_producer, start_game_loop, GameSession};
use obstacle_server::net::replica::Replica;

/// Random hits per second submitted by the simulated players
const SIMULATED_HITS_PER_SECOND: u32 = 120;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Obstacle Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    info!(
        "Configuration loaded: {} Hz, world {}, {} obstacles",
        config.tick_rate, config.world_extent, config.obstacle_count
    );

    let definitions = match &config.definitions_path {
        Some(path) => Definitions::install(
            Definitions::load(path)
                .with_context(|| format!("Failed to load definitions from {}", path.display()))?,
        ),
        None => Definitions::global().context("Bundled definitions are invalid")?,
    };
    info!(
        "Definitions loaded: {} items, {} obstacles",
        definitions.item_count(),
        definitions.obstacle_count()
    );

    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let mut session = GameSession::new(definitions, &config, metrics.clone())
        .context("Definitions do not fit the wire layout")?;
    session.populate(config.obstacle_count);
    let targets = session.state().obstacles().map(|o| o.id()).collect();

    // Shutdown signal handler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });
    let shutdown = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let producer = tokio::spawn(run_damage_producer(
        session.damage_sender(),
        definitions,
        targets,
        SIMULATED_HITS_PER_SECOND,
        config.sim_seed.unwrap_or_else(rand::random),
        metrics.clone(),
        shutdown(shutdown_rx.clone()),
    ));

    // A local observer decoding everything the server sends
    let (observer, welcome) = session.add_observer()?;
    let mut replica = Replica::new(config.wire());
    replica.apply_message(&welcome, definitions)?;
    info!("Observer {} attached", observer);

    start_game_loop(
        &mut session,
        config.tick_interval(),
        |outbox| {
            for (_, bytes) in outbox {
                if let Err(e) = replica.apply_message(&bytes, definitions) {
                    warn!("Observer rejected update: {}", e);
                }
            }
        },
        shutdown(shutdown_rx),
    )
    .await;

    if let Err(e) = producer.await {
        warn!("Damage producer task failed: {}", e);
    }
    info!(
        "Server stopped: observer mirrors {} obstacles, {} alive on server",
        replica.len(),
        session.state().alive_count()
    );

    Ok(())
}
