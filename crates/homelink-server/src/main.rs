//! # HomeLink Server
//!
//! Main binary that wires the bridge together:
//! - hub TCP listener (handshake, sessions, telemetry)
//! - HTTP front door (OAuth linking, smart-home API, provisioning webhook)
//! - background tasks (code sweep, RRD statistics, event pump to the skill)

mod stats;

use anyhow::Context;
use clap::Parser;
use homelink_api::registry::UserRegistry;
use homelink_api::skill::SkillClient;
use homelink_api::{AppState, build_router, stats::Stats};
use homelink_db::Database;
use homelink_hub::{HubEvent, HubServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "homelink", about = "HomeLink cloud bridge")]
struct Args {
    /// Configuration file path.
    #[arg(long, env = "HOMELINK_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = homelink_common::config::init(args.config.as_deref())?;

    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homelink=info".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("Starting HomeLink v{}", env!("CARGO_PKG_VERSION"));

    // Database + user registry
    let db = Database::connect(&config.server.database).await?;
    db.migrate().await?;

    let registry = Arc::new(
        UserRegistry::new(&config.client.id, config.client.secret_bytes()?)
            .context("client.secret must be 16 hex-encoded bytes")?,
    );
    let users = homelink_db::repository::users::load_all(&db.pool).await?;
    tracing::info!("Loaded {} users", users.len());
    registry.load(users);

    // Shared outbound HTTP client and counters
    let http = reqwest::Client::new();
    let skill = SkillClient::new(
        http.clone(),
        &config.skill.id,
        &config.skill.token,
        &config.skill.url,
    );
    let stats = Arc::new(Stats::default());

    // === Hub TCP server ===
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<HubEvent>();
    let hub_server = HubServer::new(registry.clone(), events_tx);
    let hub_listener =
        tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.server.port)))
            .await?;

    // === HTTP front door ===
    let state = AppState {
        registry: registry.clone(),
        db,
        skill: skill.clone(),
        http,
        stats: stats.clone(),
    };
    let router = build_router(state);
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!("HTTP server listening on {http_addr}");

    // === Event pump: hub sessions → upstream skill callbacks ===
    // Counted even when the POST fails, so statistics reflect intent.
    let pump_stats = stats.clone();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                HubEvent::DevicesUpdated { user } => skill.post_discovery(&user),
                HubEvent::DataUpdated { user, devices } => skill.post_state(&user, devices),
            }

            pump_stats.count_event();
        }
    });

    // === Authorization-code sweep ===
    let sweep_registry = registry.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));

        loop {
            tick.tick().await;
            sweep_registry.sweep_codes();
        }
    });

    // === RRD statistics ===
    if !config.rrd.path.is_empty() {
        tokio::spawn(stats::run(
            config.rrd.path.clone(),
            registry.clone(),
            stats.clone(),
        ));
    }

    tokio::try_join!(
        hub_server.serve(hub_listener),
        async {
            axum::serve(http_listener, router).await?;
            Ok::<_, anyhow::Error>(())
        },
    )?;

    Ok(())
}
