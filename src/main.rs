//! Runner Game Server - Authoritative multiplayer match server
//!
//! This is the main entry point for the game server. It handles:
//! - WebSocket connections for real-time gameplay
//! - The global simulation tick across all matches
//! - Provably-fair seeded obstacle generation per match
//! - Settlement and audit delivery to the wagering platform

mod app;
mod config;
mod game;
mod http;
mod matchmaking;
mod platform;
mod util;
mod ws;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::util::time::{init_server_time, unix_millis};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Runner Game Server");
    info!("Server address: {}", config.server_addr);
    if config.game.dev_mode {
        info!("Dev mode enabled: solo matches, dev tokens accepted");
    }

    // Create application state
    let state = AppState::new(config.clone());

    // Spawn the global simulation tick
    spawn_tick_loop(state.clone());

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// The single fixed-interval timer driving every match's simulation.
/// Finished matches hand back settlement jobs which are delivered to the
/// platform off the tick path.
fn spawn_tick_loop(state: AppState) {
    let tick_rate = state.config.game.tick_rate.max(1);
    let tick_duration = Duration::from_micros(1_000_000 / tick_rate as u64);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let jobs = state.manager.update_all_matches(unix_millis());
            for job in jobs {
                let platform = state.platform.clone();
                tokio::spawn(async move {
                    // Best-effort: a failed callback is the platform's
                    // retry problem, match state is already final
                    if let Err(e) = platform.send_match_result(&job.result).await {
                        error!(match_id = %job.result.match_id, error = %e, "Result delivery failed");
                    }
                    if let Err(e) = platform.send_audit_trail(&job.audit).await {
                        error!(match_id = %job.audit.match_id, error = %e, "Audit delivery failed");
                    }
                });
            }
        }
    });
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
