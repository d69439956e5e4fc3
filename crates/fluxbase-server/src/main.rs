mod state;
mod ws;

use axum::extract::Extension;
use axum::{routing::get, Json, Router};
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use fluxbase_core::config::FluxbaseConfig;

#[derive(Parser, Debug)]
#[command(name = "fluxbase", about = "Fluxbase backend server")]
struct Args {
    /// Path to the configuration file.
    #[arg(long, env = "FLUXBASE_CONFIG", default_value = "fluxbase.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let config = FluxbaseConfig::from_file(&args.config).unwrap_or_else(|err| {
        tracing::warn!(path = %args.config, "failed to load config, using defaults: {err:#}");
        FluxbaseConfig::default()
    });

    let state = Arc::new(AppState::init(&config).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Background services.
    let cache_listener = tokio::spawn(
        state
            .cache
            .clone()
            .listen_for_invalidations(state.bus.clone(), shutdown_rx.clone()),
    );
    let realtime_listener = tokio::spawn(fluxbase_realtime::dispatcher::run_listener(
        state.db.runtime().pool().clone(),
        state.dispatcher.clone(),
        shutdown_rx.clone(),
    ));
    let webhook_tasks = state.webhooks.clone().start(shutdown_rx.clone());
    let health_monitor = state.db.runtime().spawn_health_monitor(
        std::time::Duration::from_secs(config.database.pool.health_check_period_secs),
        shutdown_rx.clone(),
    );

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/realtime", get(ws::realtime_ws))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state.clone()))
        .layer(Extension(shutdown_rx.clone()));

    let addr = config.server.bind.clone();
    tracing::info!("fluxbase listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    // Flip the shutdown watch as soon as the signal arrives so WebSocket
    // tasks close their connections and serve can finish draining.
    let signal = async move {
        shutdown_signal().await;
        shutdown_tx.send(true).ok();
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await?;

    // Drain background tasks with a bounded deadline.
    let drain = async {
        let _ = cache_listener.await;
        let _ = realtime_listener.await;
        let _ = health_monitor.await;
        for task in webhook_tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(std::time::Duration::from_secs(10), drain)
        .await
        .is_err()
    {
        tracing::warn!("background tasks did not drain before the deadline");
    }
    state.db.runtime().close().await;

    Ok(())
}

async fn healthz(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let database = match state.db.runtime().health().await {
        Ok(()) => "up",
        Err(_) => "down",
    };
    Json(json!({
        "ok": database == "up",
        "service": "fluxbase",
        "database": database,
        "pool": state.db.runtime().pool_stats(),
        "realtime_connections": state.dispatcher.connection_count(),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
