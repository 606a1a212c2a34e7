//! Thin binary wrapper that wires the orchestration core into one Axum
//! process: the webhook endpoints (`spec.md` §4.10) and the push server's
//! WebSocket upgrade (`spec.md` §4.8) on a single listener.
//!
//! ```bash
//! MERIDIAN_DATABASE__PASSWORD=secret cargo run --bin meridian-server
//! ```

mod routes;
mod state;

use meridian_push::AuthConfig;
use meridian_shared::config::MeridianConfig;
use meridian_store::RelationalStore;
use meridian_webhooks::{ImportConfig, ImportFilter, IssueImporter, WebhookReceiver};
use state::AppState;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    meridian_shared::telemetry::init_tracing(std::env::var("MERIDIAN_LOG_JSON").is_ok());

    info!("Starting Meridian orchestration server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let config = MeridianConfig::load(std::env::var("MERIDIAN_CONFIG").ok().as_deref())
        .map_err(|e| format!("failed to load configuration: {e}"))?;

    let store = RelationalStore::connect(&config.database).await?;
    let pool = store.pool().clone();

    let auth = if config.push_server.auth_enabled {
        AuthConfig::enabled(config.push_server.jwt_secret.clone())
    } else {
        AuthConfig::disabled()
    };

    let webhooks = WebhookReceiver::new(
        config.webhooks.github_secret.clone(),
        config.webhooks.gitlab_token.clone(),
    );
    let import_config = ImportConfig {
        filter: ImportFilter {
            repository_allow_list: non_empty_set(&config.import_filter.repo_allow_list),
            label_allow_list: non_empty_set(&config.import_filter.label_allow_list),
            import_closed: !config.import_filter.skip_closed,
        },
        ..ImportConfig::default()
    };
    let importer = IssueImporter::new(import_config);

    let state = AppState::new(pool, auth, config.push_server.inbound_rate_per_sec, webhooks, importer);
    state.push.start();
    state.broadcaster.attach(state.push.clone());

    let app = routes::build(state.clone());

    let addr = format!("{}:{}", config.push_server.host, config.push_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    info!("   Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received, stopping push server");
    state.push.stop();

    match tokio::time::timeout(Duration::from_secs(30), store.close()).await {
        Ok(()) => info!("database pool closed"),
        Err(_) => error!("database pool close timed out"),
    }

    info!("Meridian orchestration server shutdown complete");
    Ok(())
}

fn non_empty_set(values: &[String]) -> Option<std::collections::BTreeSet<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().cloned().collect())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
