//! # Courier Node
//!
//! Node binary: HTTP API, leader election and gateway dispatch over a shared
//! SQLite database.

use std::sync::Arc;

use clap::Parser;
use courier_core::{Clock, MonotonicClock, TargetRegistry};
use courier_engine::{LeaderElector, Manager};
use courier_store::{SqliteStore, Store};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod gateway;
mod state;
mod webhook;

use config::NodeConfig;
use gateway::HttpAttemptExecutor;
use state::AppState;
use webhook::HttpWebhookSender;

/// Run the node until Ctrl-C.
async fn run(config: NodeConfig) -> anyhow::Result<()> {
    config.validate()?;
    let holder_id = config.resolve_holder_id();

    let registry = TargetRegistry::load(&config.targets)?;
    info!(
        path = %config.targets.display(),
        targets = registry.len(),
        "target registry loaded"
    );

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.database)?);
    info!(path = %config.database.display(), "store opened");

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let manager = Arc::new(Manager::new(
        store.clone(),
        Arc::new(registry),
        Arc::new(HttpAttemptExecutor::new(config.gateway_timeout())?),
        Arc::new(HttpWebhookSender::new(config.webhook_timeout())?),
        clock.clone(),
        config.manager_config(),
    ));

    let cancel = CancellationToken::new();
    let elector = LeaderElector::new(
        store,
        manager.clone(),
        clock,
        config.election_config(holder_id.clone()),
    );
    let election = {
        let cancel = cancel.clone();
        tokio::spawn(async move { elector.run(cancel).await })
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "could not listen for shutdown signal");
            }
            info!("shutdown requested");
            cancel.cancel();
        });
    }

    let app = api::router(AppState::new(manager, holder_id.as_str()));
    let listener = TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, holder = %holder_id, "courier node listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    cancel.cancel();
    election.await?;
    info!("courier node stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    run(config).await
}
