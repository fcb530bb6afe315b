use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use label_reconciler::config::{BotConfig, ServerSettings};
use label_reconciler::github::OctocrabClient;
use label_reconciler::lifecycle::{CommandProvisioner, TaskSupervisor};
use label_reconciler::persistence::JsonFileStore;
use label_reconciler::reconcile::Reconciler;
use label_reconciler::server::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "label_reconciler=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ServerSettings::from_env()?;
    info!(?settings, "Starting label reconciler");

    let config = BotConfig::from_file(&settings.config_path)
        .with_context(|| format!("loading {}", settings.config_path.display()))?;

    let github = Arc::new(
        OctocrabClient::from_token(settings.github_token.clone())
            .context("building GitHub client")?,
    );
    let store = Arc::new(JsonFileStore::new(settings.state_dir.clone()));
    let provisioner = Arc::new(CommandProvisioner::new(config.provision_commands.clone()));

    let supervisor = TaskSupervisor::new();

    let reconciler = Reconciler::new(github, store, provisioner, config, supervisor.clone())
        .context("compiling completion markers")?;

    let app = build_router(AppState::new(
        Arc::new(reconciler),
        settings.webhook_secret.clone(),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(in_flight = supervisor.in_flight(), "Waiting for background tasks");
    supervisor.wait_idle().await;
    info!(failed = supervisor.stats().failed, "Background tasks drained");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
