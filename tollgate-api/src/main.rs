use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tollgate_api::{app, metrics::ReaperMetrics, state::AppState, worker};
use tollgate_core::{Clock, HoldStore, SystemClock};
use tollgate_hold::HoldPolicy;
use tollgate_store::{app_config::Config, DbClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tollgate_api=debug,tollgate_hold=debug,tollgate_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Tollgate on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .context("Failed to load business rules")?;
    tracing::info!(
        hold_ttl_seconds = rules.hold_ttl_seconds,
        payment_timeout_seconds = rules.payment_timeout_seconds,
        confirmation_timeout_seconds = rules.confirmation_timeout_seconds,
        reaper_batch_size = rules.reaper_batch_size,
        "Business rules loaded"
    );

    let store: Arc<dyn HoldStore> = Arc::new(db.hold_store());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let policy = HoldPolicy::try_from(&rules).context("Invalid business rules")?;
    let metrics = Arc::new(ReaperMetrics::new().context("Failed to register metrics")?);
    let state = AppState::new(
        store,
        clock,
        policy,
        rules.reaper_batch_size,
        metrics.clone(),
    );

    let cancel = CancellationToken::new();
    let reaper_task = if config.reaper.enabled {
        Some(tokio::spawn(worker::run_reaper(
            state.reaper.clone(),
            metrics,
            Duration::from_secs(config.reaper.interval_seconds),
            Duration::from_millis(config.reaper.jitter_millis),
            cancel.clone(),
        )))
    } else {
        tracing::info!("Reaper disabled, expecting external sweep trigger");
        None
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let shutdown = cancel.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Some(task) = reaper_task {
        let _ = task.await;
    }
    Ok(())
}
