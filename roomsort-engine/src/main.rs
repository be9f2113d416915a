//! roomsort-engine - image room classification service
//!
//! Serves the intake/status HTTP API and runs the workflow step executor,
//! the backfill reconciler and budget garbage collection in-process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use roomsort_common::config::TomlConfig;
use roomsort_common::events::EventBus;
use roomsort_common::time;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomsort_engine::db::{self, SqliteBudgetStore};
use roomsort_engine::services::{
    BudgetStore, EventBusNotifier, FallbackTierRunner, FanoutNotifier, FastTierRunner,
    HttpLabelDetector, Intake, LabelDetector, NotificationSink, ObjectStore, OpenAiVisionClient,
    RateLimiter, Reconciler, SignedUrlIssuer, VisionClassifier, WebhookNotifier,
};
use roomsort_engine::workflow::{ExecutionScheduler, SqliteScheduler, StepContext, StepExecutor, TransitionPolicy};
use roomsort_engine::AppState;

/// How often closed budget windows are purged
const BUDGET_GC_INTERVAL: Duration = Duration::from_secs(600);

/// Command-line arguments for roomsort-engine
#[derive(Parser, Debug)]
#[command(name = "roomsort-engine")]
#[command(about = "Two-tier image room classification service")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "ROOMSORT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// HTTP listen address, e.g. 127.0.0.1:5780
    #[arg(long)]
    bind: Option<String>,

    /// Do not run the backfill reconciler in this process
    #[arg(long)]
    no_reconciler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    if let Some(bind) = args.bind {
        config.bind_address = Some(bind);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting roomsort-engine {}", env!("CARGO_PKG_VERSION"));

    let db_path = config.resolved_database_path();
    info!("Database: {}", db_path.display());
    let pool = db::init_database_pool(&db_path).await?;

    let event_bus = EventBus::new(256);

    let budget_store: Arc<dyn BudgetStore> = Arc::new(SqliteBudgetStore::new(pool.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(budget_store, config.rate_limits.clone()));

    let object_store: Arc<dyn ObjectStore> = Arc::new(SignedUrlIssuer::from_config(&config.storage)?);
    let detector: Arc<dyn LabelDetector> = Arc::new(HttpLabelDetector::new(&config.fast_tier)?);
    let vision: Arc<dyn VisionClassifier> = Arc::new(OpenAiVisionClient::new(&config.fallback_tier)?);

    let fast_tier = Arc::new(FastTierRunner::new(
        detector,
        config.fast_tier.clone(),
        &config.storage.resized_prefix,
    ));
    let fallback_tier = Arc::new(FallbackTierRunner::new(
        vision,
        object_store.clone(),
        config.fallback_tier.clone(),
        config.fast_tier.unit_price_usd,
        &config.storage.resized_prefix,
        Duration::from_secs(config.storage.url_ttl_secs),
    ));

    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
    sinks.push(Arc::new(EventBusNotifier::new(event_bus.clone())));
    let webhooks = WebhookNotifier::new(&config.notifications)?;
    if webhooks.is_configured() {
        info!("Webhook notifications enabled");
        sinks.push(Arc::new(webhooks));
    }
    let notifier: Arc<dyn NotificationSink> = Arc::new(FanoutNotifier::new(sinks));

    let scheduler: Arc<dyn ExecutionScheduler> = Arc::new(SqliteScheduler::new(pool.clone(), event_bus.clone()));

    let context = Arc::new(StepContext {
        pool: pool.clone(),
        fast_tier,
        fallback_tier,
        rate_limiter: rate_limiter.clone(),
        notifier,
        max_tries: config.fallback_tier.max_tries,
    });
    let executor = Arc::new(StepExecutor::new(
        pool.clone(),
        context,
        event_bus.clone(),
        &config.workflow,
        TransitionPolicy {
            alert_retry_ceiling: config.rate_limits.escape_valve_after,
        },
    ));

    let cancel = CancellationToken::new();
    let mut tasks = vec![tokio::spawn(executor.run(cancel.clone()))];

    if config.reconciler.enabled && !args.no_reconciler {
        let reconciler = Arc::new(Reconciler::new(
            pool.clone(),
            scheduler.clone(),
            config.reconciler.clone(),
            config.fallback_tier.max_tries,
        ));
        tasks.push(tokio::spawn(reconciler.run(cancel.clone())));
    } else {
        info!("Backfill reconciler disabled");
    }

    tasks.push(tokio::spawn(purge_budget_windows(rate_limiter, cancel.clone())));

    let intake = Arc::new(Intake::new(
        pool.clone(),
        object_store,
        scheduler.clone(),
        config.storage.clone(),
        config.fallback_tier.max_tries,
    ));
    let state = AppState::new(pool, event_bus, scheduler, intake);
    let app = roomsort_engine::build_router(state).layer(TraceLayer::new_for_http());

    let bind = config.resolved_bind_address();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn purge_budget_windows(rate_limiter: Arc<RateLimiter>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(BUDGET_GC_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = rate_limiter.purge_expired(time::now()).await {
                    error!(error = %e, "Budget window purge failed");
                }
            }
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
