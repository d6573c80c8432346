//! Application entry point for the `sensorflow-cache` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool and creating the schema
//! - Selecting the cache backend (Redis when `REDIS_URL` is set)
//! - Registering the periodic refresh (and optional synthetic ingestion)
//! - Running the startup-once summary job when summaries are configured
//! - Binding the Axum HTTP server and serving until SIGINT/SIGTERM
//!
//! # Environment Variables
//! See [`sensorflow_cache::config::load_from_env`] for the full list. Logging:
//! - `SENSORFLOW_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SENSORFLOW_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Result;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensorflow_cache::{
    config::{self, SummaryConfig},
    routes,
    scheduler::{
        self, IntervalSchedule, PeriodicTask, Scheduler, TaskKind, PROCESS_SENSOR_DATA_TASK_NAME,
        REFRESH_ALL_TASK_NAME,
    },
    schema,
    summary::{self, OpenAiSummarizer, SummaryInit},
    tasks::PipelineTasks,
    AppState, CacheStore, HttpSensorClient, MemoryCache, PgSensorStore, RedisCache, Refresher,
    SensorList, SensorStore,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let cache: Arc<dyn CacheStore> = match &cfg.redis_url {
        Some(url) => Arc::new(RedisCache::connect(url).await?),
        None => {
            warn!("REDIS_URL not set, using in-process cache (not shared between instances)");
            Arc::new(MemoryCache::new())
        }
    };

    let store: Arc<dyn SensorStore> = Arc::new(PgSensorStore::new(pool.clone()));
    let sensors = Arc::new(SensorList::new(cfg.sensor_ids.iter().cloned()));
    let client = Arc::new(HttpSensorClient::new(&cfg.api_url, cfg.fetch_timeout)?);
    let refresher = Refresher::new(
        client,
        cache.clone(),
        cfg.cache_ttl,
        cfg.refresh_concurrency as usize,
    );

    let tasks = Arc::new(PipelineTasks::new(refresher, store.clone(), sensors.clone()));
    let scheduler = Scheduler::new(tasks);

    let mut entries = vec![PeriodicTask::new(
        REFRESH_ALL_TASK_NAME,
        IntervalSchedule::minutes(cfg.refresh_every_minutes),
        TaskKind::RefreshAllSensors,
    )];
    if cfg.synthetic_every_minutes > 0 {
        entries.push(PeriodicTask::new(
            PROCESS_SENSOR_DATA_TASK_NAME,
            IntervalSchedule::minutes(cfg.synthetic_every_minutes),
            TaskKind::ProcessSensorData,
        ));
    }
    for entry in entries {
        // Best effort: the service still serves cached data without a schedule.
        if let Err(e) = scheduler::persist_task(&pool, &entry).await {
            warn!("Periodic task '{}' setup failed: {}", entry.name, e);
        }
        scheduler.register(entry);
    }

    if let Some(summary_cfg) = &cfg.summary {
        spawn_startup_summaries(summary_cfg, &cfg, store.clone(), cache.clone(), sensors.clone());
    }

    let app = routes::router(AppState::new(store, cache, sensors));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    info!("Server shut down");
    Ok(())
}

// ---

/// Run the startup summary job once per configured scope.
fn spawn_startup_summaries(
    summary_cfg: &SummaryConfig,
    cfg: &config::Config,
    store: Arc<dyn SensorStore>,
    cache: Arc<dyn CacheStore>,
    sensors: Arc<SensorList>,
) {
    // ---
    let summarizer =
        OpenAiSummarizer::new(&summary_cfg.api_key, &summary_cfg.model, &summary_cfg.api_url);
    let init = SummaryInit::new(summary_cfg.init_scope);
    let window = summary_cfg.window;
    let ttl = cfg.summary_ttl;

    tokio::spawn(async move {
        if !init.try_claim(cache.as_ref(), ttl).await {
            info!("Startup summaries already generated for this scope, skipping");
            return;
        }
        let generated = summary::generate_all(
            store.as_ref(),
            cache.as_ref(),
            &summarizer,
            sensors.ids(),
            window,
            ttl,
        )
        .await;
        info!("Startup summaries generated for {}/{} sensors", generated, sensors.len());
    });
}

async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SENSORFLOW_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else `SENSORFLOW_LOG_LEVEL`
///
/// Called once at startup, after `.env` is loaded and before any logging.
fn init_tracing() {
    // ---
    let span_events = match env::var("SENSORFLOW_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SENSORFLOW_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
