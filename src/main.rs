use clap::Parser;
use feedman::api::health::{self, HealthState};
use feedman::cli::{Cli, Command};
use feedman::config::Config;
use feedman::domain::feed_service::SubscriptionRepositoryExt;
use feedman::infrastructure::bookmark_job::{self, BookmarkJobConfig};
use feedman::infrastructure::database::setup_database;
use feedman::infrastructure::repository::{
    FeedRepository, ItemRepository, PgBookmarkJobStateRepository, PgFeedRepository,
    PgItemRepository, PgSubscriptionRepository,
};
use feedman::infrastructure::retention_job;
use feedman::infrastructure::scheduler::{self, SchedulerConfig};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedman=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve => run_serve(config).await,
        Command::Worker => run_worker(config).await,
        Command::Migrate => run_migrate(config).await,
        Command::Healthcheck => run_healthcheck(config).await,
    }
}

async fn run_serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db_pool = setup_database(&config.database_url).await?;

    let state = HealthState {
        db_pool,
        started_at: Instant::now(),
    };

    let app = axum::Router::new()
        .route("/health", axum::routing::get(health::check))
        .route("/metrics", axum::routing::get(health::metrics))
        .with_state(state);

    let bind_addr = format!("{}:{}", config.host, config.port);
    tracing::info!(bind_addr, "feedman health/metrics listener starting");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_worker(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db_pool = setup_database(&config.database_url).await?;

    let feeds: Arc<dyn FeedRepository> = Arc::new(PgFeedRepository::new(db_pool.clone()));
    let subscriptions: Arc<dyn SubscriptionRepositoryExt> =
        Arc::new(PgSubscriptionRepository::new(db_pool.clone()));
    let items: Arc<dyn ItemRepository> = Arc::new(PgItemRepository::new(db_pool.clone()));
    let bookmark_state = Arc::new(PgBookmarkJobStateRepository::new(db_pool.clone()));

    let token = CancellationToken::new();

    let scheduler_handle = tokio::spawn(scheduler::run(
        feeds.clone(),
        subscriptions,
        items.clone(),
        SchedulerConfig {
            tick_interval: config.fetch_interval,
            max_concurrent: config.fetch_max_concurrent,
            fetch_timeout: config.fetch_timeout,
            fetch_max_size: config.fetch_max_size,
        },
        token.clone(),
    ));

    let bookmark_handle = tokio::spawn(bookmark_job::run(
        items.clone(),
        bookmark_state,
        BookmarkJobConfig {
            cycle_interval: config.hatebu_batch_interval,
            api_interval: config.hatebu_api_interval,
            max_calls_per_cycle: config.hatebu_max_calls_per_cycle,
            ttl: chrono::Duration::from_std(config.hatebu_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
            request_timeout: config.fetch_timeout,
        },
        token.clone(),
    ));

    let retention_handle = tokio::spawn(retention_job::run(
        items,
        config.retention_days,
        token.clone(),
    ));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, cancelling background jobs");
    token.cancel();

    let _ = tokio::join!(scheduler_handle, bookmark_handle, retention_handle);
    tracing::info!("worker shut down cleanly");

    Ok(())
}

async fn run_migrate(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db_pool = setup_database(&config.database_url).await?;
    tracing::info!("running database migrations");
    sqlx::migrate!().run(&db_pool).await?;
    tracing::info!("migrations complete");
    Ok(())
}

async fn run_healthcheck(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db_pool = setup_database(&config.database_url).await?;
    match sqlx::query("SELECT 1").execute(&db_pool).await {
        Ok(_) => {
            println!("ok");
            Ok(())
        }
        Err(e) => {
            eprintln!("healthcheck failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Waits for `SIGINT` or (on unix) `SIGTERM`, the orderly-exit signals
/// the worker process shares.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
