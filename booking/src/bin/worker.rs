//! Booking Worker
//!
//! Background process that promotes waitlisted requests into bookings.
//!
//! This binary:
//! - Connects to `PostgreSQL` and runs pending migrations
//! - Connects to Redis (locks, promotion queue, notifications)
//! - Serves Prometheus metrics
//! - Requeues promotion checks a previous instance left unacknowledged
//! - Runs the promotion consumer and the periodic sweeper
//! - Shuts both down gracefully on Ctrl+C / SIGTERM
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run worker
//! cargo run --bin booking-worker
//! ```

use anyhow::Context;
use booking::{BookingEnvironment, BookingServices, Config, metrics::register_business_metrics};
use seatkeeper_postgres::PostgresStore;
use seatkeeper_redis::{RedisLockCoordinator, RedisNotifier, RedisPromotionQueue};
use seatkeeper_runtime::ShutdownCoordinator;
use seatkeeper_runtime::metrics::MetricsServer;
use seatkeeper_runtime::shutdown::wait_for_signal;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,booking=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting booking worker...");

    // Load configuration
    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        redis = %config.redis.url,
        policy = %config.promotion.policy,
        sweep_interval_secs = config.promotion.sweep_interval.as_secs(),
        "Configuration loaded"
    );

    // Metrics
    let metrics_addr: SocketAddr = format!(
        "{}:{}",
        config.server.metrics_host, config.server.metrics_port
    )
    .parse()
    .context("invalid metrics address")?;
    MetricsServer::new(metrics_addr)
        .serve()
        .context("failed to start metrics server")?;
    register_business_metrics();

    // PostgreSQL
    let store = PostgresStore::connect_with_timeout(
        &config.postgres.url,
        config.postgres.max_connections,
        Duration::from_secs(config.postgres.connect_timeout),
    )
    .await
    .context("failed to connect to PostgreSQL")?;
    store.migrate().await.context("failed to run migrations")?;
    tracing::info!("✓ PostgreSQL ready");

    // Redis
    let conn = seatkeeper_redis::connect(&config.redis.url)
        .await
        .context("failed to connect to Redis")?;
    let queue = Arc::new(
        RedisPromotionQueue::new(conn.clone(), &config.redis.queue_prefix)
            .with_poll_interval(config.promotion.poll_interval),
    );
    queue
        .requeue_unacked()
        .await
        .context("failed to requeue unacknowledged promotion checks")?;
    tracing::info!("✓ Redis ready");

    let env = BookingEnvironment::new(Arc::new(store), queue.clone())
        .with_locks(Arc::new(RedisLockCoordinator::new(conn.clone())))
        .with_notifier(Arc::new(RedisNotifier::new(
            conn,
            config.redis.notification_prefix.clone(),
        )));
    let services = BookingServices::new(env, config.booking, config.promotion);

    // Background loops
    let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(config.server.shutdown_timeout));

    let consumer = services.worker.clone();
    let signal = shutdown.subscribe();
    shutdown.track(
        "promotion-consumer",
        tokio::spawn(async move { consumer.run(queue, signal).await }),
    );

    let sweeper = services.worker.clone();
    let signal = shutdown.subscribe();
    shutdown.track(
        "promotion-sweeper",
        tokio::spawn(async move { sweeper.run_sweeper(signal).await }),
    );

    tracing::info!("Booking worker is running");
    tracing::info!("  - Metrics: http://{metrics_addr}/metrics");
    tracing::info!("Press Ctrl+C to shutdown");

    wait_for_signal().await;

    tracing::info!("Shutting down gracefully...");
    let failed = shutdown.shutdown().await;
    if !failed.is_empty() {
        tracing::warn!(tasks = ?failed, "Some tasks did not stop cleanly");
    }
    Ok(())
}
