//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    CircuitBreaker, HttpPaymentGateway, InMemoryPaymentGateway, PaymentGateway, ResilientGateway,
};
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_gateway(config: &Config) -> Arc<dyn PaymentGateway> {
    let breaker = Arc::new(CircuitBreaker::new("pg", config.breaker()));
    match config.gateway() {
        Some(http) => {
            tracing::info!(base_url = %http.base_url, "using HTTP payment gateway");
            let inner = HttpPaymentGateway::new(http).expect("failed to build PG client");
            Arc::new(ResilientGateway::new(inner, breaker))
        }
        None => {
            tracing::warn!("PG_BASE_URL not set, using the in-memory PG simulator");
            let inner = InMemoryPaymentGateway::default();
            Arc::new(ResilientGateway::new(inner, breaker))
        }
    }
}

/// Serves until a shutdown signal, then stops the workers and flushes the outbox.
async fn serve<S: Store + Clone + 'static>(
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) {
    let state = api::create_state(store, gateway, config.saga());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = state.saga.spawn_workers(shutdown_rx);

    let app = api::create_app(Arc::clone(&state), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "background worker panicked");
        }
    }
    match state.saga.bus.drain().await {
        Ok(delivered) => tracing::info!(delivered, "outbox drained"),
        Err(e) => tracing::error!(error = %e, "failed to drain outbox"),
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Payment gateway behind retry and circuit breaker
    let gateway = build_gateway(&config);

    // 4. Store, then serve
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");
            serve(store, gateway, &config, metrics_handle).await;
        }
        None => {
            let store = InMemoryStore::new();
            api::demo::seed_demo(&store)
                .await
                .expect("failed to seed demo catalog");
            tracing::info!("DATABASE_URL not set, using the in-memory store");
            serve(store, gateway, &config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
