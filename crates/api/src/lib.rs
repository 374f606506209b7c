//! HTTP API server for the checkout saga.
//!
//! Provides order placement, order lookup and the payment gateway callback,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod demo;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{CheckoutSaga, PaymentGateway, SagaConfig};
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/payments/callback", post(routes::payments::callback::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the saga around `store` and `gateway`.
pub fn create_state<S: Store + Clone + 'static>(
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    config: SagaConfig,
) -> Arc<AppState<S>> {
    let saga = CheckoutSaga::new(store.clone(), gateway, config);
    Arc::new(AppState { saga, store })
}
