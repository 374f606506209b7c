//! Payment gateway callback endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::PaymentStatus;
use saga::PaymentCallback;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;
use crate::routes::orders::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub transaction_key: String,
    pub status: PaymentStatus,
}

/// POST /payments/callback: status push from the PG.
#[tracing::instrument(
    skip(state, callback),
    fields(transaction_key = %callback.transaction_key, order_id = %callback.order_id)
)]
pub async fn callback<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<CallbackResponse>, ApiError> {
    metrics::counter!("payment_callbacks_total", "status" => callback.status.as_str()).increment(1);
    let payment = state.saga.payments.confirm(&callback).await?;
    tracing::info!(
        payment_id = %payment.id(),
        status = %payment.status(),
        "payment callback handled"
    );
    Ok(Json(CallbackResponse {
        transaction_key: callback.transaction_key,
        status: payment.status(),
    }))
}
