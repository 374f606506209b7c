//! Order placement and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::{CouponId, OrderId, ProductId, UserId};
use domain::{CardDetails, CardType, Money, Order, OrderItem, OrderStatus, PaymentMethod};
use saga::{CheckoutSaga, OrderLine, PlaceOrder};
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;
use crate::routes::caller;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub saga: CheckoutSaga<S>,
    pub store: S,
}

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLineRequest>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_id: Option<CouponId>,
    #[serde(default)]
    pub card: Option<CardRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRequest {
    pub card_type: CardType,
    pub card_no: String,
}

impl std::fmt::Debug for CardRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardRequest")
            .field("card_type", &self.card_type)
            .finish_non_exhaustive()
    }
}

impl CreateOrderRequest {
    fn into_command(self, user_id: UserId) -> Result<PlaceOrder, ApiError> {
        let card = self
            .card
            .map(|c| CardDetails::new(c.card_type, c.card_no))
            .transpose()?;
        Ok(PlaceOrder {
            user_id,
            items: self
                .items
                .into_iter()
                .map(|line| OrderLine {
                    product_id: line.product_id,
                    quantity: line.quantity,
                })
                .collect(),
            payment_method: self.payment_method,
            coupon_id: self.coupon_id,
            card,
        })
    }
}

// -- Response types --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub original_price: Money,
    pub discount: Money,
    pub total_price: Money,
    pub coupon_id: Option<CouponId>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id(),
            product_name: item.product_name().to_string(),
            unit_price: item.unit_price(),
            quantity: item.quantity(),
        }
    }
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id(),
            user_id: order.user_id(),
            status: order.status(),
            payment_method: order.payment_method(),
            original_price: order.original_price(),
            discount: order.discount(),
            total_price: order.final_price(),
            coupon_id: order.applied_coupon_id(),
            items: order.items().iter().map(OrderItemResponse::from).collect(),
            created_at: order.created_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order for the calling user.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id = caller(&headers)?;
    let cmd = req.into_command(user_id)?;
    let order = state.saga.placement.place(cmd).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id}: load one of the calling user's orders.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let user_id = caller(&headers)?;
    let order_id: OrderId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))?;

    // Someone else's order is reported exactly like a missing one.
    let order = state
        .store
        .find_order(order_id)
        .await?
        .filter(|order| order.user_id() == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))?;

    Ok(Json(OrderResponse::from(&order)))
}
