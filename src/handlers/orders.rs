use crate::{
    entities::OrderStatus,
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::{PlaceOrderInput, ShippingInfo, ShopperIdentity},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(place_order).get(list_my_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", patch(update_order_status))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/pay", post(mark_paid))
}

fn require_owner(identity: &ShopperIdentity) -> Result<Uuid, ServiceError> {
    identity.owner_id.ok_or_else(|| {
        ServiceError::Forbidden("An authenticated shopper is required for orders".to_string())
    })
}

/// Place an order from the shopper's cart
async fn place_order(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let owner_id = require_owner(&identity)?;
    validate_input(&payload.shipping_info)?;

    let order = state
        .services
        .orders
        .place_order(
            owner_id,
            PlaceOrderInput {
                shipping_info: payload.shipping_info,
                payment_method: payload.payment_method,
            },
        )
        .await?;

    Ok(created_response(order))
}

/// List the shopper's orders, newest first
async fn list_my_orders(
    State(state): State<AppState>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let owner_id = require_owner(&identity)?;
    let orders = state.services.orders.list_orders_for_owner(owner_id).await?;
    Ok(success_response(orders))
}

/// Get one order with its items and event log
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(success_response(order))
}

/// Transition an order's fulfillment status
async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await?;
    Ok(success_response(order))
}

/// Cancel an order, restoring its stock
async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.cancel_order(id).await?;
    Ok(success_response(order))
}

/// Record that payment arrived for an order
async fn mark_paid(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.mark_paid(id).await?;
    Ok(success_response(order))
}

// Request DTOs

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub shipping_info: ShippingInfo,
    pub payment_method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}
