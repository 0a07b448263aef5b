use crate::{
    entities::{cart_item, CartModel},
    errors::ServiceError,
    handlers::common::{success_response, validate_input},
    services::{AddItemInput, ShopperIdentity},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route(
            "/items",
            post(add_item).put(update_item).delete(remove_item),
        )
}

/// Cart payload returned by every cart endpoint; the token lets anonymous
/// clients keep the cart across requests.
#[derive(Debug, Serialize)]
struct CartEnvelope {
    cart: CartModel,
    cart_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Vec<cart_item::Model>>,
}

impl CartEnvelope {
    fn summary(cart: CartModel) -> Self {
        Self {
            cart_token: cart.cart_token.clone(),
            cart,
            items: None,
        }
    }

    fn with_items(cart: CartModel, items: Vec<cart_item::Model>) -> Self {
        Self {
            cart_token: cart.cart_token.clone(),
            cart,
            items: Some(items),
        }
    }
}

/// Get the shopper's cart with re-resolved prices, creating it lazily
async fn get_cart(
    State(state): State<AppState>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(&identity).await?;
    Ok(success_response(CartEnvelope::with_items(
        cart.cart, cart.items,
    )))
}

/// Add a line to the cart
async fn add_item(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .add_item(
            &identity,
            AddItemInput {
                product_id: payload.product_id,
                variant_id: payload.variant_id,
                quantity: payload.quantity,
            },
        )
        .await?;

    Ok(success_response(CartEnvelope::summary(cart)))
}

/// Set a line's quantity; zero removes the line
async fn update_item(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .update_item_quantity(
            &identity,
            payload.product_id,
            payload.variant_id,
            payload.quantity,
        )
        .await?;

    Ok(success_response(CartEnvelope::summary(cart)))
}

/// Remove a line from the cart
async fn remove_item(
    State(state): State<AppState>,
    identity: ShopperIdentity,
    Json(payload): Json<RemoveItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_item(&identity, payload.product_id, payload.variant_id)
        .await?;

    Ok(success_response(CartEnvelope::summary(cart)))
}

/// Remove every line from the cart
async fn clear_cart(
    State(state): State<AppState>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.clear_cart(&identity).await?;
    Ok(success_response(CartEnvelope::summary(cart)))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    /// Zero or negative removes the line
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
}
