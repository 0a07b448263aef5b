use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{CartService, OrderService, PricingService, ShopperIdentity, StockService},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

pub mod carts;
pub mod common;
pub mod orders;

/// Request header carrying the authenticated owner id, injected by the
/// upstream auth layer. The core never validates identities itself.
pub const OWNER_ID_HEADER: &str = "x-owner-id";
/// Request header carrying the anonymous cart bearer token.
pub const CART_TOKEN_HEADER: &str = "x-cart-token";

/// All domain services, wired once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub pricing: PricingService,
    pub stock: StockService,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let pricing = PricingService::new();
        let stock = StockService::new();
        let carts = Arc::new(CartService::new(
            db.clone(),
            pricing.clone(),
            event_sender.clone(),
            config.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db,
            carts.clone(),
            pricing.clone(),
            stock.clone(),
            event_sender,
            config,
        ));

        Self {
            carts,
            orders,
            pricing,
            stock,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ShopperIdentity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = match parts.headers.get(OWNER_ID_HEADER) {
            Some(value) => {
                let raw = value.to_str().map_err(|_| {
                    ServiceError::InvalidInput(format!("Invalid {} header", OWNER_ID_HEADER))
                })?;
                Some(Uuid::parse_str(raw).map_err(|_| {
                    ServiceError::InvalidInput(format!(
                        "{} header must be a UUID",
                        OWNER_ID_HEADER
                    ))
                })?)
            }
            None => None,
        };

        let cart_token = parts
            .headers
            .get(CART_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(ShopperIdentity {
            owner_id,
            cart_token,
        })
    }
}
