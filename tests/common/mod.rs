use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use std::sync::Arc;
use storefront_api::{
    config::AppConfig,
    db,
    entities::{product, product_variant, promotion, promotion_product},
    events::{self, EventSender},
    services::{CartService, OrderService, PricingService, ShippingInfo, StockService},
    AppState,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Test harness backed by an in-memory SQLite database.
///
/// The pool is pinned to a single connection so the in-memory database is
/// shared and concurrent transactions serialize through the pool, which is
/// exactly what the conditional-decrement tests need.
pub struct TestApp {
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(db_arc, Arc::new(cfg), event_sender);

        Self {
            state,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &sea_orm::DatabaseConnection {
        &self.state.db
    }

    pub fn carts(&self) -> Arc<CartService> {
        self.state.services.carts.clone()
    }

    pub fn orders(&self) -> Arc<OrderService> {
        self.state.services.orders.clone()
    }

    pub fn pricing(&self) -> PricingService {
        self.state.services.pricing.clone()
    }

    pub fn stock(&self) -> StockService {
        self.state.services.stock.clone()
    }

    /// Seed a product with the given price and stock.
    pub async fn seed_product(
        &self,
        title: &str,
        price: Decimal,
        old_price: Option<Decimal>,
        stock: i32,
    ) -> product::Model {
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            brand: Set(Some("Acme".to_string())),
            images: Set(Some(serde_json::json!([format!(
                "https://img.example.com/{}.jpg",
                title.to_lowercase().replace(' ', "-")
            )]))),
            price: Set(price),
            old_price: Set(old_price),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model
            .insert(self.db())
            .await
            .expect("failed to seed product")
    }

    /// Seed a variant of a product. An unset price falls back to the parent's.
    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        sku: &str,
        price: Option<Decimal>,
        stock: i32,
        attributes: serde_json::Value,
    ) -> product_variant::Model {
        let now = Utc::now();
        let model = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            sku: Set(sku.to_string()),
            price: Set(price),
            old_price: Set(None),
            stock: Set(stock),
            attributes: Set(attributes),
            images: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model
            .insert(self.db())
            .await
            .expect("failed to seed variant")
    }

    /// Seed a promotion covering one (product, optional variant) pair.
    pub async fn seed_promotion(
        &self,
        title: &str,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        sale_price: Decimal,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> promotion::Model {
        let now = Utc::now();
        let promo = promotion::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            starts_at: Set(starts_at),
            ends_at: Set(ends_at),
            is_expired: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let promo = promo
            .insert(self.db())
            .await
            .expect("failed to seed promotion");

        let scope = promotion_product::ActiveModel {
            id: Set(Uuid::new_v4()),
            promotion_id: Set(promo.id),
            product_id: Set(product_id),
            variant_id: Set(variant_id),
            sale_price: Set(sale_price),
        };
        scope
            .insert(self.db())
            .await
            .expect("failed to seed promotion scope");

        promo
    }

    /// Force a promotion's window into the past.
    pub async fn expire_promotion(&self, promotion_id: Uuid) {
        let promo = promotion::Entity::find_by_id(promotion_id)
            .one(self.db())
            .await
            .expect("failed to load promotion")
            .expect("promotion not found");

        let mut active: promotion::ActiveModel = promo.into();
        active.ends_at = Set(Utc::now() - chrono::Duration::minutes(5));
        active
            .update(self.db())
            .await
            .expect("failed to expire promotion");
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(self.db())
            .await
            .expect("failed to load product")
            .expect("product not found")
            .stock
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        product_variant::Entity::find_by_id(variant_id)
            .one(self.db())
            .await
            .expect("failed to load variant")
            .expect("variant not found")
            .stock
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// A complete shipping destination for order placement tests.
#[allow(dead_code)]
pub fn shipping_info() -> ShippingInfo {
    ShippingInfo {
        full_name: "Jordan Blake".to_string(),
        phone: "+1-555-0134".to_string(),
        address_line1: "17 Harbor Lane".to_string(),
        address_line2: None,
        city: "Portsmouth".to_string(),
        state: "NH".to_string(),
        postal_code: "03801".to_string(),
        country: "US".to_string(),
        landmark: None,
    }
}
