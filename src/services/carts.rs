use crate::{
    config::AppConfig,
    entities::{cart, cart_item, Cart, CartItem, CartModel, Product, ProductVariant},
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::PricingService,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    error::SqlErr, sea_query::SimpleExpr, ActiveModelTrait, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Per-request shopper identity, supplied by upstream collaborators.
///
/// The core never issues or validates either part: `owner_id` comes from the
/// authentication layer, `cart_token` is the opaque bearer token an anonymous
/// shopper presents to keep a cart across requests.
#[derive(Debug, Clone, Default)]
pub struct ShopperIdentity {
    pub owner_id: Option<Uuid>,
    pub cart_token: Option<String>,
}

impl ShopperIdentity {
    pub fn owner(owner_id: Uuid) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn anonymous(cart_token: impl Into<String>) -> Self {
        Self {
            owner_id: None,
            cart_token: Some(cart_token.into()),
        }
    }

    pub fn with_token(mut self, cart_token: impl Into<String>) -> Self {
        self.cart_token = Some(cart_token.into());
        self
    }
}

/// Input for adding a line to a cart
#[derive(Debug, Deserialize)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

/// Cart with its line items, in insertion order
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

/// Shopping cart service owning cart identity resolution, line mutation,
/// guest-to-owner merge, and total recomputation.
///
/// Derived fields are recomputed from the line items on every mutation, and
/// every mutation slides the cart expiry forward by the configured TTL.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    pricing: PricingService,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        pricing: PricingService,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            pricing,
            event_sender,
            config,
        }
    }

    /// Resolves the cart for a shopper, creating one lazily when none exists.
    ///
    /// Owner present: prefer the owner's cart; when the token also identifies
    /// an anonymous cart, merge it in (quantities summed on matching
    /// product+variant, lines appended otherwise) and discard the guest cart.
    /// When only a guest cart exists it is claimed for the owner, keeping its
    /// token. Token only: fetch or create an anonymous cart. Neither: create
    /// a fresh anonymous cart with a new token.
    #[instrument(skip(self))]
    pub async fn resolve(&self, identity: &ShopperIdentity) -> Result<CartModel, ServiceError> {
        if let Some(owner_id) = identity.owner_id {
            return self
                .resolve_owner_cart(owner_id, identity.cart_token.as_deref())
                .await;
        }

        if let Some(token) = identity.cart_token.as_deref() {
            let existing = Cart::find()
                .filter(cart::Column::CartToken.eq(token))
                .filter(cart::Column::OwnerId.is_null())
                .one(&*self.db)
                .await?;
            if let Some(cart) = existing {
                return Ok(cart);
            }
            return self.create_cart(None, Some(token)).await;
        }

        self.create_cart(None, None).await
    }

    async fn resolve_owner_cart(
        &self,
        owner_id: Uuid,
        token: Option<&str>,
    ) -> Result<CartModel, ServiceError> {
        let owner_cart = Cart::find()
            .filter(cart::Column::OwnerId.eq(Some(owner_id)))
            .one(&*self.db)
            .await?;

        let guest_cart = match token {
            Some(token) => {
                Cart::find()
                    .filter(cart::Column::CartToken.eq(token))
                    .filter(cart::Column::OwnerId.is_null())
                    .one(&*self.db)
                    .await?
            }
            None => None,
        };

        match (owner_cart, guest_cart) {
            (Some(owner_cart), Some(guest_cart)) => {
                self.merge_carts(owner_cart, guest_cart).await
            }
            (Some(owner_cart), None) => Ok(owner_cart),
            (None, Some(guest_cart)) => self.claim_guest_cart(owner_id, guest_cart).await,
            (None, None) => self.create_cart(Some(owner_id), token).await,
        }
    }

    /// Folds a guest cart into the owner cart and deletes the guest cart.
    async fn merge_carts(
        &self,
        owner_cart: CartModel,
        guest_cart: CartModel,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;

        let owner_items = owner_cart.find_related(CartItem).all(&txn).await?;
        let guest_items = guest_cart.find_related(CartItem).all(&txn).await?;

        let now = Utc::now();
        for guest_item in guest_items {
            let existing = owner_items
                .iter()
                .find(|item| item.matches(guest_item.product_id, guest_item.variant_id));

            match existing {
                Some(item) => {
                    let quantity = item.quantity + guest_item.quantity;
                    let unit_price = item.unit_price;
                    let mut active: cart_item::ActiveModel = item.clone().into();
                    active.quantity = Set(quantity);
                    active.line_total = Set(unit_price * Decimal::from(quantity));
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }
                None => {
                    let moved = cart_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        cart_id: Set(owner_cart.id),
                        product_id: Set(guest_item.product_id),
                        variant_id: Set(guest_item.variant_id),
                        title: Set(guest_item.title.clone()),
                        image: Set(guest_item.image.clone()),
                        brand: Set(guest_item.brand.clone()),
                        unit_price: Set(guest_item.unit_price),
                        old_price: Set(guest_item.old_price),
                        quantity: Set(guest_item.quantity),
                        attributes: Set(guest_item.attributes.clone()),
                        line_total: Set(guest_item.line_total),
                        created_at: Set(now),
                        updated_at: Set(now),
                    };
                    moved.insert(&txn).await?;
                }
            }
        }

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .exec(&txn)
            .await?;
        Cart::delete_by_id(guest_cart.id).exec(&txn).await?;

        let merged = self.recalculate_totals(&txn, owner_cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartsMerged {
                guest_cart_id: guest_cart.id,
                owner_cart_id: owner_cart.id,
            })
            .await;

        info!(
            "Merged guest cart {} into owner cart {}",
            guest_cart.id, owner_cart.id
        );
        Ok(merged)
    }

    /// Attaches a guest cart to an owner who has no cart yet, keeping the
    /// token for continuity.
    async fn claim_guest_cart(
        &self,
        owner_id: Uuid,
        guest_cart: CartModel,
    ) -> Result<CartModel, ServiceError> {
        let now = Utc::now();
        let mut active: cart::ActiveModel = guest_cart.into();
        active.owner_id = Set(Some(owner_id));
        active.last_activity_at = Set(now);
        active.expires_at = Set(now + self.ttl());
        active.updated_at = Set(now);

        match active.update(&*self.db).await {
            Ok(cart) => Ok(cart),
            // An owner cart appeared concurrently; it wins, the guest cart is
            // left for the expiry sweep.
            Err(err) if is_unique_violation(&err) => Cart::find()
                .filter(cart::Column::OwnerId.eq(Some(owner_id)))
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::Conflict("Cart ownership changed".to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Creates a cart. A unique-token collision means another request created
    /// the cart first; the existing row is returned instead of an error.
    async fn create_cart(
        &self,
        owner_id: Option<Uuid>,
        token: Option<&str>,
    ) -> Result<CartModel, ServiceError> {
        let token = token
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_id: Set(owner_id),
            cart_token: Set(token.clone()),
            currency: Set(self.config.default_currency.clone()),
            subtotal: Set(Decimal::ZERO),
            item_count: Set(0),
            total_amount: Set(Decimal::ZERO),
            expires_at: Set(now + self.ttl()),
            last_activity_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match cart.insert(&*self.db).await {
            Ok(cart) => {
                self.event_sender
                    .send_or_log(Event::CartCreated(cart.id))
                    .await;
                info!("Created cart: {}", cart.id);
                Ok(cart)
            }
            // The token or the owner already has a cart; another request got
            // there first. Re-fetch instead of erroring the shopper.
            Err(err) if is_unique_violation(&err) => {
                if let Some(owner_id) = owner_id {
                    if let Some(cart) = Cart::find()
                        .filter(cart::Column::OwnerId.eq(Some(owner_id)))
                        .one(&*self.db)
                        .await?
                    {
                        return Ok(cart);
                    }
                }
                Cart::find()
                    .filter(cart::Column::CartToken.eq(token.as_str()))
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Conflict(format!("Cart token {} already in use", token))
                    })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Adds a line to the shopper's cart with a price resolved at call time.
    ///
    /// Rejects non-positive quantities with InvalidInput and an existing
    /// identical (product, variant) line with Conflict; changing the quantity
    /// of an existing line is `update_item_quantity`'s job.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        identity: &ShopperIdentity,
        input: AddItemInput,
    ) -> Result<CartModel, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::InvalidInput(format!(
                "Quantity must be at least 1, got {}",
                input.quantity
            )));
        }

        let cart = self.resolve(identity).await?;
        check_ownership(&cart, identity)?;

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let variant = match input.variant_id {
            Some(variant_id) => Some(
                ProductVariant::find_by_id(variant_id)
                    .one(&txn)
                    .await?
                    .filter(|v| v.product_id == product.id)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "Variant {} not found for product {}",
                            variant_id, product.id
                        ))
                    })?,
            ),
            None => None,
        };

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .filter(variant_filter(input.variant_id))
            .one(&txn)
            .await?;

        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "{} is already in the cart",
                product.title
            )));
        }

        let price = self
            .pricing
            .resolve_for(&txn, &product, variant.as_ref(), Utc::now())
            .await?;

        // Snapshot the catalog data so later edits cannot corrupt the line.
        let (image, attributes) = match &variant {
            Some(variant) => (
                variant.primary_image().or_else(|| product.primary_image()),
                variant.attributes.clone(),
            ),
            None => (product.primary_image(), serde_json::json!({})),
        };

        let now = Utc::now();
        let item = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product.id),
            variant_id: Set(input.variant_id),
            title: Set(product.title.clone()),
            image: Set(image),
            brand: Set(product.brand.clone()),
            unit_price: Set(price.effective_price),
            old_price: Set(price.reference_price),
            quantity: Set(input.quantity),
            attributes: Set(attributes),
            line_total: Set(price.effective_price * Decimal::from(input.quantity)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        item.insert(&txn).await?;

        let updated = self.recalculate_totals(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: product.id,
            })
            .await;

        info!(
            "Added item to cart {}: product {} x{}",
            cart.id, product.id, input.quantity
        );
        Ok(updated)
    }

    /// Sets the quantity of a line; zero or less removes it.
    ///
    /// A positive quantity on a missing line is NotFound. The line's price is
    /// re-resolved so a promotion that started or ended since the add shows
    /// up immediately.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        identity: &ShopperIdentity,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Result<CartModel, ServiceError> {
        let cart = self.resolve(identity).await?;
        check_ownership(&cart, identity)?;

        let txn = self.db.begin().await?;

        if quantity <= 0 {
            CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .filter(cart_item::Column::ProductId.eq(product_id))
                .filter(variant_filter(variant_id))
                .exec(&txn)
                .await?;
        } else {
            let item = CartItem::find()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .filter(cart_item::Column::ProductId.eq(product_id))
                .filter(variant_filter(variant_id))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Product {} not found in cart {}",
                        product_id, cart.id
                    ))
                })?;

            let price = self
                .pricing
                .resolve_price(&txn, product_id, variant_id, Utc::now())
                .await?;

            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(quantity);
            active.unit_price = Set(price.effective_price);
            active.old_price = Set(price.reference_price);
            active.line_total = Set(price.effective_price * Decimal::from(quantity));
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        let updated = self.recalculate_totals(&txn, cart.id).await?;
        txn.commit().await?;

        let event = if quantity <= 0 {
            Event::CartItemRemoved {
                cart_id: cart.id,
                product_id,
            }
        } else {
            Event::CartItemUpdated {
                cart_id: cart.id,
                product_id,
            }
        };
        self.event_sender.send_or_log(event).await;

        Ok(updated)
    }

    /// Removes the matching line, if present.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        identity: &ShopperIdentity,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<CartModel, ServiceError> {
        let cart = self.resolve(identity).await?;
        check_ownership(&cart, identity)?;

        let txn = self.db.begin().await?;
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(variant_filter(variant_id))
            .exec(&txn)
            .await?;
        let updated = self.recalculate_totals(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                product_id,
            })
            .await;

        Ok(updated)
    }

    /// Empties the cart. The cart itself stays, keeping its identity.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, identity: &ShopperIdentity) -> Result<CartModel, ServiceError> {
        let cart = self.resolve(identity).await?;
        check_ownership(&cart, identity)?;

        let txn = self.db.begin().await?;
        let updated = self.clear_in(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;

        info!("Cleared cart: {}", cart.id);
        Ok(updated)
    }

    /// Returns the cart with every line re-priced at the current instant.
    ///
    /// A promotion that started or ended since the last read is applied or
    /// reverted here. Lines whose catalog rows have disappeared keep their
    /// snapshot prices.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, identity: &ShopperIdentity) -> Result<CartWithItems, ServiceError> {
        let cart = self.resolve(identity).await?;
        check_ownership(&cart, identity)?;

        let txn = self.db.begin().await?;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;

        let now = Utc::now();
        for item in &items {
            let price = match self
                .pricing
                .resolve_price(&txn, item.product_id, item.variant_id, now)
                .await
            {
                Ok(price) => price,
                Err(ServiceError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };

            if price.effective_price != item.unit_price || price.reference_price != item.old_price
            {
                let quantity = item.quantity;
                let mut active: cart_item::ActiveModel = item.clone().into();
                active.unit_price = Set(price.effective_price);
                active.old_price = Set(price.reference_price);
                active.line_total = Set(price.effective_price * Decimal::from(quantity));
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
        }

        let cart = self.recalculate_totals(&txn, cart.id).await?;
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;

        txn.commit().await?;

        Ok(CartWithItems { cart, items })
    }

    /// Fetches the owner's cart and its lines inside the caller's
    /// transaction. Used by order placement; never creates or merges.
    pub async fn find_cart_with_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner_id: Uuid,
    ) -> Result<Option<(CartModel, Vec<cart_item::Model>)>, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::OwnerId.eq(Some(owner_id)))
            .one(conn)
            .await?;

        let Some(cart) = cart else {
            return Ok(None);
        };

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?;

        Ok(Some((cart, items)))
    }

    /// Empties a cart inside the caller's transaction. Used by order
    /// placement so the clear commits or rolls back with the order.
    pub async fn clear_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;

        self.recalculate_totals(conn, cart_id).await
    }

    /// Recomputes the derived cart fields from the line items and slides the
    /// expiry window forward.
    async fn recalculate_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let subtotal: Decimal = items.iter().map(|item| item.line_total).sum();
        let item_count: i32 = items.iter().map(|item| item.quantity).sum();

        let mut cart: cart::ActiveModel = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?
            .into();

        let now = Utc::now();
        cart.subtotal = Set(subtotal);
        cart.item_count = Set(item_count);
        cart.total_amount = Set(subtotal);
        cart.last_activity_at = Set(now);
        cart.expires_at = Set(now + self.ttl());
        cart.updated_at = Set(now);

        Ok(cart.update(conn).await?)
    }

    fn ttl(&self) -> Duration {
        Duration::days(self.config.cart_ttl_days)
    }
}

/// A mutation against a cart the caller does not own is refused; carts are
/// never touched by another party.
fn check_ownership(cart: &CartModel, identity: &ShopperIdentity) -> Result<(), ServiceError> {
    match (cart.owner_id, identity.owner_id) {
        (Some(cart_owner), Some(caller)) if cart_owner != caller => Err(ServiceError::Forbidden(
            "Cart does not belong to this user".to_string(),
        )),
        (Some(_), None) => Err(ServiceError::Forbidden(
            "Cart belongs to an authenticated user".to_string(),
        )),
        _ => Ok(()),
    }
}

fn variant_filter(variant_id: Option<Uuid>) -> SimpleExpr {
    match variant_id {
        Some(variant_id) => cart_item::Column::VariantId.eq(variant_id),
        None => cart_item::Column::VariantId.is_null(),
    }
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_model(owner_id: Option<Uuid>) -> CartModel {
        let now = Utc::now();
        CartModel {
            id: Uuid::new_v4(),
            owner_id,
            cart_token: Uuid::new_v4().to_string(),
            currency: "USD".to_string(),
            subtotal: Decimal::ZERO,
            item_count: 0,
            total_amount: Decimal::ZERO,
            expires_at: now + Duration::days(7),
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn anonymous_caller_may_touch_anonymous_cart() {
        let cart = cart_model(None);
        let identity = ShopperIdentity::anonymous(cart.cart_token.clone());
        assert!(check_ownership(&cart, &identity).is_ok());
    }

    #[test]
    fn owner_may_touch_own_cart() {
        let owner_id = Uuid::new_v4();
        let cart = cart_model(Some(owner_id));
        assert!(check_ownership(&cart, &ShopperIdentity::owner(owner_id)).is_ok());
    }

    #[test]
    fn other_owner_is_forbidden() {
        let cart = cart_model(Some(Uuid::new_v4()));
        let result = check_ownership(&cart, &ShopperIdentity::owner(Uuid::new_v4()));
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }

    #[test]
    fn anonymous_caller_is_forbidden_on_owned_cart() {
        let cart = cart_model(Some(Uuid::new_v4()));
        let result = check_ownership(&cart, &ShopperIdentity::anonymous("token"));
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }

    #[test]
    fn owner_may_touch_unclaimed_cart() {
        // Resolution hands an anonymous cart to an owner only while claiming
        // it, which is an allowed path.
        let cart = cart_model(None);
        assert!(check_ownership(&cart, &ShopperIdentity::owner(Uuid::new_v4())).is_ok());
    }
}
