use crate::{
    config::AppConfig,
    entities::{
        order, order_event, order_item, Order, OrderEvent, OrderItem, OrderModel, OrderStatus,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::CartService,
        pricing::PricingService,
        stock::{StockLine, StockService},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Shipping destination snapshot captured on the order at placement
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShippingInfo {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(length(min = 1, message = "Phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address_line1: String,
    pub address_line2: Option<String>,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
    pub landmark: Option<String>,
}

/// Input for placing an order from the shopper's cart
#[derive(Debug, Deserialize)]
pub struct PlaceOrderInput {
    pub shipping_info: ShippingInfo,
    /// Defaults to cash-on-delivery; capture happens outside this system
    pub payment_method: Option<String>,
}

/// Order with its line items and event log
#[derive(Debug, Serialize)]
pub struct OrderWithDetails {
    pub order: OrderModel,
    pub items: Vec<order_item::Model>,
    pub events: Vec<order_event::Model>,
}

/// Filters for listing orders
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub owner_id: Option<Uuid>,
}

/// Order placement and lifecycle service.
///
/// `place_order` is one atomic unit of work: cart read, commit-time pricing,
/// order persistence, conditional stock deduction, and cart clearing all
/// commit together or not at all. Status changes go through the fulfillment
/// state machine and append to the order's event log; stock is deducted
/// exactly once, at placement.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    carts: Arc<CartService>,
    pricing: PricingService,
    stock: StockService,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: Arc<CartService>,
        pricing: PricingService,
        stock: StockService,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            carts,
            pricing,
            stock,
            event_sender,
            config,
        }
    }

    /// Places an order from the owner's cart.
    ///
    /// Prices are re-resolved at this instant; the cart's stored prices are
    /// display state, not truth. If any line fails stock validation or loses
    /// the decrement race the entire transaction rolls back: the order
    /// vanishes and the cart is untouched.
    #[instrument(skip(self, input), fields(owner_id = %owner_id))]
    pub async fn place_order(
        &self,
        owner_id: Uuid,
        input: PlaceOrderInput,
    ) -> Result<OrderModel, ServiceError> {
        input.shipping_info.validate()?;
        let payment_method = input.payment_method.unwrap_or_else(|| "cod".to_string());

        let txn = self.db.begin().await?;

        let (cart, items) = self
            .carts
            .find_cart_with_items(&txn, owner_id)
            .await?
            .ok_or(ServiceError::EmptyCart)?;

        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        // Re-price every line now; a promotion may have started or ended
        // since the line was added.
        let now = Utc::now();
        let mut total_amount = Decimal::ZERO;
        let mut stock_lines = Vec::with_capacity(items.len());
        let mut priced_items = Vec::with_capacity(items.len());

        for item in &items {
            let price = self
                .pricing
                .resolve_price(&txn, item.product_id, item.variant_id, now)
                .await?;

            let line_subtotal = price.effective_price * Decimal::from(item.quantity);
            total_amount += line_subtotal;

            stock_lines.push(StockLine {
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
            });
            priced_items.push((item, price.effective_price, line_subtotal));
        }

        let shipping_fee =
            Decimal::from_f64_retain(self.config.shipping_fee).unwrap_or(Decimal::ZERO);
        let discount =
            Decimal::from_f64_retain(self.config.order_discount).unwrap_or(Decimal::ZERO);
        let grand_total = total_amount + shipping_fee - discount;

        let order_id = Uuid::new_v4();
        let shipping_address = serde_json::to_value(&input.shipping_info)
            .map_err(|e| ServiceError::InternalError(format!("Shipping snapshot failed: {}", e)))?;

        let new_order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("ORD-{}", order_id)),
            owner_id: Set(owner_id),
            status: Set(OrderStatus::Pending),
            payment_method: Set(payment_method),
            payment_status: Set(PaymentStatus::Pending),
            shipping_address: Set(shipping_address),
            total_amount: Set(total_amount),
            shipping_fee: Set(shipping_fee),
            discount: Set(discount),
            grand_total: Set(grand_total),
            paid_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let placed = new_order.insert(&txn).await?;

        for (item, unit_price, line_subtotal) in priced_items {
            let order_item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                variant_id: Set(item.variant_id),
                title: Set(item.title.clone()),
                image: Set(item.image.clone()),
                unit_price: Set(unit_price),
                quantity: Set(item.quantity),
                line_subtotal: Set(line_subtotal),
                created_at: Set(now),
            };
            order_item.insert(&txn).await?;
        }

        append_event(&txn, order_id, "order_placed", "Order placed successfully").await?;

        // Conditional deduction; a failure here rolls back the order insert
        // and leaves the cart untouched.
        self.stock.reserve_and_deduct(&txn, &stock_lines).await?;

        self.carts.clear_in(&txn, cart.id).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderPlaced(order_id))
            .await;
        for line in &stock_lines {
            self.event_sender
                .send_or_log(Event::StockDeducted {
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    quantity: line.quantity,
                })
                .await;
        }

        info!(
            "Placed order {} for owner {}: {} lines, grand total {}",
            order_id,
            owner_id,
            stock_lines.len(),
            grand_total
        );
        Ok(placed)
    }

    /// Moves an order through the fulfillment state machine.
    ///
    /// Confirmation is a pure status change; stock was already deducted at
    /// placement. Cancellation restores the order's stock.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let existing = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = existing.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        if new_status == OrderStatus::Cancelled {
            let lines = self.order_stock_lines(&txn, order_id).await?;
            self.stock.restore(&txn, &lines).await?;
        }

        let now = Utc::now();
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(new_status);
        active.updated_at = Set(now);
        match new_status {
            OrderStatus::Shipped => active.shipped_at = Set(Some(now)),
            OrderStatus::Delivered => active.delivered_at = Set(Some(now)),
            OrderStatus::Cancelled => active.cancelled_at = Set(Some(now)),
            _ => {}
        }

        let (event_type, message) = transition_event(new_status);
        append_event(&txn, order_id, &event_type, &message).await?;

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        if new_status == OrderStatus::Cancelled {
            self.event_sender
                .send_or_log(Event::OrderCancelled(order_id))
                .await;
        }

        info!(
            "Order {} status updated from '{}' to '{}'",
            order_id, old_status, new_status
        );
        Ok(updated)
    }

    /// Convenience wrapper over the state machine.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.update_status(order_id, OrderStatus::Cancelled).await
    }

    /// Records that payment arrived for an order. Capture itself is an
    /// external collaborator's business.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_paid(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let existing = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if existing.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::Conflict(format!(
                "Order {} is already paid",
                order_id
            )));
        }

        let now = Utc::now();
        let mut active: order::ActiveModel = existing.into();
        active.payment_status = Set(PaymentStatus::Paid);
        active.paid_at = Set(Some(now));
        active.updated_at = Set(now);

        append_event(&txn, order_id, "payment_success", "Payment received").await?;

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderPaid(order_id))
            .await;

        Ok(updated)
    }

    /// Fetches an order with its line items and event log.
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithDetails, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let events = OrderEvent::find()
            .filter(order_event::Column::OrderId.eq(order_id))
            .order_by_asc(order_event::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(OrderWithDetails {
            order,
            items,
            events,
        })
    }

    /// Lists orders matching the filter, newest first.
    pub async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<OrderModel>, ServiceError> {
        let mut query = Order::find();

        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(order::Column::PaymentStatus.eq(payment_status));
        }
        if let Some(owner_id) = filter.owner_id {
            query = query.filter(order::Column::OwnerId.eq(owner_id));
        }

        Ok(query
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Lists one shopper's orders, newest first.
    pub async fn list_orders_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        self.list_orders(OrderFilter {
            owner_id: Some(owner_id),
            ..Default::default()
        })
        .await
    }

    /// The stock movements an order represents, for restoration.
    async fn order_stock_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<StockLine>, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;

        Ok(items
            .iter()
            .map(|item| StockLine {
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
            })
            .collect())
    }
}

/// Appends one row to an order's append-only event log.
async fn append_event<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    event_type: &str,
    message: &str,
) -> Result<(), ServiceError> {
    let event = order_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        event_type: Set(event_type.to_string()),
        message: Set(message.to_string()),
        created_at: Set(Utc::now()),
    };
    event.insert(conn).await?;
    Ok(())
}

fn transition_event(status: OrderStatus) -> (String, String) {
    let message = match status {
        OrderStatus::Pending => "Order placed successfully",
        OrderStatus::Confirmed => "Order confirmed",
        OrderStatus::Processing => "Order moved to processing",
        OrderStatus::Shipped => "Order shipped",
        OrderStatus::Delivered => "Order delivered",
        OrderStatus::Cancelled => "Order cancelled",
    };
    (format!("order_{}", status), message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_event_types_follow_status_names() {
        let (event_type, message) = transition_event(OrderStatus::Shipped);
        assert_eq!(event_type, "order_shipped");
        assert_eq!(message, "Order shipped");

        let (event_type, _) = transition_event(OrderStatus::Cancelled);
        assert_eq!(event_type, "order_cancelled");
    }

    #[test]
    fn grand_total_formula_matches_worked_example() {
        // A(500 x 2) + B(1200 x 1) with fee 200 and discount 100
        let total_amount = Decimal::from(500) * Decimal::from(2) + Decimal::from(1200);
        let shipping_fee = Decimal::from(200);
        let discount = Decimal::from(100);
        let grand_total = total_amount + shipping_fee - discount;

        assert_eq!(total_amount, Decimal::from(2200));
        assert_eq!(grand_total, Decimal::from(2300));
    }
}
