mod common;

use chrono::{Duration, Utc};
use common::{shipping_info, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::{
    entities::{order, order_event, order_item, OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::{AddItemInput, PlaceOrderInput, ShopperIdentity},
};
use uuid::Uuid;

fn place_input() -> PlaceOrderInput {
    PlaceOrderInput {
        shipping_info: shipping_info(),
        payment_method: None,
    }
}

#[tokio::test]
async fn place_order_deducts_stock_and_clears_cart() {
    let app = TestApp::new().await;
    let product = app.seed_product("Kettle", dec!(45.00), None, 8).await;
    let owner_id = Uuid::new_v4();

    let owner = ShopperIdentity::owner(owner_id);
    app.carts()
        .add_item(
            &owner,
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity: 3,
            },
        )
        .await
        .unwrap();

    let order = app
        .orders()
        .place_order(owner_id, place_input())
        .await
        .expect("failed to place order");

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.payment_method, "cod");
    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.total_amount, dec!(135.00));

    // Post-order stock equals pre-order stock minus quantity.
    assert_eq!(app.product_stock(product.id).await, 5);

    // The cart is emptied, not deleted.
    let view = app.carts().get_cart(&owner).await.unwrap();
    assert!(view.items.is_empty());
    assert_eq!(view.cart.subtotal, Decimal::ZERO);

    // The event log starts with order_placed.
    let details = app.orders().get_order(order.id).await.unwrap();
    assert_eq!(details.items.len(), 1);
    assert_eq!(details.events.len(), 1);
    assert_eq!(details.events[0].event_type, "order_placed");
}

#[tokio::test]
async fn totals_match_worked_example() {
    let app = TestApp::new().await;
    // Item A: price 500 qty 2, item B: price 1200 qty 1.
    let item_a = app.seed_product("Item A", dec!(500), None, 10).await;
    let item_b = app.seed_product("Item B", dec!(1200), None, 10).await;
    let owner_id = Uuid::new_v4();

    let owner = ShopperIdentity::owner(owner_id);
    app.carts()
        .add_item(
            &owner,
            AddItemInput {
                product_id: item_a.id,
                variant_id: None,
                quantity: 2,
            },
        )
        .await
        .unwrap();
    app.carts()
        .add_item(
            &owner,
            AddItemInput {
                product_id: item_b.id,
                variant_id: None,
                quantity: 1,
            },
        )
        .await
        .unwrap();

    let order = app.orders().place_order(owner_id, place_input()).await.unwrap();

    // Default flat shipping fee 200 and discount 100.
    assert_eq!(order.total_amount, dec!(2200));
    assert_eq!(order.shipping_fee, dec!(200));
    assert_eq!(order.discount, dec!(100));
    assert_eq!(order.grand_total, dec!(2300));
}

#[tokio::test]
async fn empty_cart_cannot_be_checked_out() {
    let app = TestApp::new().await;
    let owner_id = Uuid::new_v4();

    // No cart at all.
    let result = app.orders().place_order(owner_id, place_input()).await;
    assert!(matches!(result, Err(ServiceError::EmptyCart)));

    // A cart that exists but has no lines.
    app.carts()
        .resolve(&ShopperIdentity::owner(owner_id))
        .await
        .unwrap();
    let result = app.orders().place_order(owner_id, place_input()).await;
    assert!(matches!(result, Err(ServiceError::EmptyCart)));
}

#[tokio::test]
async fn missing_shipping_fields_are_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("Vase", dec!(35.00), None, 5).await;
    let owner_id = Uuid::new_v4();

    app.carts()
        .add_item(
            &ShopperIdentity::owner(owner_id),
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity: 1,
            },
        )
        .await
        .unwrap();

    let mut input = place_input();
    input.shipping_info.city = String::new();

    let result = app.orders().place_order(owner_id, input).await;
    assert!(matches!(result, Err(ServiceError::InvalidInput(_))));

    // Nothing happened: cart intact, stock intact.
    assert_eq!(app.product_stock(product.id).await, 5);
}

#[tokio::test]
async fn insufficient_stock_rolls_back_everything() {
    let app = TestApp::new().await;
    let plenty = app.seed_product("Pencil", dec!(2.00), None, 100).await;
    let scarce = app.seed_product("Easel", dec!(150.00), None, 1).await;
    let owner_id = Uuid::new_v4();

    let owner = ShopperIdentity::owner(owner_id);
    app.carts()
        .add_item(
            &owner,
            AddItemInput {
                product_id: plenty.id,
                variant_id: None,
                quantity: 10,
            },
        )
        .await
        .unwrap();
    app.carts()
        .add_item(
            &owner,
            AddItemInput {
                product_id: scarce.id,
                variant_id: None,
                quantity: 3,
            },
        )
        .await
        .unwrap();

    let result = app.orders().place_order(owner_id, place_input()).await;

    match result {
        Err(ServiceError::InsufficientStock {
            item,
            requested,
            available,
        }) => {
            assert_eq!(item.product_id, scarce.id);
            assert_eq!(requested, 3);
            assert_eq!(available, 1);
        }
        other => panic!("expected InsufficientStock, got {:?}", other.map(|o| o.id)),
    }

    // No partial deduction across sibling lines.
    assert_eq!(app.product_stock(plenty.id).await, 100);
    assert_eq!(app.product_stock(scarce.id).await, 1);

    // No order row survived the rollback.
    let orders = order::Entity::find().all(app.db()).await.unwrap();
    assert!(orders.is_empty());
    let items = order_item::Entity::find().all(app.db()).await.unwrap();
    assert!(items.is_empty());
    let events = order_event::Entity::find().all(app.db()).await.unwrap();
    assert!(events.is_empty());

    // The cart is untouched.
    let view = app.carts().get_cart(&owner).await.unwrap();
    assert_eq!(view.items.len(), 2);
}

#[tokio::test]
async fn commit_time_price_wins_over_cart_snapshot() {
    let app = TestApp::new().await;
    let product = app.seed_product("Blender", dec!(100.00), None, 10).await;
    let now = Utc::now();
    let promo = app
        .seed_promotion(
            "One hour deal",
            product.id,
            None,
            dec!(70.00),
            now - Duration::minutes(30),
            now + Duration::minutes(30),
        )
        .await;
    let owner_id = Uuid::new_v4();

    // Added at the promotional price.
    let cart = app
        .carts()
        .add_item(
            &ShopperIdentity::owner(owner_id),
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(cart.subtotal, dec!(140.00));

    // The promotion expires before checkout; the order must use the normal
    // price, not the stale cart price.
    app.expire_promotion(promo.id).await;

    let order = app.orders().place_order(owner_id, place_input()).await.unwrap();
    assert_eq!(order.total_amount, dec!(200.00));

    let details = app.orders().get_order(order.id).await.unwrap();
    assert_eq!(details.items[0].unit_price, dec!(100.00));
    assert_eq!(details.items[0].line_subtotal, dec!(200.00));
}

#[tokio::test]
async fn promotion_active_at_checkout_is_honored() {
    let app = TestApp::new().await;
    let product = app.seed_product("Toaster", dec!(80.00), None, 10).await;
    let owner_id = Uuid::new_v4();

    // Added at the normal price.
    app.carts()
        .add_item(
            &ShopperIdentity::owner(owner_id),
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity: 1,
            },
        )
        .await
        .unwrap();

    // A promotion starts before checkout.
    let now = Utc::now();
    app.seed_promotion(
        "Checkout surprise",
        product.id,
        None,
        dec!(60.00),
        now - Duration::minutes(1),
        now + Duration::hours(1),
    )
    .await;

    let order = app.orders().place_order(owner_id, place_input()).await.unwrap();
    assert_eq!(order.total_amount, dec!(60.00));
}

#[tokio::test]
async fn variant_stock_is_deducted_independently_of_product() {
    let app = TestApp::new().await;
    let product = app.seed_product("Hoodie", dec!(50.00), None, 40).await;
    let variant = app
        .seed_variant(
            product.id,
            "HD-M",
            Some(dec!(55.00)),
            6,
            serde_json::json!({"size": "M"}),
        )
        .await;
    let owner_id = Uuid::new_v4();

    app.carts()
        .add_item(
            &ShopperIdentity::owner(owner_id),
            AddItemInput {
                product_id: product.id,
                variant_id: Some(variant.id),
                quantity: 4,
            },
        )
        .await
        .unwrap();

    let order = app.orders().place_order(owner_id, place_input()).await.unwrap();
    assert_eq!(order.total_amount, dec!(220.00));

    // The variant's own stock moved; the parent product's did not.
    assert_eq!(app.variant_stock(variant.id).await, 2);
    assert_eq!(app.product_stock(product.id).await, 40);
}

#[tokio::test]
async fn over_ask_on_variant_reports_variant_ref() {
    let app = TestApp::new().await;
    let product = app.seed_product("Boots", dec!(90.00), None, 100).await;
    let variant = app
        .seed_variant(product.id, "BT-44", None, 2, serde_json::json!({"size": "44"}))
        .await;
    let owner_id = Uuid::new_v4();

    app.carts()
        .add_item(
            &ShopperIdentity::owner(owner_id),
            AddItemInput {
                product_id: product.id,
                variant_id: Some(variant.id),
                quantity: 5,
            },
        )
        .await
        .unwrap();

    let result = app.orders().place_order(owner_id, place_input()).await;

    match result {
        Err(ServiceError::InsufficientStock {
            item,
            requested,
            available,
        }) => {
            assert_eq!(item.product_id, product.id);
            assert_eq!(item.variant_id, Some(variant.id));
            assert_eq!(requested, 5);
            assert_eq!(available, 2);
        }
        other => panic!("expected InsufficientStock, got {:?}", other.map(|o| o.id)),
    }

    assert_eq!(app.variant_stock(variant.id).await, 2);
}
