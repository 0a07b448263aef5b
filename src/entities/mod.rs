/// Persistent entities
pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_event;
pub mod order_item;
pub mod product;
pub mod product_variant;
pub mod promotion;
pub mod promotion_product;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentStatus};
pub use order_event::{Entity as OrderEvent, Model as OrderEventModel};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use promotion::{Entity as Promotion, Model as PromotionModel};
pub use promotion_product::{Entity as PromotionProduct, Model as PromotionProductModel};
