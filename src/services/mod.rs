/// Domain services
pub mod carts;
pub mod orders;
pub mod pricing;
pub mod stock;

pub use carts::{AddItemInput, CartService, CartWithItems, ShopperIdentity};
pub use orders::{OrderFilter, OrderService, OrderWithDetails, PlaceOrderInput, ShippingInfo};
pub use pricing::{PricingService, ResolvedPrice};
pub use stock::{StockLine, StockService};
