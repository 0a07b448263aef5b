use crate::{
    entities::{product, product_variant, promotion_product, Product, ProductVariant, Promotion, PromotionProduct},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::debug;
use uuid::Uuid;

/// Result of resolving the effective price of a catalog item at an instant.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResolvedPrice {
    /// The price the shopper pays right now
    pub effective_price: Decimal,
    /// The struck-through comparison price, when one applies
    pub reference_price: Option<Decimal>,
    /// Whether a promotion produced the effective price
    pub was_discounted: bool,
    /// End of the winning promotion's window, when one applies
    pub promotion_ends_at: Option<DateTime<Utc>>,
}

/// Resolves effective unit prices, overlaying active promotions.
///
/// Promotion activity is a pure predicate over the `[starts_at, ends_at)`
/// window evaluated against the caller-supplied instant; no sweep job or
/// stored flag participates. Callers must re-resolve at order commit time —
/// a promotion may have started, ended, or changed since the cart line was
/// written, and the commit-time price is authoritative.
#[derive(Debug, Clone, Default)]
pub struct PricingService;

impl PricingService {
    pub fn new() -> Self {
        Self
    }

    /// Resolves the effective price for a product or variant at `at`.
    ///
    /// Fetches the catalog rows and delegates to [`resolve_for`]. Fails with
    /// `NotFound` when the product or variant is absent, or when the variant
    /// does not belong to the product.
    ///
    /// [`resolve_for`]: PricingService::resolve_for
    pub async fn resolve_price<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<ResolvedPrice, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let variant = match variant_id {
            Some(variant_id) => {
                let variant = ProductVariant::find_by_id(variant_id)
                    .one(conn)
                    .await?
                    .filter(|v| v.product_id == product.id)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "Variant {} not found for product {}",
                            variant_id, product_id
                        ))
                    })?;
                Some(variant)
            }
            None => None,
        };

        self.resolve_for(conn, &product, variant.as_ref(), at).await
    }

    /// Resolves the effective price from already-loaded catalog rows.
    ///
    /// A promotion row with a NULL variant covers the product and all of its
    /// variants; a row with a variant id covers exactly that variant. When
    /// several promotions overlap, the lowest sale price wins.
    pub async fn resolve_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        product: &product::Model,
        variant: Option<&product_variant::Model>,
        at: DateTime<Utc>,
    ) -> Result<ResolvedPrice, ServiceError> {
        let base_price = variant
            .and_then(|v| v.price)
            .unwrap_or(product.price);
        let base_old_price = variant
            .and_then(|v| v.old_price)
            .or(product.old_price);

        let scope = match variant {
            Some(variant) => Condition::any()
                .add(promotion_product::Column::VariantId.is_null())
                .add(promotion_product::Column::VariantId.eq(variant.id)),
            None => Condition::all().add(promotion_product::Column::VariantId.is_null()),
        };

        let covered = PromotionProduct::find()
            .filter(promotion_product::Column::ProductId.eq(product.id))
            .filter(scope)
            .find_also_related(Promotion)
            .all(conn)
            .await?;

        let winner = covered
            .into_iter()
            .filter_map(|(row, promotion)| promotion.map(|p| (row, p)))
            .filter(|(_, promotion)| promotion.is_active_at(at))
            .min_by_key(|(row, _)| row.sale_price);

        if let Some((row, promotion)) = winner {
            debug!(
                product_id = %product.id,
                promotion_id = %promotion.id,
                sale_price = %row.sale_price,
                "Applying promotional price"
            );
            return Ok(ResolvedPrice {
                effective_price: row.sale_price,
                reference_price: Some(base_price),
                was_discounted: true,
                promotion_ends_at: Some(promotion.ends_at),
            });
        }

        Ok(ResolvedPrice {
            effective_price: base_price,
            reference_price: base_old_price,
            was_discounted: false,
            promotion_ends_at: None,
        })
    }
}
