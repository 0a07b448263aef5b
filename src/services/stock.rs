use crate::{
    entities::{product, product_variant, Product, ProductVariant},
    errors::{ServiceError, StockRef},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// One inventory movement: a quantity against a product or one of its
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

impl StockLine {
    fn stock_ref(&self) -> StockRef {
        StockRef {
            product_id: self.product_id,
            variant_id: self.variant_id,
        }
    }
}

/// Race-safe inventory validation and deduction.
///
/// Stock is never locked pessimistically. Every deduction is a conditional
/// per-row update (`stock = stock - q WHERE stock >= q`); a decrement that
/// matches zero rows lost a race after validation and fails the whole batch,
/// relying on the enclosing transaction to undo earlier decrements.
#[derive(Debug, Clone, Default)]
pub struct StockService;

impl StockService {
    pub fn new() -> Self {
        Self
    }

    /// Validates and deducts stock for every line, all-or-nothing.
    ///
    /// Must run inside the caller's transaction: on `InsufficientStock` the
    /// caller rolls back, which reverts any decrements already applied.
    pub async fn reserve_and_deduct<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[StockLine],
    ) -> Result<(), ServiceError> {
        // Validation pass: reject before writing anything.
        for line in lines {
            if line.quantity < 1 {
                return Err(ServiceError::InvalidInput(format!(
                    "Quantity must be at least 1, got {}",
                    line.quantity
                )));
            }

            let available = self.available(conn, line).await?;
            if available < line.quantity {
                return Err(ServiceError::InsufficientStock {
                    item: line.stock_ref(),
                    requested: line.quantity,
                    available,
                });
            }
        }

        // Deduction pass: conditional decrements so concurrent checkouts that
        // both passed validation cannot drive stock negative.
        for line in lines {
            let result = match line.variant_id {
                Some(variant_id) => {
                    ProductVariant::update_many()
                        .col_expr(
                            product_variant::Column::Stock,
                            Expr::col(product_variant::Column::Stock).sub(line.quantity),
                        )
                        .col_expr(
                            product_variant::Column::UpdatedAt,
                            Expr::value(Utc::now()),
                        )
                        .filter(product_variant::Column::Id.eq(variant_id))
                        .filter(product_variant::Column::Stock.gte(line.quantity))
                        .exec(conn)
                        .await?
                }
                None => {
                    Product::update_many()
                        .col_expr(
                            product::Column::Stock,
                            Expr::col(product::Column::Stock).sub(line.quantity),
                        )
                        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(product::Column::Id.eq(line.product_id))
                        .filter(product::Column::Stock.gte(line.quantity))
                        .exec(conn)
                        .await?
                }
            };

            if result.rows_affected == 0 {
                // Lost the race between validation and decrement.
                let available = self.available(conn, line).await.unwrap_or(0);
                warn!(
                    product_id = %line.product_id,
                    requested = line.quantity,
                    available,
                    "Conditional stock decrement matched no rows"
                );
                return Err(ServiceError::InsufficientStock {
                    item: line.stock_ref(),
                    requested: line.quantity,
                    available,
                });
            }

            debug!(
                product_id = %line.product_id,
                quantity = line.quantity,
                "Stock deducted"
            );
        }

        Ok(())
    }

    /// Reverses deductions, e.g. on order cancellation.
    ///
    /// Only ever increases stock, so it needs no conditions and no atomicity
    /// with any other operation.
    pub async fn restore<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[StockLine],
    ) -> Result<(), ServiceError> {
        for line in lines {
            match line.variant_id {
                Some(variant_id) => {
                    ProductVariant::update_many()
                        .col_expr(
                            product_variant::Column::Stock,
                            Expr::col(product_variant::Column::Stock).add(line.quantity),
                        )
                        .col_expr(
                            product_variant::Column::UpdatedAt,
                            Expr::value(Utc::now()),
                        )
                        .filter(product_variant::Column::Id.eq(variant_id))
                        .exec(conn)
                        .await?;
                }
                None => {
                    Product::update_many()
                        .col_expr(
                            product::Column::Stock,
                            Expr::col(product::Column::Stock).add(line.quantity),
                        )
                        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(product::Column::Id.eq(line.product_id))
                        .exec(conn)
                        .await?;
                }
            }

            debug!(
                product_id = %line.product_id,
                quantity = line.quantity,
                "Stock restored"
            );
        }

        Ok(())
    }

    /// Current stock for one line's product or variant.
    async fn available<C: ConnectionTrait>(
        &self,
        conn: &C,
        line: &StockLine,
    ) -> Result<i32, ServiceError> {
        match line.variant_id {
            Some(variant_id) => {
                let variant = ProductVariant::find_by_id(variant_id)
                    .one(conn)
                    .await?
                    .filter(|v| v.product_id == line.product_id)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "Variant {} not found for product {}",
                            variant_id, line.product_id
                        ))
                    })?;
                Ok(variant.stock)
            }
            None => {
                let product = Product::find_by_id(line.product_id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Product {} not found", line.product_id))
                    })?;
                Ok(product.stock)
            }
        }
    }
}
