use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Product variant entity
///
/// A variant carries its own stock count independent of the parent product.
/// `price` and `old_price` are optional; an unset price falls back to the
/// parent product's price at resolution time. `attributes` is an open
/// string-keyed map of scalar values (e.g. color, size).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub old_price: Option<Decimal>,
    pub stock: i32,
    #[sea_orm(column_type = "Json")]
    pub attributes: Json,
    #[sea_orm(column_type = "Json", nullable)]
    pub images: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// First configured image URL, if any.
    pub fn primary_image(&self) -> Option<String> {
        self.images
            .as_ref()
            .and_then(|images| images.as_array())
            .and_then(|images| images.first())
            .and_then(|image| image.as_str())
            .map(str::to_string)
    }
}
