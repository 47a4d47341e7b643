use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One receipt of inventory at a specific unit cost.
///
/// Layers are append-only: consumption decrements `remaining_quantity` but a
/// fully consumed layer is never deleted, so valuation history stays intact.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cost_layers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub received_date: DateTime<Utc>,
    #[sea_orm(column_type = "Decimal(Some((18, 4)))")]
    pub original_quantity: rust_decimal::Decimal,
    // Invariant: 0 <= remaining_quantity <= original_quantity
    #[sea_orm(column_type = "Decimal(Some((18, 4)))")]
    pub remaining_quantity: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((18, 4)))")]
    pub unit_cost: rust_decimal::Decimal,
    pub currency: String,
    pub reference_number: Option<String>,
    pub reference_type: Option<String>,
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
    #[sea_orm(has_many = "super::consumption_event::Entity")]
    ConsumptionEvents,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::consumption_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConsumptionEvents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Remaining value still held in this layer
    pub fn remaining_value(&self) -> rust_decimal::Decimal {
        self.remaining_quantity * self.unit_cost
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_quantity.is_zero()
    }
}
