use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audit record of a single layer consumption.
///
/// One row is written per layer touched by a committed calculation. Standard
/// cost issues carry no layer id since they never decrement layers. As-of
/// valuation replays these rows against the layer table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "consumption_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub layer_id: Option<Uuid>,
    pub method: String,
    #[sea_orm(column_type = "Decimal(Some((18, 4)))")]
    pub quantity: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((18, 4)))")]
    pub unit_cost: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((18, 4)))")]
    pub cogs_amount: rust_decimal::Decimal,
    pub reference_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cost_layer::Entity",
        from = "Column::LayerId",
        to = "super::cost_layer::Column::Id"
    )]
    CostLayer,
}

impl Related<super::cost_layer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CostLayer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
