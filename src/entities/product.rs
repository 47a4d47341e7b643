use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub category: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((18, 4)))")]
    pub standard_cost: Option<rust_decimal::Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cost_layer::Entity")]
    CostLayers,
    #[sea_orm(has_one = "super::product_costing_config::Entity")]
    CostingConfig,
}

impl Related<super::cost_layer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CostLayers.def()
    }
}

impl Related<super::product_costing_config::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CostingConfig.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
