pub mod consumption_event;
pub mod cost_layer;
pub mod product;
pub mod product_costing_config;

pub use product_costing_config::CostingMethod;
