use crate::{
    db::DbPool,
    entities::{
        consumption_event::{self, Entity as ConsumptionEvent},
        cost_layer::{self, Entity as CostLayer},
        product::{self, Entity as Product},
        product_costing_config::{self, CostingMethod, Entity as ProductCostingConfig},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

const MONEY_DP: u32 = 4;

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Filters shared by the valuation and variance reports
#[derive(Debug, Clone, Default)]
pub struct ValuationFilter {
    pub warehouse_id: Option<Uuid>,
    pub category: Option<String>,
    /// Value the inventory as it stood at this instant instead of now
    pub as_of: Option<DateTime<Utc>>,
}

/// Date-range filter for the COGS report
#[derive(Debug, Clone)]
pub struct CogsReportFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductValuation {
    pub product_id: Uuid,
    pub product_code: String,
    pub product_name: String,
    pub category: Option<String>,
    pub method: CostingMethod,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub layer_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryValuation {
    pub category: String,
    pub total_value: Decimal,
    pub total_quantity: Decimal,
    pub product_count: usize,
    /// Share of the overall valuation, in percent (2 dp)
    pub value_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InventoryValuationReport {
    pub as_of: DateTime<Utc>,
    pub warehouse_id: Option<Uuid>,
    pub total_value: Decimal,
    pub total_quantity: Decimal,
    pub product_count: usize,
    pub products: Vec<ProductValuation>,
    pub by_category: Vec<CategoryValuation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductCogs {
    pub product_id: Uuid,
    pub product_code: String,
    pub product_name: String,
    pub category: Option<String>,
    pub quantity: Decimal,
    pub total_cogs: Decimal,
    pub average_unit_cost: Decimal,
    pub event_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryCogs {
    pub category: String,
    pub quantity: Decimal,
    pub total_cogs: Decimal,
    /// Share of the period's total COGS, in percent (2 dp)
    pub cogs_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MonthlyCogs {
    /// First day of the month, UTC
    pub month: DateTime<Utc>,
    pub quantity: Decimal,
    pub total_cogs: Decimal,
    pub average_unit_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CogsReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_quantity: Decimal,
    pub total_cogs: Decimal,
    pub average_unit_cost: Decimal,
    pub by_product: Vec<ProductCogs>,
    pub by_category: Vec<CategoryCogs>,
    pub monthly: Vec<MonthlyCogs>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductVariance {
    pub product_id: Uuid,
    pub product_code: String,
    pub product_name: String,
    pub category: Option<String>,
    pub standard_cost: Decimal,
    pub actual_cost: Decimal,
    /// standard minus actual; positive means actual came in under standard
    pub variance: Decimal,
    pub variance_percent: Decimal,
    pub total_quantity: Decimal,
    pub total_variance_impact: Decimal,
    pub favorable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CostVarianceReport {
    pub generated_at: DateTime<Utc>,
    pub product_count: usize,
    pub total_favorable_impact: Decimal,
    pub total_unfavorable_impact: Decimal,
    pub products: Vec<ProductVariance>,
}

pub struct ValuationService {
    db_pool: Arc<DbPool>,
}

impl ValuationService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Values on-hand inventory per product and category. When `as_of` is set
    /// the report replays consumption history to reconstruct each layer's
    /// remaining quantity at that instant.
    #[instrument(skip(self))]
    pub async fn inventory_valuation(
        &self,
        filter: ValuationFilter,
    ) -> Result<InventoryValuationReport, ServiceError> {
        let db = self.db_pool.as_ref();
        let as_of = filter.as_of.unwrap_or_else(Utc::now);

        let mut products_query = Product::find();
        if let Some(category) = &filter.category {
            products_query = products_query.filter(product::Column::Category.eq(category.clone()));
        }
        let products = products_query
            .order_by_asc(product::Column::Code)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let methods = self.load_methods(&products).await?;

        let mut rows = Vec::new();
        for prod in &products {
            let layers = self
                .layers_as_of(prod.id, filter.warehouse_id, filter.as_of)
                .await?;

            let quantity: Decimal = layers.iter().map(|(_, remaining)| *remaining).sum();
            if quantity.is_zero() {
                continue;
            }

            let method = methods
                .get(&prod.id)
                .copied()
                .unwrap_or_default();

            // Standard-cost products are carried at the standard rate, other
            // methods at the layer costs actually paid
            let total_value = match (method, prod.standard_cost) {
                (CostingMethod::Standard, Some(standard)) => round_money(quantity * standard),
                _ => layers
                    .iter()
                    .map(|(layer, remaining)| round_money(*remaining * layer.unit_cost))
                    .sum(),
            };

            rows.push(ProductValuation {
                product_id: prod.id,
                product_code: prod.code.clone(),
                product_name: prod.name.clone(),
                category: prod.category.clone(),
                method,
                quantity,
                unit_cost: round_money(total_value / quantity),
                total_value,
                layer_count: layers.len(),
            });
        }

        rows.sort_by(|a, b| b.total_value.cmp(&a.total_value));

        let total_value: Decimal = rows.iter().map(|r| r.total_value).sum();
        let total_quantity: Decimal = rows.iter().map(|r| r.quantity).sum();
        let by_category = summarize_categories(&rows, total_value);

        Ok(InventoryValuationReport {
            as_of,
            warehouse_id: filter.warehouse_id,
            total_value,
            total_quantity,
            product_count: rows.len(),
            products: rows,
            by_category,
        })
    }

    /// Aggregates recorded consumption into a COGS report over a date range
    #[instrument(skip(self))]
    pub async fn cogs_report(&self, filter: CogsReportFilter) -> Result<CogsReport, ServiceError> {
        if filter.from > filter.to {
            return Err(ServiceError::ValidationError(
                "Report start date must not be after the end date".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();

        let mut query = ConsumptionEvent::find()
            .filter(consumption_event::Column::OccurredAt.gte(filter.from))
            .filter(consumption_event::Column::OccurredAt.lte(filter.to));
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(consumption_event::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(consumption_event::Column::ProductId.eq(product_id));
        }
        let events = query
            .order_by_asc(consumption_event::Column::OccurredAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let products = Product::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let product_index: HashMap<Uuid, &product::Model> =
            products.iter().map(|p| (p.id, p)).collect();

        let mut per_product: HashMap<Uuid, (Decimal, Decimal, usize)> = HashMap::new();
        let mut per_month: HashMap<(i32, u32), (Decimal, Decimal)> = HashMap::new();
        for event in &events {
            let entry = per_product
                .entry(event.product_id)
                .or_insert((Decimal::ZERO, Decimal::ZERO, 0));
            entry.0 += event.quantity;
            entry.1 += event.cogs_amount;
            entry.2 += 1;

            let key = (event.occurred_at.year(), event.occurred_at.month());
            let month = per_month.entry(key).or_insert((Decimal::ZERO, Decimal::ZERO));
            month.0 += event.quantity;
            month.1 += event.cogs_amount;
        }

        let mut by_product: Vec<ProductCogs> = per_product
            .into_iter()
            .map(|(product_id, (quantity, total_cogs, event_count))| {
                let prod = product_index.get(&product_id);
                ProductCogs {
                    product_id,
                    product_code: prod.map(|p| p.code.clone()).unwrap_or_default(),
                    product_name: prod.map(|p| p.name.clone()).unwrap_or_default(),
                    category: prod.and_then(|p| p.category.clone()),
                    quantity,
                    total_cogs,
                    average_unit_cost: if quantity.is_zero() {
                        Decimal::ZERO
                    } else {
                        round_money(total_cogs / quantity)
                    },
                    event_count,
                }
            })
            .collect();
        by_product.sort_by(|a, b| b.total_cogs.cmp(&a.total_cogs));

        let mut category_totals: HashMap<String, (Decimal, Decimal)> = HashMap::new();
        for row in &by_product {
            let key = row
                .category
                .clone()
                .unwrap_or_else(|| "Uncategorized".to_string());
            let entry = category_totals
                .entry(key)
                .or_insert((Decimal::ZERO, Decimal::ZERO));
            entry.0 += row.quantity;
            entry.1 += row.total_cogs;
        }
        let total_cogs: Decimal = by_product.iter().map(|r| r.total_cogs).sum();
        let mut by_category: Vec<CategoryCogs> = category_totals
            .into_iter()
            .map(|(category, (quantity, cogs))| CategoryCogs {
                category,
                quantity,
                total_cogs: cogs,
                cogs_percent: if total_cogs.is_zero() {
                    Decimal::ZERO
                } else {
                    (cogs / total_cogs * Decimal::ONE_HUNDRED)
                        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
                },
            })
            .collect();
        by_category.sort_by(|a, b| b.total_cogs.cmp(&a.total_cogs));

        let mut monthly: Vec<MonthlyCogs> = per_month
            .into_iter()
            .filter_map(|((year, month), (quantity, total_cogs))| {
                let start = chrono::NaiveDate::from_ymd_opt(year, month, 1)?
                    .and_hms_opt(0, 0, 0)?
                    .and_utc();
                Some(MonthlyCogs {
                    month: start,
                    quantity,
                    total_cogs,
                    average_unit_cost: if quantity.is_zero() {
                        Decimal::ZERO
                    } else {
                        round_money(total_cogs / quantity)
                    },
                })
            })
            .collect();
        monthly.sort_by_key(|m| m.month);

        let total_quantity: Decimal = by_product.iter().map(|r| r.quantity).sum();

        Ok(CogsReport {
            from: filter.from,
            to: filter.to,
            total_quantity,
            total_cogs,
            average_unit_cost: if total_quantity.is_zero() {
                Decimal::ZERO
            } else {
                round_money(total_cogs / total_quantity)
            },
            by_product,
            by_category,
            monthly,
        })
    }

    /// Compares each product's standard cost against its actual weighted
    /// average layer cost. Only products with both a standard cost and stock
    /// on hand appear; rows are ordered by the size of the variance impact.
    #[instrument(skip(self))]
    pub async fn cost_variance_analysis(
        &self,
        filter: ValuationFilter,
    ) -> Result<CostVarianceReport, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut products_query =
            Product::find().filter(product::Column::StandardCost.is_not_null());
        if let Some(category) = &filter.category {
            products_query = products_query.filter(product::Column::Category.eq(category.clone()));
        }
        let products = products_query
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut rows = Vec::new();
        for prod in &products {
            let standard_cost = match prod.standard_cost {
                Some(sc) => sc,
                None => continue,
            };

            let layers = self
                .layers_as_of(prod.id, filter.warehouse_id, filter.as_of)
                .await?;
            let total_quantity: Decimal = layers.iter().map(|(_, remaining)| *remaining).sum();
            if total_quantity.is_zero() {
                continue;
            }
            let total_value: Decimal = layers
                .iter()
                .map(|(layer, remaining)| *remaining * layer.unit_cost)
                .sum();
            let actual_cost = round_money(total_value / total_quantity);

            let variance = standard_cost - actual_cost;
            let variance_percent = if standard_cost.is_zero() {
                Decimal::ZERO
            } else {
                round_money(variance / standard_cost * Decimal::ONE_HUNDRED)
            };
            let total_variance_impact = round_money(variance * total_quantity);

            rows.push(ProductVariance {
                product_id: prod.id,
                product_code: prod.code.clone(),
                product_name: prod.name.clone(),
                category: prod.category.clone(),
                standard_cost,
                actual_cost,
                variance,
                variance_percent,
                total_quantity,
                total_variance_impact,
                favorable: variance >= Decimal::ZERO,
            });
        }

        rows.sort_by(|a, b| {
            b.total_variance_impact
                .abs()
                .cmp(&a.total_variance_impact.abs())
        });

        let total_favorable_impact: Decimal = rows
            .iter()
            .filter(|r| r.favorable)
            .map(|r| r.total_variance_impact)
            .sum();
        let total_unfavorable_impact: Decimal = rows
            .iter()
            .filter(|r| !r.favorable)
            .map(|r| r.total_variance_impact)
            .sum();

        Ok(CostVarianceReport {
            generated_at: Utc::now(),
            product_count: rows.len(),
            total_favorable_impact,
            total_unfavorable_impact,
            products: rows,
        })
    }

    async fn load_methods(
        &self,
        products: &[product::Model],
    ) -> Result<HashMap<Uuid, CostingMethod>, ServiceError> {
        let db = self.db_pool.as_ref();
        let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
        let configs = ProductCostingConfig::find()
            .filter(product_costing_config::Column::ProductId.is_in(ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut methods = HashMap::new();
        for cfg in configs {
            if let Ok(method) = CostingMethod::from_str(&cfg.method) {
                methods.insert(cfg.product_id, method);
            }
        }
        Ok(methods)
    }

    /// Returns a product's layers paired with their remaining quantity, either
    /// as currently stored or reconstructed at `as_of` by replaying the
    /// consumption events recorded up to that instant.
    async fn layers_as_of(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Vec<(cost_layer::Model, Decimal)>, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = CostLayer::find().filter(cost_layer::Column::ProductId.eq(product_id));
        if let Some(warehouse_id) = warehouse_id {
            query = query.filter(cost_layer::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(as_of) = as_of {
            query = query.filter(cost_layer::Column::ReceivedDate.lte(as_of));
        }
        let layers = query
            .order_by_asc(cost_layer::Column::ReceivedDate)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        match as_of {
            None => Ok(layers
                .into_iter()
                .filter(|l| l.remaining_quantity > Decimal::ZERO)
                .map(|l| {
                    let remaining = l.remaining_quantity;
                    (l, remaining)
                })
                .collect()),
            Some(as_of) => {
                let layer_ids: Vec<Uuid> = layers.iter().map(|l| l.id).collect();
                let events = ConsumptionEvent::find()
                    .filter(consumption_event::Column::LayerId.is_in(layer_ids))
                    .filter(consumption_event::Column::OccurredAt.lte(as_of))
                    .all(db)
                    .await
                    .map_err(ServiceError::db_error)?;

                let mut consumed: HashMap<Uuid, Decimal> = HashMap::new();
                for event in events {
                    if let Some(layer_id) = event.layer_id {
                        *consumed.entry(layer_id).or_insert(Decimal::ZERO) += event.quantity;
                    }
                }

                Ok(layers
                    .into_iter()
                    .filter_map(|l| {
                        let used = consumed.get(&l.id).copied().unwrap_or(Decimal::ZERO);
                        let remaining = (l.original_quantity - used).max(Decimal::ZERO);
                        (remaining > Decimal::ZERO).then_some((l, remaining))
                    })
                    .collect())
            }
        }
    }
}

fn summarize_categories(
    rows: &[ProductValuation],
    total_value: Decimal,
) -> Vec<CategoryValuation> {
    let mut totals: HashMap<String, (Decimal, Decimal, usize)> = HashMap::new();
    for row in rows {
        let key = row
            .category
            .clone()
            .unwrap_or_else(|| "Uncategorized".to_string());
        let entry = totals
            .entry(key)
            .or_insert((Decimal::ZERO, Decimal::ZERO, 0));
        entry.0 += row.total_value;
        entry.1 += row.quantity;
        entry.2 += 1;
    }

    let mut categories: Vec<CategoryValuation> = totals
        .into_iter()
        .map(|(category, (value, quantity, count))| CategoryValuation {
            category,
            total_value: value,
            total_quantity: quantity,
            product_count: count,
            value_percent: if total_value.is_zero() {
                Decimal::ZERO
            } else {
                (value / total_value * Decimal::ONE_HUNDRED)
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            },
        })
        .collect();
    categories.sort_by(|a, b| b.total_value.cmp(&a.total_value));
    categories
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(category: Option<&str>, value: Decimal, qty: Decimal) -> ProductValuation {
        ProductValuation {
            product_id: Uuid::new_v4(),
            product_code: "SKU".into(),
            product_name: "A product".into(),
            category: category.map(String::from),
            method: CostingMethod::Fifo,
            quantity: qty,
            unit_cost: Decimal::ZERO,
            total_value: value,
            layer_count: 1,
        }
    }

    #[test]
    fn category_summary_computes_value_shares() {
        let rows = vec![
            row(Some("Widgets"), dec!(75), dec!(10)),
            row(Some("Gadgets"), dec!(25), dec!(5)),
        ];
        let categories = summarize_categories(&rows, dec!(100));

        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category, "Widgets");
        assert_eq!(categories[0].value_percent, dec!(75.0000));
        assert_eq!(categories[1].value_percent, dec!(25.0000));
    }

    #[test]
    fn uncategorized_products_are_grouped_together() {
        let rows = vec![
            row(None, dec!(40), dec!(4)),
            row(None, dec!(10), dec!(1)),
            row(Some("Widgets"), dec!(50), dec!(5)),
        ];
        let categories = summarize_categories(&rows, dec!(100));

        assert_eq!(categories.len(), 2);
        let uncategorized = categories
            .iter()
            .find(|c| c.category == "Uncategorized")
            .unwrap();
        assert_eq!(uncategorized.total_value, dec!(50));
        assert_eq!(uncategorized.product_count, 2);
    }

    #[test]
    fn zero_total_value_yields_zero_percentages() {
        let rows = vec![row(Some("Widgets"), dec!(0), dec!(0))];
        let categories = summarize_categories(&rows, Decimal::ZERO);
        assert_eq!(categories[0].value_percent, Decimal::ZERO);
    }
}
