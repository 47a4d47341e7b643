use crate::{
    db::DbPool,
    entities::{
        consumption_event,
        cost_layer::{self, Entity as CostLayer},
        product::{self, Entity as Product},
        product_costing_config::{self, CostingMethod, Entity as ProductCostingConfig},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Monetary amounts are rounded half-up to four decimal places.
const MONEY_DP: u32 = 4;

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether a calculation mutates layers or only reports what would happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Commit,
    DryRun,
}

/// Command to create a new cost layer (a receipt of stock at a unit cost)
#[derive(Debug, Clone)]
pub struct NewCostLayer {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub received_date: Option<DateTime<Utc>>,
    pub currency: Option<String>,
    pub reference_number: Option<String>,
    pub reference_type: Option<String>,
}

/// Command describing a COGS calculation
#[derive(Debug, Clone)]
pub struct CostCalculationRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: Decimal,
    /// Overrides the product's configured method for this call only
    pub method_override: Option<CostingMethod>,
    pub reference_number: Option<String>,
}

/// One layer touched by a calculation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LayerConsumptionDetail {
    /// Absent for standard-cost issues, which never touch layers
    pub layer_id: Option<Uuid>,
    pub received_date: Option<DateTime<Utc>>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub cost: Decimal,
    pub layer_remaining_after: Option<Decimal>,
}

/// Outcome of a COGS calculation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CostCalculationResult {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub method: CostingMethod,
    pub quantity: Decimal,
    pub total_cogs: Decimal,
    pub average_unit_cost: Decimal,
    pub consumed_layers: Vec<LayerConsumptionDetail>,
    pub remaining_quantity: Decimal,
    pub remaining_value: Decimal,
    pub committed: bool,
    pub calculated_at: DateTime<Utc>,
}

/// Per-method entry in a comparison run
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MethodComparisonEntry {
    pub method: CostingMethod,
    pub total_cogs: Decimal,
    pub average_unit_cost: Decimal,
}

/// Side-by-side cost of the same issue under every applicable method
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CostMethodComparison {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub methods: Vec<MethodComparisonEntry>,
    /// Spread between the most and least expensive method
    pub cogs_variance: Decimal,
}

/// Costing posture of one product
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductCostingSummary {
    pub product_id: Uuid,
    pub product_code: String,
    pub method: CostingMethod,
    pub standard_cost: Option<Decimal>,
    pub weighted_average_cost: Decimal,
    /// Unit cost of the oldest open layer
    pub fifo_unit_cost: Option<Decimal>,
    /// Unit cost of the newest open layer
    pub lifo_unit_cost: Option<Decimal>,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
    pub active_layer_count: usize,
    pub oldest_layer_date: Option<DateTime<Utc>>,
    pub newest_layer_date: Option<DateTime<Utc>>,
}

/// Filters for listing cost layers
#[derive(Debug, Clone, Default)]
pub struct LayerListFilter {
    pub product_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub received_from: Option<DateTime<Utc>>,
    pub received_to: Option<DateTime<Utc>>,
    pub include_exhausted: bool,
}

/// Command to register a product
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    pub category: Option<String>,
    pub standard_cost: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Pure consumption planning
// ---------------------------------------------------------------------------

/// Snapshot of an open layer used by the planner
#[derive(Debug, Clone)]
pub(crate) struct LayerState {
    pub id: Uuid,
    pub received_date: DateTime<Utc>,
    pub remaining_quantity: Decimal,
    pub unit_cost: Decimal,
}

impl From<&cost_layer::Model> for LayerState {
    fn from(model: &cost_layer::Model) -> Self {
        Self {
            id: model.id,
            received_date: model.received_date,
            remaining_quantity: model.remaining_quantity,
            unit_cost: model.unit_cost,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PlannedLine {
    pub layer_id: Option<Uuid>,
    pub received_date: Option<DateTime<Utc>>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub cost: Decimal,
    /// Layer remaining quantity as read, used for the optimistic update guard
    pub observed_remaining: Option<Decimal>,
    pub remaining_after: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub(crate) struct ConsumptionPlan {
    pub method: CostingMethod,
    pub lines: Vec<PlannedLine>,
    pub total_cogs: Decimal,
    pub average_unit_cost: Decimal,
}

/// Plans which layers a consumption draws from and at what cost, without
/// touching the database. `layers` must be ordered oldest-first.
pub(crate) fn plan_consumption(
    method: CostingMethod,
    product_id: Uuid,
    layers: &[LayerState],
    quantity: Decimal,
    standard_cost: Option<Decimal>,
) -> Result<ConsumptionPlan, ServiceError> {
    if quantity <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Quantity must be positive".to_string(),
        ));
    }

    if method == CostingMethod::Standard {
        let unit_cost = standard_cost.ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "Product {} uses standard costing but has no standard cost set",
                product_id
            ))
        })?;
        let cost = round_money(quantity * unit_cost);
        return Ok(ConsumptionPlan {
            method,
            lines: vec![PlannedLine {
                layer_id: None,
                received_date: None,
                quantity,
                unit_cost,
                cost,
                observed_remaining: None,
                remaining_after: None,
            }],
            total_cogs: cost,
            average_unit_cost: unit_cost,
        });
    }

    let open: Vec<&LayerState> = layers
        .iter()
        .filter(|l| l.remaining_quantity > Decimal::ZERO)
        .collect();
    let available: Decimal = open.iter().map(|l| l.remaining_quantity).sum();
    if available < quantity {
        return Err(ServiceError::InsufficientInventory {
            product_id,
            requested: quantity,
            available,
        });
    }

    let lines = match method {
        CostingMethod::Fifo => plan_sequential(open, quantity),
        CostingMethod::Lifo => {
            let mut reversed = open;
            reversed.reverse();
            plan_sequential(reversed, quantity)
        }
        CostingMethod::WeightedAverage => plan_weighted_average(open, quantity, available),
        CostingMethod::Standard => unreachable!("handled above"),
    };

    let total_cogs: Decimal = lines.iter().map(|l| l.cost).sum();
    let average_unit_cost = round_money(total_cogs / quantity);

    Ok(ConsumptionPlan {
        method,
        lines,
        total_cogs,
        average_unit_cost,
    })
}

/// Walk layers in the given order, draining each before touching the next
fn plan_sequential(layers: Vec<&LayerState>, quantity: Decimal) -> Vec<PlannedLine> {
    let mut lines = Vec::new();
    let mut left = quantity;

    for layer in layers {
        if left <= Decimal::ZERO {
            break;
        }
        let take = layer.remaining_quantity.min(left);
        left -= take;
        lines.push(PlannedLine {
            layer_id: Some(layer.id),
            received_date: Some(layer.received_date),
            quantity: take,
            unit_cost: layer.unit_cost,
            cost: round_money(take * layer.unit_cost),
            observed_remaining: Some(layer.remaining_quantity),
            remaining_after: Some(layer.remaining_quantity - take),
        });
    }

    lines
}

/// Decrement every open layer proportionally at the pooled average cost.
/// Rounding residue is distributed across layers with spare capacity so the
/// quantities always sum to exactly `quantity`.
fn plan_weighted_average(
    layers: Vec<&LayerState>,
    quantity: Decimal,
    available: Decimal,
) -> Vec<PlannedLine> {
    let pool_value: Decimal = layers
        .iter()
        .map(|l| l.remaining_quantity * l.unit_cost)
        .sum();
    let wac = pool_value / available;

    let mut takes: Vec<Decimal> = layers
        .iter()
        .map(|l| {
            (l.remaining_quantity * quantity / available)
                .round_dp_with_strategy(MONEY_DP, RoundingStrategy::ToZero)
        })
        .collect();

    let mut residual = quantity - takes.iter().copied().sum::<Decimal>();
    for (take, layer) in takes.iter_mut().zip(layers.iter()) {
        if residual <= Decimal::ZERO {
            break;
        }
        let spare = layer.remaining_quantity - *take;
        let add = spare.min(residual);
        *take += add;
        residual -= add;
    }

    let mut lines: Vec<PlannedLine> = takes
        .into_iter()
        .zip(layers)
        .filter(|(take, _)| *take > Decimal::ZERO)
        .map(|(take, layer)| PlannedLine {
            layer_id: Some(layer.id),
            received_date: Some(layer.received_date),
            quantity: take,
            unit_cost: round_money(wac),
            cost: round_money(take * wac),
            observed_remaining: Some(layer.remaining_quantity),
            remaining_after: Some(layer.remaining_quantity - take),
        })
        .collect();

    // Total COGS must equal quantity x wac at 4 dp; per-line rounding can
    // drift the sum off that, so the last line absorbs the difference.
    let target_total = round_money(quantity * wac);
    let line_total: Decimal = lines.iter().map(|l| l.cost).sum();
    if let Some(last) = lines.last_mut() {
        last.cost += target_total - line_total;
    }

    lines
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct CostingService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    default_currency: String,
}

impl CostingService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, default_currency: String) -> Self {
        Self {
            db_pool,
            event_sender,
            default_currency,
        }
    }

    /// Registers a product so layers can be attached to it
    pub async fn create_product(&self, cmd: NewProduct) -> Result<product::Model, ServiceError> {
        if cmd.code.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Product code must not be empty".to_string(),
            ));
        }
        if let Some(sc) = cmd.standard_cost {
            if sc < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Standard cost must not be negative".to_string(),
                ));
            }
        }

        let db = self.db_pool.as_ref();
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(cmd.code),
            name: Set(cmd.name),
            category: Set(cmd.category),
            standard_cost: Set(cmd.standard_cost),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(db).await.map_err(ServiceError::db_error)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(product_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Records a receipt of stock as a new cost layer
    #[instrument(skip(self))]
    pub async fn create_layer(
        &self,
        cmd: NewCostLayer,
    ) -> Result<cost_layer::Model, ServiceError> {
        if cmd.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Layer quantity must be positive".to_string(),
            ));
        }
        if cmd.unit_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Unit cost must not be negative".to_string(),
            ));
        }

        // Layers must belong to a registered product
        self.get_product(cmd.product_id).await?;

        // Quantities are stored at 4 dp; anything finer would desync the
        // stored value from what the planner later observes
        let quantity = round_money(cmd.quantity);
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Layer quantity must be at least 0.0001".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let now = Utc::now();
        let model = cost_layer::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(cmd.product_id),
            warehouse_id: Set(cmd.warehouse_id),
            received_date: Set(cmd.received_date.unwrap_or(now)),
            original_quantity: Set(quantity),
            remaining_quantity: Set(quantity),
            unit_cost: Set(round_money(cmd.unit_cost)),
            currency: Set(cmd
                .currency
                .unwrap_or_else(|| self.default_currency.clone())),
            reference_number: Set(cmd.reference_number),
            reference_type: Set(cmd.reference_type),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let layer = model.insert(db).await.map_err(ServiceError::db_error)?;

        info!(
            layer_id = %layer.id,
            product_id = %layer.product_id,
            quantity = %layer.original_quantity,
            unit_cost = %layer.unit_cost,
            "Cost layer created"
        );

        self.event_sender
            .send(Event::CostLayerCreated {
                layer_id: layer.id,
                product_id: layer.product_id,
                warehouse_id: layer.warehouse_id,
                quantity: layer.original_quantity,
                unit_cost: layer.unit_cost,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(layer)
    }

    /// Lists cost layers, newest receipts first
    pub async fn list_layers(
        &self,
        filter: LayerListFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<cost_layer::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = CostLayer::find();
        if let Some(product_id) = filter.product_id {
            query = query.filter(cost_layer::Column::ProductId.eq(product_id));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(cost_layer::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(from) = filter.received_from {
            query = query.filter(cost_layer::Column::ReceivedDate.gte(from));
        }
        if let Some(to) = filter.received_to {
            query = query.filter(cost_layer::Column::ReceivedDate.lte(to));
        }
        if !filter.include_exhausted {
            query = query.filter(cost_layer::Column::RemainingQuantity.gt(Decimal::ZERO));
        }

        let paginator = query
            .order_by_desc(cost_layer::Column::ReceivedDate)
            .paginate(db, per_page.max(1));
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let layers = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((layers, total))
    }

    /// All open layers for a product, oldest first
    pub async fn product_layers(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<Vec<cost_layer::Model>, ServiceError> {
        self.get_product(product_id).await?;
        self.open_layers(product_id, warehouse_id).await
    }

    async fn open_layers(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<Vec<cost_layer::Model>, ServiceError> {
        let db = self.db_pool.as_ref();
        let mut query = CostLayer::find()
            .filter(cost_layer::Column::ProductId.eq(product_id))
            .filter(cost_layer::Column::RemainingQuantity.gt(Decimal::ZERO));
        if let Some(warehouse_id) = warehouse_id {
            query = query.filter(cost_layer::Column::WarehouseId.eq(warehouse_id));
        }
        query
            .order_by_asc(cost_layer::Column::ReceivedDate)
            .order_by_asc(cost_layer::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Resolves the costing method configured for a product; products with no
    /// configuration use weighted average
    pub async fn get_method(&self, product_id: Uuid) -> Result<CostingMethod, ServiceError> {
        self.get_product(product_id).await?;
        self.resolve_method(product_id).await
    }

    async fn resolve_method(&self, product_id: Uuid) -> Result<CostingMethod, ServiceError> {
        let db = self.db_pool.as_ref();
        let config = ProductCostingConfig::find_by_id(product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        match config {
            Some(cfg) => CostingMethod::from_str(&cfg.method).map_err(|_| {
                ServiceError::InternalError(format!(
                    "Stored costing method '{}' for product {} is not recognized",
                    cfg.method, product_id
                ))
            }),
            None => Ok(CostingMethod::default()),
        }
    }

    /// Sets the costing method for a product. Switching to standard costing
    /// requires a standard cost, either already on the product or supplied
    /// with the change.
    pub async fn set_method(
        &self,
        product_id: Uuid,
        method: CostingMethod,
        standard_cost: Option<Decimal>,
    ) -> Result<(), ServiceError> {
        let product = self.get_product(product_id).await?;

        if method == CostingMethod::Standard
            && product.standard_cost.is_none()
            && standard_cost.is_none()
        {
            return Err(ServiceError::ValidationError(
                "Standard costing requires a standard cost".to_string(),
            ));
        }
        if let Some(sc) = standard_cost {
            self.set_standard_cost(product_id, sc).await?;
        }

        let db = self.db_pool.as_ref();
        let existing = ProductCostingConfig::find_by_id(product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        let old_method = existing.as_ref().map(|cfg| cfg.method.clone());

        match existing {
            Some(cfg) => {
                let mut active: product_costing_config::ActiveModel = cfg.into();
                active.method = Set(method.to_string());
                active.updated_at = Set(Utc::now());
                active.update(db).await.map_err(ServiceError::db_error)?;
            }
            None => {
                let active = product_costing_config::ActiveModel {
                    product_id: Set(product_id),
                    method: Set(method.to_string()),
                    updated_at: Set(Utc::now()),
                };
                active.insert(db).await.map_err(ServiceError::db_error)?;
            }
        }

        info!(%product_id, method = %method, "Costing method updated");

        self.event_sender
            .send(Event::CostingMethodChanged {
                product_id,
                old_method,
                new_method: method.to_string(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(())
    }

    /// Sets the standard cost used by the standard costing method
    pub async fn set_standard_cost(
        &self,
        product_id: Uuid,
        standard_cost: Decimal,
    ) -> Result<product::Model, ServiceError> {
        if standard_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Standard cost must not be negative".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let existing = self.get_product(product_id).await?;

        let mut active: product::ActiveModel = existing.into();
        active.standard_cost = Set(Some(round_money(standard_cost)));
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await.map_err(ServiceError::db_error)?;

        self.event_sender
            .send(Event::StandardCostSet {
                product_id,
                standard_cost: round_money(standard_cost),
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(updated)
    }

    /// Calculates COGS for an issue of stock. In `Commit` mode the layer
    /// decrements and consumption events are applied atomically; a concurrent
    /// write to any touched layer rolls everything back and the calculation is
    /// retried once against fresh reads before surfacing a conflict.
    #[instrument(skip(self), fields(product_id = %request.product_id, quantity = %request.quantity))]
    pub async fn calculate_cogs(
        &self,
        request: CostCalculationRequest,
        mode: CommitMode,
    ) -> Result<CostCalculationResult, ServiceError> {
        let product = self.get_product(request.product_id).await?;
        let method = match request.method_override {
            Some(m) => m,
            None => self.resolve_method(request.product_id).await?,
        };

        let mut attempt = 0;
        loop {
            let layers = self
                .open_layers(request.product_id, Some(request.warehouse_id))
                .await?;
            let states: Vec<LayerState> = layers.iter().map(LayerState::from).collect();

            let plan = match plan_consumption(
                method,
                request.product_id,
                &states,
                request.quantity,
                product.standard_cost,
            ) {
                Ok(plan) => plan,
                Err(err) => {
                    if let ServiceError::InsufficientInventory {
                        requested,
                        available,
                        ..
                    } = &err
                    {
                        self.event_sender
                            .send(Event::InsufficientInventoryRejected {
                                product_id: request.product_id,
                                warehouse_id: request.warehouse_id,
                                requested: *requested,
                                available: *available,
                            })
                            .await
                            .map_err(ServiceError::EventError)?;
                    }
                    return Err(err);
                }
            };

            let committed = mode == CommitMode::Commit;
            if committed {
                match self.commit_plan(&request, &plan).await {
                    Ok(()) => {}
                    Err(ServiceError::ConcurrencyConflict(layer_id)) if attempt == 0 => {
                        warn!(
                            %layer_id,
                            "Cost layer changed mid-calculation, retrying with fresh reads"
                        );
                        attempt += 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                }

                self.emit_commit_events(&request, &plan).await?;
            }

            let remaining_quantity: Decimal = states
                .iter()
                .map(|l| l.remaining_quantity)
                .sum::<Decimal>()
                - if plan.method.consumes_layers() {
                    request.quantity
                } else {
                    Decimal::ZERO
                };
            let remaining_value: Decimal = if plan.method.consumes_layers() {
                plan.lines
                    .iter()
                    .filter_map(|line| {
                        line.remaining_after
                            .map(|after| round_money(after * line.unit_cost))
                    })
                    .sum::<Decimal>()
                    + states
                        .iter()
                        .filter(|l| {
                            !plan
                                .lines
                                .iter()
                                .any(|line| line.layer_id == Some(l.id))
                        })
                        .map(|l| round_money(l.remaining_quantity * l.unit_cost))
                        .sum::<Decimal>()
            } else {
                states
                    .iter()
                    .map(|l| round_money(l.remaining_quantity * l.unit_cost))
                    .sum()
            };

            return Ok(CostCalculationResult {
                product_id: request.product_id,
                warehouse_id: request.warehouse_id,
                method: plan.method,
                quantity: request.quantity,
                total_cogs: plan.total_cogs,
                average_unit_cost: plan.average_unit_cost,
                consumed_layers: plan
                    .lines
                    .iter()
                    .map(|line| LayerConsumptionDetail {
                        layer_id: line.layer_id,
                        received_date: line.received_date,
                        quantity: line.quantity,
                        unit_cost: line.unit_cost,
                        cost: line.cost,
                        layer_remaining_after: line.remaining_after,
                    })
                    .collect(),
                remaining_quantity,
                remaining_value,
                committed,
                calculated_at: Utc::now(),
            });
        }
    }

    /// Applies a consumption plan atomically. Each layer decrement is guarded
    /// by the remaining quantity observed at planning time; a mismatch aborts
    /// the whole transaction.
    async fn commit_plan(
        &self,
        request: &CostCalculationRequest,
        plan: &ConsumptionPlan,
    ) -> Result<(), ServiceError> {
        let db = self.db_pool.as_ref();
        let lines = plan.lines.clone();
        let method = plan.method.to_string();
        let product_id = request.product_id;
        let warehouse_id = request.warehouse_id;
        let reference_number = request.reference_number.clone();

        db.transaction::<_, (), ServiceError>(move |txn| {
            Box::pin(async move {
                let now = Utc::now();

                for line in &lines {
                    if let (Some(layer_id), Some(observed), Some(after)) =
                        (line.layer_id, line.observed_remaining, line.remaining_after)
                    {
                        let update = CostLayer::update_many()
                            .col_expr(
                                cost_layer::Column::RemainingQuantity,
                                Expr::value(after),
                            )
                            .col_expr(cost_layer::Column::UpdatedAt, Expr::value(now))
                            .filter(cost_layer::Column::Id.eq(layer_id))
                            .filter(cost_layer::Column::RemainingQuantity.eq(observed))
                            .exec(txn)
                            .await
                            .map_err(ServiceError::db_error)?;

                        if update.rows_affected == 0 {
                            return Err(ServiceError::ConcurrencyConflict(layer_id));
                        }
                    }

                    let event = consumption_event::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        product_id: Set(product_id),
                        warehouse_id: Set(warehouse_id),
                        layer_id: Set(line.layer_id),
                        method: Set(method.clone()),
                        quantity: Set(line.quantity),
                        unit_cost: Set(line.unit_cost),
                        cogs_amount: Set(line.cost),
                        reference_number: Set(reference_number.clone()),
                        occurred_at: Set(now),
                    };
                    event.insert(txn).await.map_err(ServiceError::db_error)?;
                }

                Ok(())
            })
        })
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
    }

    async fn emit_commit_events(
        &self,
        request: &CostCalculationRequest,
        plan: &ConsumptionPlan,
    ) -> Result<(), ServiceError> {
        for line in &plan.lines {
            if let (Some(layer_id), Some(after)) = (line.layer_id, line.remaining_after) {
                if after.is_zero() {
                    self.event_sender
                        .send(Event::CostLayerExhausted {
                            layer_id,
                            product_id: request.product_id,
                        })
                        .await
                        .map_err(ServiceError::EventError)?;
                }
            }
        }

        self.event_sender
            .send(Event::LayersConsumed {
                product_id: request.product_id,
                warehouse_id: request.warehouse_id,
                method: plan.method.to_string(),
                quantity: request.quantity,
                total_cogs: plan.total_cogs,
                layers_touched: plan.lines.len(),
            })
            .await
            .map_err(ServiceError::EventError)
    }

    /// Runs the same issue under each applicable method without committing
    pub async fn compare_cost_methods(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
        quantity: Decimal,
    ) -> Result<CostMethodComparison, ServiceError> {
        let product = self.get_product(product_id).await?;
        let layers = self.open_layers(product_id, warehouse_id).await?;
        let states: Vec<LayerState> = layers.iter().map(LayerState::from).collect();

        let mut candidates = vec![
            CostingMethod::Fifo,
            CostingMethod::Lifo,
            CostingMethod::WeightedAverage,
        ];
        if product.standard_cost.is_some() {
            candidates.push(CostingMethod::Standard);
        }

        let mut methods = Vec::with_capacity(candidates.len());
        for method in candidates {
            let plan = plan_consumption(
                method,
                product_id,
                &states,
                quantity,
                product.standard_cost,
            )?;
            methods.push(MethodComparisonEntry {
                method,
                total_cogs: plan.total_cogs,
                average_unit_cost: plan.average_unit_cost,
            });
        }

        let max = methods
            .iter()
            .map(|m| m.total_cogs)
            .max()
            .unwrap_or(Decimal::ZERO);
        let min = methods
            .iter()
            .map(|m| m.total_cogs)
            .min()
            .unwrap_or(Decimal::ZERO);

        Ok(CostMethodComparison {
            product_id,
            quantity,
            methods,
            cogs_variance: max - min,
        })
    }

    /// Snapshot of a product's costing posture across its open layers
    pub async fn product_costing_summary(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<ProductCostingSummary, ServiceError> {
        let product = self.get_product(product_id).await?;
        let method = self.resolve_method(product_id).await?;
        let layers = self.open_layers(product_id, warehouse_id).await?;

        let total_quantity: Decimal = layers.iter().map(|l| l.remaining_quantity).sum();
        let total_value: Decimal = layers
            .iter()
            .map(|l| round_money(l.remaining_quantity * l.unit_cost))
            .sum();
        let weighted_average_cost = if total_quantity.is_zero() {
            Decimal::ZERO
        } else {
            round_money(total_value / total_quantity)
        };

        Ok(ProductCostingSummary {
            product_id,
            product_code: product.code,
            method,
            standard_cost: product.standard_cost,
            weighted_average_cost,
            fifo_unit_cost: layers.first().map(|l| l.unit_cost),
            lifo_unit_cost: layers.last().map(|l| l.unit_cost),
            total_quantity,
            total_value,
            active_layer_count: layers.len(),
            oldest_layer_date: layers.first().map(|l| l.received_date),
            newest_layer_date: layers.last().map(|l| l.received_date),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn layer(days: i64, remaining: Decimal, unit_cost: Decimal) -> LayerState {
        LayerState {
            id: Uuid::new_v4(),
            received_date: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(days),
            remaining_quantity: remaining,
            unit_cost,
        }
    }

    fn two_layer_pool() -> Vec<LayerState> {
        vec![layer(0, dec!(10), dec!(5)), layer(1, dec!(10), dec!(7))]
    }

    #[test]
    fn fifo_consumes_oldest_layers_first() {
        let layers = two_layer_pool();
        let plan = plan_consumption(
            CostingMethod::Fifo,
            Uuid::new_v4(),
            &layers,
            dec!(15),
            None,
        )
        .unwrap();

        assert_eq!(plan.total_cogs, dec!(85.0000));
        assert_eq!(plan.lines.len(), 2);
        assert_eq!(plan.lines[0].quantity, dec!(10));
        assert_eq!(plan.lines[0].unit_cost, dec!(5));
        assert_eq!(plan.lines[1].quantity, dec!(5));
        assert_eq!(plan.lines[1].unit_cost, dec!(7));
        assert_eq!(plan.lines[1].remaining_after, Some(dec!(5)));
    }

    #[test]
    fn lifo_consumes_newest_layers_first() {
        let layers = two_layer_pool();
        let plan = plan_consumption(
            CostingMethod::Lifo,
            Uuid::new_v4(),
            &layers,
            dec!(15),
            None,
        )
        .unwrap();

        assert_eq!(plan.total_cogs, dec!(95.0000));
        assert_eq!(plan.lines[0].unit_cost, dec!(7));
        assert_eq!(plan.lines[0].quantity, dec!(10));
        assert_eq!(plan.lines[1].unit_cost, dec!(5));
        assert_eq!(plan.lines[1].quantity, dec!(5));
    }

    #[test]
    fn weighted_average_pools_all_open_layers() {
        let layers = two_layer_pool();
        let plan = plan_consumption(
            CostingMethod::WeightedAverage,
            Uuid::new_v4(),
            &layers,
            dec!(15),
            None,
        )
        .unwrap();

        assert_eq!(plan.total_cogs, dec!(90.0000));
        assert_eq!(plan.average_unit_cost, dec!(6.0000));
        // Both layers are decremented proportionally
        let total_taken: Decimal = plan.lines.iter().map(|l| l.quantity).sum();
        assert_eq!(total_taken, dec!(15));
        for line in &plan.lines {
            assert!(line.quantity > Decimal::ZERO);
        }
    }

    #[test]
    fn weighted_average_total_matches_pool_rate_times_quantity() {
        // wac = (0.3333 + 0.3334) / 2 = 0.33335; per-line rounding alone
        // would report 0.6668 for an issue of 2
        let layers = vec![
            layer(0, dec!(1), dec!(0.3333)),
            layer(1, dec!(1), dec!(0.3334)),
        ];
        let plan = plan_consumption(
            CostingMethod::WeightedAverage,
            Uuid::new_v4(),
            &layers,
            dec!(2),
            None,
        )
        .unwrap();

        assert_eq!(plan.total_cogs, dec!(0.6667));
        let line_sum: Decimal = plan.lines.iter().map(|l| l.cost).sum();
        assert_eq!(line_sum, plan.total_cogs);
    }

    #[test]
    fn standard_cost_uses_fixed_unit_cost_and_no_layers() {
        let layers = two_layer_pool();
        let plan = plan_consumption(
            CostingMethod::Standard,
            Uuid::new_v4(),
            &layers,
            dec!(15),
            Some(dec!(6.5)),
        )
        .unwrap();

        assert_eq!(plan.total_cogs, dec!(97.5000));
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].layer_id, None);
        assert_eq!(plan.lines[0].remaining_after, None);
    }

    #[test]
    fn standard_cost_without_configured_cost_is_rejected() {
        let layers = two_layer_pool();
        let err = plan_consumption(
            CostingMethod::Standard,
            Uuid::new_v4(),
            &layers,
            dec!(1),
            None,
        )
        .unwrap_err();
        assert_matches!(err, ServiceError::InvalidOperation(_));
    }

    #[test]
    fn insufficient_inventory_reports_requested_and_available() {
        let layers = two_layer_pool();
        let err = plan_consumption(
            CostingMethod::Fifo,
            Uuid::new_v4(),
            &layers,
            dec!(25),
            None,
        )
        .unwrap_err();
        match err {
            ServiceError::InsufficientInventory {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, dec!(25));
                assert_eq!(available, dec!(20));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn exact_full_consumption_drains_every_layer() {
        let layers = two_layer_pool();
        let plan = plan_consumption(
            CostingMethod::Fifo,
            Uuid::new_v4(),
            &layers,
            dec!(20),
            None,
        )
        .unwrap();
        assert_eq!(plan.total_cogs, dec!(120.0000));
        for line in &plan.lines {
            assert_eq!(line.remaining_after, Some(Decimal::ZERO));
        }
    }

    #[rstest]
    #[case(dec!(0))]
    #[case(dec!(-3))]
    fn non_positive_quantity_is_rejected(#[case] quantity: Decimal) {
        let layers = two_layer_pool();
        let err = plan_consumption(
            CostingMethod::Fifo,
            Uuid::new_v4(),
            &layers,
            quantity,
            None,
        )
        .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[test]
    fn exhausted_layers_are_skipped() {
        let layers = vec![
            layer(0, Decimal::ZERO, dec!(4)),
            layer(1, dec!(10), dec!(5)),
        ];
        let plan = plan_consumption(
            CostingMethod::Fifo,
            Uuid::new_v4(),
            &layers,
            dec!(3),
            None,
        )
        .unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].unit_cost, dec!(5));
    }

    #[test]
    fn fractional_costs_round_half_up_to_four_places() {
        let layers = vec![layer(0, dec!(9), dec!(3.333333))];
        let plan = plan_consumption(
            CostingMethod::Fifo,
            Uuid::new_v4(),
            &layers,
            dec!(7),
            None,
        )
        .unwrap();
        // 7 * 3.333333 = 23.333331
        assert_eq!(plan.total_cogs, dec!(23.3333));
    }

    fn decimal_qty() -> impl Strategy<Value = Decimal> {
        (1u64..=100_000).prop_map(|n| Decimal::from(n) / Decimal::from(100))
    }

    fn decimal_cost() -> impl Strategy<Value = Decimal> {
        (0u64..=1_000_000).prop_map(|n| Decimal::from(n) / Decimal::from(10_000))
    }

    proptest! {
        /// The quantities drawn from layers always sum to the requested
        /// quantity and never exceed what each layer holds.
        #[test]
        fn consumption_conserves_quantity(
            seeds in proptest::collection::vec((decimal_qty(), decimal_cost()), 1..8),
            pick in 1u64..=99,
            method_idx in 0usize..3,
        ) {
            let layers: Vec<LayerState> = seeds
                .iter()
                .enumerate()
                .map(|(i, (qty, cost))| layer(i as i64, *qty, *cost))
                .collect();
            let available: Decimal = layers.iter().map(|l| l.remaining_quantity).sum();
            let quantity = (available * Decimal::from(pick) / Decimal::from(100))
                .round_dp(4)
                .max(dec!(0.0001))
                .min(available);

            let method = [
                CostingMethod::Fifo,
                CostingMethod::Lifo,
                CostingMethod::WeightedAverage,
            ][method_idx];

            let plan = plan_consumption(method, Uuid::new_v4(), &layers, quantity, None).unwrap();

            let taken: Decimal = plan.lines.iter().map(|l| l.quantity).sum();
            prop_assert_eq!(taken, quantity);

            for line in &plan.lines {
                let observed = line.observed_remaining.unwrap();
                let after = line.remaining_after.unwrap();
                prop_assert!(after >= Decimal::ZERO);
                prop_assert_eq!(observed - line.quantity, after);
            }
        }

        /// FIFO and LIFO drain the same pool value when everything is issued.
        #[test]
        fn full_drain_cogs_is_method_independent(
            seeds in proptest::collection::vec((decimal_qty(), decimal_cost()), 1..8),
        ) {
            let layers: Vec<LayerState> = seeds
                .iter()
                .enumerate()
                .map(|(i, (qty, cost))| layer(i as i64, *qty, *cost))
                .collect();
            let available: Decimal = layers.iter().map(|l| l.remaining_quantity).sum();

            let fifo = plan_consumption(
                CostingMethod::Fifo, Uuid::new_v4(), &layers, available, None,
            ).unwrap();
            let lifo = plan_consumption(
                CostingMethod::Lifo, Uuid::new_v4(), &layers, available, None,
            ).unwrap();

            prop_assert_eq!(fifo.total_cogs, lifo.total_cogs);
        }
    }

    mod sqlite_backed {
        use super::*;
        use crate::db::run_migrations;
        use axum::http::StatusCode;
        use sea_orm::{ConnectOptions, Database};
        use tokio::sync::mpsc;

        async fn service_over_sqlite() -> (CostingService, mpsc::Receiver<Event>) {
            let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
            opts.max_connections(1);
            let pool = Database::connect(opts)
                .await
                .expect("in-memory sqlite should connect");
            run_migrations(&pool).await.expect("migrations should apply");

            let (tx, rx) = mpsc::channel(64);
            let service = CostingService::new(
                Arc::new(pool),
                Arc::new(EventSender::new(tx)),
                "USD".to_string(),
            );
            (service, rx)
        }

        async fn seeded_layer(
            service: &CostingService,
            warehouse_id: Uuid,
        ) -> (product::Model, cost_layer::Model) {
            let product = service
                .create_product(NewProduct {
                    code: format!("CONC-{}", Uuid::new_v4().simple()),
                    name: "Contended product".to_string(),
                    category: None,
                    standard_cost: None,
                })
                .await
                .expect("product");
            let layer = service
                .create_layer(NewCostLayer {
                    product_id: product.id,
                    warehouse_id,
                    quantity: dec!(10),
                    unit_cost: dec!(5),
                    received_date: None,
                    currency: None,
                    reference_number: None,
                    reference_type: None,
                })
                .await
                .expect("layer");
            (product, layer)
        }

        #[tokio::test]
        async fn layer_quantities_are_stored_at_four_decimal_places() {
            let (service, _events) = service_over_sqlite().await;
            let product = service
                .create_product(NewProduct {
                    code: "PREC-001".to_string(),
                    name: "Precise product".to_string(),
                    category: None,
                    standard_cost: None,
                })
                .await
                .unwrap();

            let layer = service
                .create_layer(NewCostLayer {
                    product_id: product.id,
                    warehouse_id: Uuid::new_v4(),
                    quantity: dec!(3.00005),
                    unit_cost: dec!(5.00004),
                    received_date: None,
                    currency: None,
                    reference_number: None,
                    reference_type: None,
                })
                .await
                .unwrap();

            assert_eq!(layer.original_quantity, dec!(3.0001));
            assert_eq!(layer.remaining_quantity, dec!(3.0001));
            assert_eq!(layer.unit_cost, dec!(5.0000));

            // A quantity that rounds away to zero is rejected
            let err = service
                .create_layer(NewCostLayer {
                    product_id: product.id,
                    warehouse_id: Uuid::new_v4(),
                    quantity: dec!(0.00004),
                    unit_cost: dec!(5),
                    received_date: None,
                    currency: None,
                    reference_number: None,
                    reference_type: None,
                })
                .await
                .unwrap_err();
            assert_matches!(err, ServiceError::ValidationError(_));
        }

        #[tokio::test]
        async fn stale_layer_read_aborts_the_commit_as_a_conflict() {
            let (service, _events) = service_over_sqlite().await;
            let warehouse = Uuid::new_v4();
            let (product, layer) = seeded_layer(&service, warehouse).await;

            let request = CostCalculationRequest {
                product_id: product.id,
                warehouse_id: warehouse,
                quantity: dec!(3),
                method_override: Some(CostingMethod::Fifo),
                reference_number: None,
            };
            let states = vec![LayerState::from(&layer)];
            let plan =
                plan_consumption(CostingMethod::Fifo, product.id, &states, dec!(3), None)
                    .unwrap();

            // Another writer drains part of the layer after we planned
            let mut drained: cost_layer::ActiveModel = layer.clone().into();
            drained.remaining_quantity = Set(dec!(9));
            drained.update(service.db_pool.as_ref()).await.unwrap();

            let err = service.commit_plan(&request, &plan).await.unwrap_err();
            assert_matches!(err, ServiceError::ConcurrencyConflict(id) if id == layer.id);
            assert_eq!(err.status_code(), StatusCode::CONFLICT);

            // The aborted transaction left nothing behind
            let recorded = consumption_event::Entity::find()
                .all(service.db_pool.as_ref())
                .await
                .unwrap();
            assert!(recorded.is_empty());
            let stored = CostLayer::find_by_id(layer.id)
                .one(service.db_pool.as_ref())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.remaining_quantity, dec!(9));
        }

        #[tokio::test]
        async fn concurrent_commits_reconcile_through_retry() {
            let (service, _events) = service_over_sqlite().await;
            let warehouse = Uuid::new_v4();
            let (product, layer) = seeded_layer(&service, warehouse).await;

            let service = Arc::new(service);
            let issue = |svc: Arc<CostingService>| async move {
                svc.calculate_cogs(
                    CostCalculationRequest {
                        product_id: product.id,
                        warehouse_id: warehouse,
                        quantity: dec!(3),
                        method_override: Some(CostingMethod::Fifo),
                        reference_number: None,
                    },
                    CommitMode::Commit,
                )
                .await
            };

            // Interleaved issues either miss each other or conflict and
            // retry with fresh reads; both must land either way.
            let (first, second) = tokio::join!(issue(service.clone()), issue(service.clone()));
            first.expect("first issue should commit");
            second.expect("second issue should commit");

            let stored = CostLayer::find_by_id(layer.id)
                .one(service.db_pool.as_ref())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.remaining_quantity, dec!(4));

            let recorded = consumption_event::Entity::find()
                .all(service.db_pool.as_ref())
                .await
                .unwrap();
            assert_eq!(recorded.len(), 2);
        }
    }
}
