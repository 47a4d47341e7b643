use super::common::{
    created_response, map_service_error, success_response, validate_input, PaginatedResponse,
    PaginationParams,
};
use crate::{
    entities::{cost_layer, product, CostingMethod},
    errors::ApiError,
    handlers::AppState,
    services::costing::{
        CommitMode, CostCalculationRequest, CostCalculationResult, CostMethodComparison,
        LayerListFilter, NewCostLayer, NewProduct, ProductCostingSummary,
    },
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

// Request and response DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub category: Option<String>,
    pub standard_cost: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub category: Option<String>,
    pub standard_cost: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<product::Model> for ProductResponse {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            name: model.name,
            category: model.category,
            standard_cost: model.standard_cost,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLayerRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub received_date: Option<DateTime<Utc>>,
    #[validate(length(min = 3, max = 3))]
    pub currency: Option<String>,
    pub reference_number: Option<String>,
    pub reference_type: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LayerResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub received_date: DateTime<Utc>,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub unit_cost: Decimal,
    pub remaining_value: Decimal,
    pub currency: String,
    pub reference_number: Option<String>,
    pub reference_type: Option<String>,
    pub exhausted: bool,
}

impl From<cost_layer::Model> for LayerResponse {
    fn from(model: cost_layer::Model) -> Self {
        let remaining_value = model.remaining_value();
        let exhausted = model.is_exhausted();
        Self {
            id: model.id,
            product_id: model.product_id,
            warehouse_id: model.warehouse_id,
            received_date: model.received_date,
            original_quantity: model.original_quantity,
            remaining_quantity: model.remaining_quantity,
            unit_cost: model.unit_cost,
            remaining_value,
            currency: model.currency,
            reference_number: model.reference_number,
            reference_type: model.reference_type,
            exhausted,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LayerListQuery {
    pub product_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    /// Only layers received at or after this instant
    pub received_from: Option<DateTime<Utc>>,
    /// Only layers received at or before this instant
    pub received_to: Option<DateTime<Utc>>,
    /// Include fully consumed layers in the listing
    #[serde(default)]
    pub include_exhausted: bool,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// Aggregates over the returned page of layers
#[derive(Debug, Serialize, ToSchema)]
pub struct LayerPageTotals {
    pub total_quantity: Decimal,
    pub total_value: Decimal,
    pub weighted_average_cost: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LayerListResponse {
    #[serde(flatten)]
    pub page: PaginatedResponse<LayerResponse>,
    pub totals: LayerPageTotals,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CalculateCogsRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: Decimal,
    /// Overrides the product's configured costing method for this calculation
    pub method: Option<CostingMethod>,
    pub reference_number: Option<String>,
    /// When true (the default) nothing is persisted
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

/// Always-committing variant of the calculation request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConsumeLayersRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: Decimal,
    pub method: Option<CostingMethod>,
    pub reference_number: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetMethodRequest {
    pub method: CostingMethod,
    /// Required when switching to STANDARD and the product has no standard
    /// cost yet
    pub standard_cost: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MethodResponse {
    pub product_id: Uuid,
    pub method: CostingMethod,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetStandardCostRequest {
    pub standard_cost: Decimal,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CompareQuery {
    pub quantity: Decimal,
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct WarehouseQuery {
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MethodDescription {
    pub method: CostingMethod,
    pub description: String,
    pub consumes_layers: bool,
}

// Handler functions

/// Register a product
#[utoipa::path(
    post,
    path = "/api/inventory/costing/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ProductResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn create_product(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let product = state
        .services
        .costing
        .create_product(NewProduct {
            code: payload.code,
            name: payload.name,
            category: payload.category,
            standard_cost: payload.standard_cost,
        })
        .await
        .map_err(map_service_error)?;

    info!(product_id = %product.id, code = %product.code, "Product registered");

    Ok(created_response(ProductResponse::from(product)))
}

/// Fetch a product
#[utoipa::path(
    get,
    path = "/api/inventory/costing/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product returned", body = ProductResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .costing
        .get_product(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ProductResponse::from(product)))
}

/// Record a receipt of stock as a new cost layer
#[utoipa::path(
    post,
    path = "/api/inventory/costing/layers",
    request_body = CreateLayerRequest,
    responses(
        (status = 201, description = "Cost layer created", body = LayerResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn create_layer(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<CreateLayerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let layer = state
        .services
        .costing
        .create_layer(NewCostLayer {
            product_id: payload.product_id,
            warehouse_id: payload.warehouse_id,
            quantity: payload.quantity,
            unit_cost: payload.unit_cost,
            received_date: payload.received_date,
            currency: payload.currency,
            reference_number: payload.reference_number,
            reference_type: payload.reference_type,
        })
        .await
        .map_err(map_service_error)?;

    Ok(created_response(LayerResponse::from(layer)))
}

/// List cost layers
#[utoipa::path(
    get,
    path = "/api/inventory/costing/layers",
    params(LayerListQuery),
    responses(
        (status = 200, description = "Cost layers returned", body = LayerListResponse)
    ),
    tag = "costing"
)]
pub async fn list_layers(
    State(state): State<AppState>,
    Query(query): Query<LayerListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pagination = PaginationParams {
        page: query.page.unwrap_or_else(|| PaginationParams::default().page),
        per_page: query
            .per_page
            .unwrap_or(u64::from(state.config.api_default_page_size)),
    };
    let (page, per_page) = pagination.clamped(u64::from(state.config.api_max_page_size));

    let (layers, total) = state
        .services
        .costing
        .list_layers(
            LayerListFilter {
                product_id: query.product_id,
                warehouse_id: query.warehouse_id,
                received_from: query.received_from,
                received_to: query.received_to,
                include_exhausted: query.include_exhausted,
            },
            page,
            per_page,
        )
        .await
        .map_err(map_service_error)?;

    let data: Vec<LayerResponse> = layers.into_iter().map(LayerResponse::from).collect();

    let total_quantity: Decimal = data.iter().map(|l| l.remaining_quantity).sum();
    let total_value: Decimal = data.iter().map(|l| l.remaining_value).sum();
    let totals = LayerPageTotals {
        total_quantity,
        total_value,
        weighted_average_cost: if total_quantity.is_zero() {
            Decimal::ZERO
        } else {
            (total_value / total_quantity).round_dp(4)
        },
    };

    Ok(success_response(LayerListResponse {
        page: PaginatedResponse::new(data, page, per_page, total),
        totals,
    }))
}

/// List the open cost layers of one product, oldest first
#[utoipa::path(
    get,
    path = "/api/inventory/costing/products/{id}/layers",
    params(
        ("id" = Uuid, Path, description = "Product id"),
        WarehouseQuery
    ),
    responses(
        (status = 200, description = "Open layers returned", body = [LayerResponse]),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn product_layers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<WarehouseQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let layers = state
        .services
        .costing
        .product_layers(id, query.warehouse_id)
        .await
        .map_err(map_service_error)?;

    let data: Vec<LayerResponse> = layers.into_iter().map(LayerResponse::from).collect();
    Ok(success_response(data))
}

/// Get the costing method configured for a product
#[utoipa::path(
    get,
    path = "/api/inventory/costing/products/{id}/method",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Costing method returned", body = MethodResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn get_method(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let method = state
        .services
        .costing
        .get_method(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(MethodResponse {
        product_id: id,
        method,
    }))
}

/// Set the costing method for a product
#[utoipa::path(
    put,
    path = "/api/inventory/costing/products/{id}/method",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = SetMethodRequest,
    responses(
        (status = 200, description = "Costing method updated", body = MethodResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn set_method(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<SetMethodRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .costing
        .set_method(id, payload.method, payload.standard_cost)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(MethodResponse {
        product_id: id,
        method: payload.method,
    }))
}

/// Set the standard cost used by standard costing
#[utoipa::path(
    put,
    path = "/api/inventory/costing/products/{id}/standard-cost",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = SetStandardCostRequest,
    responses(
        (status = 200, description = "Standard cost updated", body = ProductResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn set_standard_cost(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<SetStandardCostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .costing
        .set_standard_cost(id, payload.standard_cost)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ProductResponse::from(product)))
}

/// Calculate cost of goods sold for an issue of stock.
///
/// Runs as a dry run unless `dry_run` is set to false, in which case the
/// affected layers are decremented and the consumption is recorded.
#[utoipa::path(
    post,
    path = "/api/inventory/costing/calculate-cogs",
    request_body = CalculateCogsRequest,
    responses(
        (status = 200, description = "COGS calculated", body = CostCalculationResult),
        (status = 400, description = "Invalid request or insufficient inventory", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent layer modification", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn calculate_cogs(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<CalculateCogsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let mode = if payload.dry_run {
        CommitMode::DryRun
    } else {
        CommitMode::Commit
    };

    let result = state
        .services
        .costing
        .calculate_cogs(
            CostCalculationRequest {
                product_id: payload.product_id,
                warehouse_id: payload.warehouse_id,
                quantity: payload.quantity,
                method_override: payload.method,
                reference_number: payload.reference_number,
            },
            mode,
        )
        .await
        .map_err(map_service_error)?;

    info!(
        product_id = %result.product_id,
        method = %result.method,
        total_cogs = %result.total_cogs,
        committed = result.committed,
        "COGS calculated"
    );

    Ok(success_response(result))
}

/// Consume cost layers for an issue of stock, always committing
#[utoipa::path(
    post,
    path = "/api/inventory/costing/layers/consume",
    request_body = ConsumeLayersRequest,
    responses(
        (status = 200, description = "Layers consumed", body = CostCalculationResult),
        (status = 400, description = "Invalid request or insufficient inventory", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent layer modification", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn consume_layers(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<ConsumeLayersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let result = state
        .services
        .costing
        .calculate_cogs(
            CostCalculationRequest {
                product_id: payload.product_id,
                warehouse_id: payload.warehouse_id,
                quantity: payload.quantity,
                method_override: payload.method,
                reference_number: payload.reference_number,
            },
            CommitMode::Commit,
        )
        .await
        .map_err(map_service_error)?;

    info!(
        product_id = %result.product_id,
        method = %result.method,
        total_cogs = %result.total_cogs,
        "Layers consumed"
    );

    Ok(success_response(result))
}

/// Cost the same issue under every applicable method, without committing
#[utoipa::path(
    get,
    path = "/api/inventory/costing/products/{id}/compare",
    params(
        ("id" = Uuid, Path, description = "Product id"),
        CompareQuery
    ),
    responses(
        (status = 200, description = "Method comparison returned", body = CostMethodComparison),
        (status = 400, description = "Invalid request or insufficient inventory", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn compare_cost_methods(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<CompareQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let comparison = state
        .services
        .costing
        .compare_cost_methods(id, query.warehouse_id, query.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(comparison))
}

/// Snapshot of a product's costing posture
#[utoipa::path(
    get,
    path = "/api/inventory/costing/products/{id}/summary",
    params(
        ("id" = Uuid, Path, description = "Product id"),
        WarehouseQuery
    ),
    responses(
        (status = 200, description = "Costing summary returned", body = ProductCostingSummary),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "costing"
)]
pub async fn product_costing_summary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<WarehouseQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .services
        .costing
        .product_costing_summary(id, query.warehouse_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(summary))
}

/// List the supported costing methods
#[utoipa::path(
    get,
    path = "/api/inventory/costing/methods",
    responses(
        (status = 200, description = "Supported methods returned", body = [MethodDescription])
    ),
    tag = "costing"
)]
pub async fn list_methods() -> impl IntoResponse {
    let methods: Vec<MethodDescription> = CostingMethod::iter()
        .map(|method| MethodDescription {
            method,
            description: method.description().to_string(),
            consumes_layers: method.consumes_layers(),
        })
        .collect();

    success_response(methods)
}

pub fn costing_routes() -> Router<AppState> {
    Router::new()
        .route("/products", post(create_product))
        .route("/products/:id", get(get_product))
        .route("/products/:id/layers", get(product_layers))
        .route("/products/:id/method", get(get_method).put(set_method))
        .route("/products/:id/standard-cost", put(set_standard_cost))
        .route("/products/:id/compare", get(compare_cost_methods))
        .route("/products/:id/summary", get(product_costing_summary))
        .route("/layers", get(list_layers).post(create_layer))
        .route("/layers/consume", post(consume_layers))
        .route("/calculate-cogs", post(calculate_cogs))
        .route("/methods", get(list_methods))
}
