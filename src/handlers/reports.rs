use super::common::{map_service_error, success_response};
use crate::{
    errors::ApiError,
    handlers::AppState,
    services::valuation::{
        CogsReport, CogsReportFilter, CostVarianceReport, InventoryValuationReport,
        ValuationFilter,
    },
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ValuationQuery {
    pub warehouse_id: Option<Uuid>,
    pub category: Option<String>,
    /// Value inventory as of this date (YYYY-MM-DD), end of day UTC
    pub as_of: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CogsReportQuery {
    /// Start of the reporting period (YYYY-MM-DD)
    pub start_date: String,
    /// End of the reporting period (YYYY-MM-DD), inclusive
    pub end_date: String,
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct VarianceQuery {
    pub warehouse_id: Option<Uuid>,
    pub category: Option<String>,
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| ApiError::BadRequest {
        message: format!("Invalid {} format: {}", field, e),
        error_code: None,
    })
}

fn end_of_day(date: NaiveDate) -> Result<DateTime<Utc>, ApiError> {
    // Inclusive bound: sub-second events on the last day still count
    date.and_hms_micro_opt(23, 59, 59, 999_999)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ApiError::BadRequest {
            message: "Date out of range".to_string(),
            error_code: None,
        })
}

fn start_of_day(date: NaiveDate) -> Result<DateTime<Utc>, ApiError> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ApiError::BadRequest {
            message: "Date out of range".to_string(),
            error_code: None,
        })
}

/// Inventory valuation, optionally reconstructed at a past date
#[utoipa::path(
    get,
    path = "/api/inventory/costing/valuation",
    params(ValuationQuery),
    responses(
        (status = 200, description = "Valuation report returned", body = InventoryValuationReport),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn inventory_valuation(
    State(state): State<AppState>,
    Query(query): Query<ValuationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let as_of = match &query.as_of {
        Some(raw) => Some(end_of_day(parse_date(raw, "as_of date")?)?),
        None => None,
    };

    let report = state
        .services
        .valuation
        .inventory_valuation(ValuationFilter {
            warehouse_id: query.warehouse_id,
            category: query.category,
            as_of,
        })
        .await
        .map_err(map_service_error)?;

    Ok(success_response(report))
}

/// Cost of goods sold over a date range
#[utoipa::path(
    get,
    path = "/api/inventory/costing/cogs-report",
    params(CogsReportQuery),
    responses(
        (status = 200, description = "COGS report returned", body = CogsReport),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn cogs_report(
    State(state): State<AppState>,
    Query(query): Query<CogsReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let from = start_of_day(parse_date(&query.start_date, "start date")?)?;
    let to = end_of_day(parse_date(&query.end_date, "end date")?)?;

    let report = state
        .services
        .valuation
        .cogs_report(CogsReportFilter {
            from,
            to,
            warehouse_id: query.warehouse_id,
            product_id: query.product_id,
        })
        .await
        .map_err(map_service_error)?;

    Ok(success_response(report))
}

/// Standard versus actual cost variance per product
#[utoipa::path(
    get,
    path = "/api/inventory/costing/variance-analysis",
    params(VarianceQuery),
    responses(
        (status = 200, description = "Variance analysis returned", body = CostVarianceReport)
    ),
    tag = "reports"
)]
pub async fn cost_variance_analysis(
    State(state): State<AppState>,
    Query(query): Query<VarianceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .services
        .valuation
        .cost_variance_analysis(ValuationFilter {
            warehouse_id: query.warehouse_id,
            category: query.category,
            as_of: None,
        })
        .await
        .map_err(map_service_error)?;

    Ok(success_response(report))
}

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/valuation", get(inventory_valuation))
        .route("/cogs-report", get(cogs_report))
        .route("/variance-analysis", get(cost_variance_analysis))
}
