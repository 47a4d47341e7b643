use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CostLedger API",
        version = "0.2.0",
        description = r#"
# Inventory Cost Layer Accounting API

Tracks inventory at the cost actually paid for it. Every receipt of stock
creates a cost layer; issues of stock consume those layers under the costing
method configured per product.

## Costing methods

- **FIFO**: oldest layers are consumed first
- **LIFO**: newest layers are consumed first
- **WEIGHTED_AVERAGE**: all open layers are decremented proportionally at the
  pooled average cost
- **STANDARD**: issues are costed at a fixed standard rate and layers are left
  untouched

## Dry runs

`POST /calculate-cogs` defaults to a dry run: it reports what an issue would
cost without decrementing any layer. Set `dry_run` to `false` to commit.

## Error handling

Errors use a consistent JSON shape with appropriate HTTP status codes:

```json
{
  "error": "Bad Request",
  "message": "Insufficient inventory for product ...",
  "request_id": "...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

A `409 Conflict` means another writer touched a cost layer mid-calculation;
the request can simply be retried.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "costing", description = "Cost layers, costing methods and COGS calculation"),
        (name = "reports", description = "Valuation, COGS and variance reporting"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        // Costing
        crate::handlers::costing::create_product,
        crate::handlers::costing::get_product,
        crate::handlers::costing::create_layer,
        crate::handlers::costing::list_layers,
        crate::handlers::costing::consume_layers,
        crate::handlers::costing::product_layers,
        crate::handlers::costing::get_method,
        crate::handlers::costing::set_method,
        crate::handlers::costing::set_standard_cost,
        crate::handlers::costing::calculate_cogs,
        crate::handlers::costing::compare_cost_methods,
        crate::handlers::costing::product_costing_summary,
        crate::handlers::costing::list_methods,

        // Reports
        crate::handlers::reports::inventory_valuation,
        crate::handlers::reports::cogs_report,
        crate::handlers::reports::cost_variance_analysis,
    ),
    components(
        schemas(
            // Common types
            crate::handlers::common::PaginationMeta,

            // Costing types
            crate::entities::CostingMethod,
            crate::handlers::costing::CreateProductRequest,
            crate::handlers::costing::ProductResponse,
            crate::handlers::costing::CreateLayerRequest,
            crate::handlers::costing::LayerResponse,
            crate::handlers::costing::LayerListResponse,
            crate::handlers::costing::LayerPageTotals,
            crate::handlers::costing::CalculateCogsRequest,
            crate::handlers::costing::ConsumeLayersRequest,
            crate::handlers::costing::SetMethodRequest,
            crate::handlers::costing::SetStandardCostRequest,
            crate::handlers::costing::MethodResponse,
            crate::handlers::costing::MethodDescription,
            crate::services::costing::CostCalculationResult,
            crate::services::costing::LayerConsumptionDetail,
            crate::services::costing::CostMethodComparison,
            crate::services::costing::MethodComparisonEntry,
            crate::services::costing::ProductCostingSummary,

            // Report types
            crate::services::valuation::InventoryValuationReport,
            crate::services::valuation::ProductValuation,
            crate::services::valuation::CategoryValuation,
            crate::services::valuation::CogsReport,
            crate::services::valuation::ProductCogs,
            crate::services::valuation::CategoryCogs,
            crate::services::valuation::MonthlyCogs,
            crate::services::valuation::CostVarianceReport,
            crate::services::valuation::ProductVariance,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDoc;

/// Swagger UI router serving the generated document
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
