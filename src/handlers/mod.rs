pub mod common;
pub mod costing;
pub mod reports;

use crate::db::DbPool;
use crate::events::EventSender;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub costing: Arc<crate::services::CostingService>,
    pub valuation: Arc<crate::services::ValuationService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        default_currency: String,
    ) -> Self {
        let costing = Arc::new(crate::services::CostingService::new(
            db_pool.clone(),
            event_sender,
            default_currency,
        ));
        let valuation = Arc::new(crate::services::ValuationService::new(db_pool));

        Self { costing, valuation }
    }
}
