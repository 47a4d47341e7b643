pub mod costing;
pub mod valuation;

pub use costing::CostingService;
pub use valuation::ValuationService;
