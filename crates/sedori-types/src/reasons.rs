//! Closed vocabulary of machine-readable reason strings.
//!
//! Every reason emitted in flags or decisions is drawn from this set so that
//! downstream consumers can match on them without parsing free text.

pub const CIRCUIT_OPEN: &str = "circuit_open";
pub const BUDGET_EXCEEDED: &str = "budget_exceeded";
pub const RETRY_EXHAUSTED: &str = "retry_exhausted";
pub const KEEPA_ERROR: &str = "keepa_error";
pub const KEEPA_INSUFFICIENT_DATA: &str = "keepa_insufficient_data";
pub const KEEPA_RANK_INSUFFICIENT: &str = "keepa_rank_insufficient";
pub const SPAPI_PRICING_ERROR: &str = "spapi_pricing_error";
pub const SPAPI_FEE_ERROR: &str = "spapi_fee_error";
pub const PROFIT_BELOW_THRESHOLD: &str = "profit_below_threshold";
pub const ROI_BELOW_THRESHOLD: &str = "roi_below_threshold";
pub const RANK_ABOVE_THRESHOLD: &str = "rank_above_threshold";
pub const NO_COMPETITIVE_OFFERS: &str = "no_competitive_offers";
pub const DEGRADED_INPUTS: &str = "degraded_inputs";

/// All recognized reasons, used to validate emitted documents in tests.
pub const ALL: &[&str] = &[
    CIRCUIT_OPEN,
    BUDGET_EXCEEDED,
    RETRY_EXHAUSTED,
    KEEPA_ERROR,
    KEEPA_INSUFFICIENT_DATA,
    KEEPA_RANK_INSUFFICIENT,
    SPAPI_PRICING_ERROR,
    SPAPI_FEE_ERROR,
    PROFIT_BELOW_THRESHOLD,
    ROI_BELOW_THRESHOLD,
    RANK_ABOVE_THRESHOLD,
    NO_COMPETITIVE_OFFERS,
    DEGRADED_INPUTS,
];
