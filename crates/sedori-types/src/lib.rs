use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod reasons;

/// User-supplied product identifier. Exactly one of `asin` or `barcode` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuery {
    asin: Option<String>,
    barcode: Option<String>,
}

impl ProductQuery {
    /// Build a query from optional identifiers, rejecting empty or ambiguous input.
    pub fn new(asin: Option<String>, barcode: Option<String>) -> SedoriResult<Self> {
        let asin = asin.filter(|value| !value.is_empty());
        let barcode = barcode.filter(|value| !value.is_empty());
        match (&asin, &barcode) {
            (None, None) => Err(SedoriError::InvalidInput(
                "either asin or barcode must be provided".to_string(),
            )),
            (Some(_), Some(_)) => Err(SedoriError::InvalidInput(
                "only one of asin or barcode may be provided".to_string(),
            )),
            _ => Ok(Self { asin, barcode }),
        }
    }

    pub fn asin(&self) -> Option<&str> {
        self.asin.as_deref()
    }

    pub fn barcode(&self) -> Option<&str> {
        self.barcode.as_deref()
    }

    /// Whichever identifier is set.
    pub fn identifier(&self) -> &str {
        self.asin
            .as_deref()
            .or(self.barcode.as_deref())
            .unwrap_or_default()
    }
}

/// A single competing offer from the marketplace pricing API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitivePrice {
    /// Offer condition (e.g. "New")
    pub condition: String,

    /// Marketplace seller identifier
    pub seller_id: String,

    /// Price inclusive of shipping in the marketplace currency
    #[serde(with = "rust_decimal::serde::str")]
    pub landed_price: Decimal,

    /// Shipping portion of the landed price
    #[serde(with = "rust_decimal::serde::str")]
    pub shipping: Decimal,

    /// When this offer was observed
    pub last_updated: DateTime<Utc>,
}

/// Price history summary derived from the Keepa compact series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaPriceSnapshot {
    /// Latest positive price observed in the full series
    #[serde(with = "rust_decimal::serde::str")]
    pub current_price: Decimal,

    /// Median of the 30-day window
    #[serde(with = "rust_decimal::serde::str")]
    pub average_price_30d: Decimal,

    /// 10th percentile of the 30-day window
    #[serde(with = "rust_decimal::serde::str")]
    pub lowest_price_30d: Decimal,

    /// 90th percentile of the 30-day window
    #[serde(with = "rust_decimal::serde::str")]
    pub highest_price_30d: Decimal,

    /// Latest sales rank, if the rank series had data
    pub sales_rank: Option<i64>,

    /// Marketplace currency code
    pub currency: String,

    /// Product title as reported by Keepa
    pub title: Option<String>,

    /// Product image URLs in catalog order
    pub image_urls: Vec<String>,
}

impl Default for KeepaPriceSnapshot {
    fn default() -> Self {
        Self {
            current_price: Decimal::ZERO,
            average_price_30d: Decimal::ZERO,
            lowest_price_30d: Decimal::ZERO,
            highest_price_30d: Decimal::ZERO,
            sales_rank: None,
            currency: "JPY".to_string(),
            title: None,
            image_urls: Vec::new(),
        }
    }
}

/// Fully decomposed fee model. Components are additive; zero values are legal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    #[serde(with = "rust_decimal::serde::str")]
    pub referral_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub closing_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub fba_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub inbound_shipping: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub packaging_materials: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub storage_fee: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub taxes: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub fx_spread: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub returns_cost: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub other_costs: Decimal,
}

impl FeeBreakdown {
    /// Sum of the ten components.
    pub fn total(&self) -> Decimal {
        self.referral_fee
            + self.closing_fee
            + self.fba_fee
            + self.inbound_shipping
            + self.packaging_materials
            + self.storage_fee
            + self.taxes
            + self.fx_spread
            + self.returns_cost
            + self.other_costs
    }
}

/// Profit metrics for a candidate purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitAnalysis {
    #[serde(with = "rust_decimal::serde::str")]
    pub selling_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub purchase_cost: Decimal,

    /// `purchase_cost + fees.total()`
    #[serde(with = "rust_decimal::serde::str")]
    pub total_cost: Decimal,

    /// `selling_price - total_cost`
    #[serde(with = "rust_decimal::serde::str")]
    pub profit: Decimal,

    /// `profit / purchase_cost`, zero when the denominator is zero
    #[serde(with = "rust_decimal::serde::str")]
    pub roi: Decimal,

    /// `profit / selling_price`, zero when the denominator is zero
    #[serde(with = "rust_decimal::serde::str")]
    pub margin: Decimal,

    pub fees: FeeBreakdown,
}

/// Outcome of threshold evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseDecision {
    /// `profit > 0`
    pub is_profitable: bool,

    /// All configured thresholds pass and inputs are not degraded
    pub meets_thresholds: bool,

    /// Machine-readable reasons, deduplicated and sorted
    pub reasons: Vec<String>,
}

impl PurchaseDecision {
    pub fn new(is_profitable: bool, meets_thresholds: bool, mut reasons: Vec<String>) -> Self {
        reasons.sort();
        reasons.dedup();
        Self {
            is_profitable,
            meets_thresholds,
            reasons,
        }
    }
}

/// Observability flags attached to every service result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceFlags {
    pub degraded: bool,
    pub cached: bool,
    pub circuit_open: bool,
    pub reason: Option<String>,
}

impl ServiceFlags {
    pub fn degraded(reason: &str) -> Self {
        Self {
            degraded: true,
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Combine with another flag set: booleans OR, the later non-empty reason wins.
    pub fn merge(&self, other: &ServiceFlags) -> Self {
        Self {
            degraded: self.degraded || other.degraded,
            cached: self.cached || other.cached,
            circuit_open: self.circuit_open || other.circuit_open,
            reason: other
                .reason
                .clone()
                .filter(|reason| !reason.is_empty())
                .or_else(|| self.reason.clone()),
        }
    }
}

/// Soft-fail result: `data` is `None` when the call degraded, and the caller
/// substitutes a neutral default instead of aborting the pipeline.
#[derive(Debug, Clone)]
pub struct ServiceResult<T> {
    pub data: Option<T>,
    pub flags: ServiceFlags,
}

impl<T> ServiceResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            flags: ServiceFlags::default(),
        }
    }

    pub fn with_flags(data: T, flags: ServiceFlags) -> Self {
        Self {
            data: Some(data),
            flags,
        }
    }

    pub fn degraded(reason: &str) -> Self {
        Self {
            data: None,
            flags: ServiceFlags::degraded(reason),
        }
    }

    pub fn circuit_open() -> Self {
        Self {
            data: None,
            flags: ServiceFlags {
                degraded: true,
                cached: false,
                circuit_open: true,
                reason: Some(reasons::CIRCUIT_OPEN.to_string()),
            },
        }
    }
}

/// Listing summary fed to notifications and the spreadsheet sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductListing {
    pub asin: String,
    pub title: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub description: String,
    pub image_urls: Vec<String>,
    pub currency: String,
}

/// A configured secret value. Redacted in `Debug` output so credentials
/// never reach logs through formatting.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***REDACTED***)")
    }
}

/// Engine-wide errors
#[derive(Error, Debug)]
pub enum SedoriError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("token acquisition failed: {0}")]
    TokenAcquisition(String),

    #[error("budget exceeded for key={0}")]
    BudgetExceeded(String),

    #[error("circuit breaker open; skipping call")]
    CircuitOpen,

    #[error("Amazon SP-API error: {0}")]
    SpApi(String),

    #[error("Keepa API error: {0}")]
    Keepa(String),

    #[error("profit computation error: {0}")]
    ProfitComputation(String),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type SedoriResult<T> = Result<T, SedoriError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn product_query_requires_exactly_one_identifier() {
        assert!(ProductQuery::new(None, None).is_err());
        assert!(ProductQuery::new(Some(String::new()), None).is_err());
        assert!(ProductQuery::new(Some("A".to_string()), Some("4900".to_string())).is_err());

        let query = ProductQuery::new(Some("B000123".to_string()), None).unwrap();
        assert_eq!(query.asin(), Some("B000123"));
        assert_eq!(query.identifier(), "B000123");

        let query = ProductQuery::new(None, Some("4901234567894".to_string())).unwrap();
        assert_eq!(query.barcode(), Some("4901234567894"));
        assert_eq!(query.identifier(), "4901234567894");
    }

    #[test]
    fn fee_breakdown_total_sums_all_components() {
        let fees = FeeBreakdown {
            referral_fee: dec!(480),
            closing_fee: dec!(10),
            fba_fee: dec!(250),
            inbound_shipping: dec!(120),
            packaging_materials: dec!(80),
            storage_fee: dec!(50),
            taxes: dec!(30),
            fx_spread: dec!(57.60),
            returns_cost: dec!(192),
            other_costs: dec!(5),
        };
        assert_eq!(fees.total(), dec!(1274.60));
    }

    #[test]
    fn zero_fee_breakdown_is_legal() {
        assert_eq!(FeeBreakdown::default().total(), Decimal::ZERO);
    }

    #[test]
    fn flags_merge_ors_booleans_and_prefers_later_reason() {
        let first = ServiceFlags {
            degraded: true,
            cached: false,
            circuit_open: false,
            reason: Some("keepa_error".to_string()),
        };
        let second = ServiceFlags {
            degraded: false,
            cached: true,
            circuit_open: false,
            reason: Some("retry_exhausted".to_string()),
        };

        let merged = first.merge(&second);
        assert!(merged.degraded);
        assert!(merged.cached);
        assert!(!merged.circuit_open);
        assert_eq!(merged.reason.as_deref(), Some("retry_exhausted"));
    }

    #[test]
    fn flags_merge_keeps_earlier_reason_when_later_empty() {
        let first = ServiceFlags::degraded("budget_exceeded");
        let second = ServiceFlags {
            cached: true,
            ..ServiceFlags::default()
        };

        let merged = first.merge(&second);
        assert_eq!(merged.reason.as_deref(), Some("budget_exceeded"));
    }

    #[test]
    fn decision_reasons_are_sorted_and_unique() {
        let decision = PurchaseDecision::new(
            false,
            false,
            vec![
                reasons::ROI_BELOW_THRESHOLD.to_string(),
                reasons::NO_COMPETITIVE_OFFERS.to_string(),
                reasons::ROI_BELOW_THRESHOLD.to_string(),
            ],
        );
        assert_eq!(
            decision.reasons,
            vec!["no_competitive_offers", "roi_below_threshold"]
        );
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("amzn.oa2.super-secret");
        assert_eq!(format!("{:?}", secret), "Secret(***REDACTED***)");
        assert_eq!(secret.expose(), "amzn.oa2.super-secret");
    }

    #[test]
    fn money_fields_serialize_as_strings() {
        let fees = FeeBreakdown {
            referral_fee: dec!(480.50),
            ..FeeBreakdown::default()
        };
        let value = serde_json::to_value(&fees).unwrap();
        assert_eq!(value["referral_fee"], "480.50");
        assert_eq!(value["closing_fee"], "0");
    }
}
