use crate::auth::TokenCache;
use crate::sigv4::SigV4Signer;
use crate::transport::RetryingTransport;
use chrono::Utc;
use rust_decimal::Decimal;
use sedori_config::SpApiSettings;
use sedori_types::{
    CompetitivePrice, FeeBreakdown, ProductQuery, SedoriError, SedoriResult, ServiceResult,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Client for the Selling Partner API pricing and fees endpoints.
///
/// Every call goes through the retrying transport and is SigV4-signed per
/// attempt; the LWA access token is injected as `x-amz-access-token`.
pub struct AmazonSpApiClient {
    settings: SpApiSettings,
    transport: RetryingTransport,
    signer: SigV4Signer,
    token_cache: Arc<TokenCache>,
}

impl AmazonSpApiClient {
    pub fn new(
        settings: SpApiSettings,
        transport: RetryingTransport,
        token_cache: Arc<TokenCache>,
    ) -> Self {
        let signer = SigV4Signer::new(
            settings.aws_access_key.expose().to_string(),
            settings.aws_secret_key.expose().to_string(),
            settings.region.clone(),
        );
        Self {
            settings,
            transport,
            signer,
            token_cache,
        }
    }

    fn budget_key(&self) -> String {
        format!("spapi:{}", self.settings.marketplace_id)
    }

    /// Fetch competing offers for the queried product. An empty payload is an
    /// empty offer list with non-degraded flags.
    pub async fn get_competitive_pricing(
        &self,
        query: &ProductQuery,
    ) -> SedoriResult<ServiceResult<Vec<CompetitivePrice>>> {
        let mut params: Vec<(&str, &str)> =
            vec![("MarketplaceId", self.settings.marketplace_id.as_str())];
        if let Some(asin) = query.asin() {
            params.push(("Asins", asin));
        }
        if let Some(barcode) = query.barcode() {
            params.push(("Skus", barcode));
        }

        let url = format!(
            "{}/products/pricing/v0/competitivePrice",
            self.settings.endpoint
        );
        let token = self.token_cache.access_token().await?;

        let outcome = self
            .transport
            .execute(&self.budget_key(), || {
                let mut request = self
                    .transport
                    .client()
                    .get(&url)
                    .query(&params)
                    .header("accept", "application/json")
                    .header("x-amz-access-token", token.as_str())
                    .build()
                    .map_err(|e| SedoriError::SpApi(format!("failed to build request: {e}")))?;
                self.signer.sign(&mut request, Utc::now())?;
                Ok(request)
            })
            .await?;

        let Some(response) = outcome.data else {
            return Ok(ServiceResult {
                data: None,
                flags: outcome.flags,
            });
        };

        let payload: PricingResponse = response
            .json()
            .await
            .map_err(|e| SedoriError::SpApi(format!("invalid pricing payload: {e}")))?;
        debug!(products = payload.payload.len(), "competitive pricing parsed");

        let now = Utc::now();
        let offers = payload
            .payload
            .into_iter()
            .flat_map(|product| product.competitive_pricing.competitive_prices)
            .map(|offer| CompetitivePrice {
                condition: offer.condition.unwrap_or_else(|| "Unknown".to_string()),
                seller_id: offer.seller_id.unwrap_or_else(|| "Unknown".to_string()),
                landed_price: offer.price.landed_price.amount.unwrap_or_default(),
                shipping: offer.price.shipping.amount.unwrap_or_default(),
                last_updated: now,
            })
            .collect();

        Ok(ServiceResult::with_flags(offers, outcome.flags))
    }

    /// Estimate marketplace fees for listing at `price`. Only the API-derived
    /// components are filled; the pipeline composes the rest of the breakdown.
    pub async fn get_fees_estimate(
        &self,
        identifier: &str,
        price: Decimal,
    ) -> SedoriResult<ServiceResult<FeeBreakdown>> {
        let body = json!({
            "FeesEstimateRequest": {
                "MarketplaceId": self.settings.marketplace_id,
                "Identifier": identifier,
                "PriceToEstimateFees": {
                    "ListingPrice": {
                        "CurrencyCode": self.settings.default_currency,
                        "Amount": price.to_string(),
                    }
                },
                "IdentifierValue": identifier,
                "OptionalFulfillmentPrograms": ["FBA"],
            }
        });
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| SedoriError::SpApi(format!("failed to encode fees request: {e}")))?;

        let url = format!("{}/products/fees/v0/listings/fees", self.settings.endpoint);
        let token = self.token_cache.access_token().await?;

        let outcome = self
            .transport
            .execute(&self.budget_key(), || {
                let mut request = self
                    .transport
                    .client()
                    .post(&url)
                    .header("accept", "application/json")
                    .header("content-type", "application/json")
                    .header("x-amz-access-token", token.as_str())
                    .body(body_bytes.clone())
                    .build()
                    .map_err(|e| SedoriError::SpApi(format!("failed to build request: {e}")))?;
                self.signer.sign(&mut request, Utc::now())?;
                Ok(request)
            })
            .await?;

        let Some(response) = outcome.data else {
            return Ok(ServiceResult {
                data: None,
                flags: outcome.flags,
            });
        };

        let payload: FeesResponse = response
            .json()
            .await
            .map_err(|e| SedoriError::SpApi(format!("invalid fees payload: {e}")))?;

        let mut breakdown = FeeBreakdown::default();
        for fee in payload.payload.fees_estimate_result.fees_estimate.total_fees {
            let (Some(fee_type), Some(amount)) = (fee.fee_type, fee.fee_amount.and_then(|a| a.amount))
            else {
                warn!("skipping malformed fee entry");
                continue;
            };
            match fee_type.as_str() {
                "ReferralFee" => breakdown.referral_fee = amount,
                "VariableClosingFee" => breakdown.closing_fee = amount,
                "FBAPerUnitFulfillmentFee" => breakdown.fba_fee = amount,
                "FBAShipmentFee" => breakdown.inbound_shipping = amount,
                "Tax" => breakdown.taxes = amount,
                other => debug!(fee_type = other, "ignoring unmapped fee type"),
            }
        }

        Ok(ServiceResult::with_flags(breakdown, outcome.flags))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PricingResponse {
    #[serde(default)]
    payload: Vec<PricingProduct>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingProduct {
    #[serde(default, rename = "competitivePricing")]
    competitive_pricing: CompetitivePricing,
}

#[derive(Debug, Default, Deserialize)]
struct CompetitivePricing {
    #[serde(default, rename = "competitivePrices")]
    competitive_prices: Vec<CompetitiveOffer>,
}

#[derive(Debug, Default, Deserialize)]
struct CompetitiveOffer {
    #[serde(default)]
    condition: Option<String>,
    #[serde(default, rename = "sellerId")]
    seller_id: Option<String>,
    #[serde(default)]
    price: OfferPrice,
}

#[derive(Debug, Default, Deserialize)]
struct OfferPrice {
    #[serde(default, rename = "LandedPrice")]
    landed_price: MoneyField,
    #[serde(default, rename = "Shipping")]
    shipping: MoneyField,
}

#[derive(Debug, Default, Deserialize)]
struct MoneyField {
    #[serde(default, rename = "Amount")]
    amount: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct FeesResponse {
    #[serde(default)]
    payload: FeesPayload,
}

#[derive(Debug, Default, Deserialize)]
struct FeesPayload {
    #[serde(default, rename = "FeesEstimatorResult")]
    fees_estimate_result: FeesEstimateResult,
}

#[derive(Debug, Default, Deserialize)]
struct FeesEstimateResult {
    #[serde(default, rename = "FeesEstimate")]
    fees_estimate: FeesEstimate,
}

#[derive(Debug, Default, Deserialize)]
struct FeesEstimate {
    #[serde(default, rename = "TotalFees")]
    total_fees: Vec<FeeEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct FeeEntry {
    #[serde(default, rename = "FeeType")]
    fee_type: Option<String>,
    #[serde(default, rename = "FeeAmount")]
    fee_amount: Option<FeeAmount>,
}

#[derive(Debug, Default, Deserialize)]
struct FeeAmount {
    #[serde(default, rename = "Amount")]
    amount: Option<Decimal>,
}
