use crate::keepa::KeepaClient;
use crate::notify::Notifier;
use crate::profit::calculate_profit;
use crate::sheets::SpreadsheetSink;
use crate::spapi::AmazonSpApiClient;
use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use sedori_config::Settings;
use sedori_types::{
    reasons, CompetitivePrice, FeeBreakdown, KeepaPriceSnapshot, ProductListing, ProductQuery,
    ProfitAnalysis, PurchaseDecision, SedoriResult, ServiceFlags, ServiceResult,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Price-history source consumed by the pipeline.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    async fn price_snapshot(
        &self,
        query: &ProductQuery,
    ) -> SedoriResult<ServiceResult<KeepaPriceSnapshot>>;
}

/// Marketplace pricing and fees source consumed by the pipeline.
#[async_trait]
pub trait MarketplaceProvider: Send + Sync {
    async fn competitive_pricing(
        &self,
        query: &ProductQuery,
    ) -> SedoriResult<ServiceResult<Vec<CompetitivePrice>>>;

    async fn fees_estimate(
        &self,
        identifier: &str,
        price: Decimal,
    ) -> SedoriResult<ServiceResult<FeeBreakdown>>;
}

#[async_trait]
impl PriceHistoryProvider for KeepaClient {
    async fn price_snapshot(
        &self,
        query: &ProductQuery,
    ) -> SedoriResult<ServiceResult<KeepaPriceSnapshot>> {
        self.get_price_snapshot(query).await
    }
}

#[async_trait]
impl MarketplaceProvider for AmazonSpApiClient {
    async fn competitive_pricing(
        &self,
        query: &ProductQuery,
    ) -> SedoriResult<ServiceResult<Vec<CompetitivePrice>>> {
        self.get_competitive_pricing(query).await
    }

    async fn fees_estimate(
        &self,
        identifier: &str,
        price: Decimal,
    ) -> SedoriResult<ServiceResult<FeeBreakdown>> {
        self.get_fees_estimate(identifier, price).await
    }
}

/// One invocation's inputs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub query: ProductQuery,
    pub purchase_cost: Decimal,
    pub inbound_shipping: Option<Decimal>,
    pub packaging: Option<Decimal>,
    pub storage_fee: Option<Decimal>,
    pub taxes: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub fx_spread_bp: Option<u32>,
    pub return_rate: Option<Decimal>,
    pub notify_slack: bool,
    pub notify_line: bool,
    pub dry_run: bool,
    pub decision_path: Option<PathBuf>,
    pub request_id: String,
}

/// Coordinates the service clients, composes the fee model, evaluates the buy
/// thresholds and assembles the result document.
pub struct DecisionPipeline {
    settings: Arc<Settings>,
    keepa: Arc<dyn PriceHistoryProvider>,
    marketplace: Arc<dyn MarketplaceProvider>,
    notifier: Arc<Notifier>,
    sheets: Option<Arc<dyn SpreadsheetSink>>,
}

impl DecisionPipeline {
    pub fn new(
        settings: Arc<Settings>,
        keepa: Arc<dyn PriceHistoryProvider>,
        marketplace: Arc<dyn MarketplaceProvider>,
        notifier: Arc<Notifier>,
        sheets: Option<Arc<dyn SpreadsheetSink>>,
    ) -> Self {
        Self {
            settings,
            keepa,
            marketplace,
            notifier,
            sheets,
        }
    }

    /// Run one decision. Upstream failures soft-degrade: the pipeline proceeds
    /// with neutral defaults and reflects the degradation in the output.
    pub async fn run(&self, request: RunRequest) -> SedoriResult<Value> {
        let query = &request.query;

        let keepa_result = match self.keepa.price_snapshot(query).await {
            Ok(result) => result,
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "keepa lookup failed");
                ServiceResult::degraded(reasons::KEEPA_ERROR)
            }
        };
        let snapshot = keepa_result.data.clone().unwrap_or_default();

        self.stagger().await;

        let pricing_result = match self.marketplace.competitive_pricing(query).await {
            Ok(result) => result,
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "competitive pricing failed");
                ServiceResult::degraded(reasons::SPAPI_PRICING_ERROR)
            }
        };
        let offers = pricing_result.data.clone().unwrap_or_default();

        let selling_price = self.select_selling_price(&request, &offers, &snapshot);

        let fees_result = match self
            .marketplace
            .fees_estimate(query.identifier(), selling_price)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "fees estimate failed");
                ServiceResult::degraded(reasons::SPAPI_FEE_ERROR)
            }
        };
        let api_fees = fees_result.data.clone().unwrap_or_default();

        let composed = self.compose_fees(&request, selling_price, &api_fees);
        let analysis = calculate_profit(
            selling_price,
            request.purchase_cost,
            &composed,
            self.settings.money.rounding,
        )?;

        let merged_flags = keepa_result
            .flags
            .merge(&pricing_result.flags)
            .merge(&fees_result.flags);
        let decision = self.evaluate(&analysis, &snapshot, &offers, merged_flags.degraded);

        let service_reasons = collect_reasons(&[
            &keepa_result.flags,
            &pricing_result.flags,
            &fees_result.flags,
        ]);

        let document = self.build_document(
            &request,
            selling_price,
            &keepa_result,
            &snapshot,
            &pricing_result,
            &offers,
            &fees_result,
            &api_fees,
            &analysis,
            &merged_flags,
            &service_reasons,
            &decision,
        );

        if let Some(path) = &request.decision_path {
            match serde_json::to_string_pretty(&document) {
                Ok(rendered) => {
                    if let Err(e) = std::fs::write(path, rendered) {
                        error!(path = %path.display(), error = %e, "failed to write decision artifact");
                    }
                }
                Err(e) => error!(error = %e, "failed to render decision artifact"),
            }
        }

        if decision.meets_thresholds && !request.dry_run {
            let listing = self.build_listing(query, selling_price, &snapshot);
            self.dispatch(&request, &listing, &analysis).await;
        }

        info!(
            request_id = %request.request_id,
            buy = decision.meets_thresholds,
            degraded = merged_flags.degraded,
            "decision complete"
        );
        Ok(document)
    }

    /// Pause for a uniformly random `[0, stagger_jitter_seconds]` interval to
    /// desynchronize batched runs.
    async fn stagger(&self) {
        let jitter = self.settings.cli.stagger_jitter_seconds;
        if jitter <= 0.0 {
            return;
        }
        let pause = rand::thread_rng().gen_range(0.0..=jitter);
        tokio::time::sleep(Duration::from_secs_f64(pause)).await;
    }

    /// First match wins: explicit target price, cheapest competing offer,
    /// Keepa current price, zero.
    fn select_selling_price(
        &self,
        request: &RunRequest,
        offers: &[CompetitivePrice],
        snapshot: &KeepaPriceSnapshot,
    ) -> Decimal {
        if let Some(target) = request.target_price {
            if target > Decimal::ZERO {
                return target;
            }
        }
        if let Some(best) = offers.iter().map(|offer| offer.landed_price).min() {
            return best;
        }
        if snapshot.current_price > Decimal::ZERO {
            return snapshot.current_price;
        }
        warn!("no selling price could be determined; defaulting to 0");
        Decimal::ZERO
    }

    /// Keep the API-derived referral, closing and FBA fees; fill the logistics
    /// components from caller overrides or configuration; derive the
    /// price-proportional components from the selling price.
    fn compose_fees(
        &self,
        request: &RunRequest,
        selling_price: Decimal,
        api_fees: &FeeBreakdown,
    ) -> FeeBreakdown {
        let money = &self.settings.money;
        let fx_spread_bp = request.fx_spread_bp.unwrap_or(money.fx_spread_bp);
        let return_rate = request.return_rate.unwrap_or(money.return_rate);

        FeeBreakdown {
            referral_fee: api_fees.referral_fee,
            closing_fee: api_fees.closing_fee,
            fba_fee: api_fees.fba_fee,
            inbound_shipping: request.inbound_shipping.unwrap_or(money.inbound_shipping),
            packaging_materials: request.packaging.unwrap_or(money.packaging_materials),
            storage_fee: request.storage_fee.unwrap_or(money.storage_fee_monthly),
            taxes: request.taxes.unwrap_or_default() + api_fees.taxes,
            fx_spread: selling_price * Decimal::from(fx_spread_bp) / Decimal::from(10_000),
            returns_cost: selling_price * return_rate,
            other_costs: api_fees.other_costs,
        }
    }

    fn evaluate(
        &self,
        analysis: &ProfitAnalysis,
        snapshot: &KeepaPriceSnapshot,
        offers: &[CompetitivePrice],
        degraded: bool,
    ) -> PurchaseDecision {
        let thresholds = &self.settings.thresholds;
        let mut failed = Vec::new();

        if analysis.profit < thresholds.min_profit {
            failed.push(reasons::PROFIT_BELOW_THRESHOLD.to_string());
        }
        if analysis.roi < thresholds.min_roi {
            failed.push(reasons::ROI_BELOW_THRESHOLD.to_string());
        }
        if let (Some(max_rank), Some(rank)) = (thresholds.max_rank, snapshot.sales_rank) {
            if rank > max_rank {
                failed.push(reasons::RANK_ABOVE_THRESHOLD.to_string());
            }
        }
        if offers.is_empty() {
            failed.push(reasons::NO_COMPETITIVE_OFFERS.to_string());
        }
        if degraded {
            failed.push(reasons::DEGRADED_INPUTS.to_string());
        }

        PurchaseDecision::new(
            analysis.profit > Decimal::ZERO,
            failed.is_empty(),
            failed,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_document(
        &self,
        request: &RunRequest,
        selling_price: Decimal,
        keepa_result: &ServiceResult<KeepaPriceSnapshot>,
        snapshot: &KeepaPriceSnapshot,
        pricing_result: &ServiceResult<Vec<CompetitivePrice>>,
        offers: &[CompetitivePrice],
        fees_result: &ServiceResult<FeeBreakdown>,
        api_fees: &FeeBreakdown,
        analysis: &ProfitAnalysis,
        merged_flags: &ServiceFlags,
        service_reasons: &[String],
        decision: &PurchaseDecision,
    ) -> Value {
        let thresholds = &self.settings.thresholds;
        let fees = &analysis.fees;
        json!({
            "request_id": request.request_id,
            "inputs": {
                "asin": request.query.asin(),
                "barcode": request.query.barcode(),
                "purchase_cost": request.purchase_cost.to_string(),
                "selling_price": selling_price.to_string(),
            },
            "sources": {
                "keepa": {
                    "flags": keepa_result.flags,
                    "snapshot": snapshot,
                },
                "competitive": {
                    "flags": pricing_result.flags,
                    "offers": offers,
                },
                "fees": {
                    "flags": fees_result.flags,
                    "breakdown": api_fees,
                },
            },
            "calc": {
                "selling_price": analysis.selling_price.to_string(),
                "purchase_cost": analysis.purchase_cost.to_string(),
                "total_cost": analysis.total_cost.to_string(),
                "fees": {
                    "referral_fee": fees.referral_fee.to_string(),
                    "closing_fee": fees.closing_fee.to_string(),
                    "fba_fee": fees.fba_fee.to_string(),
                    "inbound_shipping": fees.inbound_shipping.to_string(),
                    "packaging_materials": fees.packaging_materials.to_string(),
                    "storage_fee": fees.storage_fee.to_string(),
                    "taxes": fees.taxes.to_string(),
                    "fx_spread": fees.fx_spread.to_string(),
                    "returns_cost": fees.returns_cost.to_string(),
                    "other_costs": fees.other_costs.to_string(),
                    "total": fees.total().to_string(),
                },
                "profit": analysis.profit.to_string(),
                "roi": analysis.roi.to_string(),
                "margin": analysis.margin.to_string(),
            },
            "thresholds": {
                "min_profit": thresholds.min_profit.to_string(),
                "min_roi": thresholds.min_roi.to_string(),
                "max_rank": thresholds.max_rank,
            },
            "flags": {
                "degraded": merged_flags.degraded,
                "cached": merged_flags.cached,
                "circuit_open": merged_flags.circuit_open,
                "reasons": service_reasons,
            },
            "decision": {
                "buy": decision.meets_thresholds,
                "profitable": decision.is_profitable,
                "reasons": decision.reasons,
            },
        })
    }

    fn build_listing(
        &self,
        query: &ProductQuery,
        selling_price: Decimal,
        snapshot: &KeepaPriceSnapshot,
    ) -> ProductListing {
        let identifier = query.identifier().to_string();
        let title = snapshot
            .title
            .clone()
            .unwrap_or_else(|| format!("ASIN {identifier}"));
        let description = format!(
            "{title}\nCurrent 30-day average price: {}\nLowest 30-day price: {}\nHighest 30-day price: {}",
            snapshot.average_price_30d, snapshot.lowest_price_30d, snapshot.highest_price_30d
        );
        ProductListing {
            asin: identifier,
            title,
            price: selling_price,
            description,
            image_urls: snapshot.image_urls.clone(),
            currency: snapshot.currency.clone(),
        }
    }

    async fn dispatch(&self, request: &RunRequest, listing: &ProductListing, profit: &ProfitAnalysis) {
        let summary = format!(
            "仕入れOK: {} (ASIN: {}) 利益: {} ROI: {}",
            listing.title, listing.asin, profit.profit, profit.roi
        );

        if request.notify_slack {
            if let Err(e) = self.notifier.post_slack(&summary).await {
                error!(error = %e, "slack notification failed");
            }
        }
        if request.notify_line {
            if let Err(e) = self.notifier.post_line(&summary).await {
                error!(error = %e, "LINE notification failed");
            }
        }

        if let Some(sheets) = &self.sheets {
            if let Err(e) = sheets.append(listing, profit).await {
                error!(error = %e, "spreadsheet append failed");
            }
        }
    }
}

fn collect_reasons(flag_sets: &[&ServiceFlags]) -> Vec<String> {
    let mut collected: Vec<String> = flag_sets
        .iter()
        .filter_map(|flags| flags.reason.clone())
        .filter(|reason| !reason.is_empty())
        .collect();
    collected.sort();
    collected.dedup();
    collected
}
