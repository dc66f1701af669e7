//! Resilient service clients and decision pipeline for the sedori engine
//!
//! This crate provides the building blocks for a single arbitrage decision:
//! - Rate-limit primitives: per-key budget, in-flight cap, circuit breaker
//! - Retrying transport wrapping every outbound HTTP request
//! - SigV4 signer and LWA token cache for the Selling Partner API
//! - Marketplace and price-history clients with soft-fail results
//! - Pure profit calculator over exact decimal arithmetic
//! - Decision pipeline assembling the result document

pub mod auth;
pub mod keepa;
pub mod notify;
pub mod pipeline;
pub mod profit;
pub mod rate_limit;
pub mod sheets;
pub mod sigv4;
pub mod spapi;
pub mod transport;

// Re-export commonly used types and functions
pub use auth::TokenCache;
pub use keepa::KeepaClient;
pub use notify::Notifier;
pub use pipeline::{DecisionPipeline, MarketplaceProvider, PriceHistoryProvider, RunRequest};
pub use profit::calculate_profit;
pub use rate_limit::{CircuitBreaker, KeySemaphore, RequestBudget};
pub use sheets::SpreadsheetSink;
pub use sigv4::SigV4Signer;
pub use spapi::AmazonSpApiClient;
pub use transport::{RetryingTransport, ServiceKind};

use sedori_config::Settings;
use sedori_types::SedoriResult;
use std::sync::Arc;

/// Wire a ready-to-run pipeline from validated settings.
///
/// Each service gets its own budget, in-flight cap and circuit breaker; their
/// lifetime is the pipeline's lifetime. No concrete spreadsheet sink is
/// attached here; callers that have one pass it to [`DecisionPipeline::new`].
pub fn build_pipeline(settings: Arc<Settings>) -> SedoriResult<DecisionPipeline> {
    let token_cache = Arc::new(TokenCache::new(
        &settings.api.spapi,
        settings.retry.clone(),
    )?);

    let spapi_transport = RetryingTransport::new(
        ServiceKind::SpApi,
        settings.retry.clone(),
        Arc::new(RequestBudget::new()),
        settings.budget.spapi,
        Arc::new(KeySemaphore::new(settings.cli.spapi_max_inflight)),
        Arc::new(CircuitBreaker::default()),
    )?;
    let marketplace = Arc::new(AmazonSpApiClient::new(
        settings.api.spapi.clone(),
        spapi_transport,
        token_cache,
    ));

    let keepa_transport = RetryingTransport::new(
        ServiceKind::Keepa,
        settings.retry.clone(),
        Arc::new(RequestBudget::new()),
        settings.budget.keepa,
        Arc::new(KeySemaphore::new(settings.cli.keepa_max_inflight)),
        Arc::new(CircuitBreaker::default()),
    )?;
    let keepa = Arc::new(KeepaClient::new(
        settings.api.keepa.clone(),
        &settings.cache,
        keepa_transport,
    ));

    let notifier = Arc::new(Notifier::new(
        settings.notify.slack.clone(),
        settings.notify.line.clone(),
        settings.retry.clone(),
    )?);

    Ok(DecisionPipeline::new(
        settings, keepa, marketplace, notifier, None,
    ))
}
