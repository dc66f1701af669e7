use crate::transport::RetryingTransport;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sedori_config::{CacheSettings, KeepaSettings};
use sedori_types::{
    reasons, KeepaPriceSnapshot, ProductQuery, SedoriError, SedoriResult, ServiceFlags,
    ServiceResult,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Base instant for Keepa's delta-encoded minute timestamps.
fn keepa_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2011, 1, 1, 0, 0, 0).unwrap()
}

/// Price series aliases in priority order; the first group with a non-empty
/// decoded series wins. Names match case-insensitively.
const PRICE_SERIES_PRIORITY: &[&[&str]] = &[
    &["AMAZON", "0"],
    &["NEW", "1", "NEW_FBA", "NEW_SHIPPING"],
    &["BUY_BOX_SHIPPING", "BUY_BOX", "16"],
];

const RANK_SERIES_PRIORITY: &[&[&str]] = &[&["SALES", "SALES_RANK", "RANK", "3"]];

const IMAGE_BASE_URL: &str = "https://images-na.ssl-images-amazon.com/images/I";

/// One decoded datum from a compact series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesPoint {
    pub ts: DateTime<Utc>,
    pub value: i64,
}

struct CacheEntry {
    snapshot: KeepaPriceSnapshot,
    degraded: bool,
    reason: Option<String>,
    expires_at: Instant,
}

/// Client for the Keepa product endpoint with an in-memory TTL result cache.
///
/// A cache hit returns immediately with `cached=true` and performs no HTTP
/// request and no budget consumption.
pub struct KeepaClient {
    settings: KeepaSettings,
    transport: RetryingTransport,
    ttl: Duration,
    capacity: usize,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl KeepaClient {
    pub fn new(settings: KeepaSettings, cache: &CacheSettings, transport: RetryingTransport) -> Self {
        Self {
            settings,
            transport,
            ttl: Duration::from_secs(cache.ttl_seconds),
            capacity: cache.capacity,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn budget_key(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.settings.api_key.expose().as_bytes()));
        format!("keepa:{}:{}", self.settings.domain, &digest[..6])
    }

    fn cache_key(&self, query: &ProductQuery) -> String {
        format!("{}:{}", query.identifier(), self.settings.domain)
    }

    /// Fetch a 30-day price summary for the queried product.
    pub async fn get_price_snapshot(
        &self,
        query: &ProductQuery,
    ) -> SedoriResult<ServiceResult<KeepaPriceSnapshot>> {
        let cache_key = self.cache_key(query);
        if let Some(hit) = self.cached(&cache_key) {
            debug!(key = %cache_key, "keepa cache hit");
            return Ok(hit);
        }

        let domain = self.settings.domain.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("key", self.settings.api_key.expose()),
            ("domain", domain.as_str()),
            ("stats", "90"),
            ("offers", "20"),
        ];
        if let Some(asin) = query.asin() {
            params.push(("asin", asin));
        }
        if let Some(barcode) = query.barcode() {
            params.push(("code", barcode));
        }

        let outcome = self
            .transport
            .execute(&self.budget_key(), || {
                self.transport
                    .client()
                    .get(&self.settings.endpoint)
                    .query(&params)
                    .build()
                    .map_err(|e| SedoriError::Keepa(format!("failed to build request: {e}")))
            })
            .await?;

        let Some(response) = outcome.data else {
            return Ok(ServiceResult {
                data: None,
                flags: outcome.flags,
            });
        };

        let payload: KeepaResponse = response
            .json()
            .await
            .map_err(|e| SedoriError::Keepa(format!("invalid product payload: {e}")))?;

        if let Some(error) = payload.error {
            return Err(SedoriError::Keepa(format!("API returned error: {error}")));
        }
        let Some(product) = payload.products.into_iter().next() else {
            return Err(SedoriError::Keepa(
                "response did not include product data".to_string(),
            ));
        };

        let (snapshot, flags) = build_snapshot(
            product,
            payload.currency.unwrap_or_else(|| "JPY".to_string()),
            Utc::now(),
        );

        self.store(
            cache_key,
            CacheEntry {
                snapshot: snapshot.clone(),
                degraded: flags.degraded,
                reason: flags.reason.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        Ok(ServiceResult::with_flags(snapshot, flags))
    }

    fn cached(&self, key: &str) -> Option<ServiceResult<KeepaPriceSnapshot>> {
        let cache = self.cache.lock().unwrap();
        let entry = cache.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(ServiceResult::with_flags(
            entry.snapshot.clone(),
            ServiceFlags {
                degraded: entry.degraded,
                cached: true,
                circuit_open: false,
                reason: entry.reason.clone(),
            },
        ))
    }

    fn store(&self, key: String, entry: CacheEntry) {
        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= self.capacity {
            let now = Instant::now();
            cache.retain(|_, e| e.expires_at > now);
        }
        if cache.len() >= self.capacity {
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(key, entry);
    }
}

/// Decode a compact series: the first entry is absolute minutes since the
/// Keepa epoch, subsequent entries are deltas on a running cursor. Values are
/// hundredths of the base currency; non-positive values are "no datum".
pub fn decode_series(raw: &[i64]) -> Vec<SeriesPoint> {
    let mut points = Vec::new();
    let mut cursor: Option<i64> = None;
    for chunk in raw.chunks_exact(2) {
        let absolute = match cursor {
            None => chunk[0],
            Some(previous) => previous + chunk[0],
        };
        cursor = Some(absolute);
        if chunk[1] <= 0 {
            continue;
        }
        points.push(SeriesPoint {
            ts: keepa_epoch() + ChronoDuration::minutes(absolute),
            value: chunk[1],
        });
    }
    points
}

fn select_series(
    csv: &HashMap<String, Option<Vec<i64>>>,
    priority: &[&[&str]],
) -> Option<Vec<SeriesPoint>> {
    for group in priority {
        for alias in *group {
            let raw = csv
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(alias))
                .and_then(|(_, series)| series.as_ref());
            if let Some(raw) = raw {
                let decoded = decode_series(raw);
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        }
    }
    None
}

struct PriceSummary {
    current: Decimal,
    median: Decimal,
    p10: Decimal,
    p90: Decimal,
    degraded: bool,
}

/// Window statistics over a decoded price series: 30-day window when it holds
/// at least two points, otherwise the full series with a degraded marker.
fn summarize_prices(points: &[SeriesPoint], now: DateTime<Utc>) -> PriceSummary {
    let cutoff = now - ChronoDuration::days(30);
    let window: Vec<&SeriesPoint> = points.iter().filter(|p| p.ts >= cutoff).collect();
    let (window, degraded) = if window.len() < 2 {
        (points.iter().collect::<Vec<_>>(), true)
    } else {
        (window, false)
    };

    let current = points
        .iter()
        .max_by_key(|p| p.ts)
        .map(|p| Decimal::new(p.value, 2))
        .unwrap_or_default();

    let mut sorted: Vec<Decimal> = window.iter().map(|p| Decimal::new(p.value, 2)).collect();
    sorted.sort();

    PriceSummary {
        current,
        median: median(&sorted),
        p10: percentile(&sorted, Decimal::new(1, 1)),
        p90: percentile(&sorted, Decimal::new(9, 1)),
        degraded,
    }
}

/// Median of a sorted slice; an even count averages the two middle values,
/// quantized half-up to two fractional digits.
fn median(sorted: &[Decimal]) -> Decimal {
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        ((sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::TWO)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Percentile via linear interpolation between adjacent sorted entries.
fn percentile(sorted: &[Decimal], fraction: Decimal) -> Decimal {
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n == 1 {
        return sorted[0];
    }
    let position = Decimal::from(n as i64 - 1) * fraction;
    let lower = position.floor();
    let index = lower.to_usize().unwrap_or(0);
    if index + 1 >= n {
        return sorted[n - 1];
    }
    sorted[index] + (sorted[index + 1] - sorted[index]) * (position - lower)
}

/// Expand the `imagesCSV` token list into full image URLs.
fn expand_image_urls(images_csv: &str) -> Vec<String> {
    images_csv
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            if token.starts_with("http") {
                token.to_string()
            } else {
                format!("{IMAGE_BASE_URL}/{token}.jpg")
            }
        })
        .collect()
}

fn build_snapshot(
    product: KeepaProduct,
    currency: String,
    now: DateTime<Utc>,
) -> (KeepaPriceSnapshot, ServiceFlags) {
    let mut flags = ServiceFlags::default();

    let price_points = select_series(&product.csv, PRICE_SERIES_PRIORITY);
    let summary = match &price_points {
        Some(points) => {
            let summary = summarize_prices(points, now);
            if summary.degraded {
                flags.degraded = true;
                flags.reason = Some(reasons::KEEPA_INSUFFICIENT_DATA.to_string());
            }
            Some(summary)
        }
        None => {
            flags.degraded = true;
            flags.reason = Some(reasons::KEEPA_INSUFFICIENT_DATA.to_string());
            None
        }
    };

    let rank_points = select_series(&product.csv, RANK_SERIES_PRIORITY);
    let sales_rank = rank_points
        .as_ref()
        .and_then(|points| points.iter().max_by_key(|p| p.ts))
        .map(|p| p.value);
    if sales_rank.is_none() {
        flags.degraded = true;
        flags.reason = Some(reasons::KEEPA_RANK_INSUFFICIENT.to_string());
    }

    let snapshot = KeepaPriceSnapshot {
        current_price: summary.as_ref().map(|s| s.current).unwrap_or_default(),
        average_price_30d: summary.as_ref().map(|s| s.median).unwrap_or_default(),
        lowest_price_30d: summary.as_ref().map(|s| s.p10).unwrap_or_default(),
        highest_price_30d: summary.as_ref().map(|s| s.p90).unwrap_or_default(),
        sales_rank,
        currency,
        title: product.title,
        image_urls: product
            .images_csv
            .as_deref()
            .map(expand_image_urls)
            .unwrap_or_default(),
    };
    (snapshot, flags)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeepaResponse {
    error: Option<serde_json::Value>,
    currency: Option<String>,
    products: Vec<KeepaProduct>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeepaProduct {
    csv: HashMap<String, Option<Vec<i64>>>,
    title: Option<String>,
    #[serde(rename = "imagesCSV")]
    images_csv: Option<String>,
}
