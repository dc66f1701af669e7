use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use sedori_types::{Secret, SedoriError, SedoriResult};
use serde::Deserialize;
use std::path::Path;

/// Main configuration tree for the decision engine
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Upstream API credentials and endpoints
    pub api: ApiSettings,

    /// Notification channels
    #[serde(default)]
    pub notify: NotifySettings,

    /// Buy-decision thresholds
    #[serde(default)]
    pub thresholds: ThresholdSettings,

    /// Retry policy shared by all outbound calls
    #[serde(default)]
    pub retry: RetrySettings,

    /// Price-history result cache
    #[serde(default)]
    pub cache: CacheSettings,

    /// Money model defaults and rounding
    #[serde(default)]
    pub money: MoneySettings,

    /// Per-service request budgets
    #[serde(default)]
    pub budget: BudgetSettings,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,

    /// CLI runtime knobs
    #[serde(default)]
    pub cli: CliSettings,

    /// Optional spreadsheet sink configuration
    #[serde(default)]
    pub google_sheets: Option<GoogleSheetsSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    pub spapi: SpApiSettings,
    pub keepa: KeepaSettings,
}

/// Amazon Selling Partner API credentials and endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct SpApiSettings {
    pub marketplace_id: String,
    pub region: String,
    pub lwa_client_id: Secret,
    pub lwa_client_secret: Secret,
    pub refresh_token: Secret,
    pub aws_access_key: Secret,
    pub aws_secret_key: Secret,
    pub role_arn: String,

    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// SP-API host for the configured region
    #[serde(default = "default_spapi_endpoint")]
    pub endpoint: String,

    /// LWA token exchange endpoint
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
}

/// Keepa price-history API settings
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaSettings {
    pub api_key: Secret,

    /// Keepa locale; 5 is Amazon.co.jp
    #[serde(default = "default_keepa_domain")]
    pub domain: u32,

    #[serde(default = "default_keepa_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySettings {
    #[serde(default)]
    pub slack: SlackSettings,
    #[serde(default)]
    pub line: LineSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackSettings {
    #[serde(default)]
    pub enabled: bool,
    pub webhook: Option<String>,
    pub token: Option<Secret>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineSettings {
    #[serde(default)]
    pub enabled: bool,
    pub token: Option<Secret>,

    #[serde(default = "default_line_endpoint")]
    pub endpoint: String,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            endpoint: default_line_endpoint(),
        }
    }
}

/// Buy-decision thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdSettings {
    #[serde(default)]
    pub min_profit: Decimal,
    #[serde(default)]
    pub min_roi: Decimal,

    /// Maximum acceptable sales rank; unset disables the rank check
    #[serde(default)]
    pub max_rank: Option<i64>,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            min_profit: Decimal::ZERO,
            min_roi: Decimal::ZERO,
            max_rank: None,
        }
    }
}

/// Retry policy: bounded attempts with exponential backoff and jitter
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff interval in seconds
    #[serde(default = "default_retry_base")]
    pub base: f64,

    /// Backoff cap in seconds
    #[serde(default = "default_retry_max_sleep")]
    pub max_sleep: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base: default_retry_base(),
            max_sleep: default_retry_max_sleep(),
        }
    }
}

impl RetrySettings {
    pub fn base_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.base)
    }

    pub fn max_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.max_sleep)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,

    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

/// Money model defaults applied when the caller does not override them
#[derive(Debug, Clone, Deserialize)]
pub struct MoneySettings {
    /// Quantum money values are rounded to, half-up
    #[serde(default = "default_rounding")]
    pub rounding: Decimal,

    /// FX spread in basis points applied to the selling price
    #[serde(default)]
    pub fx_spread_bp: u32,

    /// Expected return rate applied to the selling price
    #[serde(default)]
    pub return_rate: Decimal,

    #[serde(default)]
    pub storage_fee_monthly: Decimal,
    #[serde(default)]
    pub inbound_shipping: Decimal,
    #[serde(default)]
    pub packaging_materials: Decimal,
}

impl Default for MoneySettings {
    fn default() -> Self {
        Self {
            rounding: default_rounding(),
            fx_spread_bp: 0,
            return_rate: Decimal::ZERO,
            storage_fee_monthly: Decimal::ZERO,
            inbound_shipping: Decimal::ZERO,
            packaging_materials: Decimal::ZERO,
        }
    }
}

/// Hard per-invocation request ceilings, keyed by service
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    #[serde(default = "default_spapi_budget")]
    pub spapi: u32,

    #[serde(default = "default_keepa_budget")]
    pub keepa: u32,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            spapi: default_spapi_budget(),
            keepa: default_keepa_budget(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            json_logs: default_json_logs(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliSettings {
    /// Upper bound of the random pause before the competitive-pricing call
    #[serde(default = "default_stagger_jitter")]
    pub stagger_jitter_seconds: f64,

    #[serde(default = "default_max_inflight")]
    pub spapi_max_inflight: usize,

    #[serde(default = "default_max_inflight")]
    pub keepa_max_inflight: usize,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            stagger_jitter_seconds: default_stagger_jitter(),
            spapi_max_inflight: default_max_inflight(),
            keepa_max_inflight: default_max_inflight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleSheetsSettings {
    pub credentials_file: String,
    pub spreadsheet_id: String,
    pub worksheet_name: String,
}

// Default value functions
fn default_currency() -> String {
    "JPY".to_string()
}
fn default_spapi_endpoint() -> String {
    "https://sellingpartnerapi-fe.amazon.com".to_string()
}
fn default_token_endpoint() -> String {
    "https://api.amazon.com/auth/o2/token".to_string()
}
fn default_keepa_domain() -> u32 {
    5
}
fn default_keepa_endpoint() -> String {
    "https://api.keepa.com/product".to_string()
}
fn default_line_endpoint() -> String {
    "https://notify-api.line.me/api/notify".to_string()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_base() -> f64 {
    0.5
}
fn default_retry_max_sleep() -> f64 {
    10.0
}
fn default_cache_ttl() -> u64 {
    1800
}
fn default_cache_capacity() -> usize {
    512
}
fn default_rounding() -> Decimal {
    Decimal::new(1, 2)
}
fn default_spapi_budget() -> u32 {
    120
}
fn default_keepa_budget() -> u32 {
    150
}
fn default_json_logs() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_stagger_jitter() -> f64 {
    0.4
}
fn default_max_inflight() -> usize {
    1
}

impl Settings {
    /// Load configuration from `config/settings.yml`, optionally deep-merging
    /// `config/env/<env>.yml`, then applying `SEDORI__section__key`
    /// environment overrides.
    pub fn load(env: Option<&str>) -> SedoriResult<Self> {
        Self::load_from(Path::new("config"), env)
    }

    /// Same layering rooted at an explicit configuration directory.
    pub fn load_from(dir: &Path, env: Option<&str>) -> SedoriResult<Self> {
        let defaults = dir.join("settings.yml");
        let mut builder = Config::builder().add_source(
            File::from(defaults.as_path())
                .format(FileFormat::Yaml)
                .required(true),
        );

        if let Some(env) = env {
            let overrides = dir.join("env").join(format!("{env}.yml"));
            if !overrides.exists() {
                tracing::warn!(env, path = %overrides.display(), "environment override file not found");
            }
            builder = builder.add_source(
                File::from(overrides.as_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            );
        }

        let merged = builder
            .add_source(
                Environment::with_prefix("SEDORI")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| SedoriError::Config(e.to_string()))?;

        let settings: Settings = merged
            .try_deserialize()
            .map_err(|e| SedoriError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate invariants the type system cannot express.
    pub fn validate(&self) -> SedoriResult<()> {
        if self.api.spapi.marketplace_id.is_empty() {
            return Err(SedoriError::Config(
                "api.spapi.marketplace_id must not be empty".to_string(),
            ));
        }
        if self.api.spapi.region.is_empty() {
            return Err(SedoriError::Config(
                "api.spapi.region must not be empty".to_string(),
            ));
        }
        if self.api.keepa.api_key.is_empty() {
            return Err(SedoriError::Config(
                "api.keepa.api_key must not be empty".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SedoriError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base <= 0.0 || self.retry.max_sleep <= 0.0 {
            return Err(SedoriError::Config(
                "retry.base and retry.max_sleep must be positive".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(SedoriError::Config(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        if self.budget.spapi == 0 || self.budget.keepa == 0 {
            return Err(SedoriError::Config(
                "budget limits must be at least 1".to_string(),
            ));
        }
        if self.money.rounding <= Decimal::ZERO {
            return Err(SedoriError::Config(
                "money.rounding must be positive".to_string(),
            ));
        }
        if self.money.return_rate < Decimal::ZERO {
            return Err(SedoriError::Config(
                "money.return_rate must not be negative".to_string(),
            ));
        }
        if self.cli.stagger_jitter_seconds < 0.0 {
            return Err(SedoriError::Config(
                "cli.stagger_jitter_seconds must not be negative".to_string(),
            ));
        }
        if self.cli.spapi_max_inflight == 0 || self.cli.keepa_max_inflight == 0 {
            return Err(SedoriError::Config(
                "max_inflight settings must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const MINIMAL_YAML: &str = r#"
api:
  spapi:
    marketplace_id: A1VC38T7YXB528
    region: us-west-2
    lwa_client_id: client-id
    lwa_client_secret: client-secret
    refresh_token: refresh
    aws_access_key: AKIAEXAMPLE
    aws_secret_key: SECRETKEYEXAMPLE
    role_arn: arn:aws:iam::000000000000:role/spapi
  keepa:
    api_key: keepa-key
"#;

    fn write_settings(dir: &Path, contents: &str) {
        let mut file = std::fs::File::create(dir.join("settings.yml")).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_minimal_settings_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_settings(dir.path(), MINIMAL_YAML);

        let settings = Settings::load_from(dir.path(), None).unwrap();
        assert_eq!(settings.api.spapi.default_currency, "JPY");
        assert_eq!(settings.api.keepa.domain, 5);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.cache.capacity, 512);
        assert_eq!(settings.money.rounding, dec!(0.01));
        assert_eq!(settings.budget.spapi, 120);
        assert_eq!(settings.budget.keepa, 150);
        assert!(settings.observability.json_logs);
        assert_eq!(settings.cli.spapi_max_inflight, 1);
        assert!(settings.google_sheets.is_none());
        assert!(settings.thresholds.max_rank.is_none());
    }

    #[test]
    fn missing_settings_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load_from(dir.path(), None);
        assert!(matches!(result, Err(SedoriError::Config(_))));
    }

    #[test]
    fn env_file_deep_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_settings(dir.path(), MINIMAL_YAML);

        std::fs::create_dir_all(dir.path().join("env")).unwrap();
        std::fs::write(
            dir.path().join("env").join("staging.yml"),
            "thresholds:\n  min_profit: \"500\"\n  max_rank: 50000\n",
        )
        .unwrap();

        let settings = Settings::load_from(dir.path(), Some("staging")).unwrap();
        assert_eq!(settings.thresholds.min_profit, dec!(500));
        assert_eq!(settings.thresholds.max_rank, Some(50000));
        // untouched sections keep their defaults
        assert_eq!(settings.thresholds.min_roi, Decimal::ZERO);
        assert_eq!(settings.api.spapi.marketplace_id, "A1VC38T7YXB528");
    }

    #[test]
    fn rejects_zero_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        write_settings(
            dir.path(),
            &format!("{MINIMAL_YAML}retry:\n  max_attempts: 0\n"),
        );

        let result = Settings::load_from(dir.path(), None);
        assert!(matches!(result, Err(SedoriError::Config(_))));
    }

    #[test]
    fn rejects_non_positive_rounding() {
        let settings_yaml = format!("{MINIMAL_YAML}money:\n  rounding: \"0\"\n");
        let dir = tempfile::tempdir().unwrap();
        write_settings(dir.path(), &settings_yaml);

        let result = Settings::load_from(dir.path(), None);
        assert!(matches!(result, Err(SedoriError::Config(_))));
    }

    #[test]
    fn secrets_do_not_leak_through_debug() {
        let dir = tempfile::tempdir().unwrap();
        write_settings(dir.path(), MINIMAL_YAML);

        let settings = Settings::load_from(dir.path(), None).unwrap();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("client-secret"));
        assert!(!rendered.contains("SECRETKEYEXAMPLE"));
        assert!(!rendered.contains("keepa-key"));
    }
}
