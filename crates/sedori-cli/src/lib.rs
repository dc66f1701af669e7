use clap::{ArgGroup, Parser};
use rust_decimal::Decimal;
use sedori_config::Settings;
use sedori_core::{build_pipeline, RunRequest};
use sedori_types::{ProductQuery, SedoriError, SedoriResult};
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Amazon arbitrage assistant leveraging SP-API and Keepa data
#[derive(Parser, Debug)]
#[command(name = "amazon-sedori")]
#[command(about = "Amazon arbitrage assistant leveraging SP-API and Keepa data")]
#[command(version)]
#[command(group(
    ArgGroup::new("identifier")
        .required(true)
        .multiple(false)
        .args(["asin", "barcode"])
))]
pub struct Cli {
    /// Amazon ASIN identifier
    #[arg(long)]
    pub asin: Option<String>,

    /// Product barcode (JAN/EAN)
    #[arg(long)]
    pub barcode: Option<String>,

    /// Acquisition cost in the marketplace currency
    #[arg(long, value_parser = parse_decimal)]
    pub purchase_cost: Decimal,

    /// Override inbound shipping cost per unit
    #[arg(long, value_parser = parse_decimal)]
    pub inbound_shipping: Option<Decimal>,

    /// Override packaging material cost per unit
    #[arg(long, value_parser = parse_decimal)]
    pub packaging: Option<Decimal>,

    /// Override monthly storage fee per unit
    #[arg(long, value_parser = parse_decimal)]
    pub storage_fee: Option<Decimal>,

    /// Additional taxes per unit
    #[arg(long, value_parser = parse_decimal)]
    pub taxes: Option<Decimal>,

    /// Override selling price
    #[arg(long, value_parser = parse_decimal)]
    pub target_price: Option<Decimal>,

    /// Override FX spread in basis points
    #[arg(long)]
    pub fx_spread_bp: Option<u32>,

    /// Override expected return rate (e.g. 0.05)
    #[arg(long, value_parser = parse_decimal)]
    pub return_rate: Option<Decimal>,

    /// Environment override (matches config/env/<env>.yml)
    #[arg(long)]
    pub env: Option<String>,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Send a Slack notification when thresholds pass
    #[arg(long)]
    pub notify_slack: bool,

    /// Send a LINE notification when thresholds pass
    #[arg(long)]
    pub notify_line: bool,

    /// Resolve data without triggering notifications or side effects
    #[arg(long)]
    pub dry_run: bool,

    /// Optional path to write the decision JSON artifact
    #[arg(long)]
    pub decision_path: Option<PathBuf>,

    /// Log verbosity
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,
}

fn parse_decimal(value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value).map_err(|e| format!("invalid decimal value '{value}': {e}"))
}

/// Initialize tracing from the CLI log level and configured format.
pub fn init_logging(level: &str, json_logs: bool) -> SedoriResult<()> {
    let level = match level.to_uppercase().as_str() {
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        other => {
            return Err(SedoriError::Config(format!("invalid log level: {other}")));
        }
    };

    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::filter::LevelFilter::from_level(level),
    );

    if json_logs {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    Ok(())
}

/// Resolve configuration, build the clients and run one decision.
pub async fn run(cli: Cli) -> SedoriResult<Value> {
    let settings = Arc::new(Settings::load(cli.env.as_deref())?);
    init_logging(&cli.log_level, settings.observability.json_logs)?;

    let pipeline = build_pipeline(Arc::clone(&settings))?;
    let request = RunRequest {
        query: ProductQuery::new(cli.asin, cli.barcode)?,
        purchase_cost: cli.purchase_cost,
        inbound_shipping: cli.inbound_shipping,
        packaging: cli.packaging,
        storage_fee: cli.storage_fee,
        taxes: cli.taxes,
        target_price: cli.target_price,
        fx_spread_bp: cli.fx_spread_bp,
        return_rate: cli.return_rate,
        notify_slack: cli.notify_slack,
        notify_line: cli.notify_line,
        dry_run: cli.dry_run,
        decision_path: cli.decision_path,
        request_id: Uuid::new_v4().to_string(),
    };

    pipeline.run(request).await
}
