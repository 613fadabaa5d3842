//! Lornu Inventory CLI
//!
//! Loads inventory definitions, verifies credentials, scans every
//! inventory and writes the results as JSON and/or an Excel workbook.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lornu_inventory::aws::{resolve_ambient, AwsCredentials, AwsHttpClient, CallerIdentity, StsClient};
use lornu_inventory::config::{self, Inventory, ScanSettings};
use lornu_inventory::scan::{InventoryScanner, OperationRegistry, RunStatus, ScanReport};
use lornu_inventory::{OutputFormat, OutputWriter};

/// Exit code for configuration and preflight failures
const EXIT_SETUP_FAILED: u8 = 1;
/// Exit code when a scan produced no successful call
const EXIT_SCAN_FAILED: u8 = 2;

/// Inventory AWS resources across accounts and regions
#[derive(Parser, Debug)]
#[command(name = "inventory", version, about)]
struct Args {
    /// Inventory configuration file (YAML or JSON)
    #[arg(short, long, env = "INVENTORY_CONFIG")]
    config: PathBuf,

    /// Directory scan results are written to
    #[arg(short, long, default_value = "output", env = "INVENTORY_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json, env = "INVENTORY_FORMAT")]
    format: OutputFormat,

    /// Attempts per call, including the first
    #[arg(long, default_value_t = 3, env = "INVENTORY_MAX_RETRIES")]
    max_retries: u32,

    /// Base retry backoff in seconds
    #[arg(long, default_value_t = 2, env = "INVENTORY_RETRY_DELAY")]
    retry_delay: u64,

    /// Accounts scanned concurrently
    #[arg(long, env = "INVENTORY_MAX_ACCOUNTS")]
    max_accounts: Option<usize>,

    /// Regions scanned concurrently within one account
    #[arg(long, env = "INVENTORY_MAX_REGIONS")]
    max_regions: Option<usize>,

    /// Calls in flight concurrently within one region
    #[arg(long, env = "INVENTORY_MAX_SERVICES")]
    max_services: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long, default_value_t = 60, env = "INVENTORY_CALL_TIMEOUT")]
    call_timeout: u64,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info", env = "INVENTORY_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "INVENTORY_JSON_LOGS")]
    json_logs: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    validate_only: bool,

    /// Treat partially failed scans as failures
    #[arg(long)]
    strict: bool,
}

impl Args {
    fn settings(&self) -> ScanSettings {
        let defaults = ScanSettings::default();
        ScanSettings {
            max_retries: self.max_retries.max(1),
            retry_base_delay: Duration::from_secs(self.retry_delay),
            call_timeout: Duration::from_secs(self.call_timeout.max(1)),
            max_concurrent_accounts: self.max_accounts.unwrap_or(defaults.max_concurrent_accounts),
            max_concurrent_regions: self.max_regions.unwrap_or(defaults.max_concurrent_regions),
            max_concurrent_services: self.max_services.unwrap_or(defaults.max_concurrent_services),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_SETUP_FAILED)
        }
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: Args) -> Result<u8> {
    let settings = args.settings();
    let client = AwsHttpClient::new(settings.call_timeout)?;
    let registry = Arc::new(OperationRegistry::with_aws_catalog(&client)?);

    info!(config = %args.config.display(), operations = registry.len(), "Loading configuration");
    let inventories = match config::load(&args.config).and_then(|file| file.validate(&registry)) {
        Ok(inventories) => inventories,
        Err(e) => {
            for message in e.messages() {
                error!("{}", message);
            }
            return Ok(EXIT_SETUP_FAILED);
        }
    };

    if args.validate_only {
        println!(
            "Configuration is valid: {} inventories, {} sheets",
            inventories.len(),
            inventories.iter().map(|i| i.sheets.len()).sum::<usize>()
        );
        return Ok(0);
    }

    let sts = Arc::new(StsClient::new(client, settings.default_region.clone()));

    let mut sessions = Vec::with_capacity(inventories.len());
    for inventory in &inventories {
        match preflight(&sts, inventory).await {
            Ok(session) => sessions.push(session),
            Err(e) => {
                error!(inventory = %inventory.name, "Credential preflight failed: {:#}", e);
                return Ok(EXIT_SETUP_FAILED);
            }
        }
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight calls");
                cancel.cancel();
            }
        }
    });

    let scanner = InventoryScanner::new(registry, sts, settings).with_cancellation(cancel);
    let writer = OutputWriter::new(&args.output_dir).with_format(args.format);

    let mut statuses = Vec::with_capacity(inventories.len());
    let mut setup_failed = false;
    for (inventory, (credentials, caller)) in inventories.iter().zip(sessions) {
        let report = match scanner.scan(inventory, credentials, &caller).await {
            Ok(report) => report,
            Err(e) => {
                error!(inventory = %inventory.name, "{:#}", e);
                setup_failed = true;
                continue;
            }
        };

        let scan_dir = writer
            .write(&report)
            .await
            .with_context(|| format!("Failed to write results of inventory '{}'", inventory.name))?;
        print_summary(&report, &scan_dir);
        statuses.push(report.summary.status);
    }

    let code = exit_code(&statuses, args.strict);
    if setup_failed && code == 0 {
        return Ok(EXIT_SETUP_FAILED);
    }
    Ok(code)
}

/// Resolve and verify the ambient credentials of an inventory
async fn preflight(sts: &StsClient, inventory: &Inventory) -> Result<(AwsCredentials, CallerIdentity)> {
    let credentials = resolve_ambient(sts, inventory.credentials.profile())
        .await
        .context("Failed to resolve AWS credentials")?;
    let caller = sts
        .caller_identity(&credentials)
        .await
        .context("GetCallerIdentity failed")?;

    info!(
        inventory = %inventory.name,
        account_id = %caller.account,
        arn = %caller.arn,
        "Credentials verified"
    );
    Ok((credentials, caller))
}

fn print_summary(report: &ScanReport, scan_dir: &std::path::Path) {
    let summary = &report.summary;
    println!("Inventory '{}': {}", report.inventory_name, summary.status);
    println!(
        "  targets:  {} ({} succeeded, {} failed)",
        summary.total_targets, summary.succeeded, summary.failed
    );
    if summary.accounts_total > 1 || summary.accounts_failed > 0 {
        println!(
            "  accounts: {} ({} skipped)",
            summary.accounts_total, summary.accounts_failed
        );
    }
    for (kind, count) in &summary.failures_by_kind {
        println!("  {}: {}", kind, count);
    }
    println!("  output:   {}", scan_dir.display());
}

/// Worst outcome over every scanned inventory
fn exit_code(statuses: &[RunStatus], strict: bool) -> u8 {
    if statuses.contains(&RunStatus::Failed) {
        EXIT_SCAN_FAILED
    } else if strict && statuses.contains(&RunStatus::Partial) {
        EXIT_SETUP_FAILED
    } else {
        0
    }
}
