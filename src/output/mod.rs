//! Output Sinks
//!
//! Writes a finished [`ScanReport`] to disk:
//!
//! ```text
//! {output_dir}/{inventory}-{timestamp}/
//!     {account_id}/{region}/{service}-{operation}.json   (json)
//!     accounts.json      (json, organization mode)
//!     scan.json          (json)
//!     {inventory}.xlsx   (excel)
//!     summary.json
//! ```

pub mod excel;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::scan::types::{CallOutcome, RegionAggregate, ScanReport, ScanResult};

/// Which files a scan produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Per-call JSON files plus the full report
    #[default]
    Json,
    /// One workbook with a worksheet per sheet
    Excel,
    /// Both of the above
    Both,
}

impl OutputFormat {
    pub fn json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }

    pub fn excel(self) -> bool {
        matches!(self, OutputFormat::Excel | OutputFormat::Both)
    }
}

/// Writes scan reports into a timestamped directory per inventory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    output_dir: PathBuf,
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: OutputFormat::default(),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Directory a report is written to
    pub fn scan_dir(&self, report: &ScanReport) -> PathBuf {
        let timestamp = report.started_at.format("%Y%m%dT%H%M%SZ");
        self.output_dir
            .join(format!("{}-{}", path_component(&report.inventory_name), timestamp))
    }

    /// Write every file of a report, returning the scan directory
    pub async fn write(&self, report: &ScanReport) -> Result<PathBuf> {
        let scan_dir = self.scan_dir(report);
        tokio::fs::create_dir_all(&scan_dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", scan_dir.display()))?;

        let mut written = 0;
        if self.format.json() {
            written += write_json_files(&scan_dir, report).await?;
        }
        if self.format.excel() {
            let path = scan_dir.join(format!("{}.xlsx", path_component(&report.inventory_name)));
            let worksheets = excel::write_workbook(path, report).await?;
            debug!(worksheets, "Wrote workbook");
            written += 1;
        }

        let summary = json!({
            "scan_id": report.scan_id,
            "inventory_name": report.inventory_name,
            "started_at": report.started_at,
            "finished_at": report.finished_at,
            "summary": report.summary,
        });
        write_json(&scan_dir.join("summary.json"), &summary).await?;

        info!(
            inventory = %report.inventory_name,
            files = written,
            "Wrote scan output to {}",
            scan_dir.display()
        );
        Ok(scan_dir)
    }
}

/// Per-call files, the account index and the full report
async fn write_json_files(scan_dir: &Path, report: &ScanReport) -> Result<usize> {
    let mut written = 0;
    match &report.result {
        ScanResult::Organization { accounts } => {
            for account in accounts {
                let account_dir = scan_dir.join(path_component(&account.account_id));
                written += write_regions(&account_dir, &account.regions).await?;
            }

            let index: Vec<_> = accounts
                .iter()
                .map(|a| {
                    json!({
                        "account_id": a.account_id,
                        "account_name": a.account_name,
                        "success": a.success,
                        "error": a.error,
                        "regions": a.regions.iter().map(|r| &r.region).collect::<Vec<_>>(),
                    })
                })
                .collect();
            write_json(&scan_dir.join("accounts.json"), &index).await?;
        }
        ScanResult::SingleAccount { account_id, regions } => {
            let account_dir = scan_dir.join(path_component(account_id));
            written += write_regions(&account_dir, regions).await?;
        }
    }

    write_json(&scan_dir.join("scan.json"), report).await?;
    Ok(written)
}

/// One file per successful outcome, returning how many were written
async fn write_regions(account_dir: &Path, regions: &[RegionAggregate]) -> Result<usize> {
    let mut written = 0;
    for region in regions {
        let region_dir = account_dir.join(path_component(&region.region));
        let written_outcomes: Vec<_> = region
            .outcomes
            .iter()
            .filter(|o| o.success)
            .filter_map(|o| o.raw_result.as_ref().map(|result| (o, result)))
            .collect();

        let mut per_operation: HashMap<String, usize> = HashMap::new();
        for (outcome, _) in &written_outcomes {
            *per_operation.entry(base_name(outcome)).or_insert(0) += 1;
        }

        let mut created = false;
        for (outcome, result) in written_outcomes {
            let name = file_name(outcome, &per_operation);
            if !created {
                tokio::fs::create_dir_all(&region_dir)
                    .await
                    .with_context(|| format!("Failed to create {}", region_dir.display()))?;
                created = true;
            }
            write_json(&region_dir.join(name), result).await?;
            written += 1;
        }
    }
    Ok(written)
}

fn base_name(outcome: &CallOutcome) -> String {
    format!("{}-{}", outcome.target.service, outcome.target.operation)
}

/// `{service}-{operation}.json`. When several sheets in a region call the
/// same operation, each of their files carries its sheet name.
fn file_name(outcome: &CallOutcome, per_operation: &HashMap<String, usize>) -> String {
    let base = base_name(outcome);
    if per_operation.get(&base).copied().unwrap_or(0) > 1 {
        format!("{}-{}.json", base, path_component(&outcome.target.sheet_name))
    } else {
        format!("{}.json", base)
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Keep names usable as a single path component
pub(crate) fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
