//! Scan Types
//!
//! Targets, call outcomes and the hierarchical result tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::selector::ResultSelector;
use crate::error::{CallError, ErrorKind};

/// API call parameters in declaration order
pub type Parameters = Map<String, Value>;

/// An account to scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AccountRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
        }
    }
}

/// One sheet of an inventory: a single read-only operation to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub service: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<ResultSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

/// One fully-resolved (account, region, sheet) call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub account_id: String,
    pub account_name: String,
    pub region: String,
    pub service: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<ResultSelector>,
    pub sheet_name: String,
    pub display_name: String,
}

impl ScanTarget {
    pub fn new(account: &AccountRef, region: &str, sheet: &Sheet) -> Self {
        Self {
            account_id: account.id.clone(),
            account_name: account.name.clone(),
            region: region.to_string(),
            service: sheet.service.clone(),
            operation: sheet.operation.clone(),
            parameters: sheet.parameters.clone(),
            result_selector: sheet.result_selector.clone(),
            sheet_name: sheet.name.clone(),
            display_name: format!(
                "{}/{}/{}.{}",
                account.id, region, sheet.service, sheet.operation
            ),
        }
    }
}

/// The recorded result of one target.
///
/// A failed outcome always carries an `error_kind` and never a result; a
/// successful one never carries an `error_kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub target: ScanTarget,
    pub raw_result: Option<Value>,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub attempts: u32,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl CallOutcome {
    pub fn succeeded(target: ScanTarget, raw_result: Value, attempts: u32, duration: Duration) -> Self {
        Self {
            target,
            raw_result: Some(raw_result),
            success: true,
            error_kind: None,
            error_message: None,
            attempts,
            duration,
        }
    }

    pub fn failed(target: ScanTarget, error: CallError, attempts: u32, duration: Duration) -> Self {
        Self {
            target,
            raw_result: None,
            success: false,
            error_kind: Some(error.kind),
            error_message: Some(error.message),
            attempts,
            duration,
        }
    }

    /// Outcome for a target that never started because the scan was cancelled
    pub fn cancelled(target: ScanTarget) -> Self {
        Self::failed(
            target,
            CallError::new(ErrorKind::Cancelled, "Scan cancelled before the call started"),
            0,
            Duration::ZERO,
        )
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Outcomes for one account and region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionAggregate {
    pub region: String,
    pub outcomes: Vec<CallOutcome>,
}

/// All regions scanned for one account.
///
/// `success = false` with no regions means the account was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountAggregate {
    pub account_id: String,
    pub account_name: String,
    pub regions: Vec<RegionAggregate>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AccountAggregate {
    /// An account that could not be scanned at all
    pub fn skipped(account: &AccountRef, error: impl Into<String>) -> Self {
        Self {
            account_id: account.id.clone(),
            account_name: account.name.clone(),
            regions: Vec::new(),
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &CallOutcome> {
        self.regions.iter().flat_map(|r| r.outcomes.iter())
    }
}

/// Top-level scan result, tagged by mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScanResult {
    Organization {
        accounts: Vec<AccountAggregate>,
    },
    SingleAccount {
        account_id: String,
        regions: Vec<RegionAggregate>,
    },
}

impl ScanResult {
    /// Every recorded outcome in the tree
    pub fn outcomes(&self) -> Box<dyn Iterator<Item = &CallOutcome> + '_> {
        match self {
            ScanResult::Organization { accounts } => {
                Box::new(accounts.iter().flat_map(|a| a.outcomes()))
            }
            ScanResult::SingleAccount { regions, .. } => {
                Box::new(regions.iter().flat_map(|r| r.outcomes.iter()))
            }
        }
    }
}

/// Overall verdict of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every target succeeded
    Complete,
    /// Some targets or accounts failed, at least one target succeeded
    Partial,
    /// Work was attempted and nothing succeeded
    Failed,
    /// Nothing was enumerated
    Empty,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Empty => write!(f, "empty"),
        }
    }
}

/// Counts for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_targets: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
    pub accounts_total: usize,
    pub accounts_failed: usize,
    pub status: RunStatus,
}

impl ScanSummary {
    /// Build the summary view of a finished result
    pub fn from_result(result: &ScanResult) -> Self {
        let mut total_targets = 0;
        let mut succeeded = 0;
        let mut failures_by_kind = BTreeMap::new();

        for outcome in result.outcomes() {
            total_targets += 1;
            if outcome.success {
                succeeded += 1;
            } else if let Some(kind) = outcome.error_kind {
                *failures_by_kind.entry(kind).or_insert(0) += 1;
            }
        }

        let (accounts_total, accounts_failed) = match result {
            ScanResult::Organization { accounts } => (
                accounts.len(),
                accounts.iter().filter(|a| !a.success).count(),
            ),
            ScanResult::SingleAccount { .. } => (1, 0),
        };

        let failed = total_targets - succeeded;
        let status = if total_targets == 0 && accounts_failed == 0 {
            RunStatus::Empty
        } else if succeeded == 0 {
            RunStatus::Failed
        } else if failed == 0 && accounts_failed == 0 {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        };

        Self {
            total_targets,
            succeeded,
            failed,
            failures_by_kind,
            accounts_total,
            accounts_failed,
            status,
        }
    }
}

/// A finished scan of one inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub inventory_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub result: ScanResult,
    pub summary: ScanSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target(region: &str) -> ScanTarget {
        let sheet = Sheet {
            name: "instances".to_string(),
            service: "ec2".to_string(),
            operation: "describe_instances".to_string(),
            result_selector: None,
            parameters: None,
        };
        ScanTarget::new(&AccountRef::new("111111111111", "prod"), region, &sheet)
    }

    #[test]
    fn test_target_display_name() {
        assert_eq!(
            target("us-east-1").display_name,
            "111111111111/us-east-1/ec2.describe_instances"
        );
    }

    #[test]
    fn test_outcome_invariants() {
        let ok = CallOutcome::succeeded(target("us-east-1"), json!([]), 1, Duration::from_millis(5));
        assert!(ok.success && ok.error_kind.is_none() && ok.raw_result.is_some());

        let failed = CallOutcome::failed(
            target("us-east-1"),
            CallError::permission_denied("AccessDenied"),
            1,
            Duration::ZERO,
        );
        assert!(!failed.success);
        assert_eq!(failed.error_kind, Some(ErrorKind::PermissionDenied));
        assert!(failed.raw_result.is_none());

        let cancelled = CallOutcome::cancelled(target("us-east-1"));
        assert_eq!(cancelled.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(cancelled.attempts, 0);
    }

    #[test]
    fn test_outcome_serializes_duration_ms() {
        let ok = CallOutcome::succeeded(target("eu-west-1"), json!({}), 2, Duration::from_millis(1500));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["duration_ms"], 1500);
        assert_eq!(value["attempts"], 2);
    }

    #[test]
    fn test_summary_statuses() {
        let ok = CallOutcome::succeeded(target("us-east-1"), json!([]), 1, Duration::ZERO);
        let bad = CallOutcome::failed(target("us-west-2"), CallError::throttling("slow"), 3, Duration::ZERO);

        let single = |outcomes: Vec<CallOutcome>| ScanResult::SingleAccount {
            account_id: "111111111111".to_string(),
            regions: vec![RegionAggregate {
                region: "us-east-1".to_string(),
                outcomes,
            }],
        };

        let summary = ScanSummary::from_result(&single(vec![ok.clone()]));
        assert_eq!(summary.status, RunStatus::Complete);

        let summary = ScanSummary::from_result(&single(vec![ok.clone(), bad.clone()]));
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.failures_by_kind.get(&ErrorKind::Throttling), Some(&1));

        let summary = ScanSummary::from_result(&single(vec![bad]));
        assert_eq!(summary.status, RunStatus::Failed);

        let summary = ScanSummary::from_result(&single(Vec::new()));
        assert_eq!(summary.status, RunStatus::Empty);

        let org = ScanResult::Organization {
            accounts: vec![AccountAggregate::skipped(
                &AccountRef::new("222222222222", "dev"),
                "role missing",
            )],
        };
        let summary = ScanSummary::from_result(&org);
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.accounts_failed, 1);
    }

    #[test]
    fn test_scan_result_is_tagged() {
        let result = ScanResult::Organization { accounts: Vec::new() };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["mode"], "organization");
        assert!(value.get("regions").is_none());
    }
}
