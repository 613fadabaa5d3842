//! Inventory Scanner
//!
//! Runs one validated inventory end to end: picks the mode, finds the
//! accounts, drives the scheduler and hands back a [`ScanReport`].

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::aggregator::ResultAggregator;
use super::credentials::{CredentialBroker, RoleAssumer};
use super::dispatcher::{CallDispatcher, OperationRegistry};
use super::retry::RetryPolicy;
use super::scheduler::ScanScheduler;
use super::sources::OrganizationAccounts;
use super::targets::{RegionResolver, TargetEnumerator};
use super::types::{AccountRef, ScanReport, ScanSummary};
use crate::aws::{AwsCredentials, CallerIdentity};
use crate::config::{CredentialSelector, Inventory, ScanSettings};

/// Scans inventories with one registry and one set of tunables
pub struct InventoryScanner {
    registry: Arc<OperationRegistry>,
    assumer: Arc<dyn RoleAssumer>,
    settings: ScanSettings,
    cancel: CancellationToken,
}

impl InventoryScanner {
    pub fn new(
        registry: Arc<OperationRegistry>,
        assumer: Arc<dyn RoleAssumer>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            registry,
            assumer,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop starting new work once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.settings.max_retries,
            self.settings.retry_base_delay,
            self.settings.retry_max_delay,
        )
    }

    /// Scan one inventory.
    ///
    /// `credentials` are the ambient (or management) credentials that
    /// passed the preflight and `caller` is their identity. Fails only when
    /// the organization's accounts cannot be listed; everything else is
    /// recorded in the report.
    pub async fn scan(
        &self,
        inventory: &Inventory,
        credentials: AwsCredentials,
        caller: &CallerIdentity,
    ) -> Result<ScanReport> {
        let scan_id = Uuid::new_v4();
        let started_at = Utc::now();
        let retry = self.retry_policy();
        let dispatcher = CallDispatcher::new(self.registry.clone(), self.settings.call_timeout);

        info!(
            scan_id = %scan_id,
            inventory = %inventory.name,
            sheets = inventory.sheets.len(),
            "Starting inventory scan"
        );

        let (accounts, broker, aggregator) = match &inventory.credentials {
            CredentialSelector::Organization { role_name, .. } => {
                let accounts = OrganizationAccounts::new(
                    dispatcher.clone(),
                    retry,
                    self.settings.default_region.clone(),
                )
                .list(&credentials)
                .await
                .with_context(|| {
                    format!("Failed to list organization accounts for inventory '{}'", inventory.name)
                })?;

                if accounts.is_empty() {
                    warn!(inventory = %inventory.name, "Organization has no active accounts");
                }

                let broker = CredentialBroker::delegated(
                    credentials,
                    role_name.clone(),
                    self.settings.session_duration,
                    self.assumer.clone(),
                )
                .with_retry(retry);
                (accounts, broker, ResultAggregator::organization())
            }
            CredentialSelector::Profile { .. } => {
                info!(account_id = %caller.account, "Scanning single account");
                let account = AccountRef::new(&caller.account, &caller.account);
                (
                    vec![account],
                    CredentialBroker::ambient(credentials),
                    ResultAggregator::single_account(&caller.account),
                )
            }
        };

        let aggregator = Arc::new(aggregator);
        let resolver = RegionResolver::new(
            inventory.regions.clone(),
            self.settings.default_region.clone(),
            dispatcher.clone(),
        );
        let enumerator = TargetEnumerator::new(inventory.sheets.clone());

        ScanScheduler::new(dispatcher, broker, resolver, enumerator)
            .with_retry(retry)
            .with_limits(self.settings.limits())
            .with_cancellation(self.cancel.clone())
            .run(accounts, aggregator.clone())
            .await;

        let result = aggregator.snapshot().await;
        let summary = ScanSummary::from_result(&result);
        let finished_at = Utc::now();

        info!(
            scan_id = %scan_id,
            inventory = %inventory.name,
            status = %summary.status,
            total = summary.total_targets,
            succeeded = summary.succeeded,
            failed = summary.failed,
            accounts_failed = summary.accounts_failed,
            "Inventory scan finished in {}s",
            (finished_at - started_at).num_seconds()
        );

        Ok(ScanReport {
            scan_id,
            inventory_name: inventory.name.clone(),
            started_at,
            finished_at,
            result,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CallError, CredentialError, ErrorKind};
    use crate::scan::dispatcher::{InvokeRequest, Invoker};
    use crate::scan::types::{RunStatus, ScanResult, Sheet};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct ListAccounts(Result<Value, CallError>);

    #[async_trait]
    impl Invoker for ListAccounts {
        async fn invoke(&self, _request: InvokeRequest<'_>) -> Result<Value, CallError> {
            self.0.clone()
        }
    }

    /// Describes the VPCs of whichever account the credentials belong to
    struct DescribeVpcs;

    #[async_trait]
    impl Invoker for DescribeVpcs {
        async fn invoke(&self, request: InvokeRequest<'_>) -> Result<Value, CallError> {
            if request.credentials.access_key_id.contains("333333333333") {
                return Err(CallError::permission_denied("UnauthorizedOperation"));
            }
            Ok(json!({
                "Vpcs": [{"VpcId": "vpc-1", "Region": request.region}],
                "ResponseMetadata": {"RequestId": "abc"}
            }))
        }
    }

    struct Assumer;

    #[async_trait]
    impl RoleAssumer for Assumer {
        async fn assume_role(
            &self,
            _management: &AwsCredentials,
            role_arn: &str,
            _session_name: &str,
            _duration: Duration,
        ) -> Result<AwsCredentials, CredentialError> {
            if role_arn.contains("222222222222") {
                return Err(CredentialError::RoleNotAssumable {
                    role_arn: role_arn.to_string(),
                    message: "AccessDenied".to_string(),
                });
            }
            Ok(AwsCredentials::new(format!("ASIA{}", role_arn), "secret"))
        }
    }

    fn accounts_page() -> Value {
        json!({
            "Accounts": [
                {"Id": "111111111111", "Name": "prod", "Status": "ACTIVE"},
                {"Id": "222222222222", "Name": "locked", "Status": "ACTIVE"},
                {"Id": "333333333333", "Name": "sandbox", "Status": "ACTIVE"}
            ],
            "ResponseMetadata": {}
        })
    }

    fn scanner(list_accounts: Result<Value, CallError>) -> InventoryScanner {
        let mut registry = OperationRegistry::new();
        registry
            .register("organizations", "list_accounts", Arc::new(ListAccounts(list_accounts)))
            .unwrap();
        registry
            .register("ec2", "describe_vpcs", Arc::new(DescribeVpcs))
            .unwrap();

        let settings = ScanSettings {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(2),
            ..ScanSettings::default()
        };
        InventoryScanner::new(Arc::new(registry), Arc::new(Assumer), settings)
    }

    fn inventory(credentials: CredentialSelector) -> Inventory {
        Inventory {
            name: "prod".to_string(),
            credentials,
            regions: vec!["us-east-1".to_string(), "eu-west-1".to_string()],
            sheets: vec![Sheet {
                name: "vpcs".to_string(),
                service: "ec2".to_string(),
                operation: "describe_vpcs".to_string(),
                result_selector: Some(crate::scan::selector::ResultSelector::parse("Vpcs").unwrap()),
                parameters: None,
            }],
        }
    }

    fn caller() -> CallerIdentity {
        CallerIdentity {
            account: "999999999999".to_string(),
            arn: "arn:aws:iam::999999999999:user/auditor".to_string(),
            user_id: "AIDAEXAMPLE".to_string(),
        }
    }

    fn organization() -> CredentialSelector {
        CredentialSelector::Organization {
            profile: None,
            role_name: "Audit".to_string(),
        }
    }

    #[tokio::test]
    async fn test_organization_scan() {
        let report = scanner(Ok(accounts_page()))
            .scan(&inventory(organization()), AwsCredentials::new("AKID", "secret"), &caller())
            .await
            .unwrap();

        assert_eq!(report.inventory_name, "prod");
        assert!(report.finished_at >= report.started_at);

        let summary = &report.summary;
        assert_eq!(summary.accounts_total, 3);
        assert_eq!(summary.accounts_failed, 1);
        assert_eq!(summary.total_targets, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failures_by_kind.get(&ErrorKind::PermissionDenied), Some(&2));
        assert_eq!(summary.status, RunStatus::Partial);

        match &report.result {
            ScanResult::Organization { accounts } => {
                let prod = accounts.iter().find(|a| a.account_id == "111111111111").unwrap();
                assert_eq!(prod.account_name, "prod");
                let outcome = prod.outcomes().next().unwrap();
                assert_eq!(outcome.raw_result.as_ref().unwrap()[0]["VpcId"], "vpc-1");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_account_scan_uses_caller_identity() {
        let selector = CredentialSelector::Profile { profile: None };
        let report = scanner(Err(CallError::unexpected("not used")))
            .scan(&inventory(selector), AwsCredentials::new("AKID", "secret"), &caller())
            .await
            .unwrap();

        assert_eq!(report.summary.status, RunStatus::Complete);
        match report.result {
            ScanResult::SingleAccount { account_id, regions } => {
                assert_eq!(account_id, "999999999999");
                assert_eq!(regions.len(), 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_account_listing_failure_is_an_error() {
        let err = scanner(Err(CallError::permission_denied("AWSOrganizationsNotInUseException")))
            .scan(&inventory(organization()), AwsCredentials::new("AKID", "secret"), &caller())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to list organization accounts"));
    }

    #[tokio::test]
    async fn test_empty_organization() {
        let report = scanner(Ok(json!({"Accounts": [], "ResponseMetadata": {}})))
            .scan(&inventory(organization()), AwsCredentials::new("AKID", "secret"), &caller())
            .await
            .unwrap();
        assert_eq!(report.summary.status, RunStatus::Empty);
        assert_eq!(report.summary.total_targets, 0);
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_complete_but_failed() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = scanner(Ok(accounts_page()))
            .with_cancellation(cancel)
            .scan(
                &inventory(CredentialSelector::Profile { profile: None }),
                AwsCredentials::new("AKID", "secret"),
                &caller(),
            )
            .await
            .unwrap();

        assert_eq!(report.summary.total_targets, 2);
        assert_eq!(report.summary.failures_by_kind.get(&ErrorKind::Cancelled), Some(&2));
        assert_eq!(report.summary.status, RunStatus::Failed);
    }
}
