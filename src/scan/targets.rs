//! Target Enumeration
//!
//! Expands an inventory's sheets over resolved accounts and regions. Sheet
//! name collisions are rejected when the config is loaded, so enumeration
//! never deduplicates.

use serde_json::Value;
use tracing::{info, warn};

use super::dispatcher::CallDispatcher;
use super::selector::ResultSelector;
use super::types::{AccountRef, ScanTarget, Sheet};
use crate::aws::AwsCredentials;

/// Region opt-in states that can be scanned
const SCANNABLE_OPT_IN: &[&str] = &["opt-in-not-required", "opted-in"];

/// Builds the accounts × regions × sheets cross-product
#[derive(Debug, Clone)]
pub struct TargetEnumerator {
    sheets: Vec<Sheet>,
}

impl TargetEnumerator {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    /// Targets for one account, region-major in declaration order
    pub fn targets_for(&self, account: &AccountRef, regions: &[String]) -> Vec<ScanTarget> {
        regions
            .iter()
            .flat_map(|region| {
                self.sheets
                    .iter()
                    .map(move |sheet| ScanTarget::new(account, region, sheet))
            })
            .collect()
    }

    /// Targets for one account and region
    pub fn targets_in(&self, account: &AccountRef, region: &str) -> Vec<ScanTarget> {
        self.sheets
            .iter()
            .map(|sheet| ScanTarget::new(account, region, sheet))
            .collect()
    }

    /// The full cross-product for every account
    pub fn enumerate(&self, accounts: &[AccountRef], regions: &[String]) -> Vec<ScanTarget> {
        accounts
            .iter()
            .flat_map(|account| self.targets_for(account, regions))
            .collect()
    }
}

/// Decides which regions an account is scanned in
#[derive(Clone)]
pub struct RegionResolver {
    explicit: Vec<String>,
    default_region: String,
    dispatcher: CallDispatcher,
}

impl RegionResolver {
    pub fn new(explicit: Vec<String>, default_region: impl Into<String>, dispatcher: CallDispatcher) -> Self {
        Self {
            explicit,
            default_region: default_region.into(),
            dispatcher,
        }
    }

    /// Regions fixed by configuration, empty when discovered
    pub fn explicit(&self) -> &[String] {
        &self.explicit
    }

    /// Explicit regions win. Otherwise regions are discovered with the
    /// account's credentials; a failed discovery falls back to the default
    /// region, an empty one yields no regions.
    pub async fn resolve(&self, account: &AccountRef, credentials: &AwsCredentials) -> Vec<String> {
        if !self.explicit.is_empty() {
            return self.explicit.clone();
        }

        let selector = ResultSelector::Field("Regions".to_string());
        let discovered = self
            .dispatcher
            .call(
                credentials,
                "ec2",
                "describe_regions",
                &self.default_region,
                None,
                Some(&selector),
            )
            .await;

        match discovered {
            Ok(regions) => {
                let regions = scannable_regions(&regions);
                if regions.is_empty() {
                    warn!(account_id = %account.id, "Region discovery returned no scannable regions");
                } else {
                    info!(account_id = %account.id, "Discovered {} regions", regions.len());
                }
                regions
            }
            Err(e) => {
                warn!(
                    account_id = %account.id,
                    "Region discovery failed, using {}: {}",
                    self.default_region, e
                );
                vec![self.default_region.clone()]
            }
        }
    }
}

/// Region names from a DescribeRegions result that are enabled
pub fn scannable_regions(regions: &Value) -> Vec<String> {
    let Some(regions) = regions.as_array() else {
        return Vec::new();
    };

    regions
        .iter()
        .filter(|r| {
            r.get("OptInStatus")
                .and_then(Value::as_str)
                .map(|status| SCANNABLE_OPT_IN.contains(&status))
                .unwrap_or(false)
        })
        .filter_map(|r| r.get("RegionName").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::scan::dispatcher::{InvokeRequest, Invoker, OperationRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn sheet(name: &str, service: &str, operation: &str) -> Sheet {
        Sheet {
            name: name.to_string(),
            service: service.to_string(),
            operation: operation.to_string(),
            result_selector: None,
            parameters: None,
        }
    }

    fn regions(names: &[&str]) -> Vec<String> {
        names.iter().map(|r| r.to_string()).collect()
    }

    struct DescribeRegions(Result<Value, CallError>);

    #[async_trait]
    impl Invoker for DescribeRegions {
        async fn invoke(&self, _request: InvokeRequest<'_>) -> Result<Value, CallError> {
            self.0.clone()
        }
    }

    fn resolver(explicit: Vec<String>, response: Result<Value, CallError>) -> RegionResolver {
        let mut registry = OperationRegistry::new();
        registry
            .register("ec2", "describe_regions", Arc::new(DescribeRegions(response)))
            .unwrap();
        let dispatcher = CallDispatcher::new(Arc::new(registry), Duration::from_secs(1));
        RegionResolver::new(explicit, "us-east-1", dispatcher)
    }

    #[test]
    fn test_cross_product_size() {
        let enumerator = TargetEnumerator::new(vec![
            sheet("instances", "ec2", "describe_instances"),
            sheet("users", "iam", "list_users"),
            sheet("buckets", "s3", "list_buckets"),
        ]);
        let accounts = vec![
            AccountRef::new("111111111111", "prod"),
            AccountRef::new("222222222222", "dev"),
        ];

        let targets = enumerator.enumerate(&accounts, &regions(&["us-east-1", "eu-west-1"]));
        assert_eq!(targets.len(), 2 * 2 * 3);
        assert_eq!(targets[0].display_name, "111111111111/us-east-1/ec2.describe_instances");
        assert_eq!(targets[3].region, "eu-west-1");
    }

    #[test]
    fn test_duplicate_sheets_are_not_collapsed() {
        let enumerator = TargetEnumerator::new(vec![
            sheet("same", "ec2", "describe_vpcs"),
            sheet("same", "ec2", "describe_vpcs"),
        ]);
        let targets = enumerator.targets_for(&AccountRef::new("1", "a"), &regions(&["us-east-1"]));
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_no_regions_no_targets() {
        let enumerator = TargetEnumerator::new(vec![sheet("users", "iam", "list_users")]);
        assert!(enumerator
            .targets_for(&AccountRef::new("1", "a"), &[])
            .is_empty());
    }

    #[test]
    fn test_scannable_regions_filter() {
        let value = json!([
            {"RegionName": "us-east-1", "OptInStatus": "opt-in-not-required"},
            {"RegionName": "af-south-1", "OptInStatus": "not-opted-in"},
            {"RegionName": "ap-east-1", "OptInStatus": "opted-in"}
        ]);
        assert_eq!(scannable_regions(&value), regions(&["us-east-1", "ap-east-1"]));
        assert!(scannable_regions(&Value::Null).is_empty());
    }

    #[tokio::test]
    async fn test_explicit_regions_win() {
        let resolver = resolver(regions(&["eu-central-1"]), Err(CallError::unexpected("unused")));
        let creds = AwsCredentials::new("AKID", "secret");
        let resolved = resolver.resolve(&AccountRef::new("1", "a"), &creds).await;
        assert_eq!(resolved, regions(&["eu-central-1"]));
    }

    #[tokio::test]
    async fn test_discovered_regions() {
        let response = json!({
            "Regions": [
                {"RegionName": "us-east-1", "OptInStatus": "opt-in-not-required"},
                {"RegionName": "me-south-1", "OptInStatus": "not-opted-in"}
            ],
            "ResponseMetadata": {}
        });
        let resolver = resolver(Vec::new(), Ok(response));
        let creds = AwsCredentials::new("AKID", "secret");
        let resolved = resolver.resolve(&AccountRef::new("1", "a"), &creds).await;
        assert_eq!(resolved, regions(&["us-east-1"]));
    }

    #[tokio::test]
    async fn test_discovery_failure_falls_back() {
        let resolver = resolver(Vec::new(), Err(CallError::permission_denied("UnauthorizedOperation")));
        let creds = AwsCredentials::new("AKID", "secret");
        let resolved = resolver.resolve(&AccountRef::new("1", "a"), &creds).await;
        assert_eq!(resolved, regions(&["us-east-1"]));
    }
}
