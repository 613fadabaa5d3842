//! Result Aggregation
//!
//! Workers append outcomes concurrently. Every parent aggregate has its own
//! lock, so appends to one region never wait on another region.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::types::{
    AccountAggregate, AccountRef, CallOutcome, RegionAggregate, ScanResult, ScanSummary,
};

/// Collects the outcomes of one account and region
pub struct RegionCollector {
    region: String,
    outcomes: Mutex<Vec<CallOutcome>>,
}

impl RegionCollector {
    fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Append one completed outcome
    pub async fn record(&self, outcome: CallOutcome) {
        self.outcomes.lock().await.push(outcome);
    }

    /// Sheet names that already have an outcome
    pub async fn recorded_sheets(&self) -> Vec<String> {
        self.outcomes
            .lock()
            .await
            .iter()
            .map(|o| o.target.sheet_name.clone())
            .collect()
    }

    async fn snapshot(&self) -> RegionAggregate {
        RegionAggregate {
            region: self.region.clone(),
            outcomes: self.outcomes.lock().await.clone(),
        }
    }
}

/// Collects the regions of one account
pub struct AccountCollector {
    account: AccountRef,
    regions: Mutex<Vec<Arc<RegionCollector>>>,
    error: Mutex<Option<String>>,
}

impl AccountCollector {
    fn new(account: &AccountRef) -> Self {
        Self {
            account: account.clone(),
            regions: Mutex::new(Vec::new()),
            error: Mutex::new(None),
        }
    }

    pub fn account(&self) -> &AccountRef {
        &self.account
    }

    /// The collector for a region, created on first use
    pub async fn region(&self, region: &str) -> Arc<RegionCollector> {
        let mut regions = self.regions.lock().await;
        if let Some(existing) = regions.iter().find(|r| r.region == region) {
            return existing.clone();
        }
        let collector = Arc::new(RegionCollector::new(region));
        regions.push(collector.clone());
        collector
    }

    /// Mark the account as skipped
    pub async fn mark_failed(&self, error: impl Into<String>) {
        *self.error.lock().await = Some(error.into());
    }

    async fn snapshot(&self) -> AccountAggregate {
        let collectors: Vec<Arc<RegionCollector>> = self.regions.lock().await.clone();
        let mut regions = Vec::with_capacity(collectors.len());
        for collector in collectors {
            regions.push(collector.snapshot().await);
        }

        let error = self.error.lock().await.clone();
        AccountAggregate {
            account_id: self.account.id.clone(),
            account_name: self.account.name.clone(),
            // a skipped account reports no partial regions
            regions: if error.is_some() { Vec::new() } else { regions },
            success: error.is_none(),
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Organization,
    SingleAccount(String),
}

/// Folds completed work into the final [`ScanResult`]
pub struct ResultAggregator {
    mode: Mode,
    accounts: Mutex<Vec<Arc<AccountCollector>>>,
}

impl ResultAggregator {
    pub fn organization() -> Self {
        Self {
            mode: Mode::Organization,
            accounts: Mutex::new(Vec::new()),
        }
    }

    pub fn single_account(account_id: impl Into<String>) -> Self {
        Self {
            mode: Mode::SingleAccount(account_id.into()),
            accounts: Mutex::new(Vec::new()),
        }
    }

    /// The collector for an account, created on first use
    pub async fn account(&self, account: &AccountRef) -> Arc<AccountCollector> {
        let mut accounts = self.accounts.lock().await;
        if let Some(existing) = accounts.iter().find(|a| a.account.id == account.id) {
            return existing.clone();
        }
        let collector = Arc::new(AccountCollector::new(account));
        accounts.push(collector.clone());
        collector
    }

    /// Route one outcome to its account and region
    pub async fn record(&self, outcome: CallOutcome) {
        let account = AccountRef::new(&outcome.target.account_id, &outcome.target.account_name);
        let region = self.account(&account).await.region(&outcome.target.region).await;
        region.record(outcome).await;
    }

    /// Current state of the tree
    pub async fn snapshot(&self) -> ScanResult {
        let collectors: Vec<Arc<AccountCollector>> = self.accounts.lock().await.clone();
        let mut accounts = Vec::with_capacity(collectors.len());
        for collector in collectors {
            accounts.push(collector.snapshot().await);
        }

        match &self.mode {
            Mode::Organization => ScanResult::Organization { accounts },
            Mode::SingleAccount(account_id) => ScanResult::SingleAccount {
                account_id: account_id.clone(),
                regions: accounts.into_iter().flat_map(|a| a.regions).collect(),
            },
        }
    }

    /// Totals and failures grouped by kind
    pub async fn to_summary(&self) -> ScanSummary {
        ScanSummary::from_result(&self.snapshot().await)
    }

    /// Hand off the finished result
    pub async fn finish(self) -> ScanResult {
        self.snapshot().await
    }
}
