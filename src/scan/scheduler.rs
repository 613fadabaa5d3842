//! Concurrency Scheduler
//!
//! Three nested worker pools. Accounts share one pool for the whole scan;
//! each account gets its own region pool and each region its own service
//! pool, so `services` bounds the calls of one region. Every level spawns
//! its children and drains them in completion order. A worker that dies is
//! recorded as a failure of exactly the work it owned, and the children it
//! spawned are aborted with it.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::aggregator::{RegionCollector, ResultAggregator};
use super::credentials::CredentialBroker;
use super::dispatcher::CallDispatcher;
use super::retry::RetryPolicy;
use super::targets::{RegionResolver, TargetEnumerator};
use super::types::{AccountRef, CallOutcome, ScanTarget};
use crate::aws::AwsCredentials;
use crate::error::CallError;

/// Worker pool sizes per fan-out level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    /// Accounts scanned at once
    pub accounts: usize,
    /// Regions scanned at once within one account
    pub regions: usize,
    /// Calls in flight at once within one region
    pub services: usize,
}

impl ConcurrencyLimits {
    /// `min(32, parallelism * 5)` for every level
    pub fn practical() -> Self {
        let workers = default_workers();
        Self {
            accounts: workers,
            regions: workers,
            services: workers,
        }
    }
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self::practical()
    }
}

/// Default pool size: `min(32, available_parallelism * 5)`
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * 5).min(32)
}

/// A spawned worker, aborted when whoever awaits it goes away
struct Worker<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Worker<T> {
    fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }
}

impl<T> Future for Worker<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Drives a scan through the account, region and service pools
#[derive(Clone)]
pub struct ScanScheduler {
    dispatcher: CallDispatcher,
    retry: RetryPolicy,
    broker: Arc<CredentialBroker>,
    regions: RegionResolver,
    enumerator: Arc<TargetEnumerator>,
    limits: ConcurrencyLimits,
    account_permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl ScanScheduler {
    pub fn new(
        dispatcher: CallDispatcher,
        broker: CredentialBroker,
        regions: RegionResolver,
        enumerator: TargetEnumerator,
    ) -> Self {
        let limits = ConcurrencyLimits::practical();
        Self {
            dispatcher,
            retry: RetryPolicy::default(),
            broker: Arc::new(broker),
            regions,
            enumerator: Arc::new(enumerator),
            limits,
            account_permits: Arc::new(Semaphore::new(limits.accounts)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limits(mut self, limits: ConcurrencyLimits) -> Self {
        self.limits = ConcurrencyLimits {
            accounts: limits.accounts.max(1),
            regions: limits.regions.max(1),
            services: limits.services.max(1),
        };
        self.account_permits = Arc::new(Semaphore::new(self.limits.accounts));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Scan every account, recording into `aggregator`
    pub async fn run(&self, accounts: Vec<AccountRef>, aggregator: Arc<ResultAggregator>) {
        let mut workers = FuturesUnordered::new();

        for account in accounts {
            let scheduler = self.clone();
            let worker_account = account.clone();
            let worker_aggregator = aggregator.clone();
            let worker = Worker::spawn(async move {
                scheduler
                    .scan_account(worker_account, worker_aggregator)
                    .await
            });
            workers.push(async move { (account, worker.await) });
        }

        while let Some((account, joined)) = workers.next().await {
            if let Err(e) = joined {
                let message = failure_message(e);
                error!(account_id = %account.id, "Account worker failed: {}", message);
                aggregator
                    .account(&account)
                    .await
                    .mark_failed(format!("Account worker failed: {}", message))
                    .await;
            }
        }
    }

    async fn scan_account(&self, account: AccountRef, aggregator: Arc<ResultAggregator>) {
        let _permit = self.account_permits.acquire().await;
        let collector = aggregator.account(&account).await;

        if self.cancel.is_cancelled() {
            self.cancel_account(&account, &aggregator).await;
            return;
        }

        info!(account_id = %account.id, "Scanning account {}", account.name);

        let credentials = match self.broker.resolve(&account).await {
            Ok(credentials) => Arc::new(credentials),
            Err(e) => {
                warn!(account_id = %account.id, "Skipping account: {}", e);
                collector.mark_failed(e.to_string()).await;
                return;
            }
        };

        let regions = self.regions.resolve(&account, &credentials).await;
        if regions.is_empty() {
            warn!(account_id = %account.id, "No regions to scan");
            return;
        }

        let region_permits = Arc::new(Semaphore::new(self.limits.regions));
        let mut workers = FuturesUnordered::new();
        for region in regions {
            let scheduler = self.clone();
            let worker_account = account.clone();
            let worker_region = region.clone();
            let worker_credentials = credentials.clone();
            let worker_aggregator = aggregator.clone();
            let permits = region_permits.clone();
            let worker = Worker::spawn(async move {
                let _permit = permits.acquire().await;
                scheduler
                    .scan_region(worker_account, worker_region, worker_credentials, worker_aggregator)
                    .await
            });
            workers.push(async move { (region, worker.await) });
        }

        while let Some((region, joined)) = workers.next().await {
            if let Err(e) = joined {
                let message = failure_message(e);
                error!(account_id = %account.id, region = %region, "Region worker failed: {}", message);
                let region_collector = collector.region(&region).await;
                let targets = self.enumerator.targets_in(&account, &region);
                record_missing(
                    &region_collector,
                    targets,
                    CallError::unexpected(format!("Region worker failed: {}", message)),
                )
                .await;
            }
        }

        info!(account_id = %account.id, "Completed account {}", account.name);
    }

    /// Record an account that never started. With explicit regions its
    /// targets are known and each gets a cancelled outcome.
    async fn cancel_account(&self, account: &AccountRef, aggregator: &ResultAggregator) {
        let collector = aggregator.account(account).await;
        let regions = self.regions.explicit();
        if regions.is_empty() {
            collector
                .mark_failed("Scan cancelled before the account started")
                .await;
            return;
        }
        for target in self.enumerator.targets_for(account, regions) {
            collector
                .region(&target.region)
                .await
                .record(CallOutcome::cancelled(target))
                .await;
        }
    }

    async fn scan_region(
        &self,
        account: AccountRef,
        region: String,
        credentials: Arc<AwsCredentials>,
        aggregator: Arc<ResultAggregator>,
    ) {
        let collector = aggregator.account(&account).await.region(&region).await;

        info!(account_id = %account.id, region = %region, "Scanning region");

        let service_permits = Arc::new(Semaphore::new(self.limits.services));
        let mut workers = FuturesUnordered::new();
        for target in self.enumerator.targets_in(&account, &region) {
            if self.cancel.is_cancelled() {
                collector.record(CallOutcome::cancelled(target)).await;
                continue;
            }

            let scheduler = self.clone();
            let worker_target = target.clone();
            let worker_credentials = credentials.clone();
            let worker_collector = collector.clone();
            let permits = service_permits.clone();
            let worker = Worker::spawn(async move {
                let _permit = permits.acquire().await;
                scheduler
                    .scan_target(worker_target, worker_credentials, worker_collector)
                    .await
            });
            workers.push(async move { (target, worker.await) });
        }

        while let Some((target, joined)) = workers.next().await {
            if let Err(e) = joined {
                let message = failure_message(e);
                error!(call = %target.display_name, "Service worker failed: {}", message);
                let error = CallError::unexpected(format!("Service worker failed: {}", message));
                collector
                    .record(CallOutcome::failed(target, error, 0, Default::default()))
                    .await;
            }
        }

        info!(account_id = %account.id, region = %region, "Completed region");
    }

    async fn scan_target(
        &self,
        target: ScanTarget,
        credentials: Arc<AwsCredentials>,
        collector: Arc<RegionCollector>,
    ) {
        if self.cancel.is_cancelled() {
            collector.record(CallOutcome::cancelled(target)).await;
            return;
        }

        let call_target = target.clone();
        let outcome = self
            .retry
            .execute(target, || self.dispatcher.invoke(&credentials, &call_target))
            .await;

        collector.record(outcome).await;
    }
}

/// The panic payload of a dead worker, when there is one
fn failure_message(error: JoinError) -> String {
    if error.is_cancelled() {
        return "worker task was cancelled".to_string();
    }
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "worker panicked".to_string()),
        Err(error) => error.to_string(),
    }
}

/// Give every target without an outcome a failed one
async fn record_missing(collector: &RegionCollector, targets: Vec<ScanTarget>, error: CallError) {
    let recorded = collector.recorded_sheets().await;
    for target in targets {
        if !recorded.contains(&target.sheet_name) {
            collector
                .record(CallOutcome::failed(target, error.clone(), 0, Default::default()))
                .await;
        }
    }
}
