//! Scan Orchestration
//!
//! Fans a configured inventory out over accounts, regions and sheets:
//! - Target enumeration and region resolution
//! - Per-account credential delegation
//! - Registry-based call dispatch with result selection
//! - Retry with capped exponential backoff
//! - Three bounded worker pools and a failure-isolating aggregator

pub mod aggregator;
pub mod credentials;
pub mod dispatcher;
pub mod engine;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod sources;
pub mod targets;
pub mod types;

pub use aggregator::ResultAggregator;
pub use credentials::{CredentialBroker, RoleAssumer};
pub use dispatcher::{CallDispatcher, InvokeRequest, Invoker, OperationRegistry};
pub use engine::InventoryScanner;
pub use retry::RetryPolicy;
pub use scheduler::{ConcurrencyLimits, ScanScheduler};
pub use selector::ResultSelector;
pub use types::{
    AccountAggregate, AccountRef, CallOutcome, RegionAggregate, RunStatus, ScanReport, ScanResult,
    ScanSummary, ScanTarget, Sheet,
};
