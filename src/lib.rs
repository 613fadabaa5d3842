//! Lornu Inventory Library
//!
//! Concurrent, failure-isolating inventory scans of AWS accounts.

pub mod aws;
pub mod config;
pub mod error;
pub mod output;
pub mod scan;

pub use config::{Inventory, InventoryFile, ScanSettings};
pub use error::{CallError, ConfigError, CredentialError, ErrorKind};
pub use output::{OutputFormat, OutputWriter};
pub use scan::{InventoryScanner, ScanReport, ScanResult, ScanSummary};
