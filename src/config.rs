//! Inventory Configuration
//!
//! Loads inventory definitions from YAML or JSON, converts the legacy
//! shapes, and validates everything against the operation registry before
//! a scan starts. Validation collects every problem instead of stopping at
//! the first one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::scan::dispatcher::{is_read_only, OperationRegistry, READ_ONLY_PREFIXES};
use crate::scan::scheduler::{default_workers, ConcurrencyLimits};
use crate::scan::selector::ResultSelector;
use crate::scan::types::{Parameters, Sheet};

/// Role assumed in member accounts unless configured otherwise
pub const DEFAULT_ROLE_NAME: &str = "OrganizationAccountAccessRole";

/// Name given to the inventory of a legacy config file
pub const LEGACY_INVENTORY_NAME: &str = "default";

/// Top-level config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryFile {
    pub inventories: Vec<InventoryConfig>,
}

/// One inventory as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    pub name: String,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub sheets: Vec<SheetConfig>,
}

/// Account and region selection of an inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Named profile from the shared credentials file
    #[serde(default)]
    pub profile: Option<String>,
    /// Regions to scan; empty means discover them
    #[serde(default, deserialize_with = "one_or_many")]
    pub region: Vec<String>,
    /// Scan every member account of the organization
    #[serde(default)]
    pub organization: bool,
    #[serde(default = "default_role_name")]
    pub role_name: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: None,
            region: Vec::new(),
            organization: false,
            role_name: default_role_name(),
        }
    }
}

fn default_role_name() -> String {
    DEFAULT_ROLE_NAME.to_string()
}

/// One sheet as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub service: String,
    /// Operation name, e.g. `describe_instances`
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub result_key: Option<String>,
    #[serde(default)]
    pub parameters: Option<Parameters>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(region)) => vec![region],
        Some(OneOrMany::Many(regions)) => regions,
        None => Vec::new(),
    })
}

/// How the credentials of an inventory are obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSelector {
    /// Scan the account behind the profile (or ambient credentials)
    Profile { profile: Option<String> },
    /// Assume `role_name` in every member account of the organization
    Organization {
        profile: Option<String>,
        role_name: String,
    },
}

impl CredentialSelector {
    /// Profile holding the ambient or management credentials
    pub fn profile(&self) -> Option<&str> {
        match self {
            CredentialSelector::Profile { profile } => profile.as_deref(),
            CredentialSelector::Organization { profile, .. } => profile.as_deref(),
        }
    }

    pub fn is_organization(&self) -> bool {
        matches!(self, CredentialSelector::Organization { .. })
    }
}

/// A validated inventory, ready to be scanned
#[derive(Debug, Clone)]
pub struct Inventory {
    pub name: String,
    pub credentials: CredentialSelector,
    /// Empty means regions are discovered per account
    pub regions: Vec<String>,
    pub sheets: Vec<Sheet>,
}

/// Read and parse a config file. YAML for `.yaml`/`.yml`, JSON otherwise.
pub fn load(path: &Path) -> Result<InventoryFile, ConfigError> {
    let shown = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: shown.clone(),
        source,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    debug!("Parsing {} as {}", shown, if is_yaml { "YAML" } else { "JSON" });

    let raw: Value = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: shown.clone(),
            message: e.to_string(),
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: shown.clone(),
            message: e.to_string(),
        })?
    };

    parse(raw).map_err(|message| ConfigError::Parse {
        path: shown,
        message,
    })
}

/// Convert a parsed document, accepting the legacy shapes
pub fn parse(raw: Value) -> Result<InventoryFile, String> {
    let document = if is_legacy(&raw) {
        info!("Converting legacy configuration format");
        convert_legacy(raw)
    } else {
        raw
    };
    serde_json::from_value(document).map_err(|e| e.to_string())
}

/// A bare list of `{service, function}` entries, or a mapping with
/// `sheets` and no `inventories`
fn is_legacy(raw: &Value) -> bool {
    match raw {
        Value::Array(items) => items
            .first()
            .and_then(Value::as_object)
            .map(|first| first.contains_key("service") && first.contains_key("function"))
            .unwrap_or(false),
        Value::Object(map) => !map.contains_key("inventories") && map.contains_key("sheets"),
        _ => false,
    }
}

fn convert_legacy(raw: Value) -> Value {
    match raw {
        Value::Array(items) => {
            let sheets: Vec<Value> = items
                .into_iter()
                .map(|mut item| {
                    if let Value::Object(map) = &mut item {
                        if !map.contains_key("name") {
                            let service = map.get("service").and_then(Value::as_str).unwrap_or("");
                            let function = map.get("function").and_then(Value::as_str).unwrap_or("");
                            let name = format!("{}_{}", service, function);
                            map.insert("name".to_string(), Value::String(name));
                        }
                    }
                    item
                })
                .collect();
            serde_json::json!({
                "inventories": [{"name": LEGACY_INVENTORY_NAME, "sheets": sheets}]
            })
        }
        Value::Object(mut map) => {
            let name = map
                .remove("name")
                .unwrap_or_else(|| Value::String(LEGACY_INVENTORY_NAME.to_string()));
            let aws = map.remove("aws").unwrap_or_else(|| serde_json::json!({}));
            let sheets = map.remove("sheets").unwrap_or_else(|| Value::Array(Vec::new()));
            serde_json::json!({
                "inventories": [{"name": name, "aws": aws, "sheets": sheets}]
            })
        }
        other => other,
    }
}

impl InventoryFile {
    /// Validate every inventory and turn it into its scan form
    pub fn validate(&self, registry: &OperationRegistry) -> Result<Vec<Inventory>, ConfigError> {
        if self.inventories.is_empty() {
            return Err(ConfigError::Invalid(vec![
                "No inventories defined in configuration".to_string(),
            ]));
        }

        let mut errors = Vec::new();
        let mut inventories = Vec::with_capacity(self.inventories.len());
        let mut names = HashSet::new();

        for inventory in &self.inventories {
            if !names.insert(inventory.name.as_str()) {
                errors.push(format!("Duplicate inventory name '{}'", inventory.name));
            }
            match inventory.validate(registry) {
                Ok(valid) => inventories.push(valid),
                Err(problems) => errors.extend(
                    problems
                        .into_iter()
                        .map(|p| format!("Inventory '{}': {}", inventory.name, p)),
                ),
            }
        }

        if errors.is_empty() {
            Ok(inventories)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

impl InventoryConfig {
    fn validate(&self, registry: &OperationRegistry) -> Result<Inventory, Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Inventory name is empty".to_string());
        }
        if self.sheets.is_empty() {
            errors.push("No sheets defined".to_string());
        }
        if self.aws.organization && self.aws.role_name.trim().is_empty() {
            errors.push("Organization mode requires a role_name".to_string());
        }
        if self.aws.region.iter().any(|r| r.trim().is_empty()) {
            errors.push("Region names must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        let mut sheets = Vec::with_capacity(self.sheets.len());
        for sheet in &self.sheets {
            if !sheet.name.is_empty() && !seen.insert(sheet.name.as_str()) {
                errors.push(format!("Duplicate sheet name '{}'", sheet.name));
            }
            match sheet.validate(registry) {
                Ok(valid) => sheets.push(valid),
                Err(problems) => {
                    let label = if sheet.name.is_empty() {
                        format!("{}.{}", sheet.service, sheet.function)
                    } else {
                        sheet.name.clone()
                    };
                    errors.extend(problems.into_iter().map(|p| format!("Sheet '{}': {}", label, p)));
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let credentials = if self.aws.organization {
            CredentialSelector::Organization {
                profile: self.aws.profile.clone(),
                role_name: self.aws.role_name.clone(),
            }
        } else {
            CredentialSelector::Profile {
                profile: self.aws.profile.clone(),
            }
        };

        Ok(Inventory {
            name: self.name.clone(),
            credentials,
            regions: self.aws.region.clone(),
            sheets,
        })
    }
}

impl SheetConfig {
    fn validate(&self, registry: &OperationRegistry) -> Result<Sheet, Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("No name specified".to_string());
        }
        if self.service.trim().is_empty() {
            errors.push("No service specified".to_string());
        }
        if self.function.trim().is_empty() {
            errors.push("No function specified".to_string());
        }

        if !self.service.is_empty() && !self.function.is_empty() {
            if !is_read_only(&self.function) {
                errors.push(format!(
                    "Operation '{}' is not read-only (allowed prefixes: {})",
                    self.function,
                    READ_ONLY_PREFIXES.join(", ")
                ));
            } else if !registry.contains(&self.service, &self.function) {
                errors.push(format!(
                    "Unknown operation '{}.{}'",
                    self.service, self.function
                ));
            }
        }

        let result_selector = match self.result_key.as_deref() {
            Some(expression) => match ResultSelector::parse(expression) {
                Ok(selector) => Some(selector),
                Err(e) => {
                    errors.push(format!("Invalid result_key '{}': {}", expression, e));
                    None
                }
            },
            None => None,
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Sheet {
            name: self.name.clone(),
            service: self.service.clone(),
            operation: self.function.clone(),
            result_selector,
            parameters: self.parameters.clone().filter(|p| !p.is_empty()),
        })
    }
}

/// Tunables of a scan, passed explicitly into the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub call_timeout: Duration,
    pub max_concurrent_accounts: usize,
    pub max_concurrent_regions: usize,
    pub max_concurrent_services: usize,
    pub session_duration: Duration,
    pub default_region: String,
}

impl Default for ScanSettings {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(60),
            call_timeout: Duration::from_secs(60),
            max_concurrent_accounts: workers,
            max_concurrent_regions: workers,
            max_concurrent_services: workers,
            session_duration: Duration::from_secs(3600),
            default_region: default_region(),
        }
    }
}

impl ScanSettings {
    pub fn limits(&self) -> ConcurrencyLimits {
        ConcurrencyLimits {
            accounts: self.max_concurrent_accounts,
            regions: self.max_concurrent_regions,
            services: self.max_concurrent_services,
        }
    }
}

/// `AWS_REGION`, then `AWS_DEFAULT_REGION`, then `us-east-1`
pub fn default_region() -> String {
    ["AWS_REGION", "AWS_DEFAULT_REGION"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|region| !region.trim().is_empty())
        .unwrap_or_else(|| "us-east-1".to_string())
}
