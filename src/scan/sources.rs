//! Account Sources
//!
//! Organization member discovery through the operation registry.

use serde_json::Value;
use tracing::info;

use super::dispatcher::CallDispatcher;
use super::retry::RetryPolicy;
use super::types::{AccountRef, Parameters};
use crate::aws::AwsCredentials;
use crate::error::CallError;

/// Lists the active member accounts of an organization
pub struct OrganizationAccounts {
    dispatcher: CallDispatcher,
    retry: RetryPolicy,
    region: String,
}

impl OrganizationAccounts {
    pub fn new(dispatcher: CallDispatcher, retry: RetryPolicy, region: impl Into<String>) -> Self {
        Self {
            dispatcher,
            retry,
            region: region.into(),
        }
    }

    /// All `ACTIVE` accounts, following `NextToken` pagination
    pub async fn list(&self, management: &AwsCredentials) -> Result<Vec<AccountRef>, CallError> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut parameters = Parameters::new();
            if let Some(token) = &next_token {
                parameters.insert("NextToken".to_string(), Value::String(token.clone()));
            }

            let (page, _) = self
                .retry
                .run("organizations.list_accounts", || {
                    self.dispatcher.call(
                        management,
                        "organizations",
                        "list_accounts",
                        &self.region,
                        Some(&parameters),
                        None,
                    )
                })
                .await;
            let page = page?;

            accounts.extend(active_accounts(&page));

            match page.get("NextToken").and_then(Value::as_str) {
                Some(token) if !token.is_empty() && next_token.as_deref() != Some(token) => {
                    next_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        info!("Found {} active accounts in the organization", accounts.len());
        Ok(accounts)
    }
}

/// Active accounts from one ListAccounts page
pub fn active_accounts(page: &Value) -> Vec<AccountRef> {
    page.get("Accounts")
        .and_then(Value::as_array)
        .map(|accounts| {
            accounts
                .iter()
                .filter(|a| a.get("Status").and_then(Value::as_str) == Some("ACTIVE"))
                .filter_map(|a| {
                    let id = a.get("Id").and_then(Value::as_str)?;
                    let name = a.get("Name").and_then(Value::as_str).unwrap_or(id);
                    Some(AccountRef {
                        id: id.to_string(),
                        name: name.to_string(),
                        email: a.get("Email").and_then(Value::as_str).map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scan::dispatcher::{InvokeRequest, Invoker, OperationRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Serves pages keyed by the incoming NextToken
    struct Pages {
        seen_tokens: Mutex<Vec<Option<String>>>,
        fail_first: Mutex<bool>,
    }

    #[async_trait]
    impl Invoker for Pages {
        async fn invoke(&self, request: InvokeRequest<'_>) -> Result<Value, CallError> {
            {
                let mut fail = self.fail_first.lock().unwrap();
                if *fail {
                    *fail = false;
                    return Err(CallError::throttling("TooManyRequestsException"));
                }
            }

            let token = request
                .parameters
                .and_then(|p| p.get("NextToken"))
                .and_then(Value::as_str)
                .map(str::to_string);
            self.seen_tokens.lock().unwrap().push(token.clone());

            Ok(match token.as_deref() {
                None => json!({
                    "Accounts": [
                        {"Id": "111111111111", "Name": "prod", "Email": "prod@example.com", "Status": "ACTIVE"},
                        {"Id": "999999999999", "Name": "closed", "Email": "x@example.com", "Status": "SUSPENDED"}
                    ],
                    "NextToken": "page-2",
                    "ResponseMetadata": {}
                }),
                Some(_) => json!({
                    "Accounts": [
                        {"Id": "222222222222", "Name": "dev", "Email": "dev@example.com", "Status": "ACTIVE"}
                    ],
                    "ResponseMetadata": {}
                }),
            })
        }
    }

    fn source(pages: Arc<Pages>) -> OrganizationAccounts {
        let mut registry = OperationRegistry::new();
        registry.register("organizations", "list_accounts", pages).unwrap();
        let dispatcher = CallDispatcher::new(Arc::new(registry), Duration::from_secs(1));
        OrganizationAccounts::new(
            dispatcher,
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)),
            "us-east-1",
        )
    }

    #[tokio::test]
    async fn test_lists_active_accounts_across_pages() {
        let pages = Arc::new(Pages {
            seen_tokens: Mutex::new(Vec::new()),
            fail_first: Mutex::new(true),
        });
        let accounts = source(pages.clone())
            .list(&AwsCredentials::new("AKID", "secret"))
            .await
            .unwrap();

        let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["111111111111", "222222222222"]);
        assert_eq!(accounts[0].email.as_deref(), Some("prod@example.com"));
        assert_eq!(
            *pages.seen_tokens.lock().unwrap(),
            vec![None, Some("page-2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_registration_is_an_error() {
        let dispatcher = CallDispatcher::new(Arc::new(OperationRegistry::new()), Duration::from_secs(1));
        let source = OrganizationAccounts::new(dispatcher, RetryPolicy::default(), "us-east-1");

        let err = source
            .list(&AwsCredentials::new("AKID", "secret"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::OperationNotFound);
    }

    #[test]
    fn test_active_accounts_ignores_malformed_entries() {
        let page = json!({"Accounts": [{"Status": "ACTIVE"}, {"Id": "3", "Status": "ACTIVE"}]});
        let accounts = active_accounts(&page);
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "3");
    }
}
