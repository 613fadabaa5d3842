//! Credential Broker
//!
//! Produces a fresh credential set per account. Organization scans assume
//! a named role in each member account with the management credentials;
//! nothing is cached across accounts.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::retry::RetryPolicy;
use super::types::AccountRef;
use crate::aws::sts;
use crate::aws::AwsCredentials;
use crate::error::CredentialError;

/// Seam for role delegation
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(
        &self,
        management: &AwsCredentials,
        role_arn: &str,
        session_name: &str,
        duration: Duration,
    ) -> Result<AwsCredentials, CredentialError>;
}

enum BrokerMode {
    Ambient(AwsCredentials),
    Delegated {
        management: AwsCredentials,
        role_name: String,
        session_duration: Duration,
        assumer: Arc<dyn RoleAssumer>,
    },
}

/// Resolves credentials for one account at a time
pub struct CredentialBroker {
    mode: BrokerMode,
    retry: RetryPolicy,
}

impl CredentialBroker {
    /// Single-account mode: every account gets the ambient credentials
    pub fn ambient(credentials: AwsCredentials) -> Self {
        Self {
            mode: BrokerMode::Ambient(credentials),
            retry: RetryPolicy::default(),
        }
    }

    /// Organization mode: assume `role_name` in every member account
    pub fn delegated(
        management: AwsCredentials,
        role_name: impl Into<String>,
        session_duration: Duration,
        assumer: Arc<dyn RoleAssumer>,
    ) -> Self {
        Self {
            mode: BrokerMode::Delegated {
                management,
                role_name: role_name.into(),
                session_duration,
                assumer,
            },
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for transient token service failures
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self.mode, BrokerMode::Delegated { .. })
    }

    /// Credentials scoped to one account's scan
    pub async fn resolve(&self, account: &AccountRef) -> Result<AwsCredentials, CredentialError> {
        let (management, role_name, session_duration, assumer) = match &self.mode {
            BrokerMode::Ambient(credentials) => return Ok(credentials.clone()),
            BrokerMode::Delegated {
                management,
                role_name,
                session_duration,
                assumer,
            } => (management, role_name, *session_duration, assumer),
        };

        let role_arn = sts::role_arn(&account.id, role_name);
        let session_name = sts::session_name(&account.id);
        let mut attempt = 1;

        loop {
            match assumer
                .assume_role(management, &role_arn, &session_name, session_duration)
                .await
            {
                Ok(credentials) => {
                    info!(account_id = %account.id, "Assumed role {} for account {}", role_name, account.name);
                    return Ok(credentials);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt - 1);
                    warn!(
                        account_id = %account.id,
                        "Role assumption failed transiently, retrying in {:?}: {}",
                        delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(account_id = %account.id, "Could not assume role {}: {}", role_arn, e);
                    return Err(e);
                }
            }
        }
    }
}
