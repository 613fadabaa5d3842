//! AWS Security Token Service
//!
//! Role assumption for organization scans and role profiles, web identity
//! federation, and the caller identity used by the credential preflight.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::catalog::{self, ServiceDefinition};
use super::client::AwsHttpClient;
use super::credentials::AwsCredentials;
use crate::error::{CallError, CredentialError, ErrorKind};
use crate::scan::credentials::RoleAssumer;

/// STS AssumeRole result
#[derive(Debug, Deserialize)]
struct AssumeRoleOutput {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
struct StsCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "SessionToken")]
    session_token: String,
    #[serde(rename = "Expiration")]
    expiration: Option<DateTime<Utc>>,
}

/// Who the ambient credentials belong to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallerIdentity {
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Arn")]
    pub arn: String,
    #[serde(rename = "UserId")]
    pub user_id: String,
}

/// One AssumeRole call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub session_name: String,
    pub duration: Duration,
    pub external_id: Option<String>,
}

/// STS over the signed HTTP client
pub struct StsClient {
    client: AwsHttpClient,
    region: String,
}

impl StsClient {
    /// Create an STS client talking to the regional endpoint of `region`
    pub fn new(client: AwsHttpClient, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    /// The HTTP client, for credential endpoints outside STS
    pub fn http(&self) -> &AwsHttpClient {
        &self.client
    }

    fn service() -> Result<&'static ServiceDefinition, CallError> {
        catalog::service("sts").ok_or_else(|| CallError::operation_not_found("sts", "*"))
    }

    /// Resolve the identity behind a set of credentials
    pub async fn caller_identity(&self, credentials: &AwsCredentials) -> Result<CallerIdentity, CallError> {
        let response = self
            .client
            .call(credentials, Self::service()?, &self.region, "GetCallerIdentity", "/", None)
            .await?;

        let identity: CallerIdentity = serde_json::from_value(response)
            .map_err(|e| CallError::unexpected(format!("Unexpected GetCallerIdentity response: {}", e)))?;

        debug!(account_id = %identity.account, arn = %identity.arn, "Resolved caller identity");
        Ok(identity)
    }
}

/// Session name used for assumed roles
pub fn session_name(account_id: &str) -> String {
    format!("lornu-inventory-{}", account_id)
}

/// Role ARN for a role name in an account
pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_id, role_name)
}

fn credential_error(role_arn: &str, err: CallError) -> CredentialError {
    match err.kind {
        ErrorKind::Throttling | ErrorKind::Transient | ErrorKind::Timeout => {
            CredentialError::Transient(err.to_string())
        }
        _ => CredentialError::RoleNotAssumable {
            role_arn: role_arn.to_string(),
            message: err.to_string(),
        },
    }
}

impl StsClient {
    /// Assume a role with `credentials`
    pub async fn assume(
        &self,
        credentials: &AwsCredentials,
        request: &AssumeRoleRequest,
    ) -> Result<AwsCredentials, CredentialError> {
        let role_arn = request.role_arn.as_str();
        let mut parameters = Map::new();
        parameters.insert("RoleArn".to_string(), Value::String(role_arn.to_string()));
        parameters.insert(
            "RoleSessionName".to_string(),
            Value::String(request.session_name.clone()),
        );
        parameters.insert("DurationSeconds".to_string(), Value::from(request.duration.as_secs()));
        if let Some(external_id) = &request.external_id {
            parameters.insert("ExternalId".to_string(), Value::String(external_id.clone()));
        }

        let service = Self::service().map_err(|e| credential_error(role_arn, e))?;
        let response = self
            .client
            .call(credentials, service, &self.region, "AssumeRole", "/", Some(&parameters))
            .await
            .map_err(|e| credential_error(role_arn, e))?;

        let creds = session_credentials(response, role_arn, request.duration, "AssumeRole")?;
        info!("Assumed role {} until {:?}", role_arn, creds.expires_at);
        Ok(creds)
    }

    /// Exchange an OIDC token for role credentials. The request is not
    /// signed; the token authenticates it.
    pub async fn assume_role_with_web_identity(
        &self,
        role_arn: &str,
        session_name: &str,
        token: &str,
    ) -> Result<AwsCredentials, CredentialError> {
        let mut parameters = Map::new();
        parameters.insert("RoleArn".to_string(), Value::String(role_arn.to_string()));
        parameters.insert("RoleSessionName".to_string(), Value::String(session_name.to_string()));
        parameters.insert("WebIdentityToken".to_string(), Value::String(token.to_string()));

        let service = Self::service().map_err(|e| credential_error(role_arn, e))?;
        let response = self
            .client
            .call_unsigned(service, &self.region, "AssumeRoleWithWebIdentity", Some(&parameters))
            .await
            .map_err(|e| credential_error(role_arn, e))?;

        let creds = session_credentials(
            response,
            role_arn,
            Duration::from_secs(3600),
            "AssumeRoleWithWebIdentity",
        )?;
        info!("Assumed role {} with web identity", role_arn);
        Ok(creds)
    }
}

/// Session credentials out of an AssumeRole* response
fn session_credentials(
    response: Value,
    role_arn: &str,
    duration: Duration,
    action: &str,
) -> Result<AwsCredentials, CredentialError> {
    let output: AssumeRoleOutput =
        serde_json::from_value(response).map_err(|e| CredentialError::RoleNotAssumable {
            role_arn: role_arn.to_string(),
            message: format!("Unexpected {} response: {}", action, e),
        })?;

    let creds = output.credentials;
    let expires_at = creds
        .expiration
        .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(duration.as_secs() as i64));

    Ok(AwsCredentials::new(creds.access_key_id, creds.secret_access_key)
        .with_session_token(creds.session_token)
        .with_expiry(expires_at))
}

#[async_trait]
impl RoleAssumer for StsClient {
    async fn assume_role(
        &self,
        management: &AwsCredentials,
        role_arn: &str,
        session_name: &str,
        duration: Duration,
    ) -> Result<AwsCredentials, CredentialError> {
        let request = AssumeRoleRequest {
            role_arn: role_arn.to_string(),
            session_name: session_name.to_string(),
            duration,
            external_id: None,
        };
        self.assume(management, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::protocol::{decode, Protocol};
    use serde_json::json;

    #[test]
    fn test_role_arn_and_session_name() {
        assert_eq!(
            role_arn("123456789012", "OrganizationAccountAccessRole"),
            "arn:aws:iam::123456789012:role/OrganizationAccountAccessRole"
        );
        assert_eq!(session_name("123456789012"), "lornu-inventory-123456789012");
    }

    #[test]
    fn test_parse_assume_role_response() {
        let body = r#"<AssumeRoleResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleResult>
    <AssumedRoleUser>
      <Arn>arn:aws:sts::123456789012:assumed-role/Admin/lornu-inventory-123456789012</Arn>
      <AssumedRoleId>AROA:lornu</AssumedRoleId>
    </AssumedRoleUser>
    <Credentials>
      <AccessKeyId>ASIAEXAMPLE</AccessKeyId>
      <SecretAccessKey>secret</SecretAccessKey>
      <SessionToken>token</SessionToken>
      <Expiration>2030-01-01T00:00:00Z</Expiration>
    </Credentials>
  </AssumeRoleResult>
  <ResponseMetadata><RequestId>r</RequestId></ResponseMetadata>
</AssumeRoleResponse>"#;

        let value = decode(Protocol::Query, "AssumeRole", body, None).unwrap();
        let output: AssumeRoleOutput = serde_json::from_value(value).unwrap();

        assert_eq!(output.credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(output.credentials.session_token, "token");
        assert_eq!(
            output.credentials.expiration.unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_web_identity_response() {
        let body = r#"<AssumeRoleWithWebIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleWithWebIdentityResult>
    <SubjectFromWebIdentityToken>system:serviceaccount:inventory:scanner</SubjectFromWebIdentityToken>
    <AssumedRoleUser>
      <Arn>arn:aws:sts::123456789012:assumed-role/Scanner/lornu-inventory</Arn>
      <AssumedRoleId>AROA:lornu-inventory</AssumedRoleId>
    </AssumedRoleUser>
    <Credentials>
      <SessionToken>web-token</SessionToken>
      <SecretAccessKey>web-secret</SecretAccessKey>
      <Expiration>2030-01-01T00:00:00Z</Expiration>
      <AccessKeyId>ASIAWEB</AccessKeyId>
    </Credentials>
    <Provider>oidc.eks.eu-west-1.amazonaws.com/id/EXAMPLE</Provider>
  </AssumeRoleWithWebIdentityResult>
  <ResponseMetadata><RequestId>r</RequestId></ResponseMetadata>
</AssumeRoleWithWebIdentityResponse>"#;

        let value = decode(Protocol::Query, "AssumeRoleWithWebIdentity", body, None).unwrap();
        let creds = session_credentials(
            value,
            "arn:aws:iam::123456789012:role/Scanner",
            Duration::from_secs(3600),
            "AssumeRoleWithWebIdentity",
        )
        .unwrap();

        assert_eq!(creds.access_key_id, "ASIAWEB");
        assert_eq!(creds.session_token.as_deref(), Some("web-token"));
        assert_eq!(creds.expires_at.unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");

        let err = session_credentials(json!({}), "arn:x", Duration::from_secs(1), "AssumeRole").unwrap_err();
        assert!(err.to_string().contains("Unexpected AssumeRole response"));
    }

    #[test]
    fn test_parse_caller_identity() {
        let body = "<GetCallerIdentityResponse><GetCallerIdentityResult><Arn>arn:aws:iam::111111111111:user/ops</Arn><UserId>AIDA</UserId><Account>111111111111</Account></GetCallerIdentityResult><ResponseMetadata><RequestId>r</RequestId></ResponseMetadata></GetCallerIdentityResponse>";
        let value = decode(Protocol::Query, "GetCallerIdentity", body, None).unwrap();
        let identity: CallerIdentity = serde_json::from_value(value).unwrap();

        assert_eq!(identity.account, "111111111111");
        assert_eq!(identity.user_id, "AIDA");
    }

    #[test]
    fn test_credential_error_mapping() {
        let arn = "arn:aws:iam::1:role/x";
        assert!(credential_error(arn, CallError::throttling("slow")).is_transient());
        assert!(credential_error(arn, CallError::transient("reset")).is_transient());
        assert!(matches!(
            credential_error(arn, CallError::permission_denied("AccessDenied")),
            CredentialError::RoleNotAssumable { .. }
        ));
    }
}
