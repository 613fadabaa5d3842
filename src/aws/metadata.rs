//! Credential Endpoints
//!
//! Credentials served over HTTP to workloads: the ECS/EKS container
//! endpoint and the EC2 instance metadata service (IMDSv2).

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::client::AwsHttpClient;
use super::credentials::AwsCredentials;
use crate::error::{CallError, CredentialError, ErrorKind};

/// Metadata endpoints answer locally or not at all
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(2);
const IMDS_TOKEN_TTL: &str = "21600";
const SECURITY_CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointCredentials {
    #[serde(default)]
    code: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expiration: Option<DateTime<Utc>>,
}

/// Parse the JSON both endpoints answer with
pub fn parse_credentials(body: &str) -> Result<AwsCredentials, CredentialError> {
    let parsed: EndpointCredentials = serde_json::from_str(body).map_err(|e| {
        CredentialError::MissingCredentials(format!("unexpected credential endpoint response: {}", e))
    })?;

    if let Some(code) = parsed.code.as_deref().filter(|c| *c != "Success") {
        return Err(CredentialError::MissingCredentials(format!(
            "credential endpoint answered {}",
            code
        )));
    }

    let mut creds = AwsCredentials::new(parsed.access_key_id, parsed.secret_access_key);
    if let Some(token) = parsed.token {
        creds = creds.with_session_token(token);
    }
    if let Some(expiration) = parsed.expiration {
        creds = creds.with_expiry(expiration);
    }
    Ok(creds)
}

fn endpoint_error(what: &str, err: CallError) -> CredentialError {
    match err.kind {
        ErrorKind::Throttling | ErrorKind::Transient => CredentialError::Transient(err.to_string()),
        _ => CredentialError::MissingCredentials(format!("{}: {}", what, err)),
    }
}

/// Credentials from the container endpoint at `url`
pub async fn container_credentials(
    client: &AwsHttpClient,
    url: &str,
    authorization: Option<&str>,
) -> Result<AwsCredentials, CredentialError> {
    let headers: Vec<(&str, &str)> = authorization
        .map(|token| vec![("Authorization", token)])
        .unwrap_or_default();

    debug!("Fetching container credentials from {}", url);
    let body = client
        .fetch(Method::GET, url, &headers, ENDPOINT_TIMEOUT)
        .await
        .map_err(|e| endpoint_error("container credentials unavailable", e))?;
    parse_credentials(&body)
}

/// Credentials of the instance profile role, via an IMDSv2 session token
pub async fn instance_credentials(client: &AwsHttpClient, endpoint: &str) -> Result<AwsCredentials, CredentialError> {
    let unavailable = |e: CallError| endpoint_error("instance metadata unavailable", e);

    let token = client
        .fetch(
            Method::PUT,
            &format!("{}/latest/api/token", endpoint),
            &[("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL)],
            ENDPOINT_TIMEOUT,
        )
        .await
        .map_err(unavailable)?;
    let session = [("X-aws-ec2-metadata-token", token.trim())];

    let roles = client
        .fetch(
            Method::GET,
            &format!("{}{}", endpoint, SECURITY_CREDENTIALS_PATH),
            &session,
            ENDPOINT_TIMEOUT,
        )
        .await
        .map_err(unavailable)?;
    let role = instance_role(&roles).ok_or_else(|| {
        CredentialError::MissingCredentials("no instance profile role attached".to_string())
    })?;

    debug!("Fetching instance credentials for role {}", role);
    let body = client
        .fetch(
            Method::GET,
            &format!("{}{}{}", endpoint, SECURITY_CREDENTIALS_PATH, role),
            &session,
            ENDPOINT_TIMEOUT,
        )
        .await
        .map_err(unavailable)?;
    parse_credentials(&body)
}

/// First role name of a security-credentials listing
fn instance_role(listing: &str) -> Option<&str> {
    listing.lines().map(str::trim).find(|l| !l.is_empty())
}
