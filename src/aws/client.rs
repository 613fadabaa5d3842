//! AWS HTTP Client
//!
//! Signs, sends and decodes one API call. Failures come back as a
//! classified [`CallError`] so the retry policy can decide what to do.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::catalog::ServiceDefinition;
use super::credentials::AwsCredentials;
use super::protocol::{self, Protocol};
use super::signer::{self, SigningRequest};
use super::xml;
use crate::error::{CallError, ErrorKind};

/// Region global endpoints are signed for
pub const GLOBAL_SIGNING_REGION: &str = "us-east-1";

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "RequestThrottledException",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "SlowDown",
];

const PERMISSION_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "UnrecognizedClientException",
    "AuthFailure",
    "InvalidClientTokenId",
    "ExpiredToken",
    "ExpiredTokenException",
    "AWSOrganizationsNotInUseException",
];

const VALIDATION_CODES: &[&str] = &[
    "ValidationError",
    "ValidationException",
    "InvalidParameterValue",
    "InvalidParameterValueException",
    "InvalidParameterCombination",
    "InvalidParameterException",
    "MissingParameter",
    "InvalidAction",
    "InvalidInput",
    "SerializationException",
];

/// Classify a provider failure from its HTTP status and error code
pub fn classify(status: u16, code: &str) -> ErrorKind {
    if THROTTLING_CODES.contains(&code) || status == 429 {
        ErrorKind::Throttling
    } else if PERMISSION_CODES.contains(&code) {
        ErrorKind::PermissionDenied
    } else if VALIDATION_CODES.contains(&code) {
        ErrorKind::Validation
    } else if status >= 500 || code == "ServiceUnavailable" || code == "InternalError" {
        ErrorKind::Transient
    } else if code.is_empty() && (status == 401 || status == 403) {
        ErrorKind::PermissionDenied
    } else {
        ErrorKind::Unexpected
    }
}

/// Pull the provider error code and message out of a failed response
pub fn error_details(protocol: Protocol, error_type_header: Option<&str>, body: &str) -> (String, String) {
    let header_code = error_type_header
        .map(|h| h.split(':').next().unwrap_or(h).trim().to_string())
        .filter(|c| !c.is_empty());

    match protocol {
        Protocol::Json { .. } | Protocol::RestJson => {
            let parsed: Option<Value> = serde_json::from_str(body).ok();
            // "__type" may be namespaced: "com.amazonaws.dynamodb.v20120810#ThrottlingException"
            let code = header_code
                .or_else(|| json_field(parsed.as_ref(), &["__type", "code", "Code"]))
                .map(|c| c.rsplit('#').next().unwrap_or(c.as_str()).to_string())
                .unwrap_or_default();
            let message = json_field(parsed.as_ref(), &["message", "Message"])
                .unwrap_or_else(|| body.trim().to_string());
            (code, message)
        }
        Protocol::Query | Protocol::Ec2 | Protocol::RestXml => xml::error_details(body)
            .unwrap_or_else(|| (header_code.unwrap_or_default(), body.trim().to_string())),
    }
}

fn json_field(parsed: Option<&Value>, names: &[&str]) -> Option<String> {
    let value = parsed?;
    names
        .iter()
        .find_map(|n| value.get(*n).and_then(Value::as_str).map(str::to_string))
}

/// Signed HTTP access to AWS APIs
#[derive(Clone)]
pub struct AwsHttpClient {
    http_client: Client,
}

impl AwsHttpClient {
    /// Create a client whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lornu-inventory/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http_client })
    }

    /// Host and signing region for a service in a region
    pub fn endpoint(service: &ServiceDefinition, region: &str) -> (String, String) {
        match service.global_host {
            Some(host) => (host.to_string(), GLOBAL_SIGNING_REGION.to_string()),
            None => (
                format!("{}.{}.amazonaws.com", service.endpoint_prefix, region),
                region.to_string(),
            ),
        }
    }

    /// Call `action` on `service` in `region`
    pub async fn call(
        &self,
        credentials: &AwsCredentials,
        service: &ServiceDefinition,
        region: &str,
        action: &str,
        path: &str,
        parameters: Option<&Map<String, Value>>,
    ) -> Result<Value, CallError> {
        self.send(Some(credentials), service, region, action, path, parameters)
            .await
    }

    /// Call an action that authenticates through its parameters
    /// (`AssumeRoleWithWebIdentity`)
    pub async fn call_unsigned(
        &self,
        service: &ServiceDefinition,
        region: &str,
        action: &str,
        parameters: Option<&Map<String, Value>>,
    ) -> Result<Value, CallError> {
        self.send(None, service, region, action, "/", parameters).await
    }

    /// Plain request to a local credential endpoint, returning the body
    pub async fn fetch(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String, CallError> {
        let mut builder = self.http_client.request(method, url).timeout(timeout);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(CallError::new(
                classify(status.as_u16(), ""),
                format!("HTTP {} from {}: {}", status.as_u16(), url, body.trim()),
            ))
        }
    }

    async fn send(
        &self,
        credentials: Option<&AwsCredentials>,
        service: &ServiceDefinition,
        region: &str,
        action: &str,
        path: &str,
        parameters: Option<&Map<String, Value>>,
    ) -> Result<Value, CallError> {
        let mut request = protocol::encode(service.protocol, service.api_version, action, path, parameters)?;
        if service.signing_name == "s3" {
            request
                .headers
                .push(("x-amz-content-sha256".to_string(), signer::payload_hash(&request.body)));
        }
        let (host, signing_region) = Self::endpoint(service, region);

        let signing = SigningRequest {
            method: request.method,
            host: &host,
            path: &request.path,
            query: &request.query,
            headers: &request.headers,
            payload: &request.body,
        };
        let auth_headers = match credentials {
            Some(credentials) => signer::sign(
                credentials,
                &signing_region,
                service.signing_name,
                Utc::now(),
                &signing,
            ),
            None => Vec::new(),
        };

        let mut url = format!("https://{}{}", host, request.path);
        if !request.query.is_empty() {
            url.push('?');
            url.push_str(&request.query);
        }

        let method = if request.method == "GET" {
            reqwest::Method::GET
        } else {
            reqwest::Method::POST
        };
        let mut builder = self.http_client.request(method, &url);
        for (name, value) in request.headers.iter().chain(auth_headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() || request.method == "POST" {
            builder = builder.body(request.body.clone());
        }

        debug!(service = service.name, region = %region, action = %action, "Sending AWS request");

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let request_id = header(&response, "x-amzn-requestid").or_else(|| header(&response, "x-amz-request-id"));
        let error_type = header(&response, "x-amzn-errortype");
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            return protocol::decode(service.protocol, action, &body, request_id.as_deref());
        }

        let (code, message) = error_details(service.protocol, error_type.as_deref(), &body);
        let kind = classify(status.as_u16(), &code);
        let message = if code.is_empty() {
            format!("HTTP {}: {}", status.as_u16(), message)
        } else {
            format!("{} ({}): {}", code, status.as_u16(), message)
        };
        Err(CallError::new(kind, message))
    }
}

fn header(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn transport_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::new(ErrorKind::Timeout, format!("Request timed out: {}", e))
    } else {
        CallError::transient(format!("Transport error: {}", e))
    }
}
