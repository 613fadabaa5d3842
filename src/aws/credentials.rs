//! AWS Credentials
//!
//! Ambient credential resolution. A [`CredentialSource`] is selected from
//! the environment and the shared `config`/`credentials` files, then
//! resolved into keys:
//!
//! 1. an explicit profile
//! 2. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`
//! 3. the `AWS_PROFILE` profile
//! 4. `AWS_WEB_IDENTITY_TOKEN_FILE` with `AWS_ROLE_ARN`
//! 5. the `default` profile, when present
//! 6. container credentials (`AWS_CONTAINER_CREDENTIALS_*_URI`)
//! 7. the EC2 instance metadata service
//!
//! Profiles may assume a role from a `source_profile`, a
//! `credential_source` or a web identity token file. Session credentials
//! carry an expiry and are never cached beyond one account's scan.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::metadata;
use super::sts::{AssumeRoleRequest, StsClient};
use crate::error::CredentialError;

/// AWS access keys, optionally scoped to a temporary session
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AwsCredentials {
    /// Long-lived keys without a session token
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expires_at: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() >= at).unwrap_or(false)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Session name for role profiles without `role_session_name`
pub const DEFAULT_SESSION_NAME: &str = "lornu-inventory";

const DEFAULT_CONTAINER_HOST: &str = "http://169.254.170.2";
const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";

/// Variables credential selection reads
const ENV_VARS: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AWS_PROFILE",
    "AWS_WEB_IDENTITY_TOKEN_FILE",
    "AWS_ROLE_ARN",
    "AWS_ROLE_SESSION_NAME",
    "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI",
    "AWS_CONTAINER_CREDENTIALS_FULL_URI",
    "AWS_CONTAINER_AUTHORIZATION_TOKEN",
    "AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE",
    "AWS_EC2_METADATA_DISABLED",
    "AWS_EC2_METADATA_SERVICE_ENDPOINT",
];

/// Where a set of credentials comes from
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    /// Keys known up front
    Static(AwsCredentials),
    /// Keys from the `AWS_ACCESS_KEY_ID` family of variables
    Environment,
    /// A role assumed with the credentials of another source
    AssumeRole {
        source: Box<CredentialSource>,
        request: AssumeRoleRequest,
    },
    /// A role assumed with an OIDC token read from a file
    WebIdentity {
        role_arn: String,
        token_file: PathBuf,
        session_name: String,
    },
    /// The ECS/EKS container credentials endpoint
    Container {
        url: String,
        authorization: Option<String>,
        authorization_file: Option<PathBuf>,
    },
    /// The EC2 instance metadata service
    InstanceMetadata { endpoint: String },
}

impl CredentialSource {
    /// Resolve the source into keys, assuming roles through `sts`
    pub fn resolve<'a>(&'a self, sts: &'a StsClient) -> BoxFuture<'a, Result<AwsCredentials, CredentialError>> {
        async move {
            match self {
                CredentialSource::Static(creds) => Ok(creds.clone()),
                CredentialSource::Environment => from_env().ok_or_else(|| {
                    CredentialError::MissingCredentials(
                        "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY are not set".to_string(),
                    )
                }),
                CredentialSource::AssumeRole { source, request } => {
                    let source_creds = source.resolve(sts).await?;
                    sts.assume(&source_creds, request).await
                }
                CredentialSource::WebIdentity {
                    role_arn,
                    token_file,
                    session_name,
                } => {
                    let token = tokio::fs::read_to_string(token_file).await.map_err(|e| {
                        CredentialError::MissingCredentials(format!(
                            "failed to read web identity token {}: {}",
                            token_file.display(),
                            e
                        ))
                    })?;
                    sts.assume_role_with_web_identity(role_arn, session_name, token.trim())
                        .await
                }
                CredentialSource::Container {
                    url,
                    authorization,
                    authorization_file,
                } => {
                    let token = match (authorization, authorization_file) {
                        (_, Some(path)) => Some(
                            tokio::fs::read_to_string(path)
                                .await
                                .map_err(|e| {
                                    CredentialError::MissingCredentials(format!(
                                        "failed to read container authorization token {}: {}",
                                        path.display(),
                                        e
                                    ))
                                })?
                                .trim()
                                .to_string(),
                        ),
                        (token, None) => token.clone(),
                    };
                    metadata::container_credentials(sts.http(), url, token.as_deref()).await
                }
                CredentialSource::InstanceMetadata { endpoint } => {
                    metadata::instance_credentials(sts.http(), endpoint).await
                }
            }
        }
        .boxed()
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            CredentialSource::Static(_) => "static keys".to_string(),
            CredentialSource::Environment => "environment".to_string(),
            CredentialSource::AssumeRole { source, request } => {
                format!("role {} via {}", request.role_arn, source.describe())
            }
            CredentialSource::WebIdentity { role_arn, .. } => format!("web identity for {}", role_arn),
            CredentialSource::Container { .. } => "container credentials".to_string(),
            CredentialSource::InstanceMetadata { .. } => "instance metadata".to_string(),
        }
    }
}

/// What credential selection reads: variables and shared file contents
#[derive(Debug, Clone, Default)]
pub struct CredentialEnv {
    vars: HashMap<String, String>,
    profiles: HashMap<String, HashMap<String, String>>,
}

impl CredentialEnv {
    /// Build from explicit variables and `config`/`credentials` contents.
    /// Credentials-file keys win over config-file keys of the same profile.
    pub fn new<'a>(
        vars: impl IntoIterator<Item = (&'a str, &'a str)>,
        config: &str,
        credentials: &str,
    ) -> Self {
        let vars = vars
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut profiles = parse_ini(config);
        for (name, section) in parse_ini(credentials) {
            profiles.entry(name).or_default().extend(section);
        }
        Self { vars, profiles }
    }

    /// Snapshot of the process environment and the shared files
    pub fn from_process() -> Self {
        let vars: Vec<(&str, String)> = ENV_VARS
            .iter()
            .filter_map(|name| env::var(name).ok().map(|v| (*name, v)))
            .collect();

        let read = |var: &str, file: &str| -> String {
            let path = env::var(var)
                .ok()
                .map(PathBuf::from)
                .or_else(|| dirs::home_dir().map(|home| home.join(".aws").join(file)));
            match path {
                Some(path) => {
                    debug!("Reading AWS {} file {}", file, path.display());
                    std::fs::read_to_string(path).unwrap_or_default()
                }
                None => String::new(),
            }
        };
        let config = read("AWS_CONFIG_FILE", "config");
        let credentials = read("AWS_SHARED_CREDENTIALS_FILE", "credentials");

        Self::new(vars.iter().map(|(k, v)| (*k, v.as_str())), &config, &credentials)
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }
}

/// Resolve the ambient credentials for an optional named profile
pub async fn resolve_ambient(sts: &StsClient, profile: Option<&str>) -> Result<AwsCredentials, CredentialError> {
    let source = select_source(&CredentialEnv::from_process(), profile)?;
    info!("Using AWS credentials from {}", source.describe());
    source.resolve(sts).await
}

/// Pick the first credential source available, in chain order
pub fn select_source(env: &CredentialEnv, profile: Option<&str>) -> Result<CredentialSource, CredentialError> {
    if let Some(profile) = profile {
        return profile_source(env, profile);
    }

    if let (Some(key), Some(secret)) = (env.var("AWS_ACCESS_KEY_ID"), env.var("AWS_SECRET_ACCESS_KEY")) {
        let mut creds = AwsCredentials::new(key, secret);
        if let Some(token) = env.var("AWS_SESSION_TOKEN") {
            creds = creds.with_session_token(token);
        }
        return Ok(CredentialSource::Static(creds));
    }

    if let Some(profile) = env.var("AWS_PROFILE") {
        return profile_source(env, profile);
    }

    if let (Some(token_file), Some(role_arn)) = (env.var("AWS_WEB_IDENTITY_TOKEN_FILE"), env.var("AWS_ROLE_ARN")) {
        return Ok(CredentialSource::WebIdentity {
            role_arn: role_arn.to_string(),
            token_file: PathBuf::from(token_file),
            session_name: env
                .var("AWS_ROLE_SESSION_NAME")
                .unwrap_or(DEFAULT_SESSION_NAME)
                .to_string(),
        });
    }

    if env.has_profile("default") {
        return profile_source(env, "default");
    }

    if let Some(source) = container_source(env) {
        return Ok(source);
    }

    if env.var("AWS_EC2_METADATA_DISABLED").map(|v| v.eq_ignore_ascii_case("true")) != Some(true) {
        return Ok(CredentialSource::InstanceMetadata {
            endpoint: env
                .var("AWS_EC2_METADATA_SERVICE_ENDPOINT")
                .unwrap_or(DEFAULT_IMDS_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
        });
    }

    Err(CredentialError::MissingCredentials(
        "no environment keys, profile, web identity or container credentials".to_string(),
    ))
}

fn container_source(env: &CredentialEnv) -> Option<CredentialSource> {
    let url = match (
        env.var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI"),
        env.var("AWS_CONTAINER_CREDENTIALS_FULL_URI"),
    ) {
        (Some(relative), _) => format!("{}{}", DEFAULT_CONTAINER_HOST, relative),
        (None, Some(full)) => full.to_string(),
        (None, None) => return None,
    };
    Some(CredentialSource::Container {
        url,
        authorization: env.var("AWS_CONTAINER_AUTHORIZATION_TOKEN").map(str::to_string),
        authorization_file: env.var("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE").map(PathBuf::from),
    })
}

/// The credential source of a named profile
pub fn profile_source(env: &CredentialEnv, profile: &str) -> Result<CredentialSource, CredentialError> {
    profile_chain(env, profile, &mut HashSet::new())
}

fn profile_chain(
    env: &CredentialEnv,
    profile: &str,
    visited: &mut HashSet<String>,
) -> Result<CredentialSource, CredentialError> {
    let invalid = |message: String| CredentialError::InvalidProfile {
        profile: profile.to_string(),
        message,
    };
    if !visited.insert(profile.to_string()) {
        return Err(invalid("source_profile chain loops back to this profile".to_string()));
    }

    let section = env
        .profiles
        .get(profile)
        .ok_or_else(|| invalid("profile not found".to_string()))?;
    let get = |key: &str| section.get(key).map(String::as_str).filter(|v| !v.is_empty());

    let Some(role_arn) = get("role_arn") else {
        return static_keys(section).map_err(invalid);
    };

    let session_name = get("role_session_name").unwrap_or(DEFAULT_SESSION_NAME).to_string();

    if let Some(token_file) = get("web_identity_token_file") {
        return Ok(CredentialSource::WebIdentity {
            role_arn: role_arn.to_string(),
            token_file: PathBuf::from(token_file),
            session_name,
        });
    }

    let source = match (get("source_profile"), get("credential_source")) {
        (Some(_), Some(_)) => {
            return Err(invalid(
                "source_profile and credential_source are mutually exclusive".to_string(),
            ))
        }
        // a profile naming itself supplies its own static keys
        (Some(source), None) if source == profile => static_keys(section).map_err(invalid)?,
        (Some(source), None) => profile_chain(env, source, visited)?,
        (None, Some("Environment")) => CredentialSource::Environment,
        (None, Some("EcsContainer")) => container_source(env)
            .ok_or_else(|| invalid("credential_source EcsContainer without container variables".to_string()))?,
        (None, Some("Ec2InstanceMetadata")) => CredentialSource::InstanceMetadata {
            endpoint: env
                .var("AWS_EC2_METADATA_SERVICE_ENDPOINT")
                .unwrap_or(DEFAULT_IMDS_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
        },
        (None, Some(other)) => return Err(invalid(format!("unsupported credential_source '{}'", other))),
        (None, None) => {
            return Err(invalid(
                "role_arn requires source_profile, credential_source or web_identity_token_file".to_string(),
            ))
        }
    };

    let duration = match get("duration_seconds") {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| invalid(format!("duration_seconds '{}' is not a number", raw)))?,
        None => Duration::from_secs(3600),
    };

    Ok(CredentialSource::AssumeRole {
        source: Box::new(source),
        request: AssumeRoleRequest {
            role_arn: role_arn.to_string(),
            session_name,
            duration,
            external_id: get("external_id").map(str::to_string),
        },
    })
}

fn static_keys(section: &HashMap<String, String>) -> Result<CredentialSource, String> {
    let access_key_id = section
        .get("aws_access_key_id")
        .ok_or_else(|| "aws_access_key_id missing".to_string())?;
    let secret_access_key = section
        .get("aws_secret_access_key")
        .ok_or_else(|| "aws_secret_access_key missing".to_string())?;

    let mut creds = AwsCredentials::new(access_key_id.as_str(), secret_access_key.as_str());
    if let Some(token) = section.get("aws_session_token") {
        creds = creds.with_session_token(token.as_str());
    }
    Ok(CredentialSource::Static(creds))
}

fn from_env() -> Option<AwsCredentials> {
    let access_key_id = env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty())?;
    let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY")
        .ok()
        .filter(|v| !v.is_empty())?;

    let mut creds = AwsCredentials::new(access_key_id, secret_access_key);
    if let Some(token) = env::var("AWS_SESSION_TOKEN").ok().filter(|v| !v.is_empty()) {
        creds = creds.with_session_token(token);
    }
    Some(creds)
}

fn parse_ini(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            // ~/.aws/config style headers are "[profile name]"
            let name = name.trim();
            let name = name.strip_prefix("profile ").unwrap_or(name).trim();
            current = Some(name.to_string());
            sections.entry(name.to_string()).or_default();
            continue;
        }

        if let (Some(section), Some((key, value))) = (current.as_ref(), line.split_once('=')) {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREDENTIALS: &str = r#"
[default]
aws_access_key_id = AKIDDEFAULT
aws_secret_access_key = secret-default

# management account
[mgmt]
aws_access_key_id=AKIDMGMT
aws_secret_access_key=secret-mgmt
aws_session_token = token-mgmt

[broken]
aws_access_key_id = AKIDBROKEN
"#;

    const CONFIG: &str = r#"
[default]
region = eu-west-1

[profile audit]
role_arn = arn:aws:iam::222222222222:role/Audit
source_profile = default
external_id = audit-ext
role_session_name = audit-scan
duration_seconds = 900

[profile chained]
role_arn = arn:aws:iam::333333333333:role/ReadOnly
source_profile = audit

[profile self]
role_arn = arn:aws:iam::444444444444:role/Self
source_profile = self
aws_access_key_id = AKIDSELF
aws_secret_access_key = secret-self

[profile from-env]
role_arn = arn:aws:iam::555555555555:role/Ci
credential_source = Environment

[profile irsa]
role_arn = arn:aws:iam::666666666666:role/Scanner
web_identity_token_file = /var/run/secrets/eks/token

[profile loop-a]
role_arn = arn:aws:iam::1:role/A
source_profile = loop-b

[profile loop-b]
role_arn = arn:aws:iam::1:role/B
source_profile = loop-a

[profile dangling]
role_arn = arn:aws:iam::1:role/Dangling

[profile sso]
role_arn = arn:aws:iam::1:role/Sso
credential_source = Sso
"#;

    fn files(vars: &[(&'static str, &'static str)]) -> CredentialEnv {
        CredentialEnv::new(vars.iter().copied(), CONFIG, CREDENTIALS)
    }

    fn static_key(source: &CredentialSource) -> &str {
        match source {
            CredentialSource::Static(creds) => &creds.access_key_id,
            other => panic!("expected static keys, got {:?}", other),
        }
    }

    #[test]
    fn test_static_profiles() {
        let env = files(&[]);
        let source = profile_source(&env, "default").unwrap();
        assert_eq!(static_key(&source), "AKIDDEFAULT");

        match profile_source(&env, "mgmt").unwrap() {
            CredentialSource::Static(creds) => {
                assert_eq!(creds.secret_access_key, "secret-mgmt");
                assert_eq!(creds.session_token.as_deref(), Some("token-mgmt"));
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_role_profile_with_source_profile() {
        let env = files(&[]);
        match profile_source(&env, "audit").unwrap() {
            CredentialSource::AssumeRole { source, request } => {
                assert_eq!(static_key(&source), "AKIDDEFAULT");
                assert_eq!(
                    request,
                    AssumeRoleRequest {
                        role_arn: "arn:aws:iam::222222222222:role/Audit".to_string(),
                        session_name: "audit-scan".to_string(),
                        duration: Duration::from_secs(900),
                        external_id: Some("audit-ext".to_string()),
                    }
                );
            }
            other => panic!("unexpected source {:?}", other),
        }

        let chained = profile_source(&env, "chained").unwrap();
        assert_eq!(
            chained.describe(),
            "role arn:aws:iam::333333333333:role/ReadOnly via role arn:aws:iam::222222222222:role/Audit via static keys"
        );
        match chained {
            CredentialSource::AssumeRole { request, .. } => {
                assert_eq!(request.session_name, DEFAULT_SESSION_NAME);
                assert_eq!(request.duration, Duration::from_secs(3600));
                assert_eq!(request.external_id, None);
            }
            other => panic!("unexpected source {:?}", other),
        }

        match profile_source(&env, "self").unwrap() {
            CredentialSource::AssumeRole { source, .. } => assert_eq!(static_key(&source), "AKIDSELF"),
            other => panic!("unexpected source {:?}", other),
        }

        match profile_source(&env, "from-env").unwrap() {
            CredentialSource::AssumeRole { source, .. } => {
                assert_eq!(*source, CredentialSource::Environment)
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_web_identity_profile() {
        assert_eq!(
            profile_source(&files(&[]), "irsa").unwrap(),
            CredentialSource::WebIdentity {
                role_arn: "arn:aws:iam::666666666666:role/Scanner".to_string(),
                token_file: PathBuf::from("/var/run/secrets/eks/token"),
                session_name: DEFAULT_SESSION_NAME.to_string(),
            }
        );
    }

    #[test]
    fn test_profile_errors() {
        let env = files(&[]);
        let err = profile_source(&env, "missing").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidProfile { .. }));

        let err = profile_source(&env, "broken").unwrap_err();
        assert!(err.to_string().contains("aws_secret_access_key"));

        let err = profile_source(&env, "loop-a").unwrap_err();
        assert!(err.to_string().contains("loops back"));

        let err = profile_source(&env, "dangling").unwrap_err();
        assert!(err.to_string().contains("requires source_profile"));

        let err = profile_source(&env, "sso").unwrap_err();
        assert!(err.to_string().contains("unsupported credential_source 'Sso'"));
    }

    #[test]
    fn test_web_identity_from_env() {
        let vars = [
            ("AWS_WEB_IDENTITY_TOKEN_FILE", "/var/run/secrets/token"),
            ("AWS_ROLE_ARN", "arn:aws:iam::123456789012:role/Scanner"),
            ("AWS_ROLE_SESSION_NAME", "scanner-pod"),
        ];
        let env = CredentialEnv::new(vars, "", "");
        assert_eq!(
            select_source(&env, None).unwrap(),
            CredentialSource::WebIdentity {
                role_arn: "arn:aws:iam::123456789012:role/Scanner".to_string(),
                token_file: PathBuf::from("/var/run/secrets/token"),
                session_name: "scanner-pod".to_string(),
            }
        );

        // static keys take precedence
        let env = CredentialEnv::new(
            vars.into_iter()
                .chain([("AWS_ACCESS_KEY_ID", "AKIDENV"), ("AWS_SECRET_ACCESS_KEY", "s")]),
            "",
            "",
        );
        assert_eq!(static_key(&select_source(&env, None).unwrap()), "AKIDENV");
    }

    #[test]
    fn test_chain_order() {
        let env = files(&[("AWS_PROFILE", "mgmt")]);
        assert_eq!(static_key(&select_source(&env, None).unwrap()), "AKIDMGMT");
        assert_eq!(static_key(&select_source(&env, Some("default")).unwrap()), "AKIDDEFAULT");

        let env = files(&[("AWS_ACCESS_KEY_ID", ""), ("AWS_SECRET_ACCESS_KEY", "")]);
        assert_eq!(static_key(&select_source(&env, None).unwrap()), "AKIDDEFAULT");

        let env = CredentialEnv::new(
            [
                ("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/credentials/abc"),
                ("AWS_CONTAINER_AUTHORIZATION_TOKEN", "Bearer x"),
            ],
            "",
            "",
        );
        assert_eq!(
            select_source(&env, None).unwrap(),
            CredentialSource::Container {
                url: "http://169.254.170.2/v2/credentials/abc".to_string(),
                authorization: Some("Bearer x".to_string()),
                authorization_file: None,
            }
        );

        let env = CredentialEnv::new([("AWS_EC2_METADATA_SERVICE_ENDPOINT", "http://[fd00:ec2::254]/")], "", "");
        assert_eq!(
            select_source(&env, None).unwrap(),
            CredentialSource::InstanceMetadata {
                endpoint: "http://[fd00:ec2::254]".to_string()
            }
        );

        let env = CredentialEnv::new([("AWS_EC2_METADATA_DISABLED", "true")], "", "");
        assert!(matches!(
            select_source(&env, None).unwrap_err(),
            CredentialError::MissingCredentials(_)
        ));
    }

    #[tokio::test]
    async fn test_resolve_without_network() {
        let sts = StsClient::new(
            crate::aws::AwsHttpClient::new(Duration::from_secs(1)).unwrap(),
            "us-east-1",
        );

        let creds = profile_source(&files(&[]), "mgmt").unwrap().resolve(&sts).await.unwrap();
        assert_eq!(creds.access_key_id, "AKIDMGMT");

        let dir = tempfile::tempdir().unwrap();
        let source = CredentialSource::WebIdentity {
            role_arn: "arn:aws:iam::1:role/x".to_string(),
            token_file: dir.path().join("missing-token"),
            session_name: DEFAULT_SESSION_NAME.to_string(),
        };
        let err = source.resolve(&sts).await.unwrap_err();
        assert!(err.to_string().contains("web identity token"));
    }

    #[test]
    fn test_credentials_expiry() {
        let creds = AwsCredentials::new("AKID", "secret")
            .with_expiry(Utc::now() + chrono::Duration::seconds(3600));

        assert!(!creds.is_expired());
        assert!(creds.time_until_expiry().unwrap() > Duration::from_secs(3500));

        let stale = AwsCredentials::new("AKID", "secret")
            .with_expiry(Utc::now() - chrono::Duration::seconds(1));
        assert!(stale.is_expired());
        assert_eq!(stale.time_until_expiry(), Some(Duration::ZERO));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = AwsCredentials::new("AKID", "super-secret").with_session_token("tok");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("tok\""));
    }
}
