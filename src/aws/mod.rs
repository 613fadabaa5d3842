//! AWS Provider Layer
//!
//! Minimal signed access to the AWS APIs an inventory reads:
//! - SigV4 request signing
//! - Query, ec2, json and rest wire protocols
//! - Ambient credential chain: environment, shared profiles (including
//!   role profiles), web identity, container and instance metadata
//! - STS role assumption

pub mod catalog;
pub mod client;
pub mod credentials;
pub mod metadata;
pub mod protocol;
pub mod signer;
pub mod sts;
pub mod xml;

pub use client::AwsHttpClient;
pub use credentials::{resolve_ambient, select_source, AwsCredentials, CredentialEnv, CredentialSource};
pub use sts::{AssumeRoleRequest, CallerIdentity, StsClient};
