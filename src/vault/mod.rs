//! Boundary to the secrets-holding service.
//!
//! Everything the change-control core needs from Vault goes through [`SecretsService`]:
//! scoped key-value storage, the root generation ceremony, response wrapping, and the handful
//! of token and policy calls the policy variant makes. [`VaultClient`] talks to a real server
//! over HTTP; [`InMemoryVault`] simulates one inside the process.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

mod http;
mod memory;

pub use http::VaultClient;
pub use memory::InMemoryVault;

/// Field map as stored and returned by the service.
pub type Fields = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("vault transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vault returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("vault response missing `{0}`")]
    MissingField(&'static str),
    #[error("invalid vault address: {0}")]
    Address(#[from] url::ParseError),
}

impl ServiceError {
    pub(crate) fn api(status: u16, message: impl Into<String>) -> Self {
        ServiceError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::Api { status, .. } => Some(*status),
            ServiceError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Opaque caller capability. Only the service ever looks inside.
#[derive(Clone)]
pub struct AuthInfo {
    token: String,
}

impl AuthInfo {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInfo").field("token", &"<redacted>").finish()
    }
}

/// What `auth/token/lookup-self` reports about a caller.
#[derive(Debug, Clone, Default)]
pub struct TokenInfo {
    pub accessor: String,
    pub display_name: String,
    pub policies: Vec<String>,
}

/// Progress of a root generation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegenerationStatus {
    pub nonce: String,
    /// Empty until the threshold of shares has been submitted.
    pub encoded_token: String,
    pub progress: usize,
    pub required: usize,
    pub complete: bool,
}

#[async_trait]
pub trait SecretsService: Send + Sync {
    /// Reads a record from the scoped store. `Ok(None)` when nothing lives at `path`.
    async fn read(&self, path: &str) -> Result<Option<Fields>, ServiceError>;

    async fn write(&self, path: &str, fields: Fields) -> Result<(), ServiceError>;

    async fn delete(&self, path: &str) -> Result<(), ServiceError>;

    async fn initiate_regeneration(&self, otp: &str) -> Result<RegenerationStatus, ServiceError>;

    async fn submit_share(
        &self,
        share: &str,
        nonce: &str,
    ) -> Result<RegenerationStatus, ServiceError>;

    async fn cancel_regeneration(&self) -> Result<(), ServiceError>;

    /// Wraps `fields` behind a single-use token that expires after `ttl`.
    async fn wrap(&self, ttl: Duration, fields: Fields) -> Result<String, ServiceError>;

    /// Redeems a wrapping token. Fails once the token was consumed or has expired.
    async fn unwrap(&self, token: &str) -> Result<Fields, ServiceError>;

    /// Number of unseal shares needed to reconstruct the master key.
    async fn seal_threshold(&self) -> Result<usize, ServiceError>;

    async fn lookup_self(&self, auth: &AuthInfo) -> Result<TokenInfo, ServiceError>;

    /// Current rules of an ACL policy, `None` if the policy does not exist.
    async fn read_policy(&self, name: &str) -> Result<Option<String>, ServiceError>;

    async fn write_policy(&self, token: &str, name: &str, rules: &str)
        -> Result<(), ServiceError>;

    async fn delete_policy(&self, token: &str, name: &str) -> Result<(), ServiceError>;

    async fn revoke_self(&self, token: &str) -> Result<(), ServiceError>;
}
