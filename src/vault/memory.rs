//! Process-local stand-in for a Vault server.
//!
//! Mirrors the subset of the API the change-control core exercises: a scoped store, root
//! generation with a fixed set of unseal shares, single-use expiring response wrapping, ACL
//! policies and token lookups. Root generation masks the minted token with the caller's OTP
//! exactly the way a real server does, so the full ceremony can run without a network.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AuthInfo, Fields, RegenerationStatus, SecretsService, ServiceError, TokenInfo};

const ROOT_TOKEN_BYTES: usize = 16;

#[derive(Default)]
struct State {
    store: HashMap<String, Fields>,
    wrapped: HashMap<String, WrappedEntry>,
    policies: HashMap<String, String>,
    tokens: HashMap<String, TokenInfo>,
    attempt: Option<Attempt>,
}

struct WrappedEntry {
    fields: Fields,
    expires_at: DateTime<Utc>,
}

struct Attempt {
    nonce: String,
    otp: Vec<u8>,
    submitted: HashSet<String>,
}

pub struct InMemoryVault {
    shares: Vec<String>,
    threshold: usize,
    state: Mutex<State>,
}

impl InMemoryVault {
    /// `shares` are the valid unseal keys; any `threshold` distinct ones complete a ceremony.
    pub fn new(shares: Vec<String>, threshold: usize) -> Self {
        Self {
            shares,
            threshold,
            state: Mutex::new(State::default()),
        }
    }

    /// Registers a caller token so `lookup_self` resolves it.
    pub fn with_token(self, token: &str, display_name: &str, policies: &[&str]) -> Self {
        self.lock().tokens.insert(
            token.to_string(),
            TokenInfo {
                accessor: Uuid::new_v4().to_string(),
                display_name: display_name.to_string(),
                policies: policies.iter().map(|p| p.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_policy(self, name: &str, rules: &str) -> Self {
        self.lock()
            .policies
            .insert(name.to_string(), rules.to_string());
        self
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        self.lock().policies.get(name).cloned()
    }

    pub fn stored(&self, path: &str) -> Option<Fields> {
        self.lock().store.get(path).cloned()
    }

    pub fn generation_in_progress(&self) -> bool {
        self.lock().attempt.is_some()
    }

    /// Number of tokens carrying the root policy, including ones minted by ceremonies.
    pub fn live_root_tokens(&self) -> usize {
        self.lock()
            .tokens
            .values()
            .filter(|info| info.policies.iter().any(|p| p == "root"))
            .count()
    }

    /// Forces a wrapping token past its TTL.
    pub fn expire_wrapping_token(&self, token: &str) {
        if let Some(entry) = self.lock().wrapped.get_mut(token) {
            entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic in another test thread must not cascade into every later call.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_root(state: &State, token: &str) -> Result<(), ServiceError> {
        match state.tokens.get(token) {
            Some(info) if info.policies.iter().any(|p| p == "root") => Ok(()),
            _ => Err(ServiceError::api(403, "permission denied")),
        }
    }

    fn status(&self, attempt: &Attempt) -> RegenerationStatus {
        RegenerationStatus {
            nonce: attempt.nonce.clone(),
            encoded_token: String::new(),
            progress: attempt.submitted.len(),
            required: self.threshold,
            complete: false,
        }
    }
}

#[async_trait]
impl SecretsService for InMemoryVault {
    async fn read(&self, path: &str) -> Result<Option<Fields>, ServiceError> {
        Ok(self.lock().store.get(path).cloned())
    }

    async fn write(&self, path: &str, fields: Fields) -> Result<(), ServiceError> {
        self.lock().store.insert(path.to_string(), fields);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        self.lock().store.remove(path);
        Ok(())
    }

    async fn initiate_regeneration(&self, otp: &str) -> Result<RegenerationStatus, ServiceError> {
        let mut state = self.lock();
        if state.attempt.is_some() {
            return Err(ServiceError::api(400, "root generation already in progress"));
        }
        let otp = STANDARD
            .decode(otp)
            .map_err(|err| ServiceError::api(400, format!("error decoding otp: {err}")))?;
        if otp.len() != ROOT_TOKEN_BYTES {
            return Err(ServiceError::api(400, "otp is not the expected length"));
        }
        let attempt = Attempt {
            nonce: Uuid::new_v4().to_string(),
            otp,
            submitted: HashSet::new(),
        };
        let status = self.status(&attempt);
        state.attempt = Some(attempt);
        Ok(status)
    }

    async fn submit_share(
        &self,
        share: &str,
        nonce: &str,
    ) -> Result<RegenerationStatus, ServiceError> {
        let mut state = self.lock();
        let Some(attempt) = state.attempt.as_mut() else {
            return Err(ServiceError::api(400, "no root generation in progress"));
        };
        if attempt.nonce != nonce {
            return Err(ServiceError::api(400, "incorrect nonce supplied"));
        }
        if !self.shares.iter().any(|known| known == share) {
            return Err(ServiceError::api(400, "invalid key"));
        }
        if !attempt.submitted.insert(share.to_string()) {
            return Err(ServiceError::api(400, "duplicate key"));
        }
        if attempt.submitted.len() < self.threshold {
            return Ok(self.status(attempt));
        }

        let Some(attempt) = state.attempt.take() else {
            return Err(ServiceError::api(500, "root generation state lost"));
        };
        let root = Uuid::new_v4();
        let encoded: Vec<u8> = root
            .as_bytes()
            .iter()
            .zip(attempt.otp.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        state.tokens.insert(
            root.to_string(),
            TokenInfo {
                accessor: Uuid::new_v4().to_string(),
                display_name: "root".to_string(),
                policies: vec!["root".to_string()],
            },
        );
        Ok(RegenerationStatus {
            nonce: attempt.nonce,
            encoded_token: STANDARD.encode(encoded),
            progress: attempt.submitted.len(),
            required: self.threshold,
            complete: true,
        })
    }

    async fn cancel_regeneration(&self) -> Result<(), ServiceError> {
        self.lock().attempt = None;
        Ok(())
    }

    async fn wrap(&self, ttl: Duration, fields: Fields) -> Result<String, ServiceError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|err| ServiceError::api(400, format!("invalid wrap ttl: {err}")))?;
        let token = format!("s.{}", Uuid::new_v4().simple());
        self.lock().wrapped.insert(
            token.clone(),
            WrappedEntry {
                fields,
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(token)
    }

    async fn unwrap(&self, token: &str) -> Result<Fields, ServiceError> {
        let entry = self.lock().wrapped.remove(token);
        match entry {
            Some(entry) if entry.expires_at > Utc::now() => Ok(entry.fields),
            _ => Err(ServiceError::api(
                400,
                "wrapping token is not valid or does not exist",
            )),
        }
    }

    async fn seal_threshold(&self) -> Result<usize, ServiceError> {
        Ok(self.threshold)
    }

    async fn lookup_self(&self, auth: &AuthInfo) -> Result<TokenInfo, ServiceError> {
        self.lock()
            .tokens
            .get(auth.token())
            .cloned()
            .ok_or_else(|| ServiceError::api(403, "permission denied"))
    }

    async fn read_policy(&self, name: &str) -> Result<Option<String>, ServiceError> {
        Ok(self.lock().policies.get(name).cloned())
    }

    async fn write_policy(
        &self,
        token: &str,
        name: &str,
        rules: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.lock();
        Self::require_root(&state, token)?;
        state.policies.insert(name.to_string(), rules.to_string());
        Ok(())
    }

    async fn delete_policy(&self, token: &str, name: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        Self::require_root(&state, token)?;
        state.policies.remove(name);
        Ok(())
    }

    async fn revoke_self(&self, token: &str) -> Result<(), ServiceError> {
        match self.lock().tokens.remove(token) {
            Some(_) => Ok(()),
            None => Err(ServiceError::api(403, "permission denied")),
        }
    }
}
