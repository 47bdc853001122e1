use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use zeroize::Zeroizing;

use crate::error::{ControlError, ControlResult};
use crate::vault::{Fields, SecretsService};

/// Storage prefix for unseal buckets.
pub const BUCKET_PREFIX: &str = "unseal_wrapping_tokens";
pub const BUCKET_FIELD: &str = "wrapping_tokens";
pub const SHARE_FIELD: &str = "unseal_token";
pub const DEFAULT_WRAP_TTL: Duration = Duration::from_secs(60 * 60);

const DELIMITER: char = ';';

pub fn bucket_path(change_id: &str) -> String {
    format!("{BUCKET_PREFIX}/{change_id}")
}

/// Collects unseal shares from independent contributors as single-use wrapping tokens, so no
/// share is ever stored in the clear, and hands them back in submission order.
pub struct UnsealRelay {
    vault: Arc<dyn SecretsService>,
    wrap_ttl: Duration,
    // One entry per ChangeID that is held or waited on in this process.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UnsealRelay {
    pub fn new(vault: Arc<dyn SecretsService>) -> Self {
        Self {
            vault,
            wrap_ttl: DEFAULT_WRAP_TTL,
            locks: DashMap::new(),
        }
    }

    pub fn with_wrap_ttl(mut self, ttl: Duration) -> Self {
        self.wrap_ttl = ttl;
        self
    }

    /// Takes the per-ChangeID lock. Everything done through the returned guard is exclusive
    /// with every other holder for the same `change_id` in this process.
    pub async fn hold(&self, change_id: &str) -> BucketGuard<'_> {
        let lock = self
            .locks
            .entry(change_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        BucketGuard {
            relay: self,
            change_id: change_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Wraps `share`, appends its token to the bucket for `change_id` and returns every token
    /// collected so far.
    pub async fn append_unseal(&self, change_id: &str, share: &str) -> ControlResult<Vec<String>> {
        self.hold(change_id).await.append(share).await
    }

    /// Tokens currently in the bucket for `change_id`; empty when no bucket exists.
    pub async fn tokens(&self, change_id: &str) -> ControlResult<Vec<String>> {
        let Some(record) = self.vault.read(&bucket_path(change_id)).await? else {
            return Ok(Vec::new());
        };
        let raw = record
            .get(BUCKET_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();
        if raw.is_empty() {
            return Err(ControlError::CorruptState(format!(
                "could not find key '{BUCKET_FIELD}' in {}",
                bucket_path(change_id)
            )));
        }
        Ok(raw.split(DELIMITER).map(str::to_string).collect())
    }

    /// Redeems every token in order. The first token that cannot be redeemed fails the whole
    /// call and nothing redeemed so far is returned.
    pub async fn unwrap_unseals(&self, tokens: &[String]) -> ControlResult<Vec<Zeroizing<String>>> {
        let mut shares = Vec::with_capacity(tokens.len());
        for (position, token) in tokens.iter().enumerate() {
            let mut data = match self.vault.unwrap(token).await {
                Ok(data) => data,
                Err(source) => return Err(ControlError::ExpiredShare { position, source }),
            };
            match data.remove(SHARE_FIELD) {
                Some(Value::String(share)) => shares.push(Zeroizing::new(share)),
                _ => {
                    return Err(ControlError::Protocol(format!(
                        "wrapping token #{position} did not carry '{SHARE_FIELD}'"
                    )))
                }
            }
        }
        Ok(shares)
    }

    /// Deletes the bucket for `change_id`.
    pub async fn discard(&self, change_id: &str) -> ControlResult<()> {
        self.hold(change_id).await.discard().await
    }

    /// Number of ChangeIDs with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }

    async fn append_locked(&self, change_id: &str, share: &str) -> ControlResult<Vec<String>> {
        let mut tokens = self.tokens(change_id).await?;

        let mut fields = Fields::new();
        fields.insert(SHARE_FIELD.to_string(), Value::String(share.to_string()));
        let token = self.vault.wrap(self.wrap_ttl, fields).await?;
        tokens.push(token);

        let mut bucket = Fields::new();
        bucket.insert(
            BUCKET_FIELD.to_string(),
            Value::String(tokens.join(&DELIMITER.to_string())),
        );
        self.vault.write(&bucket_path(change_id), bucket).await?;
        tracing::info!(change_id, progress = tokens.len(), "unseal share recorded");
        Ok(tokens)
    }
}

/// Exclusive access to one bucket, see [`UnsealRelay::hold`].
pub struct BucketGuard<'a> {
    relay: &'a UnsealRelay,
    change_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl BucketGuard<'_> {
    pub async fn append(&self, share: &str) -> ControlResult<Vec<String>> {
        self.relay.append_locked(&self.change_id, share).await
    }

    pub async fn discard(&self) -> ControlResult<()> {
        self.relay.vault.delete(&bucket_path(&self.change_id)).await?;
        Ok(())
    }
}

impl Drop for BucketGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Anyone waiting on or about to take this mutex still holds a clone of it.
        self.relay
            .locks
            .remove_if(&self.change_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
