#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use changeguard::vault::{Fields, RegenerationStatus, ServiceError, TokenInfo};
use changeguard::{AuthInfo, InMemoryVault, SecretsService};

/// Delegates to an [`InMemoryVault`] but gives up the thread before every call, the way a
/// networked backend would, so concurrent callers actually interleave.
pub struct SlowVault {
    inner: Arc<InMemoryVault>,
    delay: Duration,
    fail_cancel: AtomicBool,
}

impl SlowVault {
    pub fn new(inner: Arc<InMemoryVault>) -> Self {
        Self {
            inner,
            delay: Duration::from_millis(2),
            fail_cancel: AtomicBool::new(false),
        }
    }

    /// Makes every `cancel_regeneration` fail without reaching the backend.
    pub fn failing_cancel(self) -> Self {
        self.fail_cancel.store(true, Ordering::SeqCst);
        self
    }

    async fn pause(&self) {
        tokio::task::yield_now().await;
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl SecretsService for SlowVault {
    async fn read(&self, path: &str) -> Result<Option<Fields>, ServiceError> {
        self.pause().await;
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, fields: Fields) -> Result<(), ServiceError> {
        self.pause().await;
        self.inner.write(path, fields).await
    }

    async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        self.pause().await;
        self.inner.delete(path).await
    }

    async fn initiate_regeneration(&self, otp: &str) -> Result<RegenerationStatus, ServiceError> {
        self.pause().await;
        self.inner.initiate_regeneration(otp).await
    }

    async fn submit_share(
        &self,
        share: &str,
        nonce: &str,
    ) -> Result<RegenerationStatus, ServiceError> {
        self.pause().await;
        self.inner.submit_share(share, nonce).await
    }

    async fn cancel_regeneration(&self) -> Result<(), ServiceError> {
        self.pause().await;
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(ServiceError::Api {
                status: 503,
                message: "Vault is sealed".into(),
            });
        }
        self.inner.cancel_regeneration().await
    }

    async fn wrap(&self, ttl: Duration, fields: Fields) -> Result<String, ServiceError> {
        self.pause().await;
        self.inner.wrap(ttl, fields).await
    }

    async fn unwrap(&self, token: &str) -> Result<Fields, ServiceError> {
        self.pause().await;
        self.inner.unwrap(token).await
    }

    async fn seal_threshold(&self) -> Result<usize, ServiceError> {
        self.pause().await;
        self.inner.seal_threshold().await
    }

    async fn lookup_self(&self, auth: &AuthInfo) -> Result<TokenInfo, ServiceError> {
        self.pause().await;
        self.inner.lookup_self(auth).await
    }

    async fn read_policy(&self, name: &str) -> Result<Option<String>, ServiceError> {
        self.pause().await;
        self.inner.read_policy(name).await
    }

    async fn write_policy(
        &self,
        token: &str,
        name: &str,
        rules: &str,
    ) -> Result<(), ServiceError> {
        self.pause().await;
        self.inner.write_policy(token, name, rules).await
    }

    async fn delete_policy(&self, token: &str, name: &str) -> Result<(), ServiceError> {
        self.pause().await;
        self.inner.delete_policy(token, name).await
    }

    async fn revoke_self(&self, token: &str) -> Result<(), ServiceError> {
        self.pause().await;
        self.inner.revoke_self(token).await
    }
}
