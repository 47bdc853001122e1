use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::hash::{compute_hash, is_change_id};
use super::{request_path, ApprovalOutcome, PolicyKind, Request, RequestKind, TYPE_FIELD};
use crate::ceremony::UnsealRelay;
use crate::error::{ControlError, ControlResult};
use crate::vault::{AuthInfo, Fields, SecretsService};

/// Sole entry point for request CRUD. Dispatches on the `Type` discriminator and re-checks the
/// content hash of every record it loads.
pub struct RequestRegistry {
    vault: Arc<dyn SecretsService>,
    kinds: HashMap<String, Arc<dyn RequestKind>>,
}

impl RequestRegistry {
    /// Registry with the policy variant registered.
    pub fn new(vault: Arc<dyn SecretsService>, relay: Arc<UnsealRelay>) -> Self {
        Self::empty(vault.clone()).with_kind(Arc::new(PolicyKind::new(vault, relay)))
    }

    pub fn empty(vault: Arc<dyn SecretsService>) -> Self {
        Self {
            vault,
            kinds: HashMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: Arc<dyn RequestKind>) -> Self {
        self.kinds
            .insert(kind.type_name().to_ascii_lowercase(), kind);
        self
    }

    fn kind_for(&self, type_name: &str) -> Option<&Arc<dyn RequestKind>> {
        self.kinds.get(&type_name.to_ascii_lowercase())
    }

    pub async fn add(&self, auth: &AuthInfo, raw: &Fields) -> ControlResult<String> {
        let type_name = match raw.get(TYPE_FIELD) {
            Some(Value::String(t)) if !t.is_empty() => t,
            _ => {
                return Err(ControlError::InputValidation(
                    "Type field is empty".into(),
                ))
            }
        };
        let kind = self.kind_for(type_name).ok_or_else(|| {
            ControlError::InputValidation(format!("unsupported request type: {type_name}"))
        })?;
        kind.create(auth, raw).await
    }

    pub async fn get(&self, auth: &AuthInfo, change_id: &str) -> ControlResult<Box<dyn Request>> {
        let request = self.load(change_id).await?;
        request.verify(auth).await?;
        Ok(request)
    }

    pub async fn remove(&self, auth: &AuthInfo, change_id: &str) -> ControlResult<()> {
        let request = self.load(change_id).await?;
        request.reject(auth, change_id).await
    }

    /// Loads and verifies the request, then records `approver`'s approval.
    pub async fn approve(
        &self,
        auth: &AuthInfo,
        change_id: &str,
        approver: &str,
    ) -> ControlResult<ApprovalOutcome> {
        let request = self.get(auth, change_id).await?;
        request.approve(approver, change_id).await
    }

    pub fn is_root_only(request: &dyn Request) -> bool {
        request.is_root_only()
    }

    /// Reads, decodes and hash-checks the record stored under `change_id`.
    async fn load(&self, change_id: &str) -> ControlResult<Box<dyn Request>> {
        if !is_change_id(change_id) {
            return Err(ControlError::InputValidation(format!(
                "malformed change id: {change_id}"
            )));
        }
        let record = self
            .vault
            .read(&request_path(change_id))
            .await?
            .ok_or(ControlError::NotFound)?;

        let type_name = record
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ControlError::IntegrityMismatch("stored record has no Type".into()))?;
        let kind = self.kind_for(type_name).ok_or_else(|| {
            ControlError::IntegrityMismatch(format!("stored record has unknown type: {type_name}"))
        })?;

        let request = kind.decode(record)?;
        let recomputed = compute_hash(&request.fields()?)?;
        if recomputed != change_id {
            return Err(ControlError::IntegrityMismatch(
                "hashes do not match".into(),
            ));
        }
        Ok(request)
    }
}
