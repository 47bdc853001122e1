use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

use super::{compute_hash, request_path, ApprovalOutcome, Request, RequestKind};
use crate::ceremony::{RootTokenGenerator, UnsealRelay};
use crate::error::{ControlError, ControlResult};
use crate::vault::{AuthInfo, Fields, SecretsService};

pub const POLICY_TYPE: &str = "Policy";

/// Proposed change to one ACL policy. Applying it needs a root token, so approvals are unseal
/// shares that feed a root generation ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PolicyRequest {
    #[serde(rename = "Type")]
    pub kind: String,
    pub name: String,
    /// Rules in force when the request was made; empty if the policy did not exist.
    pub previous: String,
    /// Rules to apply; empty deletes the policy.
    pub proposed: String,
    pub requester: String,
    /// Unseal shares needed before the change can be applied.
    pub required: usize,
}

/// Registers the policy variant with a [`RequestRegistry`](super::RequestRegistry).
#[derive(Clone)]
pub struct PolicyKind {
    vault: Arc<dyn SecretsService>,
    relay: Arc<UnsealRelay>,
    generator: RootTokenGenerator,
}

impl PolicyKind {
    pub fn new(vault: Arc<dyn SecretsService>, relay: Arc<UnsealRelay>) -> Self {
        Self {
            generator: RootTokenGenerator::new(vault.clone()),
            vault,
            relay,
        }
    }
}

#[async_trait]
impl RequestKind for PolicyKind {
    fn type_name(&self) -> &'static str {
        POLICY_TYPE
    }

    async fn create(&self, auth: &AuthInfo, raw: &Fields) -> ControlResult<String> {
        let name = match raw.get("Name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                return Err(ControlError::InputValidation(
                    "Name must be a non-empty string".into(),
                ))
            }
        };
        if !is_policy_name(&name) {
            return Err(ControlError::InputValidation(format!(
                "Name '{name}' may only contain letters, digits, '-', '_' and '.'"
            )));
        }
        let proposed = match raw.get("Rules") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(rules)) => rules.clone(),
            Some(_) => {
                return Err(ControlError::InputValidation(
                    "Rules must be a string".into(),
                ))
            }
        };

        let requester = self
            .vault
            .lookup_self(auth)
            .await
            .map_err(|err| ControlError::Unauthorized(err.to_string()))?;
        let previous = self.vault.read_policy(&name).await?.unwrap_or_default();
        let required = self.vault.seal_threshold().await?;

        let request = PolicyRequest {
            kind: POLICY_TYPE.to_string(),
            name,
            previous,
            proposed,
            requester: requester.display_name,
            required,
        };
        let change_id = compute_hash(&request)?;
        self.vault
            .write(&request_path(&change_id), to_fields(&request)?)
            .await?;
        tracing::info!(
            change_id = %change_id,
            policy = %request.name,
            required,
            "policy change requested"
        );
        Ok(change_id)
    }

    fn decode(&self, record: Fields) -> ControlResult<Box<dyn Request>> {
        let request: PolicyRequest = serde_json::from_value(Value::Object(record))
            .map_err(|err| ControlError::IntegrityMismatch(format!("malformed record: {err}")))?;
        Ok(Box::new(PolicyChange {
            request,
            kind: self.clone(),
        }))
    }
}

/// Policy names end up as a URL path segment, so anything beyond the plain set is refused.
fn is_policy_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn to_fields(request: &PolicyRequest) -> ControlResult<Fields> {
    match serde_json::to_value(request) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ControlError::Protocol("request did not serialize to a map".into())),
        Err(err) => Err(ControlError::Protocol(err.to_string())),
    }
}

/// A stored [`PolicyRequest`] together with what it needs to act.
pub struct PolicyChange {
    request: PolicyRequest,
    kind: PolicyKind,
}

impl PolicyChange {
    pub fn request(&self) -> &PolicyRequest {
        &self.request
    }

    async fn apply(&self, shares: &[String]) -> ControlResult<()> {
        let root = self.kind.generator.generate_root_token(shares).await?;
        let applied = if self.request.proposed.is_empty() {
            self.kind
                .vault
                .delete_policy(root.expose(), &self.request.name)
                .await
        } else {
            self.kind
                .vault
                .write_policy(root.expose(), &self.request.name, &self.request.proposed)
                .await
        };
        let revoked = self.kind.vault.revoke_self(root.expose()).await;
        applied?;
        revoked?;
        Ok(())
    }
}

#[async_trait]
impl Request for PolicyChange {
    fn kind(&self) -> &str {
        &self.request.kind
    }

    fn is_root_only(&self) -> bool {
        true
    }

    fn fields(&self) -> ControlResult<Value> {
        to_fields(&self.request).map(Value::Object)
    }

    async fn verify(&self, auth: &AuthInfo) -> ControlResult<()> {
        self.kind
            .vault
            .lookup_self(auth)
            .await
            .map_err(|err| ControlError::Unauthorized(err.to_string()))?;

        let current = self
            .kind
            .vault
            .read_policy(&self.request.name)
            .await?
            .unwrap_or_default();
        if current != self.request.previous {
            return Err(ControlError::NotActionable(format!(
                "policy '{}' changed since this request was made",
                self.request.name
            )));
        }

        let collected = self.kind.relay.tokens(&compute_hash(&self.request)?).await?;
        if collected.len() >= self.request.required {
            return Err(ControlError::NotActionable(
                "request already has every approval it needs".into(),
            ));
        }
        Ok(())
    }

    async fn approve(&self, approver: &str, change_id: &str) -> ControlResult<ApprovalOutcome> {
        let bucket = self.kind.relay.hold(change_id).await;
        // Another approver may have applied the change while we waited for the bucket.
        if self.kind.vault.read(&request_path(change_id)).await?.is_none() {
            return Err(ControlError::NotFound);
        }
        let tokens = bucket.append(approver).await?;
        let required = self.request.required;
        if tokens.len() < required {
            return Ok(ApprovalOutcome::Pending {
                progress: tokens.len(),
                required,
            });
        }

        let shares = match self.kind.relay.unwrap_unseals(&tokens).await {
            Ok(shares) => shares,
            Err(err @ ControlError::ExpiredShare { .. }) => {
                bucket.discard().await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        // The bucket's tokens are spent either way.
        bucket.discard().await?;

        let plain = Zeroizing::new(
            shares
                .iter()
                .map(|share| share.as_str().to_string())
                .collect::<Vec<_>>(),
        );
        self.apply(&plain).await?;

        self.kind.vault.delete(&request_path(change_id)).await?;
        tracing::info!(change_id, policy = %self.request.name, "policy change applied");
        Ok(ApprovalOutcome::Applied)
    }

    async fn reject(&self, auth: &AuthInfo, change_id: &str) -> ControlResult<()> {
        self.kind
            .vault
            .lookup_self(auth)
            .await
            .map_err(|err| ControlError::Unauthorized(err.to_string()))?;
        let bucket = self.kind.relay.hold(change_id).await;
        self.kind.vault.delete(&request_path(change_id)).await?;
        bucket.discard().await?;
        tracing::info!(change_id, policy = %self.request.name, "policy change rejected");
        Ok(())
    }
}
