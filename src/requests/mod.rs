//! Content-addressed change requests.
//!
//! A request is stored at `requests/<change id>` where the change id is the hash of the
//! request's own fields. Every read recomputes that hash, so a record altered in storage can
//! never be acted upon.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::ControlResult;
use crate::vault::{AuthInfo, Fields};

pub mod hash;
pub mod policy;
pub mod registry;

pub use hash::compute_hash;
pub use policy::{PolicyKind, PolicyRequest};
pub use registry::RequestRegistry;

/// Storage prefix for request records.
pub const REQUEST_PREFIX: &str = "requests";

/// Discriminator field carried by every stored request.
pub const TYPE_FIELD: &str = "Type";

pub fn request_path(change_id: &str) -> String {
    format!("{REQUEST_PREFIX}/{change_id}")
}

/// Result of recording one approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Pending { progress: usize, required: usize },
    Applied,
}

/// A decoded, live request bound to the service it acts against.
#[async_trait]
pub trait Request: Send + Sync {
    /// Discriminator this request is stored under, e.g. `Policy`.
    fn kind(&self) -> &str;

    /// Only a root-equivalent principal may approve.
    fn is_root_only(&self) -> bool;

    /// Canonical field set, exactly as persisted and hashed.
    fn fields(&self) -> ControlResult<Value>;

    /// Read-only check that the request can still be acted upon by `auth`.
    async fn verify(&self, auth: &AuthInfo) -> ControlResult<()>;

    /// Records one approval; applies the change once enough have accumulated.
    async fn approve(&self, approver: &str, change_id: &str) -> ControlResult<ApprovalOutcome>;

    /// Authorizes `auth`, then deletes the request.
    async fn reject(&self, auth: &AuthInfo, change_id: &str) -> ControlResult<()>;
}

/// Constructor side of a request variant, registered under its discriminator.
#[async_trait]
pub trait RequestKind: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Validates `raw`, authorizes the creator, persists the request and returns its change id.
    async fn create(&self, auth: &AuthInfo, raw: &Fields) -> ControlResult<String>;

    /// Rebuilds a live request from a stored record. Fails if the record does not have the
    /// variant's exact shape.
    fn decode(&self, record: Fields) -> ControlResult<Box<dyn Request>>;
}
