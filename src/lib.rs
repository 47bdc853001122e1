pub mod ceremony;
pub mod config;
pub mod error;
pub mod extractor;
pub mod requests;
pub mod routes;
pub mod vault;

pub use ceremony::{RootToken, RootTokenGenerator, UnsealRelay};
pub use error::{ControlError, ControlResult};
pub use requests::{ApprovalOutcome, Request, RequestKind, RequestRegistry};
pub use vault::{AuthInfo, InMemoryVault, SecretsService, VaultClient};
