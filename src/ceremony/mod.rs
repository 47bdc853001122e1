//! Threshold root-token regeneration and the asynchronous share collection feeding it.

pub mod root;
pub mod unseal;

pub use root::{RootToken, RootTokenGenerator};
pub use unseal::{BucketGuard, UnsealRelay};
