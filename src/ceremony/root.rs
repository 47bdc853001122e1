use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::{OsRng, RngCore};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{ControlError, ControlResult};
use crate::vault::SecretsService;

/// Size of the one-time pad, and of the raw root token it masks.
pub const OTP_BYTES: usize = 16;

/// A freshly generated root token. Wiped from memory on drop and never printed.
pub struct RootToken(Zeroizing<String>);

impl RootToken {
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for RootToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootToken(<redacted>)")
    }
}

/// Drives Vault's root generation ceremony from a set of unseal shares.
#[derive(Clone)]
pub struct RootTokenGenerator {
    vault: Arc<dyn SecretsService>,
}

impl RootTokenGenerator {
    pub fn new(vault: Arc<dyn SecretsService>) -> Self {
        Self { vault }
    }

    /// Runs one ceremony. Shares are submitted in order; the first rejection aborts the
    /// attempt and cancels it once.
    ///
    /// Fails if another generation attempt is already underway on the server.
    pub async fn generate_root_token(&self, shares: &[String]) -> ControlResult<RootToken> {
        let mut pad = Zeroizing::new(vec![0u8; OTP_BYTES]);
        OsRng.fill_bytes(pad.as_mut_slice());
        let otp = Zeroizing::new(STANDARD.encode(pad.as_slice()));

        let mut status = self.vault.initiate_regeneration(otp.as_str()).await?;
        tracing::info!(
            required = status.required,
            submitted = shares.len(),
            "root generation started"
        );

        for share in shares {
            if !status.encoded_token.is_empty() {
                break;
            }
            status = match self.vault.submit_share(share, &status.nonce).await {
                Ok(next) => next,
                Err(submit) => {
                    let cancel = self.vault.cancel_regeneration().await.err();
                    return Err(ControlError::CeremonyAborted { submit, cancel });
                }
            };
        }

        if status.encoded_token.is_empty() {
            // A dangling attempt would block every later ceremony.
            let cancel = self.vault.cancel_regeneration().await.err();
            return Err(ControlError::ThresholdNotMet { cancel });
        }

        let token = decode_root_token(&status.encoded_token, otp.as_str())?;
        tracing::info!("root generation completed");
        Ok(token)
    }
}

/// Unmasks the encoded token with the OTP and renders it as a UUID.
pub fn decode_root_token(encoded: &str, otp: &str) -> ControlResult<RootToken> {
    let masked = Zeroizing::new(
        STANDARD
            .decode(encoded)
            .map_err(|err| ControlError::Decode(format!("encoded token is not base64: {err}")))?,
    );
    let pad = Zeroizing::new(
        STANDARD
            .decode(otp)
            .map_err(|err| ControlError::Decode(format!("otp is not base64: {err}")))?,
    );
    if masked.len() != pad.len() {
        return Err(ControlError::Decode(format!(
            "length mismatch: token has {} bytes, otp has {}",
            masked.len(),
            pad.len()
        )));
    }
    let plain: Zeroizing<Vec<u8>> = Zeroizing::new(
        masked
            .iter()
            .zip(pad.iter())
            .map(|(a, b)| a ^ b)
            .collect(),
    );
    let id = Uuid::from_slice(plain.as_slice())
        .map_err(|err| ControlError::Decode(format!("not a token identifier: {err}")))?;
    Ok(RootToken(Zeroizing::new(id.hyphenated().to_string())))
}
