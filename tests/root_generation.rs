mod common;

use std::sync::Arc;

use changeguard::{ControlError, InMemoryVault, RootTokenGenerator, SecretsService};
use common::SlowVault;
use uuid::Uuid;

fn shares(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn setup() -> (Arc<InMemoryVault>, RootTokenGenerator) {
    let vault = Arc::new(InMemoryVault::new(
        shares(&["key-1", "key-2", "key-3", "key-4", "key-5"]),
        3,
    ));
    let service: Arc<dyn SecretsService> = vault.clone();
    (vault, RootTokenGenerator::new(service))
}

#[tokio::test]
async fn threshold_of_valid_shares_yields_root_token() {
    let (vault, generator) = setup();
    let token = generator
        .generate_root_token(&shares(&["key-2", "key-5", "key-1"]))
        .await
        .unwrap();

    let parsed = Uuid::parse_str(token.expose()).expect("token is a uuid");
    assert_eq!(parsed.hyphenated().to_string(), token.expose());
    assert_eq!(vault.live_root_tokens(), 1);
    assert!(!vault.generation_in_progress());
}

#[tokio::test]
async fn extra_shares_after_completion_are_ignored() {
    let (_vault, generator) = setup();
    let token = generator
        .generate_root_token(&shares(&["key-1", "key-2", "key-3", "key-4"]))
        .await;
    assert!(token.is_ok());
}

#[tokio::test]
async fn invalid_share_aborts_and_cancels() {
    let (vault, generator) = setup();
    let err = generator
        .generate_root_token(&shares(&["key-1", "bogus", "key-2", "key-3"]))
        .await
        .unwrap_err();
    match &err {
        ControlError::CeremonyAborted { cancel, .. } => assert!(cancel.is_none()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!vault.generation_in_progress());

    // Cancellation took effect: a fresh attempt starts cleanly.
    vault
        .initiate_regeneration(&base64_otp())
        .await
        .expect("fresh ceremony can start");
}

#[tokio::test]
async fn insufficient_shares_fail_threshold_not_met() {
    let (vault, generator) = setup();
    let err = generator
        .generate_root_token(&shares(&["key-1", "key-2"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ThresholdNotMet { cancel: None }));
    assert!(!vault.generation_in_progress());
    assert_eq!(vault.live_root_tokens(), 0);
}

#[tokio::test]
async fn failed_cancel_is_reported_with_threshold_error() {
    let vault = Arc::new(InMemoryVault::new(shares(&["key-1", "key-2", "key-3"]), 3));
    let service: Arc<dyn SecretsService> = Arc::new(SlowVault::new(vault.clone()).failing_cancel());
    let err = RootTokenGenerator::new(service)
        .generate_root_token(&shares(&["key-1"]))
        .await
        .unwrap_err();

    match &err {
        ControlError::ThresholdNotMet { cancel: Some(cancel) } => {
            assert_eq!(cancel.status(), Some(503))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("cancellation also failed"));
    // The dangling attempt is still there for an operator to clear.
    assert!(vault.generation_in_progress());
}

#[tokio::test]
async fn concurrent_attempt_is_refused() {
    let (vault, generator) = setup();
    vault.initiate_regeneration(&base64_otp()).await.unwrap();

    let err = generator
        .generate_root_token(&shares(&["key-1", "key-2", "key-3"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Service(_)));
    // The other party's attempt is left alone.
    assert!(vault.generation_in_progress());
}

fn base64_otp() -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode([9u8; 16])
}
