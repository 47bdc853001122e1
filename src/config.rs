use once_cell::sync::Lazy;

/// Address of the Vault server, e.g. `https://vault.internal:8200`.
pub static VAULT_ADDR: Lazy<Option<String>> = Lazy::new(|| read_optional_env("VAULT_ADDR"));

/// Token the service acts with for storage, wrapping and root generation.
pub static VAULT_TOKEN: Lazy<Option<String>> = Lazy::new(|| read_optional_env("VAULT_TOKEN"));

/// Secrets mount holding request records and unseal buckets. Defaults to `cubbyhole`, which
/// scopes them to `VAULT_TOKEN`.
pub static CHANGE_STORE_MOUNT: Lazy<String> = Lazy::new(|| {
    read_optional_env("CHANGE_STORE_MOUNT").unwrap_or_else(|| "cubbyhole".to_string())
});

/// Lifetime of a wrapped unseal share. Defaults to one hour.
pub static UNSEAL_WRAP_TTL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("UNSEAL_WRAP_TTL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600)
});

/// Per-request timeout for calls to Vault. Defaults to `10` seconds.
pub static VAULT_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("VAULT_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
