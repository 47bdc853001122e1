use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Router};
use changeguard::routes::api_routes;
use changeguard::{config, RequestRegistry, SecretsService, UnsealRelay, VaultClient};
use tracing_subscriber::{fmt, EnvFilter};

async fn root() -> &'static str {
    "changeguard"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if Vault is not configured
    let vault: Arc<dyn SecretsService> = match VaultClient::from_env() {
        Some(client) => Arc::new(client?),
        None => return Err("VAULT_ADDR and VAULT_TOKEN must be set".into()),
    };

    let relay = Arc::new(
        UnsealRelay::new(vault.clone())
            .with_wrap_ttl(Duration::from_secs(*config::UNSEAL_WRAP_TTL_SECS)),
    );
    let registry = Arc::new(RequestRegistry::new(vault, relay));

    let app = Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(registry));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(
        %addr,
        mount = config::CHANGE_STORE_MOUNT.as_str(),
        "Listening for incoming connections"
    );
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
