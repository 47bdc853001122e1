use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{AuthInfo, Fields, RegenerationStatus, SecretsService, ServiceError, TokenInfo};
use crate::config;

/// HTTP client for the Vault v1 API.
pub struct VaultClient {
    base: Url,
    token: String,
    mount: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GenerateRootResponse {
    #[serde(default)]
    nonce: String,
    #[serde(default)]
    encoded_token: Option<String>,
    #[serde(default)]
    encoded_root_token: Option<String>,
    #[serde(default)]
    progress: usize,
    #[serde(default)]
    required: usize,
    #[serde(default)]
    complete: bool,
}

impl From<GenerateRootResponse> for RegenerationStatus {
    fn from(resp: GenerateRootResponse) -> Self {
        // Older servers only report `encoded_root_token`.
        let encoded_token = resp
            .encoded_token
            .filter(|token| !token.is_empty())
            .or(resp.encoded_root_token)
            .unwrap_or_default();
        RegenerationStatus {
            nonce: resp.nonce,
            encoded_token,
            progress: resp.progress,
            required: resp.required,
            complete: resp.complete,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

impl VaultClient {
    pub fn from_env() -> Option<Result<Self, ServiceError>> {
        let base = config::VAULT_ADDR.as_ref()?;
        let token = config::VAULT_TOKEN.as_ref()?;
        Some(Self::new(base, token.as_str()).and_then(|client| {
            client
                .with_mount(config::CHANGE_STORE_MOUNT.as_str())
                .with_timeout(Duration::from_secs(*config::VAULT_TIMEOUT_SECS))
        }))
    }

    pub fn new(base: impl AsRef<str>, token: impl Into<String>) -> Result<Self, ServiceError> {
        // Trailing slash keeps any path prefix when joining `v1/...`.
        let base = Url::parse(&format!("{}/", base.as_ref().trim_end_matches('/')))?;
        Ok(Self {
            base,
            token: token.into(),
            mount: "cubbyhole".to_string(),
            client: build_client(Duration::from_secs(10))?,
        })
    }

    /// Mount under which request records and unseal buckets are stored.
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into().trim_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ServiceError> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        let path = path.trim_start_matches('/');
        Ok(self.base.join(&format!("v1/{path}"))?)
    }

    fn scoped(&self, path: &str) -> String {
        format!("{}/{}", self.mount, path.trim_start_matches('/'))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<Option<Value>, ServiceError> {
        self.send(method, path, token, body, None).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        wrap_ttl: Option<Duration>,
    ) -> Result<Option<Value>, ServiceError> {
        let url = self.endpoint(path)?;
        let mut req = self
            .client
            .request(method, url)
            .header("X-Vault-Token", token.unwrap_or(&self.token));
        if let Some(ttl) = wrap_ttl {
            req = req.header("X-Vault-Wrap-TTL", format!("{}s", ttl.as_secs()));
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.errors.join(", "))
                .ok()
                .filter(|message| !message.is_empty())
                .unwrap_or(text);
            return Err(ServiceError::api(status.as_u16(), message));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Some(Value::Null));
        }
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(Some(Value::Null));
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| ServiceError::api(status.as_u16(), format!("invalid json: {err}")))
    }

    /// Same as [`request`](Self::request) but a 404 is an error, not an absent record.
    async fn expect(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, ServiceError> {
        self.request(method, path, token, body)
            .await?
            .ok_or_else(|| ServiceError::api(404, format!("{path} not found")))
    }
}

fn build_client(timeout: Duration) -> Result<Client, ServiceError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn data_fields(mut value: Value) -> Result<Fields, ServiceError> {
    match value.get_mut("data").map(Value::take) {
        Some(Value::Object(fields)) => Ok(fields),
        _ => Err(ServiceError::MissingField("data")),
    }
}

#[async_trait]
impl SecretsService for VaultClient {
    async fn read(&self, path: &str) -> Result<Option<Fields>, ServiceError> {
        match self
            .request(Method::GET, &self.scoped(path), None, None)
            .await?
        {
            Some(value) => data_fields(value).map(Some),
            None => Ok(None),
        }
    }

    async fn write(&self, path: &str, fields: Fields) -> Result<(), ServiceError> {
        self.expect(
            Method::POST,
            &self.scoped(path),
            None,
            Some(Value::Object(fields)),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        self.request(Method::DELETE, &self.scoped(path), None, None)
            .await?;
        Ok(())
    }

    async fn initiate_regeneration(&self, otp: &str) -> Result<RegenerationStatus, ServiceError> {
        let value = self
            .expect(
                Method::PUT,
                "sys/generate-root/attempt",
                None,
                Some(json!({ "otp": otp })),
            )
            .await?;
        let resp: GenerateRootResponse = serde_json::from_value(value)
            .map_err(|err| ServiceError::api(200, format!("invalid generate-root body: {err}")))?;
        Ok(resp.into())
    }

    async fn submit_share(
        &self,
        share: &str,
        nonce: &str,
    ) -> Result<RegenerationStatus, ServiceError> {
        let value = self
            .expect(
                Method::PUT,
                "sys/generate-root/update",
                None,
                Some(json!({ "key": share, "nonce": nonce })),
            )
            .await?;
        let resp: GenerateRootResponse = serde_json::from_value(value)
            .map_err(|err| ServiceError::api(200, format!("invalid generate-root body: {err}")))?;
        Ok(resp.into())
    }

    async fn cancel_regeneration(&self) -> Result<(), ServiceError> {
        self.request(Method::DELETE, "sys/generate-root/attempt", None, None)
            .await?;
        Ok(())
    }

    async fn wrap(&self, ttl: Duration, fields: Fields) -> Result<String, ServiceError> {
        let value = self
            .send(
                Method::POST,
                "sys/wrapping/wrap",
                None,
                Some(Value::Object(fields)),
                Some(ttl),
            )
            .await?
            .ok_or(ServiceError::MissingField("wrap_info"))?;
        value["wrap_info"]["token"]
            .as_str()
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or(ServiceError::MissingField("wrap_info.token"))
    }

    async fn unwrap(&self, token: &str) -> Result<Fields, ServiceError> {
        let value = self
            .expect(
                Method::POST,
                "sys/wrapping/unwrap",
                None,
                Some(json!({ "token": token })),
            )
            .await?;
        data_fields(value)
    }

    async fn seal_threshold(&self) -> Result<usize, ServiceError> {
        let value = self.expect(Method::GET, "sys/seal-status", None, None).await?;
        value["t"]
            .as_u64()
            .map(|t| t as usize)
            .ok_or(ServiceError::MissingField("t"))
    }

    async fn lookup_self(&self, auth: &AuthInfo) -> Result<TokenInfo, ServiceError> {
        let value = self
            .expect(
                Method::GET,
                "auth/token/lookup-self",
                Some(auth.token()),
                None,
            )
            .await?;
        let data = data_fields(value)?;
        Ok(TokenInfo {
            accessor: data
                .get("accessor")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            display_name: data
                .get("display_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            policies: data
                .get("policies")
                .and_then(Value::as_array)
                .map(|policies| {
                    policies
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    async fn read_policy(&self, name: &str) -> Result<Option<String>, ServiceError> {
        let Some(value) = self
            .request(Method::GET, &format!("sys/policy/{name}"), None, None)
            .await?
        else {
            return Ok(None);
        };
        let rules = value
            .get("rules")
            .or_else(|| value.get("data").and_then(|data| data.get("rules")))
            .and_then(Value::as_str)
            .ok_or(ServiceError::MissingField("rules"))?;
        Ok(Some(rules.to_string()))
    }

    async fn write_policy(
        &self,
        token: &str,
        name: &str,
        rules: &str,
    ) -> Result<(), ServiceError> {
        self.expect(
            Method::PUT,
            &format!("sys/policy/{name}"),
            Some(token),
            Some(json!({ "rules": rules })),
        )
        .await?;
        Ok(())
    }

    async fn delete_policy(&self, token: &str, name: &str) -> Result<(), ServiceError> {
        self.request(
            Method::DELETE,
            &format!("sys/policy/{name}"),
            Some(token),
            None,
        )
        .await?;
        Ok(())
    }

    async fn revoke_self(&self, token: &str) -> Result<(), ServiceError> {
        self.expect(Method::POST, "auth/token/revoke-self", Some(token), None)
            .await?;
        Ok(())
    }
}
