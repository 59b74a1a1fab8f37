//! Cluster-backed secret store: reads one Kubernetes `Secret` object per set.

pub mod config;

use std::{collections::BTreeMap, fs};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hostkeys_core::{
    store::{SecretPairs, SecretStore},
    Result, SecretsError,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    StatusCode,
};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

pub use config::KubeConfig;

const STORE_NAME: &str = "kubernetes";

/// Read-mostly adapter over the cluster API.
///
/// Secrets are provisioned by the cluster operator, so writes report
/// `WriteNotSupported` and the repository falls back to signalling the
/// sentinel only. No snapshots, no purge, values stay in the cluster's own
/// at-rest encryption.
pub struct KubernetesSecretStore {
    config: KubeConfig,
    client: reqwest::Client,
}

impl KubernetesSecretStore {
    pub fn new(config: KubeConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent("hostkeys")
            .timeout(config.timeout());
        if let Some(ca_path) = &config.ca_path {
            let pem = fs::read(ca_path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &KubeConfig {
        &self.config
    }

    // Re-read on every request: projected tokens rotate.
    fn headers(&self) -> Result<HeaderMap> {
        let token = fs::read_to_string(&self.config.token_path)
            .map_err(|err| unavailable(format!("reading service account token: {err}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|err| unavailable(format!("invalid token: {err}")))?,
        );
        Ok(headers)
    }

    async fn fetch_once(&self, set: &str) -> Result<SecretPairs> {
        let url = self.config.secret_url(set);
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(unavailable)?;
        if let Some(err) = status_error(resp.status(), set) {
            return Err(err);
        }
        let body = resp.text().await.map_err(unavailable)?;
        parse_secret(&body)
    }
}

#[async_trait]
impl SecretStore for KubernetesSecretStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    fn supports_encryption(&self) -> bool {
        false
    }

    fn supports_snapshots(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(set = %set, namespace = %self.config.namespace))]
    async fn fetch_all(&self, set: &str) -> Result<SecretPairs> {
        if set.is_empty() || set.contains('/') {
            return Err(SecretsError::invalid(format!("invalid secret name `{set}`")));
        }
        let mut attempt = 0;
        loop {
            match self.fetch_once(set).await {
                Ok(pairs) => {
                    debug!(count = pairs.len(), attempt, "secret fetched");
                    return Ok(pairs);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "retrying secret fetch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// Decode a `Secret` object's body into plain pairs.
///
/// `data` values are base64; a missing `data` field is an empty secret.
/// Values that are not UTF-8 are skipped.
pub fn parse_secret(body: &str) -> Result<SecretPairs> {
    let secret: SecretObject = serde_json::from_str(body)
        .map_err(|err| unavailable(format!("malformed secret object: {err}")))?;
    let mut pairs = SecretPairs::new();
    for (name, encoded) in secret.data {
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|err| unavailable(format!("entry `{name}` is not base64: {err}")))?;
        match String::from_utf8(bytes) {
            Ok(value) => {
                pairs.insert(name, value);
            }
            Err(_) => warn!(entry = %name, "skipping non-UTF-8 secret entry"),
        }
    }
    Ok(pairs)
}

/// Map a non-success response status onto the store error model.
pub fn status_error(status: StatusCode, set: &str) -> Option<SecretsError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND => SecretsError::NotFound {
            set: set.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SecretsError::unavailable(
            STORE_NAME,
            format!("access to secret `{set}` denied ({status})"),
        ),
        _ => SecretsError::unavailable(STORE_NAME, format!("cluster API returned {status}")),
    })
}

fn unavailable<E: ToString>(err: E) -> SecretsError {
    SecretsError::unavailable(STORE_NAME, err)
}
