use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Where the pod's service-account credentials are projected.
pub const SERVICE_ACCOUNT_DIR: &str = "/run/secrets/kubernetes.io/serviceaccount";

pub const NAMESPACE_ENV: &str = "HOSTKEYS_KUBE_NAMESPACE";
pub const API_BASE_ENV: &str = "HOSTKEYS_KUBE_API";

/// Connection settings for the cluster API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeConfig {
    pub api_base: String,
    pub namespace: String,
    pub token_path: PathBuf,
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

impl KubeConfig {
    /// In-cluster settings: API address from `KUBERNETES_SERVICE_HOST`/`_PORT`
    /// (or `HOSTKEYS_KUBE_API`), credentials from the service-account mount.
    pub fn from_env() -> Result<Self> {
        let api_base = match std::env::var(API_BASE_ENV) {
            Ok(base) => base,
            Err(_) => {
                let host = std::env::var("KUBERNETES_SERVICE_HOST")
                    .context("KUBERNETES_SERVICE_HOST is not set; not running in a cluster?")?;
                let port =
                    std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
                format!("https://{host}:{port}")
            }
        };
        let mut config = Self::from_service_account(SERVICE_ACCOUNT_DIR, api_base)?;
        if let Ok(namespace) = std::env::var(NAMESPACE_ENV) {
            config.namespace = namespace;
        }
        Ok(config)
    }

    /// Settings rooted at a service-account directory holding `namespace`,
    /// `token` and optionally `ca.crt`.
    pub fn from_service_account(dir: impl AsRef<Path>, api_base: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref();
        let namespace_path = dir.join("namespace");
        let namespace = fs::read_to_string(&namespace_path)
            .with_context(|| format!("reading {}", namespace_path.display()))?
            .trim()
            .to_string();
        anyhow::ensure!(!namespace.is_empty(), "{} is empty", namespace_path.display());

        let ca_path = dir.join("ca.crt");
        Ok(Self {
            api_base: api_base.into(),
            namespace,
            token_path: dir.join("token"),
            ca_path: ca_path.exists().then_some(ca_path),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `attempt` (zero-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1 << attempt.min(10)))
    }

    pub fn secret_url(&self, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/secrets/{}",
            self.api_base.trim_end_matches('/'),
            self.namespace,
            name
        )
    }
}
