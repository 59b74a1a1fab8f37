use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use hostkeys_kube::KubeConfig;
use hostkeys_repo::{PurgePolicy, SetLayout};
use serde::{Deserialize, Serialize};

pub const SECRET_NAME_ENV: &str = "HOSTKEYS_SECRET_NAME";
pub const SENTINEL_DIR_ENV: &str = "HOSTKEYS_SENTINEL_DIR";

const DEFAULT_SET_NAME: &str = "hostkeys";

/// User-level configuration loaded from `~/.config/hostkeys/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub purge: PurgePolicy,
    /// Directory holding sentinel markers; defaults under the data dir.
    #[serde(default)]
    pub sentinel_dir: Option<PathBuf>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_layout")]
    pub layout: SetLayout,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            purge: PurgePolicy::default(),
            sentinel_dir: None,
            store: StoreConfig::default(),
            layout: default_layout(),
            encryption: EncryptionConfig::default(),
        }
    }
}

fn default_layout() -> SetLayout {
    SetLayout::shared(DEFAULT_SET_NAME)
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    File,
    Mounted,
    Kubernetes,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Root for `file` and `mounted` stores.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Cluster settings; discovered from the pod environment when absent.
    #[serde(default)]
    pub kubernetes: Option<KubeConfig>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// `HOSTKEYS_ENCRYPTION_KEY`, shared by every host instance.
    #[default]
    Env,
    /// OS keychain, for operator machines.
    Keyring,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// Seal values before writing when the store accepts encrypted content.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub key_source: KeySource,
}

impl Config {
    /// Apply environment overrides; `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup(SECRET_NAME_ENV).filter(|n| !n.trim().is_empty()) {
            match &mut self.layout {
                SetLayout::Shared { set_name } => *set_name = name,
                SetLayout::PerFunction { host_set, .. } => *host_set = name,
            }
        }
        if let Some(dir) = lookup(SENTINEL_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            self.sentinel_dir = Some(PathBuf::from(dir));
        }
    }
}

/// Load config from `path` (or the default path) and apply environment overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_path()?,
    };
    let mut config = load_from_path(path)?;
    config.apply_overrides(|name| std::env::var(name).ok());
    Ok(config)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("hostkeys").join("config.toml"))
}

/// Write `config` to `path` unless a file is already there; returns the path.
pub fn write_default_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.layout, SetLayout::shared("hostkeys"));
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            purge = "remove_stale"
            sentinel_dir = "/var/lib/hostkeys/sentinels"

            [store]
            kind = "mounted"
            path = "/etc/hostkeys"

            [layout]
            layout = "per_function"
            host_set = "host"
            function_set_prefix = "fn-"

            [encryption]
            enabled = true
            key_source = "keyring"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                purge: PurgePolicy::RemoveStale,
                sentinel_dir: Some(PathBuf::from("/var/lib/hostkeys/sentinels")),
                store: StoreConfig {
                    kind: StoreKind::Mounted,
                    path: Some(PathBuf::from("/etc/hostkeys")),
                    kubernetes: None,
                },
                layout: SetLayout::PerFunction {
                    host_set: "host".into(),
                    function_set_prefix: "fn-".into(),
                },
                encryption: EncryptionConfig {
                    enabled: true,
                    key_source: KeySource::Keyring,
                },
            }
        );
    }

    #[test]
    fn parses_kubernetes_section() {
        let contents = r#"
            [store]
            kind = "kubernetes"

            [store.kubernetes]
            api_base = "https://10.0.0.1"
            namespace = "functions"
            token_path = "/tmp/token"
            max_retries = 5
        "#;
        let cfg: Config = toml::from_str(contents).expect("parse");
        let kube = cfg.store.kubernetes.expect("kubernetes section");
        assert_eq!(kube.namespace, "functions");
        assert_eq!(kube.max_retries, 5);
        assert_eq!(kube.timeout_secs, 10);
    }

    #[test]
    fn env_overrides_secret_name_and_sentinel_dir() {
        let env: HashMap<&str, &str> = [
            (SECRET_NAME_ENV, "prod-keys"),
            (SENTINEL_DIR_ENV, "/shared/sentinels"),
        ]
        .into();
        let mut cfg = Config::default();
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(cfg.layout, SetLayout::shared("prod-keys"));
        assert_eq!(cfg.sentinel_dir, Some(PathBuf::from("/shared/sentinels")));

        let mut untouched = Config::default();
        untouched.apply_overrides(|_| None);
        assert_eq!(untouched, Config::default());
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config::default();

        write_default_if_missing(&cfg, &path).expect("write should succeed");
        fs::write(&path, "purge = \"remove_stale\"\n").expect("user edit");
        let second = write_default_if_missing(&cfg, &path).expect("second write ok");
        assert_eq!(second, path);

        let loaded = load_from_path(&path).expect("load");
        assert_eq!(loaded.purge, PurgePolicy::RemoveStale);
    }
}
