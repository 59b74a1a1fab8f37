use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use dirs::data_dir;
use hostkeys_core::store::SecretStore;
use hostkeys_kube::{KubeConfig, KubernetesSecretStore};
use hostkeys_repo::{RepositoryOptions, StoreSecretsRepository};
use hostkeys_storage::{
    cipher::KeyCipher,
    file_store::FileSecretStore,
    key_provider::{EnvKeyProvider, KeyProvider, KeyringProvider},
    mounted_store::MountedSecretStore,
    sentinel::FileSentinel,
};
use tracing::debug;

use crate::config::{Config, KeySource, StoreKind};

pub type Repository = StoreSecretsRepository<Arc<dyn SecretStore>, FileSentinel>;
pub type Cipher = KeyCipher<Box<dyn KeyProvider>>;

/// Resolve the default data directory for hostkeys.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("hostkeys"))
}

/// Build the configured store.
pub fn store_from_config(config: &Config) -> Result<Arc<dyn SecretStore>> {
    let store: Arc<dyn SecretStore> = match config.store.kind {
        StoreKind::File => {
            let root = match &config.store.path {
                Some(path) => path.clone(),
                None => default_data_dir()?.join("secrets"),
            };
            debug!(?root, "initializing file store");
            Arc::new(FileSecretStore::new(root))
        }
        StoreKind::Mounted => {
            let root = config.store.path.clone().ok_or_else(|| {
                color_eyre::eyre::eyre!("store.path is required for the mounted store")
            })?;
            debug!(?root, "initializing mounted store");
            Arc::new(MountedSecretStore::new(root))
        }
        StoreKind::Kubernetes => {
            let kube = match &config.store.kubernetes {
                Some(kube) => kube.clone(),
                None => KubeConfig::from_env().map_err(|e| color_eyre::eyre::eyre!("{e:#}"))?,
            };
            debug!(api = %kube.api_base, namespace = %kube.namespace, "initializing cluster store");
            Arc::new(
                KubernetesSecretStore::new(kube).map_err(|e| color_eyre::eyre::eyre!("{e:#}"))?,
            )
        }
    };
    Ok(store)
}

pub fn sentinel_from_config(config: &Config) -> Result<FileSentinel> {
    let dir = match &config.sentinel_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?.join("sentinels"),
    };
    debug!(?dir, "initializing sentinel");
    Ok(FileSentinel::new(dir))
}

pub fn repository_from_config(config: &Config) -> Result<Repository> {
    let options = RepositoryOptions::new(config.layout.clone()).with_purge(config.purge);
    StoreSecretsRepository::new(
        store_from_config(config)?,
        sentinel_from_config(config)?,
        options,
    )
    .map_err(|e| color_eyre::eyre::eyre!(e))
}

/// Value cipher, when encryption is enabled in config.
pub fn cipher_from_config(config: &Config) -> Option<Cipher> {
    if !config.encryption.enabled {
        return None;
    }
    let provider: Box<dyn KeyProvider> = match config.encryption.key_source {
        KeySource::Env => Box::new(EnvKeyProvider::default()),
        KeySource::Keyring => Box::new(KeyringProvider::new("hostkeys", "data-key")),
    };
    Some(KeyCipher::new(provider))
}
