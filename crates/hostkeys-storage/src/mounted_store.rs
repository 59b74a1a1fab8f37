use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use hostkeys_core::{
    store::{SecretPairs, SecretStore},
    Result, SecretsError,
};
use tracing::{instrument, warn};

const STORE_NAME: &str = "mounted";

/// Read-only view of cluster secrets projected into the filesystem.
///
/// Each set is a directory under `root`; each file in it is one pair, the file
/// name being the encoded key name. Entries starting with `..` (the projection's
/// own bookkeeping) and subdirectories are ignored.
///
/// Policy: secrets are provisioned out of band (operator, deployment pipeline),
/// so writes report `WriteNotSupported`, there is no snapshot pipeline, and
/// stale per-function entries are deliberately retained rather than purged.
#[derive(Debug, Clone)]
pub struct MountedSecretStore {
    root: PathBuf,
}

impl MountedSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SecretStore for MountedSecretStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    fn supports_encryption(&self) -> bool {
        false
    }

    fn supports_snapshots(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(set = %set))]
    async fn fetch_all(&self, set: &str) -> Result<SecretPairs> {
        if set.is_empty() || set.contains(['/', '\\']) || set.starts_with("..") {
            return Err(SecretsError::invalid(format!("invalid secret set name `{set}`")));
        }
        read_projection(&self.root.join(set), set)
    }
}

fn read_projection(dir: &Path, set: &str) -> Result<SecretPairs> {
    let entries = fs::read_dir(dir).map_err(|err| match err.kind() {
        ErrorKind::NotFound => SecretsError::NotFound {
            set: set.to_string(),
        },
        _ => SecretsError::unavailable(STORE_NAME, err),
    })?;

    let mut pairs = SecretPairs::new();
    for entry in entries {
        let entry = entry.map_err(|err| SecretsError::unavailable(STORE_NAME, err))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with("..") {
            continue;
        }
        let path = entry.path();
        // Follows the projection's symlinks.
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => continue,
            Err(err) => return Err(SecretsError::unavailable(STORE_NAME, err)),
        }
        match fs::read(&path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(value) => {
                    pairs.insert(name, value.trim_end_matches(['\r', '\n']).to_string());
                }
                Err(_) => warn!(set, entry = %name, "skipping non-UTF-8 secret entry"),
            },
            Err(err) => return Err(SecretsError::unavailable(STORE_NAME, err)),
        }
    }
    Ok(pairs)
}
