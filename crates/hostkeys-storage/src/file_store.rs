use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::Utc;
use hostkeys_core::{
    store::{SecretPairs, SecretStore, SnapshotId},
    Result, SecretsError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::fsutil::{sanitize, unsanitize, write_json_atomic};

const STORE_NAME: &str = "file";
const DOCUMENT_VERSION: u32 = 1;

/// Secret sets kept as JSON documents on a (possibly shared) filesystem.
///
/// Layout under `root`:
/// ```text
/// sets/<set>.json                          current pairs
/// snapshots/<set>/<scope prefix>/<id>.json historical copies
/// ```
/// Path segments are URL-safe base64 so any set name is a valid file name.
///
/// Writes replace the whole document through a temp file and atomic rename.
/// Within one process writes are serialized; across instances the last
/// writer wins. Values are stored exactly as given, so callers that seal
/// values before writing get encryption at rest.
pub struct FileSecretStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SetDocument {
    version: u32,
    pairs: SecretPairs,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn sets_dir(&self) -> PathBuf {
        self.root.join("sets")
    }

    fn path_for(&self, set: &str) -> PathBuf {
        self.sets_dir().join(format!("{}.json", sanitize(set)))
    }

    fn snapshot_dir(&self, set: &str, scope_prefix: &str) -> PathBuf {
        self.root
            .join("snapshots")
            .join(sanitize(set))
            .join(sanitize(scope_prefix))
    }

    fn load(&self, set: &str) -> Result<Option<SecretPairs>> {
        match read_document(&self.path_for(set))? {
            Some(doc) => Ok(Some(doc.pairs)),
            None => Ok(None),
        }
    }

    fn save(&self, set: &str, pairs: SecretPairs) -> Result<()> {
        let doc = SetDocument {
            version: DOCUMENT_VERSION,
            pairs,
        };
        write_json_atomic(&self.path_for(set), &doc).map_err(storage_err)
    }

    fn modify<T>(&self, set: &str, f: impl FnOnce(&mut SecretPairs) -> T) -> Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|err| storage_err(format!("lock poisoned: {err}")))?;
        let mut pairs = self.load(set)?.unwrap_or_default();
        let out = f(&mut pairs);
        self.save(set, pairs)?;
        Ok(out)
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    fn supports_encryption(&self) -> bool {
        true
    }

    fn supports_snapshots(&self) -> bool {
        true
    }

    fn supports_purge(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(set = %set))]
    async fn fetch_all(&self, set: &str) -> Result<SecretPairs> {
        self.load(set)?.ok_or_else(|| SecretsError::NotFound {
            set: set.to_string(),
        })
    }

    #[instrument(skip_all, fields(set = %set, replace_prefix = %replace_prefix, count = pairs.len()))]
    async fn put_all(&self, set: &str, replace_prefix: &str, pairs: SecretPairs) -> Result<()> {
        self.modify(set, |existing| {
            existing.retain(|name, _| !name.starts_with(replace_prefix) || pairs.contains_key(name));
            existing.extend(pairs);
        })
    }

    #[instrument(skip_all, fields(set = %set, prefix = %prefix))]
    async fn delete_prefix(&self, set: &str, prefix: &str) -> Result<usize> {
        if !self.path_for(set).exists() {
            return Ok(0);
        }
        self.modify(set, |existing| {
            let before = existing.len();
            existing.retain(|name, _| !name.starts_with(prefix));
            before - existing.len()
        })
    }

    #[instrument(skip_all, fields(set = %set))]
    async fn delete_set(&self, set: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(set)) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(storage_err(err)),
        }
    }

    async fn list_sets(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for stem in list_stems(&self.sets_dir(), "json")? {
            match unsanitize(&stem) {
                Some(name) if name.starts_with(prefix) => names.push(name),
                Some(_) => {}
                None => debug!(file = %stem, "ignoring foreign file in sets directory"),
            }
        }
        names.sort();
        Ok(names)
    }

    #[instrument(skip_all, fields(set = %set, scope_prefix = %scope_prefix))]
    async fn write_snapshot(
        &self,
        set: &str,
        scope_prefix: &str,
        pairs: SecretPairs,
    ) -> Result<SnapshotId> {
        let id = snapshot_id();
        let path = self
            .snapshot_dir(set, scope_prefix)
            .join(format!("{id}.json"));
        let doc = SetDocument {
            version: DOCUMENT_VERSION,
            pairs,
        };
        write_json_atomic(&path, &doc).map_err(storage_err)?;
        Ok(id)
    }

    async fn list_snapshots(&self, set: &str, scope_prefix: &str) -> Result<Vec<SnapshotId>> {
        let mut ids = list_stems(&self.snapshot_dir(set, scope_prefix), "json")?;
        ids.sort();
        Ok(ids)
    }
}

/// `<UTC timestamp>-<random>`; sorts by creation time.
fn snapshot_id() -> SnapshotId {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S%.6fZ"), &random[..8])
}

fn read_document(path: &Path) -> Result<Option<SetDocument>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(|e| storage_err(format!("{}: {e}", path.display())))
}

fn list_stems(dir: &Path, extension: &str) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(storage_err(err)),
    };
    let mut stems = Vec::new();
    for entry in entries {
        let path = entry.map_err(storage_err)?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    Ok(stems)
}

fn storage_err<E: ToString>(err: E) -> SecretsError {
    SecretsError::unavailable(STORE_NAME, err)
}
