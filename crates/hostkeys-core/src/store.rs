use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::error::{Result, SecretsError};

/// Flat encoded-name to value mapping, as held by a backing store.
pub type SecretPairs = BTreeMap<String, String>;

/// Opaque snapshot identifier; sorts by creation order.
pub type SnapshotId = String;

/// Capability interface over an external secret service.
///
/// Only `fetch_all` and the capability flags are mandatory. Read-mostly stores
/// keep the default write methods, which report `WriteNotSupported`; stores
/// without a snapshot pipeline keep the defaults that report
/// `SnapshotNotSupported`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether values written here may be stored encrypted by the caller.
    fn supports_encryption(&self) -> bool;

    fn supports_snapshots(&self) -> bool;

    /// Whether orphaned per-function entries may be removed from this store.
    fn supports_purge(&self) -> bool {
        false
    }

    /// Fetch every pair of a secret set.
    async fn fetch_all(&self, set: &str) -> Result<SecretPairs>;

    /// Store `pairs` and drop existing pairs under `replace_prefix` that are absent from `pairs`.
    async fn put_all(&self, set: &str, replace_prefix: &str, pairs: SecretPairs) -> Result<()> {
        let _ = (set, replace_prefix, pairs);
        Err(self.write_not_supported())
    }

    /// Remove every pair whose name starts with `prefix`; returns how many went.
    async fn delete_prefix(&self, set: &str, prefix: &str) -> Result<usize> {
        let _ = (set, prefix);
        Err(self.write_not_supported())
    }

    /// Remove a whole secret set; `false` when it did not exist.
    async fn delete_set(&self, set: &str) -> Result<bool> {
        let _ = set;
        Err(self.write_not_supported())
    }

    /// Names of the sets starting with `prefix`.
    async fn list_sets(&self, prefix: &str) -> Result<Vec<String>> {
        let _ = prefix;
        Err(self.write_not_supported())
    }

    async fn write_snapshot(
        &self,
        set: &str,
        scope_prefix: &str,
        pairs: SecretPairs,
    ) -> Result<SnapshotId> {
        let _ = (set, scope_prefix, pairs);
        Err(self.snapshot_not_supported())
    }

    async fn list_snapshots(&self, set: &str, scope_prefix: &str) -> Result<Vec<SnapshotId>> {
        let _ = (set, scope_prefix);
        Err(self.snapshot_not_supported())
    }

    fn write_not_supported(&self) -> SecretsError {
        SecretsError::WriteNotSupported {
            store: self.name().to_string(),
        }
    }

    fn snapshot_not_supported(&self) -> SecretsError {
        SecretsError::SnapshotNotSupported {
            store: self.name().to_string(),
        }
    }
}

#[async_trait]
impl<T> SecretStore for Arc<T>
where
    T: SecretStore + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn supports_encryption(&self) -> bool {
        (**self).supports_encryption()
    }

    fn supports_snapshots(&self) -> bool {
        (**self).supports_snapshots()
    }

    fn supports_purge(&self) -> bool {
        (**self).supports_purge()
    }

    async fn fetch_all(&self, set: &str) -> Result<SecretPairs> {
        (**self).fetch_all(set).await
    }

    async fn put_all(&self, set: &str, replace_prefix: &str, pairs: SecretPairs) -> Result<()> {
        (**self).put_all(set, replace_prefix, pairs).await
    }

    async fn delete_prefix(&self, set: &str, prefix: &str) -> Result<usize> {
        (**self).delete_prefix(set, prefix).await
    }

    async fn delete_set(&self, set: &str) -> Result<bool> {
        (**self).delete_set(set).await
    }

    async fn list_sets(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_sets(prefix).await
    }

    async fn write_snapshot(
        &self,
        set: &str,
        scope_prefix: &str,
        pairs: SecretPairs,
    ) -> Result<SnapshotId> {
        (**self).write_snapshot(set, scope_prefix, pairs).await
    }

    async fn list_snapshots(&self, set: &str, scope_prefix: &str) -> Result<Vec<SnapshotId>> {
        (**self).list_snapshots(set, scope_prefix).await
    }
}

/// Capability flags for [`InMemorySecretStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub writes: bool,
    pub encryption: bool,
    pub snapshots: bool,
    pub purge: bool,
}

impl Capabilities {
    pub const FULL: Self = Self {
        writes: true,
        encryption: true,
        snapshots: true,
        purge: true,
    };

    pub const READ_ONLY: Self = Self {
        writes: false,
        encryption: false,
        snapshots: false,
        purge: false,
    };
}

#[derive(Debug, Default)]
struct MemoryState {
    sets: HashMap<String, SecretPairs>,
    snapshots: BTreeMap<(String, String), Vec<(SnapshotId, SecretPairs)>>,
}

/// Process-local store for tests and single-instance smoke runs.
/// Writes replace per scope prefix, atomically under one lock.
#[derive(Debug, Clone)]
pub struct InMemorySecretStore {
    inner: Arc<Mutex<MemoryState>>,
    capabilities: Capabilities,
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::FULL)
    }

    /// Behaves like an externally provisioned secret: readable, never written.
    pub fn read_only() -> Self {
        Self::with_capabilities(Capabilities::READ_ONLY)
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            inner: Arc::default(),
            capabilities,
        }
    }

    /// Provision a set directly, bypassing capability checks.
    pub fn provision<I, K, V>(&self, set: &str, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.lock()?;
        state.sets.insert(
            set.to_string(),
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        Ok(())
    }

    pub fn snapshot_count(&self) -> Result<usize> {
        Ok(self.lock()?.snapshots.values().map(Vec::len).sum())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|err| SecretsError::unavailable("memory", format!("lock poisoned: {err}")))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.capabilities.writes {
            Ok(())
        } else {
            Err(self.write_not_supported())
        }
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn supports_encryption(&self) -> bool {
        self.capabilities.encryption
    }

    fn supports_snapshots(&self) -> bool {
        self.capabilities.snapshots
    }

    fn supports_purge(&self) -> bool {
        self.capabilities.purge
    }

    async fn fetch_all(&self, set: &str) -> Result<SecretPairs> {
        self.lock()?
            .sets
            .get(set)
            .cloned()
            .ok_or_else(|| SecretsError::NotFound {
                set: set.to_string(),
            })
    }

    async fn put_all(&self, set: &str, replace_prefix: &str, pairs: SecretPairs) -> Result<()> {
        self.ensure_writable()?;
        let mut state = self.lock()?;
        let existing = state.sets.entry(set.to_string()).or_default();
        existing.retain(|name, _| !name.starts_with(replace_prefix) || pairs.contains_key(name));
        existing.extend(pairs);
        Ok(())
    }

    async fn delete_prefix(&self, set: &str, prefix: &str) -> Result<usize> {
        self.ensure_writable()?;
        let mut state = self.lock()?;
        let Some(existing) = state.sets.get_mut(set) else {
            return Ok(0);
        };
        let before = existing.len();
        existing.retain(|name, _| !name.starts_with(prefix));
        Ok(before - existing.len())
    }

    async fn delete_set(&self, set: &str) -> Result<bool> {
        self.ensure_writable()?;
        Ok(self.lock()?.sets.remove(set).is_some())
    }

    async fn list_sets(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.lock()?;
        let mut names: Vec<String> = state
            .sets
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn write_snapshot(
        &self,
        set: &str,
        scope_prefix: &str,
        pairs: SecretPairs,
    ) -> Result<SnapshotId> {
        if !self.capabilities.snapshots {
            return Err(self.snapshot_not_supported());
        }
        let mut state = self.lock()?;
        let history = state
            .snapshots
            .entry((set.to_string(), scope_prefix.to_string()))
            .or_default();
        let id = format!("{:08}", history.len() + 1);
        history.push((id.clone(), pairs));
        Ok(id)
    }

    async fn list_snapshots(&self, set: &str, scope_prefix: &str) -> Result<Vec<SnapshotId>> {
        if !self.capabilities.snapshots {
            return Err(self.snapshot_not_supported());
        }
        let state = self.lock()?;
        Ok(state
            .snapshots
            .get(&(set.to_string(), scope_prefix.to_string()))
            .map(|history| history.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default())
    }
}
