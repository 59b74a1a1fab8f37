use std::collections::HashMap;

use async_trait::async_trait;
use hostkeys_core::{
    repository::{cancellable, PurgeOutcome, SecretsRepository},
    secrets::{Scope, ScriptSecrets, ScriptSecretsType},
    sentinel::{Sentinel, SentinelMarker},
    store::SnapshotId,
    Result, SecretsError,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

struct CacheEntry {
    marker: SentinelMarker,
    secrets: ScriptSecrets,
}

/// Read-through cache in front of another repository.
///
/// An entry is served only while the sentinel still shows the marker observed
/// before the entry was fetched. A scope with no marker is never cached. When
/// the sentinel cannot be read, the scope is dropped and read uncached.
pub struct CachedSecretsRepository<R: SecretsRepository, N: Sentinel> {
    inner: R,
    sentinel: N,
    entries: RwLock<HashMap<Scope, CacheEntry>>,
}

impl<R: SecretsRepository, N: Sentinel> CachedSecretsRepository<R, N> {
    pub fn new(inner: R, sentinel: N) -> Self {
        Self {
            inner,
            sentinel,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub async fn cached_scopes(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn invalidate(&self, scope: &Scope) {
        self.entries.write().await.remove(scope);
    }
}

#[async_trait]
impl<R: SecretsRepository, N: Sentinel> SecretsRepository for CachedSecretsRepository<R, N> {
    #[instrument(skip(self, cancel))]
    async fn read(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ScriptSecrets> {
        let scope = Scope::new(secrets_type, function_name)?;
        let observed = match cancellable(cancel, self.sentinel.marker(&scope)).await {
            Ok(observed) => observed,
            Err(SecretsError::Cancelled) => return Err(SecretsError::Cancelled),
            Err(err) => {
                warn!(scope = %scope, error = %err, "sentinel unavailable; reading uncached");
                self.invalidate(&scope).await;
                return self.inner.read(secrets_type, function_name, cancel).await;
            }
        };

        if let Some(marker) = &observed {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&scope) {
                if &entry.marker == marker {
                    debug!(scope = %scope, "cache hit");
                    return Ok(entry.secrets.clone());
                }
            }
        }

        let secrets = self.inner.read(secrets_type, function_name, cancel).await?;
        match observed {
            Some(marker) => {
                self.entries.write().await.insert(
                    scope,
                    CacheEntry {
                        marker,
                        secrets: secrets.clone(),
                    },
                );
            }
            None => self.invalidate(&scope).await,
        }
        Ok(secrets)
    }

    async fn write(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        secrets: &ScriptSecrets,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let scope = Scope::new(secrets_type, function_name)?;
        let res = self
            .inner
            .write(secrets_type, function_name, secrets, cancel)
            .await;
        self.invalidate(&scope).await;
        res
    }

    async fn purge_stale(
        &self,
        current_functions: &[String],
        cancel: &CancellationToken,
    ) -> Result<PurgeOutcome> {
        let outcome = self.inner.purge_stale(current_functions, cancel).await;
        self.entries.write().await.clear();
        outcome
    }

    async fn write_snapshot(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        secrets: &ScriptSecrets,
        cancel: &CancellationToken,
    ) -> Result<SnapshotId> {
        self.inner
            .write_snapshot(secrets_type, function_name, secrets, cancel)
            .await
    }

    async fn list_snapshots(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SnapshotId>> {
        self.inner
            .list_snapshots(secrets_type, function_name, cancel)
            .await
    }

    fn is_encryption_supported(&self) -> bool {
        self.inner.is_encryption_supported()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use hostkeys_core::{
        secrets::{HostSecrets, Key},
        sentinel::InMemorySentinel,
        store::InMemorySecretStore,
    };

    use super::*;
    use crate::{
        layout::{PurgePolicy, RepositoryOptions, SetLayout},
        repository::StoreSecretsRepository,
    };

    type Repo = StoreSecretsRepository<InMemorySecretStore, InMemorySentinel>;

    fn instance(
        store: &InMemorySecretStore,
        sentinel: &InMemorySentinel,
    ) -> CachedSecretsRepository<Repo, InMemorySentinel> {
        let options =
            RepositoryOptions::new(SetLayout::shared("app-keys")).with_purge(PurgePolicy::RemoveStale);
        let repo = StoreSecretsRepository::new(store.clone(), sentinel.clone(), options)
            .expect("valid layout");
        CachedSecretsRepository::new(repo, sentinel.clone())
    }

    /// Shared sentinel that can be switched to failing reads.
    #[derive(Clone, Default)]
    struct FlakySentinel {
        inner: InMemorySentinel,
        down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Sentinel for FlakySentinel {
        async fn touch(&self, scope: &Scope) -> Result<SentinelMarker> {
            self.inner.touch(scope).await
        }

        async fn marker(&self, scope: &Scope) -> Result<Option<SentinelMarker>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SecretsError::unavailable("sentinel", "marker unreadable"));
            }
            self.inner.marker(scope).await
        }
    }

    fn host(master: &str) -> ScriptSecrets {
        ScriptSecrets::Host(HostSecrets {
            master_key: Some(Key::master(master)),
            ..HostSecrets::default()
        })
    }

    fn master_of(secrets: ScriptSecrets) -> String {
        secrets
            .into_host()
            .and_then(|h| h.master_key)
            .map(|k| k.value().to_string())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn serves_cached_entry_while_marker_is_unchanged() {
        let store = InMemorySecretStore::new();
        let sentinel = InMemorySentinel::new();
        let cache = instance(&store, &sentinel);
        let cancel = CancellationToken::new();

        cache
            .write(ScriptSecretsType::Host, None, &host("M1"), &cancel)
            .await
            .expect("write");
        let first = cache
            .read(ScriptSecretsType::Host, None, &cancel)
            .await
            .expect("read");
        assert_eq!(master_of(first), "M1");
        assert_eq!(cache.cached_scopes().await, 1);

        // Changed behind the sentinel's back: the cached copy still wins.
        store
            .provision("app-keys", [("host.master", "out-of-band")])
            .expect("provision");
        let second = cache
            .read(ScriptSecretsType::Host, None, &cancel)
            .await
            .expect("read");
        assert_eq!(master_of(second), "M1");
    }

    #[tokio::test]
    async fn refetches_after_another_instance_writes() {
        let store = InMemorySecretStore::new();
        let sentinel = InMemorySentinel::new();
        let a = instance(&store, &sentinel);
        let b = instance(&store, &sentinel);
        let cancel = CancellationToken::new();

        a.write(ScriptSecretsType::Host, None, &host("M1"), &cancel)
            .await
            .expect("write");
        let seen = a.read(ScriptSecretsType::Host, None, &cancel).await.expect("read");
        assert_eq!(master_of(seen), "M1");

        b.write(ScriptSecretsType::Host, None, &host("M2"), &cancel)
            .await
            .expect("write");
        let seen = a.read(ScriptSecretsType::Host, None, &cancel).await.expect("read");
        assert_eq!(master_of(seen), "M2");
    }

    #[tokio::test]
    async fn scopes_without_marker_are_not_cached() {
        let store = InMemorySecretStore::new();
        store
            .provision("app-keys", [("host.master", "M1")])
            .expect("provision");
        let cache = instance(&store, &InMemorySentinel::new());
        let cancel = CancellationToken::new();

        let seen = cache
            .read(ScriptSecretsType::Host, None, &cancel)
            .await
            .expect("read");
        assert_eq!(master_of(seen), "M1");
        assert_eq!(cache.cached_scopes().await, 0);
    }

    #[tokio::test]
    async fn purge_clears_every_entry() {
        let store = InMemorySecretStore::new();
        let sentinel = InMemorySentinel::new();
        let cache = instance(&store, &sentinel);
        let cancel = CancellationToken::new();

        cache
            .write(ScriptSecretsType::Host, None, &host("M1"), &cancel)
            .await
            .expect("write");
        cache
            .read(ScriptSecretsType::Host, None, &cancel)
            .await
            .expect("read");
        assert_eq!(cache.cached_scopes().await, 1);

        cache.purge_stale(&[], &cancel).await.expect("purge");
        assert_eq!(cache.cached_scopes().await, 0);
    }

    #[tokio::test]
    async fn unreadable_sentinel_reads_through_uncached() {
        let store = InMemorySecretStore::new();
        let sentinel = FlakySentinel::default();
        let options = RepositoryOptions::new(SetLayout::shared("app-keys"));
        let repo = StoreSecretsRepository::new(store.clone(), sentinel.clone(), options)
            .expect("valid layout");
        let cache = CachedSecretsRepository::new(repo, sentinel.clone());
        let cancel = CancellationToken::new();

        cache
            .write(ScriptSecretsType::Host, None, &host("M1"), &cancel)
            .await
            .expect("write");
        cache
            .read(ScriptSecretsType::Host, None, &cancel)
            .await
            .expect("read");
        assert_eq!(cache.cached_scopes().await, 1);

        sentinel.down.store(true, Ordering::SeqCst);
        store
            .provision("app-keys", [("host.master", "M2")])
            .expect("provision");
        let seen = cache
            .read(ScriptSecretsType::Host, None, &cancel)
            .await
            .expect("read despite sentinel");
        assert_eq!(master_of(seen), "M2");
        assert_eq!(cache.cached_scopes().await, 0);
    }

    #[tokio::test]
    async fn cancellation_still_wins_over_sentinel_fallback() {
        let store = InMemorySecretStore::new();
        let sentinel = InMemorySentinel::new();
        let cache = instance(&store, &sentinel);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = cache
            .read(ScriptSecretsType::Host, None, &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, SecretsError::Cancelled));
    }
}
