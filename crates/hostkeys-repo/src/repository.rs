use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use hostkeys_core::{
    codec::{self, KeyCategory},
    repository::{cancellable, PurgeOutcome, SecretsRepository},
    secrets::{FunctionSecrets, HostSecrets, Scope, ScriptSecrets, ScriptSecretsType},
    sentinel::Sentinel,
    store::{SecretPairs, SecretStore, SnapshotId},
    Result, SecretsError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::layout::{PurgePolicy, RepositoryOptions, SetLayout};

/// Repository over any [`SecretStore`], signalling changes through a [`Sentinel`].
///
/// Owns no cache: every read fetches the set and builds a fresh model.
pub struct StoreSecretsRepository<S: SecretStore, N: Sentinel> {
    store: S,
    sentinel: N,
    options: RepositoryOptions,
}

impl<S: SecretStore, N: Sentinel> StoreSecretsRepository<S, N> {
    pub fn new(store: S, sentinel: N, options: RepositoryOptions) -> Result<Self> {
        options.layout.validate()?;
        Ok(Self {
            store,
            sentinel,
            options,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    fn resolve(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
    ) -> Result<(Scope, String)> {
        let scope = Scope::new(secrets_type, function_name)?;
        let set = self.options.layout.set_for(&scope);
        Ok((scope, set))
    }

    fn ensure_snapshots(&self) -> Result<()> {
        if self.store.supports_snapshots() {
            Ok(())
        } else {
            Err(self.store.snapshot_not_supported())
        }
    }

    async fn purge_shared(
        &self,
        set: &str,
        live: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let pairs = match cancellable(cancel, self.store.fetch_all(set)).await {
            Ok(pairs) => pairs,
            Err(SecretsError::NotFound { .. }) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let stale: BTreeSet<String> = pairs
            .keys()
            .filter_map(|name| codec::function_of(name))
            .filter(|function| !live.contains(&function.to_lowercase()))
            .filter(|function| stored_function_scope(function).is_some())
            .map(str::to_string)
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for function in stale {
            let prefix = codec::scope_prefix(&Scope::function(function.clone())?);
            let count = cancellable(cancel, self.store.delete_prefix(set, &prefix)).await?;
            debug!(function = %function, count, "removed stale function keys");
            removed.push(function);
        }
        Ok(removed)
    }

    async fn purge_per_function(
        &self,
        host_set: &str,
        function_set_prefix: &str,
        live: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let sets = cancellable(cancel, self.store.list_sets(function_set_prefix)).await?;
        let mut removed = Vec::new();
        for set in sets {
            if set == host_set {
                continue;
            }
            let Some(function) = set.strip_prefix(function_set_prefix) else {
                continue;
            };
            if function.is_empty() || live.contains(&function.to_lowercase()) {
                continue;
            }
            if stored_function_scope(function).is_none() {
                continue;
            }
            if cancellable(cancel, self.store.delete_set(&set)).await? {
                removed.push(function.to_string());
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl<S: SecretStore, N: Sentinel> SecretsRepository for StoreSecretsRepository<S, N> {
    #[instrument(skip(self, cancel))]
    async fn read(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ScriptSecrets> {
        let (scope, set) = self.resolve(secrets_type, function_name)?;
        let pairs = cancellable(cancel, self.store.fetch_all(&set)).await?;
        let (secrets, skipped) = decode_scope(&scope, &pairs);
        for (name, err) in &skipped {
            warn!(scope = %scope, set = %set, entry = %name, error = %err, "skipping undecodable secret");
        }
        debug!(
            scope = %scope,
            keys = secrets.key_count(),
            skipped = skipped.len(),
            "secrets read"
        );
        Ok(secrets)
    }

    #[instrument(skip(self, secrets, cancel))]
    async fn write(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        secrets: &ScriptSecrets,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (scope, set) = self.resolve(secrets_type, function_name)?;
        let pairs = encode_scope(&scope, secrets)?;
        let count = pairs.len();
        let prefix = codec::scope_prefix(&scope);

        match cancellable(cancel, self.store.put_all(&set, &prefix, pairs)).await {
            Ok(()) => {}
            Err(SecretsError::WriteNotSupported { store }) => {
                info!(
                    scope = %scope,
                    store = %store,
                    "store does not persist secret content; signalling sentinel only"
                );
            }
            Err(err) => return Err(err),
        }

        // Not cancellable: once the store write landed, other instances must hear about it.
        let marker = self.sentinel.touch(&scope).await?;
        info!(
            scope = %scope,
            set = %set,
            count,
            last_write = %marker.last_write,
            "secrets written"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(live = current_functions.len()))]
    async fn purge_stale(
        &self,
        current_functions: &[String],
        cancel: &CancellationToken,
    ) -> Result<PurgeOutcome> {
        if self.options.purge == PurgePolicy::Retain || !self.store.supports_purge() {
            info!(
                policy = ?self.options.purge,
                store_supports_purge = self.store.supports_purge(),
                "retaining stale secrets"
            );
            return Ok(PurgeOutcome::Retained);
        }

        let live: HashSet<String> = current_functions
            .iter()
            .map(|name| name.to_lowercase())
            .collect();
        let removed = match &self.options.layout {
            SetLayout::Shared { set_name } => self.purge_shared(set_name, &live, cancel).await?,
            SetLayout::PerFunction {
                host_set,
                function_set_prefix,
            } => {
                self.purge_per_function(host_set, function_set_prefix, &live, cancel)
                    .await?
            }
        };

        for function in &removed {
            self.sentinel.touch(&Scope::function(function.clone())?).await?;
        }
        info!(count = removed.len(), functions = ?removed, "purged stale function secrets");
        Ok(PurgeOutcome::Removed(removed))
    }

    #[instrument(skip(self, secrets, cancel))]
    async fn write_snapshot(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        secrets: &ScriptSecrets,
        cancel: &CancellationToken,
    ) -> Result<SnapshotId> {
        self.ensure_snapshots()?;
        let (scope, set) = self.resolve(secrets_type, function_name)?;
        let pairs = encode_scope(&scope, secrets)?;
        let prefix = codec::scope_prefix(&scope);
        let id = cancellable(cancel, self.store.write_snapshot(&set, &prefix, pairs)).await?;
        info!(scope = %scope, snapshot = %id, "snapshot written");
        Ok(id)
    }

    async fn list_snapshots(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SnapshotId>> {
        self.ensure_snapshots()?;
        let (scope, set) = self.resolve(secrets_type, function_name)?;
        let prefix = codec::scope_prefix(&scope);
        cancellable(cancel, self.store.list_snapshots(&set, &prefix)).await
    }

    fn is_encryption_supported(&self) -> bool {
        self.store.supports_encryption()
    }
}

/// Builds the scope's model from a fetched set.
///
/// Pairs belonging to other scopes are ignored; pairs that fail to decode are
/// returned alongside so the caller can report them.
/// Function names found in the store are untrusted; names a caller could not
/// have written are left alone.
fn stored_function_scope(function: &str) -> Option<Scope> {
    match Scope::function(function) {
        Ok(scope) => Some(scope),
        Err(err) => {
            warn!(function = %function.escape_debug(), error = %err, "skipping invalid stored function name");
            None
        }
    }
}

pub(crate) fn decode_scope(
    scope: &Scope,
    pairs: &SecretPairs,
) -> (ScriptSecrets, Vec<(String, hostkeys_core::DecodeError)>) {
    let mut host = HostSecrets::default();
    let mut function = FunctionSecrets::default();
    let mut skipped = Vec::new();

    for (name, value) in pairs {
        let decoded = match codec::decode(name, value) {
            Ok(decoded) => decoded,
            Err(err) => {
                skipped.push((name.clone(), err));
                continue;
            }
        };
        if decoded.category.scope() != *scope {
            continue;
        }
        match decoded.category {
            KeyCategory::Master => host.master_key = Some(decoded.key),
            KeyCategory::HostFunction => host.function_keys.push(decoded.key),
            KeyCategory::System => host.system_keys.push(decoded.key),
            KeyCategory::Function(_) => function.keys.push(decoded.key),
        }
    }

    let secrets = match scope {
        Scope::Host => ScriptSecrets::Host(host),
        Scope::Function(_) => ScriptSecrets::Function(function),
    };
    (secrets, skipped)
}

/// Encodes a model for `scope`, checking the model matches the scope first.
pub(crate) fn encode_scope(scope: &Scope, secrets: &ScriptSecrets) -> Result<SecretPairs> {
    if secrets.secrets_type() != scope.secrets_type() {
        return Err(SecretsError::invalid(format!(
            "{} secrets cannot be written to {scope} scope",
            secrets.secrets_type()
        )));
    }
    secrets.validate()?;

    let mut pairs = SecretPairs::new();
    let mut push = |category: KeyCategory, key: &hostkeys_core::secrets::Key| -> Result<()> {
        pairs.insert(codec::encode(&category, key)?, key.value().to_string());
        Ok(())
    };
    match (scope, secrets) {
        (Scope::Host, ScriptSecrets::Host(host)) => {
            if let Some(master) = &host.master_key {
                push(KeyCategory::Master, master)?;
            }
            for key in &host.function_keys {
                push(KeyCategory::HostFunction, key)?;
            }
            for key in &host.system_keys {
                push(KeyCategory::System, key)?;
            }
        }
        (Scope::Function(name), ScriptSecrets::Function(function)) => {
            for key in &function.keys {
                push(KeyCategory::Function(name.clone()), key)?;
            }
        }
        _ => {
            return Err(SecretsError::invalid(format!(
                "secrets do not belong to {scope} scope"
            )))
        }
    }
    Ok(pairs)
}
