use std::fmt::Write as _;

use color_eyre::Result;
use hostkeys_core::{
    repository::{PurgeOutcome, SecretsRepository},
    secrets::{FunctionSecrets, HostSecrets, Key, Scope, ScriptSecrets, ScriptSecretsType},
    sentinel::Sentinel,
    store::SecretStore,
    SecretsError,
};
use hostkeys_repo::SetLayout;
use hostkeys_storage::{cipher::KeyCipher, key_provider::KeyProvider};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Target;

const REDACTED: &str = "<redacted>";

/// Keys to merge into a scope.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyUpdates {
    pub master: Option<String>,
    pub keys: Vec<(String, String)>,
    pub system_keys: Vec<(String, String)>,
}

fn report(err: SecretsError) -> color_eyre::Report {
    color_eyre::eyre::eyre!(err)
}

pub async fn read<R, P>(
    repo: &R,
    cipher: Option<&KeyCipher<P>>,
    target: &Target,
    reveal: bool,
    cancel: &CancellationToken,
) -> Result<String>
where
    R: SecretsRepository,
    P: KeyProvider,
{
    let secrets = repo
        .read(target.secrets_type(), target.function_name(), cancel)
        .await
        .map_err(report)?;
    let secrets = match (cipher, reveal) {
        (Some(cipher), true) => cipher.open_secrets(&secrets).await?,
        _ => secrets,
    };
    Ok(render(&secrets, reveal))
}

pub async fn write<R, P>(
    repo: &R,
    cipher: Option<&KeyCipher<P>>,
    target: &Target,
    updates: KeyUpdates,
    cancel: &CancellationToken,
) -> Result<usize>
where
    R: SecretsRepository,
    P: KeyProvider,
{
    let secrets_type = target.secrets_type();
    if secrets_type == ScriptSecretsType::Function
        && (updates.master.is_some() || !updates.system_keys.is_empty())
    {
        color_eyre::eyre::bail!("--master and --system-key apply to host scope only");
    }

    let current = match repo
        .read(secrets_type, target.function_name(), cancel)
        .await
    {
        Ok(secrets) => secrets,
        Err(SecretsError::NotFound { .. }) => empty(secrets_type),
        Err(err) => return Err(report(err)),
    };
    let merged = merge(current, updates);

    let merged = match cipher {
        Some(cipher) if repo.is_encryption_supported() => cipher.seal_secrets(&merged).await?,
        Some(_) => {
            warn!("store does not accept encrypted values; writing plaintext");
            merged
        }
        None => merged,
    };
    repo.write(secrets_type, target.function_name(), &merged, cancel)
        .await
        .map_err(report)?;
    Ok(merged.key_count())
}

pub async fn purge<R: SecretsRepository>(
    repo: &R,
    live: &[String],
    cancel: &CancellationToken,
) -> Result<String> {
    let outcome = repo.purge_stale(live, cancel).await.map_err(report)?;
    Ok(match outcome {
        PurgeOutcome::Retained => "stale secrets retained (policy or store)".to_string(),
        PurgeOutcome::Removed(names) if names.is_empty() => "nothing to purge".to_string(),
        PurgeOutcome::Removed(names) => format!("purged: {}", names.join(", ")),
    })
}

pub async fn snapshot_write<R: SecretsRepository>(
    repo: &R,
    target: &Target,
    cancel: &CancellationToken,
) -> Result<String> {
    let secrets = repo
        .read(target.secrets_type(), target.function_name(), cancel)
        .await
        .map_err(report)?;
    repo.write_snapshot(target.secrets_type(), target.function_name(), &secrets, cancel)
        .await
        .map_err(report)
}

pub async fn snapshot_list<R: SecretsRepository>(
    repo: &R,
    target: &Target,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    repo.list_snapshots(target.secrets_type(), target.function_name(), cancel)
        .await
        .map_err(report)
}

pub async fn marker<N: Sentinel>(sentinel: &N, target: &Target) -> Result<String> {
    let scope = Scope::new(target.secrets_type(), target.function_name()).map_err(report)?;
    Ok(match sentinel.marker(&scope).await.map_err(report)? {
        Some(marker) => serde_json::to_string_pretty(&marker)?,
        None => format!("{scope}: never written"),
    })
}

/// Probe the store for the host set and the host sentinel.
pub async fn health<S, N>(store: &S, sentinel: &N, layout: &SetLayout) -> Result<()>
where
    S: SecretStore + ?Sized,
    N: Sentinel,
{
    let set = layout.set_for(&Scope::Host);
    match store.fetch_all(&set).await {
        Ok(pairs) => info!(store = store.name(), set = %set, count = pairs.len(), "store reachable"),
        Err(SecretsError::NotFound { .. }) => {
            info!(store = store.name(), set = %set, "store reachable; host set not provisioned")
        }
        Err(err) => return Err(report(err)),
    }
    sentinel.marker(&Scope::Host).await.map_err(report)?;
    Ok(())
}

fn empty(secrets_type: ScriptSecretsType) -> ScriptSecrets {
    match secrets_type {
        ScriptSecretsType::Host => ScriptSecrets::Host(HostSecrets::default()),
        ScriptSecretsType::Function => ScriptSecrets::Function(FunctionSecrets::default()),
    }
}

fn upsert(keys: &mut Vec<Key>, name: String, value: String) {
    match keys.iter_mut().find(|k| k.name() == name) {
        Some(existing) => *existing = existing.with_value(value),
        None => keys.push(Key::new(name, value)),
    }
}

fn merge(current: ScriptSecrets, updates: KeyUpdates) -> ScriptSecrets {
    match current {
        ScriptSecrets::Host(mut host) => {
            if let Some(master) = updates.master {
                host.master_key = Some(Key::master(master));
            }
            for (name, value) in updates.keys {
                upsert(&mut host.function_keys, name, value);
            }
            for (name, value) in updates.system_keys {
                upsert(&mut host.system_keys, name, value);
            }
            ScriptSecrets::Host(host)
        }
        ScriptSecrets::Function(mut function) => {
            for (name, value) in updates.keys {
                upsert(&mut function.keys, name, value);
            }
            ScriptSecrets::Function(function)
        }
    }
}

/// One line per key: `<kind> <name> <value>`.
pub fn render(secrets: &ScriptSecrets, reveal: bool) -> String {
    let value = |key: &Key| {
        if reveal {
            key.value().to_string()
        } else {
            REDACTED.to_string()
        }
    };
    let mut out = String::new();
    match secrets {
        ScriptSecrets::Host(host) => {
            if let Some(master) = &host.master_key {
                let _ = writeln!(out, "master    {}", value(master));
            }
            for key in &host.function_keys {
                let _ = writeln!(out, "function  {}  {}", key.name(), value(key));
            }
            for key in &host.system_keys {
                let _ = writeln!(out, "system    {}  {}", key.name(), value(key));
            }
        }
        ScriptSecrets::Function(function) => {
            for key in &function.keys {
                let _ = writeln!(out, "key       {}  {}", key.name(), value(key));
            }
        }
    }
    if out.is_empty() {
        out.push_str("no keys\n");
    }
    out
}
