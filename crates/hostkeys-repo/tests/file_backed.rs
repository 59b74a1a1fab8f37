use std::sync::Arc;

use hostkeys_core::{
    repository::SecretsRepository,
    secrets::{FunctionSecrets, HostSecrets, Key, Scope, ScriptSecrets, ScriptSecretsType},
    sentinel::Sentinel,
};
use hostkeys_repo::{
    CachedSecretsRepository, PurgePolicy, RepositoryOptions, SetLayout, StoreSecretsRepository,
};
use hostkeys_storage::{file_store::FileSecretStore, sentinel::FileSentinel};
use tokio_util::sync::CancellationToken;

type Instance = CachedSecretsRepository<
    StoreSecretsRepository<Arc<FileSecretStore>, Arc<FileSentinel>>,
    Arc<FileSentinel>,
>;

/// One host instance; every instance opens the same directories.
fn instance(root: &std::path::Path) -> Instance {
    let store = Arc::new(FileSecretStore::new(root.join("store")));
    let sentinel = Arc::new(FileSentinel::new(root.join("sentinels")));
    let options =
        RepositoryOptions::new(SetLayout::shared("app-keys")).with_purge(PurgePolicy::RemoveStale);
    let repo = StoreSecretsRepository::new(store, sentinel.clone(), options).expect("repo");
    CachedSecretsRepository::new(repo, sentinel)
}

fn master(secrets: ScriptSecrets) -> Option<String> {
    secrets
        .into_host()
        .and_then(|host| host.master_key)
        .map(|key| key.value().to_string())
}

#[tokio::test]
async fn instances_observe_each_others_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = instance(dir.path());
    let b = instance(dir.path());
    let cancel = CancellationToken::new();

    let host = ScriptSecrets::Host(HostSecrets {
        master_key: Some(Key::master("M1")),
        function_keys: vec![Key::new("fn1", "K1")],
        system_keys: vec![],
    });
    a.write(ScriptSecretsType::Host, None, &host, &cancel)
        .await
        .expect("write");
    assert_eq!(
        master(b.read(ScriptSecretsType::Host, None, &cancel).await.expect("read")),
        Some("M1".into())
    );

    let rotated = ScriptSecrets::Host(HostSecrets {
        master_key: Some(Key::master("M2")),
        ..HostSecrets::default()
    });
    a.write(ScriptSecretsType::Host, None, &rotated, &cancel)
        .await
        .expect("rotate");
    let seen = b.read(ScriptSecretsType::Host, None, &cancel).await.expect("read");
    assert_eq!(seen, rotated);
}

#[tokio::test]
async fn purge_removes_stale_function_and_touches_its_marker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = instance(dir.path());
    let cancel = CancellationToken::new();

    for name in ["fn1", "fn2", "fn3"] {
        let keys = ScriptSecrets::Function(FunctionSecrets::new(vec![Key::new("default", name)]));
        repo.write(ScriptSecretsType::Function, Some(name), &keys, &cancel)
            .await
            .expect("write");
    }
    let sentinel = FileSentinel::new(dir.path().join("sentinels"));
    let fn3 = Scope::function("fn3").expect("scope");
    let before = sentinel.marker(&fn3).await.expect("marker").expect("written");

    let outcome = repo
        .purge_stale(&["fn1".into(), "fn2".into()], &cancel)
        .await
        .expect("purge");
    assert_eq!(outcome.removed_count(), 1);

    let after = sentinel.marker(&fn3).await.expect("marker").expect("touched");
    assert!(after.last_write > before.last_write);
    let fn3_keys = repo
        .read(ScriptSecretsType::Function, Some("fn3"), &cancel)
        .await
        .expect("read");
    assert_eq!(fn3_keys.key_count(), 0);
    let fn1_keys = repo
        .read(ScriptSecretsType::Function, Some("fn1"), &cancel)
        .await
        .expect("read");
    assert_eq!(fn1_keys.key_count(), 1);
}

#[tokio::test]
async fn writes_succeed_over_markers_left_by_older_hosts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker_path = dir.path().join("sentinels").join("host.json");
    std::fs::create_dir_all(marker_path.parent().unwrap()).expect("mkdir");
    std::fs::write(&marker_path, "10/19/2026 08:00:00").expect("legacy marker");

    let a = instance(dir.path());
    let b = instance(dir.path());
    let cancel = CancellationToken::new();

    let host = ScriptSecrets::Host(HostSecrets {
        master_key: Some(Key::master("M1")),
        ..HostSecrets::default()
    });
    a.write(ScriptSecretsType::Host, None, &host, &cancel)
        .await
        .expect("write over legacy marker");

    let body: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&marker_path).unwrap()).expect("json");
    assert!(body.get("writer").is_some());
    assert_eq!(
        master(b.read(ScriptSecretsType::Host, None, &cancel).await.expect("read")),
        Some("M1".into())
    );
    assert_eq!(b.cached_scopes().await, 1);
}

#[tokio::test]
async fn function_names_cannot_escape_the_sentinel_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = instance(dir.path());
    let cancel = CancellationToken::new();
    let outside = dir.path().join("escaped");
    let keys = ScriptSecrets::Function(FunctionSecrets::new(vec![Key::new("default", "v")]));

    let name = outside.display().to_string();
    let err = repo
        .write(ScriptSecretsType::Function, Some(&name), &keys, &cancel)
        .await
        .expect_err("path-like name");
    assert!(matches!(
        err,
        hostkeys_core::SecretsError::InvalidArgument { .. }
    ));
    assert!(!outside.with_extension("json").exists());

    repo.write(ScriptSecretsType::Function, Some("host"), &keys, &cancel)
        .await
        .expect("write");
    assert!(!dir.path().join("sentinels").join("host.json").exists());
}
