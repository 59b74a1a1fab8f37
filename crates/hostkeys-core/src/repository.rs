use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Result, SecretsError},
    secrets::{ScriptSecrets, ScriptSecretsType},
    store::SnapshotId,
};

/// Result of a stale-secret purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Store or policy keeps orphaned secrets; nothing was touched.
    Retained,
    /// Function names whose secrets were removed.
    Removed(Vec<String>),
}

impl PurgeOutcome {
    pub fn removed_count(&self) -> usize {
        match self {
            Self::Retained => 0,
            Self::Removed(names) => names.len(),
        }
    }
}

/// Typed read/write surface the host's authorization layer calls.
///
/// Every operation takes a cancellation token; a cancelled call returns
/// [`SecretsError::Cancelled`] promptly and is not retried.
#[async_trait]
pub trait SecretsRepository: Send + Sync {
    async fn read(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ScriptSecrets>;

    /// Persist `secrets`, then signal other instances through the sentinel.
    async fn write(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        secrets: &ScriptSecrets,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Remove secrets of functions absent from `current_functions`, if policy allows.
    async fn purge_stale(
        &self,
        current_functions: &[String],
        cancel: &CancellationToken,
    ) -> Result<PurgeOutcome>;

    async fn write_snapshot(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        secrets: &ScriptSecrets,
        cancel: &CancellationToken,
    ) -> Result<SnapshotId>;

    async fn list_snapshots(
        &self,
        secrets_type: ScriptSecretsType,
        function_name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SnapshotId>>;

    /// Whether callers should encrypt values themselves before `write`.
    fn is_encryption_supported(&self) -> bool;
}

/// Race `fut` against `cancel`. Cancellation wins ties.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SecretsError::Cancelled),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn cancelled_token_aborts_pending_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res: Result<()> = cancellable(&cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert_eq!(res, Err(SecretsError::Cancelled));
    }

    #[tokio::test]
    async fn live_token_passes_result_through() {
        let cancel = CancellationToken::new();
        let res = cancellable(&cancel, async { Ok(7) }).await;
        assert_eq!(res, Ok(7));
    }

    #[test]
    fn purge_outcome_counts() {
        assert_eq!(PurgeOutcome::Retained.removed_count(), 0);
        assert_eq!(
            PurgeOutcome::Removed(vec!["fn3".into()]).removed_count(),
            1
        );
    }
}
