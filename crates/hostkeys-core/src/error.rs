use thiserror::Error;

/// Errors surfaced by secret stores, sentinels, and repositories.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretsError {
    /// Backing store could not be reached or refused the call. Retryable with backoff.
    #[error("secret store `{store}` unavailable: {reason}")]
    StoreUnavailable { store: String, reason: String },
    /// The addressed secret set does not exist (nothing provisioned yet).
    #[error("secret set not found: {set}")]
    NotFound { set: String },
    /// Store cannot persist secret content.
    #[error("secret store `{store}` does not support writes")]
    WriteNotSupported { store: String },
    /// Store has no snapshot pipeline.
    #[error("secret store `{store}` does not support snapshots")]
    SnapshotNotSupported { store: String },
    /// Caller passed an unusable scope, set name, or secret model.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
    /// The caller's cancellation token fired before the call completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl SecretsError {
    pub fn unavailable(store: impl Into<String>, reason: impl ToString) -> Self {
        Self::StoreUnavailable {
            store: store.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Only transport-level failures are worth retrying; capability mismatches never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

/// Per-pair decode failure. Never fails a read; the pair is logged and dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("`{name}` matches no known key prefix")]
    UnknownPrefix { name: String },
    #[error("`{name}` has an empty key name")]
    EmptyKeyName { name: String },
    #[error("`{name}` has no function segment")]
    MissingFunctionName { name: String },
}

pub type Result<T, E = SecretsError> = std::result::Result<T, E>;
