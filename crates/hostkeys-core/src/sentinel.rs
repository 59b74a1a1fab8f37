use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{Result, SecretsError},
    secrets::Scope,
};

/// Change-notification token for one scope. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelMarker {
    /// Where the marker lives (file path or logical name).
    pub scope_path: String,
    pub last_write: DateTime<Utc>,
    /// Random token per touch; separates two writers that landed on the same timestamp.
    pub writer: Uuid,
}

impl SentinelMarker {
    /// Next marker after `previous`: `now`, bumped past `previous` if the clock did not move.
    pub fn next(scope_path: impl Into<String>, previous: Option<&SentinelMarker>) -> Self {
        let now = Utc::now();
        let last_write = match previous {
            Some(prev) if prev.last_write >= now => prev.last_write + Duration::microseconds(1),
            _ => now,
        };
        Self {
            scope_path: scope_path.into(),
            last_write,
            writer: Uuid::new_v4(),
        }
    }
}

/// Pollable, last-writer-wins visibility hint shared by every host instance.
///
/// Not a lock. Writers touch after their secret writes are durable; readers
/// compare markers to decide whether to re-fetch.
#[async_trait]
pub trait Sentinel: Send + Sync {
    /// Record that `scope` changed. Must be called last in a write path.
    async fn touch(&self, scope: &Scope) -> Result<SentinelMarker>;

    /// Latest marker, or `None` if the scope was never written.
    async fn marker(&self, scope: &Scope) -> Result<Option<SentinelMarker>>;

    /// Timestamp of the latest marker. Non-decreasing across successful touches.
    async fn current_version(&self, scope: &Scope) -> Result<Option<DateTime<Utc>>> {
        Ok(self.marker(scope).await?.map(|m| m.last_write))
    }
}

#[async_trait]
impl<T> Sentinel for Arc<T>
where
    T: Sentinel + ?Sized,
{
    async fn touch(&self, scope: &Scope) -> Result<SentinelMarker> {
        (**self).touch(scope).await
    }

    async fn marker(&self, scope: &Scope) -> Result<Option<SentinelMarker>> {
        (**self).marker(scope).await
    }
}

/// Sentinel kept in process memory. Clones share state, which is how tests model
/// several host instances pointing at the same sentinel location.
#[derive(Debug, Default, Clone)]
pub struct InMemorySentinel {
    inner: Arc<Mutex<HashMap<Scope, SentinelMarker>>>,
}

impl InMemorySentinel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sentinel for InMemorySentinel {
    async fn touch(&self, scope: &Scope) -> Result<SentinelMarker> {
        let mut markers = self.inner.lock().map_err(poisoned)?;
        let marker = SentinelMarker::next(scope.to_string(), markers.get(scope));
        markers.insert(scope.clone(), marker.clone());
        Ok(marker)
    }

    async fn marker(&self, scope: &Scope) -> Result<Option<SentinelMarker>> {
        let markers = self.inner.lock().map_err(poisoned)?;
        Ok(markers.get(scope).cloned())
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> SecretsError {
    SecretsError::unavailable("sentinel", format!("lock poisoned: {err}"))
}
