use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use hostkeys_core::{
    secrets::Scope,
    sentinel::{Sentinel, SentinelMarker},
    Result, SecretsError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::fsutil::{sanitize, write_json_atomic};

/// Sentinel markers as files in a directory every host instance can reach.
///
/// `host.json` tracks host secrets; `functions/<encoded name>.json` tracks each
/// function, the name lowercased and URL-safe base64 encoded. The body is
/// `{"last_write": "<RFC 3339>", "writer": "<uuid>"}`. Bodies written by older
/// hosts (a bare timestamp, or anything unparseable) are read with a nil writer
/// and never fail a read or a touch.
pub struct FileSentinel {
    dir: PathBuf,
    touch_lock: Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerBody {
    last_write: DateTime<Utc>,
    writer: Uuid,
}

// `DateTime.ToString()` under the invariant culture.
const LEGACY_FORMATS: [&str; 2] = ["%m/%d/%Y %H:%M:%S", "%m/%d/%Y %I:%M:%S %p"];

impl FileSentinel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            touch_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, scope: &Scope) -> PathBuf {
        match scope {
            Scope::Host => self.dir.join("host.json"),
            Scope::Function(name) => self
                .dir
                .join("functions")
                .join(format!("{}.json", sanitize(&name.to_lowercase()))),
        }
    }
}

#[async_trait]
impl Sentinel for FileSentinel {
    #[instrument(skip_all, fields(scope = %scope))]
    async fn touch(&self, scope: &Scope) -> Result<SentinelMarker> {
        let _guard = self
            .touch_lock
            .lock()
            .map_err(|err| sentinel_err(format!("lock poisoned: {err}")))?;
        let path = self.path_for(scope);
        let previous = read_marker(&path)?;
        let marker = SentinelMarker::next(path.display().to_string(), previous.as_ref());

        let body = MarkerBody {
            last_write: marker.last_write,
            writer: marker.writer,
        };
        write_json_atomic(&path, &body).map_err(sentinel_err)?;
        debug!(last_write = %marker.last_write, "sentinel touched");
        Ok(marker)
    }

    async fn marker(&self, scope: &Scope) -> Result<Option<SentinelMarker>> {
        read_marker(&self.path_for(scope))
    }
}

fn read_marker(path: &Path) -> Result<Option<SentinelMarker>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) if err.kind() == ErrorKind::InvalidData => String::new(),
        Err(err) => return Err(sentinel_err(err)),
    };
    let scope_path = path.display().to_string();

    if let Ok(body) = serde_json::from_str::<MarkerBody>(&contents) {
        return Ok(Some(SentinelMarker {
            scope_path,
            last_write: body.last_write,
            writer: body.writer,
        }));
    }
    let last_write = match parse_legacy(contents.trim()) {
        Some(last_write) => last_write,
        None => {
            warn!(path = %scope_path, "unrecognised sentinel body; using modification time");
            modified_at(path)?
        }
    };
    Ok(Some(SentinelMarker {
        scope_path,
        last_write,
        writer: Uuid::nil(),
    }))
}

fn parse_legacy(body: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(body) {
        return Some(parsed.with_timezone(&Utc));
    }
    LEGACY_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(body, format).ok())
        .map(|naive| naive.and_utc())
}

fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(sentinel_err)?;
    Ok(modified.into())
}

fn sentinel_err<E: ToString>(err: E) -> SecretsError {
    SecretsError::unavailable("sentinel", err)
}
