use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Serialize;
use tempfile::NamedTempFile;

/// Serialize `value` next to `path` and rename it into place.
/// Readers on any instance see either the old or the new document, never a torn one.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid storage path"))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// File-name-safe encoding of an arbitrary name (URL-safe base64, no padding).
pub(crate) fn sanitize(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name)
}

pub(crate) fn unsanitize(stem: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}
