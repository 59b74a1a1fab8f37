use serde::Serialize;

use crate::secrets::{FunctionSecrets, HostSecrets, Key};

/// Access granted by a presented key, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AuthorizationLevel {
    Function,
    System,
    Admin,
}

/// Which key matched; logged by the caller in place of the key value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyMatch {
    pub level: AuthorizationLevel,
    pub key_name: String,
}

/// Resolve the highest level a presented key grants.
///
/// Master key grants `Admin`, host system keys `System`, host function keys and
/// the target function's own keys `Function`. Empty input never matches.
pub fn authorize(
    presented: &str,
    host: &HostSecrets,
    function: Option<&FunctionSecrets>,
) -> Option<KeyMatch> {
    if presented.is_empty() {
        return None;
    }

    if let Some(master) = host.master_key.as_ref().filter(|k| matches(k, presented)) {
        return Some(key_match(AuthorizationLevel::Admin, master));
    }

    let function_keys = function.map(|f| f.keys.as_slice()).unwrap_or_default();
    let candidates = host
        .system_keys
        .iter()
        .map(|k| (AuthorizationLevel::System, k))
        .chain(
            host.function_keys
                .iter()
                .chain(function_keys)
                .map(|k| (AuthorizationLevel::Function, k)),
        );

    // Visit every candidate so timing does not reveal which collection matched.
    let mut found = None;
    for (level, key) in candidates {
        if matches(key, presented) && found.is_none() {
            found = Some(key_match(level, key));
        }
    }
    found
}

fn key_match(level: AuthorizationLevel, key: &Key) -> KeyMatch {
    KeyMatch {
        level,
        key_name: key.name().to_string(),
    }
}

fn matches(key: &Key, presented: &str) -> bool {
    constant_time_eq(key.value().as_bytes(), presented.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
