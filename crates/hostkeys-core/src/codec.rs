//! Bidirectional mapping between flat `(name, value)` pairs and typed keys.
//!
//! ```text
//! host.master                        master key
//! host.functions.<key>               host function key
//! host.systemKey.<key>               host system key
//! functions.<function>.<key>         per-function key
//! ```
//!
//! Function names never contain `.`; key names may.

use crate::{
    error::{DecodeError, Result, SecretsError},
    secrets::{validate_function_name, Key, Scope, NAME_DELIMITER},
};

pub const MASTER_KEY: &str = "host.master";
pub const HOST_PREFIX: &str = "host.";
pub const HOST_FUNCTION_KEY_PREFIX: &str = "host.functions.";
pub const SYSTEM_KEY_PREFIX: &str = "host.systemKey.";
pub const FUNCTION_PREFIX: &str = "functions.";

/// What a decoded pair represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyCategory {
    Master,
    HostFunction,
    System,
    Function(String),
}

impl KeyCategory {
    /// Scope whose model this category belongs to.
    pub fn scope(&self) -> Scope {
        match self {
            Self::Master | Self::HostFunction | Self::System => Scope::Host,
            Self::Function(name) => Scope::Function(name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub category: KeyCategory,
    pub key: Key,
}

#[derive(Clone, Copy)]
enum PrefixKind {
    HostFunction,
    System,
    Function,
}

// Most specific match wins; `host.systemKey.` never falls through to a generic `host.` test.
const PREFIXES: [(&str, PrefixKind); 3] = [
    (HOST_FUNCTION_KEY_PREFIX, PrefixKind::HostFunction),
    (SYSTEM_KEY_PREFIX, PrefixKind::System),
    (FUNCTION_PREFIX, PrefixKind::Function),
];

/// Classifies an encoded pair and strips its prefix.
pub fn decode(encoded: &str, value: &str) -> Result<DecodedKey, DecodeError> {
    if encoded == MASTER_KEY {
        return Ok(DecodedKey {
            category: KeyCategory::Master,
            key: Key::master(value),
        });
    }

    let (prefix, kind) = PREFIXES
        .iter()
        .filter(|(prefix, _)| encoded.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .copied()
        .ok_or_else(|| DecodeError::UnknownPrefix {
            name: encoded.to_string(),
        })?;
    let rest = &encoded[prefix.len()..];

    let (category, key_name) = match kind {
        PrefixKind::HostFunction => (KeyCategory::HostFunction, rest),
        PrefixKind::System => (KeyCategory::System, rest),
        PrefixKind::Function => {
            let (function, key_name) = rest.split_once(NAME_DELIMITER).ok_or_else(|| {
                DecodeError::MissingFunctionName {
                    name: encoded.to_string(),
                }
            })?;
            if function.is_empty() {
                return Err(DecodeError::MissingFunctionName {
                    name: encoded.to_string(),
                });
            }
            (KeyCategory::Function(function.to_string()), key_name)
        }
    };

    if key_name.is_empty() {
        return Err(DecodeError::EmptyKeyName {
            name: encoded.to_string(),
        });
    }

    Ok(DecodedKey {
        category,
        key: Key::new(key_name, value),
    })
}

/// Builds the encoded name for a key. The master key's logical name is implied.
pub fn encode(category: &KeyCategory, key: &Key) -> Result<String> {
    if !matches!(category, KeyCategory::Master) && key.name().is_empty() {
        return Err(SecretsError::invalid("key name must not be empty"));
    }
    Ok(match category {
        KeyCategory::Master => MASTER_KEY.to_string(),
        KeyCategory::HostFunction => format!("{HOST_FUNCTION_KEY_PREFIX}{}", key.name()),
        KeyCategory::System => format!("{SYSTEM_KEY_PREFIX}{}", key.name()),
        KeyCategory::Function(function) => {
            validate_function_name(function)?;
            format!("{FUNCTION_PREFIX}{function}{NAME_DELIMITER}{}", key.name())
        }
    })
}

/// Prefix covering every encoded name that belongs to `scope`.
pub fn scope_prefix(scope: &Scope) -> String {
    match scope {
        Scope::Host => HOST_PREFIX.to_string(),
        Scope::Function(name) => format!("{FUNCTION_PREFIX}{name}{NAME_DELIMITER}"),
    }
}

/// Function name segment of an encoded per-function key, if it is one.
pub fn function_of(encoded: &str) -> Option<&str> {
    encoded
        .strip_prefix(FUNCTION_PREFIX)?
        .split_once(NAME_DELIMITER)
        .map(|(function, _)| function)
        .filter(|function| !function.is_empty())
}
