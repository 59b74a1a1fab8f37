use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SecretsError};

/// Logical name carried by the host master key.
pub const MASTER_KEY_NAME: &str = "master";

/// Character reserved as the segment delimiter in encoded key names.
pub const NAME_DELIMITER: char = '.';

/// One usable credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    name: String,
    value: String,
}

impl Key {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn master(value: impl Into<String>) -> Self {
        Self::new(MASTER_KEY_NAME, value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Same name, different value. Used by callers that encrypt values before a write.
    pub fn with_value(&self, value: impl Into<String>) -> Self {
        Self::new(self.name.clone(), value)
    }
}

/// Host-level keys: the master key plus the host function and system key collections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSecrets {
    /// Missing only before the host is provisioned.
    pub master_key: Option<Key>,
    pub function_keys: Vec<Key>,
    pub system_keys: Vec<Key>,
}

impl HostSecrets {
    pub fn function_key(&self, name: &str) -> Option<&Key> {
        self.function_keys.iter().find(|k| k.name() == name)
    }

    pub fn system_key(&self, name: &str) -> Option<&Key> {
        self.system_keys.iter().find(|k| k.name() == name)
    }

    pub fn key_count(&self) -> usize {
        usize::from(self.master_key.is_some()) + self.function_keys.len() + self.system_keys.len()
    }

    /// Checks the naming invariants a write must uphold.
    pub fn validate(&self) -> Result<()> {
        if let Some(master) = &self.master_key {
            if master.name() != MASTER_KEY_NAME {
                return Err(SecretsError::invalid(format!(
                    "master key must be named `{MASTER_KEY_NAME}`, got `{}`",
                    master.name()
                )));
            }
        }
        ensure_unique("host function keys", &self.function_keys)?;
        ensure_unique("host system keys", &self.system_keys)
    }
}

/// Keys scoped to a single function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSecrets {
    pub keys: Vec<Key>,
}

impl FunctionSecrets {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    pub fn key(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name() == name)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_unique("function keys", &self.keys)
    }
}

/// Selects which model a read or write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSecretsType {
    Host,
    Function,
}

impl fmt::Display for ScriptSecretsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Function => f.write_str("function"),
        }
    }
}

/// Either secret model, as returned by a repository read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScriptSecrets {
    Host(HostSecrets),
    Function(FunctionSecrets),
}

impl ScriptSecrets {
    pub fn secrets_type(&self) -> ScriptSecretsType {
        match self {
            Self::Host(_) => ScriptSecretsType::Host,
            Self::Function(_) => ScriptSecretsType::Function,
        }
    }

    pub fn key_count(&self) -> usize {
        match self {
            Self::Host(host) => host.key_count(),
            Self::Function(function) => function.keys.len(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Host(host) => host.validate(),
            Self::Function(function) => function.validate(),
        }
    }

    pub fn into_host(self) -> Option<HostSecrets> {
        match self {
            Self::Host(host) => Some(host),
            Self::Function(_) => None,
        }
    }

    pub fn into_function(self) -> Option<FunctionSecrets> {
        match self {
            Self::Function(function) => Some(function),
            Self::Host(_) => None,
        }
    }
}

/// Resolved `(type, function name)` pair. One sentinel marker exists per scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Host,
    Function(String),
}

impl Scope {
    /// Validates the identity a caller passed alongside a secrets type.
    ///
    /// Host scopes ignore the function name. Function scopes need a non-empty
    /// name that does not contain the reserved delimiter.
    pub fn new(secrets_type: ScriptSecretsType, function_name: Option<&str>) -> Result<Self> {
        match secrets_type {
            ScriptSecretsType::Host => Ok(Self::Host),
            ScriptSecretsType::Function => {
                let name = function_name.unwrap_or_default();
                validate_function_name(name)?;
                Ok(Self::Function(name.to_string()))
            }
        }
    }

    pub fn function(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_function_name(&name)?;
        Ok(Self::Function(name))
    }

    pub fn secrets_type(&self) -> ScriptSecretsType {
        match self {
            Self::Host => ScriptSecretsType::Host,
            Self::Function(_) => ScriptSecretsType::Function,
        }
    }

    pub fn function_name(&self) -> Option<&str> {
        match self {
            Self::Host => None,
            Self::Function(name) => Some(name),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Function(name) => write!(f, "function:{name}"),
        }
    }
}

pub(crate) fn validate_function_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SecretsError::invalid("function name must not be empty"));
    }
    if name.contains(NAME_DELIMITER) {
        return Err(SecretsError::invalid(format!(
            "function name `{name}` contains reserved delimiter `{NAME_DELIMITER}`"
        )));
    }
    if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
        return Err(SecretsError::invalid(format!(
            "function name `{}` contains path separators or control characters",
            name.escape_debug()
        )));
    }
    Ok(())
}

fn ensure_unique(collection: &str, keys: &[Key]) -> Result<()> {
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if key.name().is_empty() {
            return Err(SecretsError::invalid(format!(
                "{collection} contain an empty key name"
            )));
        }
        if !seen.insert(key.name()) {
            return Err(SecretsError::invalid(format!(
                "{collection} contain duplicate key `{}`",
                key.name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_scope_requires_name() {
        let err = Scope::new(ScriptSecretsType::Function, None).expect_err("missing name");
        assert!(matches!(err, SecretsError::InvalidArgument { .. }));

        let err = Scope::new(ScriptSecretsType::Function, Some("  ")).expect_err("blank name");
        assert!(matches!(err, SecretsError::InvalidArgument { .. }));
    }

    #[test]
    fn function_scope_rejects_delimiter() {
        let err = Scope::function("http.trigger").expect_err("dotted name");
        assert!(matches!(err, SecretsError::InvalidArgument { .. }));
    }

    #[test]
    fn function_scope_rejects_path_like_names() {
        for name in ["/var/tmp/x/escaped", "a/b", "a\\b", "fn\n1", "fn\u{0}"] {
            let err = Scope::new(ScriptSecretsType::Function, Some(name)).expect_err(name);
            assert!(matches!(err, SecretsError::InvalidArgument { .. }), "{name:?}");
        }
        assert!(Scope::function("HttpTrigger-1_a").is_ok());
    }

    #[test]
    fn host_scope_ignores_function_name() {
        let scope = Scope::new(ScriptSecretsType::Host, Some("ignored")).expect("host");
        assert_eq!(scope, Scope::Host);
        assert_eq!(scope.function_name(), None);
    }

    #[test]
    fn duplicate_names_fail_validation() {
        let host = HostSecrets {
            master_key: Some(Key::master("m")),
            function_keys: vec![Key::new("default", "a"), Key::new("default", "b")],
            system_keys: vec![],
        };
        let err = host.validate().expect_err("duplicate");
        assert!(err.to_string().contains("duplicate key `default`"));
    }

    #[test]
    fn master_key_must_use_fixed_name() {
        let host = HostSecrets {
            master_key: Some(Key::new("admin", "m")),
            ..Default::default()
        };
        assert!(host.validate().is_err());
    }

    #[test]
    fn lookups_and_counts() {
        let host = HostSecrets {
            master_key: Some(Key::master("m")),
            function_keys: vec![Key::new("default", "f")],
            system_keys: vec![Key::new("durable", "s")],
        };
        assert_eq!(host.key_count(), 3);
        assert_eq!(host.function_key("default").map(Key::value), Some("f"));
        assert_eq!(host.system_key("durable").map(Key::value), Some("s"));
        assert!(host.system_key("default").is_none());

        let secrets = ScriptSecrets::Function(FunctionSecrets::new(vec![Key::new("k", "v")]));
        assert_eq!(secrets.secrets_type(), ScriptSecretsType::Function);
        assert_eq!(secrets.key_count(), 1);
    }
}
