use hostkeys_core::{secrets::Scope, Result, SecretsError};
use serde::{Deserialize, Serialize};

/// How scopes map onto secret sets in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum SetLayout {
    /// One set holds host keys and every function's keys.
    Shared { set_name: String },
    /// Host keys in `host_set`; each function in `<function_set_prefix><function>`.
    PerFunction {
        host_set: String,
        function_set_prefix: String,
    },
}

impl SetLayout {
    pub fn shared(set_name: impl Into<String>) -> Self {
        Self::Shared {
            set_name: set_name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Shared { set_name } => non_empty("secret set name", set_name),
            Self::PerFunction {
                host_set,
                function_set_prefix,
            } => {
                non_empty("host secret set name", host_set)?;
                non_empty("function secret set prefix", function_set_prefix)?;
                if host_set.starts_with(function_set_prefix.as_str()) {
                    return Err(SecretsError::invalid(format!(
                        "host secret set `{host_set}` collides with function set prefix `{function_set_prefix}`"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn set_for(&self, scope: &Scope) -> String {
        match (self, scope) {
            (Self::Shared { set_name }, _) => set_name.clone(),
            (Self::PerFunction { host_set, .. }, Scope::Host) => host_set.clone(),
            (
                Self::PerFunction {
                    function_set_prefix,
                    ..
                },
                Scope::Function(name),
            ) => format!("{function_set_prefix}{name}"),
        }
    }
}

/// Whether secrets of deleted functions are removed from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgePolicy {
    /// Leave orphaned secrets in place; the store is an external system of record.
    #[default]
    Retain,
    RemoveStale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOptions {
    pub layout: SetLayout,
    pub purge: PurgePolicy,
}

impl RepositoryOptions {
    pub fn new(layout: SetLayout) -> Self {
        Self {
            layout,
            purge: PurgePolicy::default(),
        }
    }

    pub fn with_purge(mut self, purge: PurgePolicy) -> Self {
        self.purge = purge;
        self
    }
}

fn non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(SecretsError::invalid(format!("{what} must not be empty")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_layout_uses_one_set() {
        let layout = SetLayout::shared("app-keys");
        assert_eq!(layout.set_for(&Scope::Host), "app-keys");
        assert_eq!(layout.set_for(&Scope::function("fn1").unwrap()), "app-keys");
    }

    #[test]
    fn per_function_layout_prefixes_sets() {
        let layout = SetLayout::PerFunction {
            host_set: "host".into(),
            function_set_prefix: "fn-".into(),
        };
        layout.validate().expect("valid");
        assert_eq!(layout.set_for(&Scope::Host), "host");
        assert_eq!(layout.set_for(&Scope::function("fn1").unwrap()), "fn-fn1");
    }

    #[test]
    fn empty_identities_are_rejected() {
        assert!(matches!(
            SetLayout::shared(" ").validate(),
            Err(SecretsError::InvalidArgument { .. })
        ));
        let colliding = SetLayout::PerFunction {
            host_set: "fn-host".into(),
            function_set_prefix: "fn-".into(),
        };
        assert!(colliding.validate().is_err());
    }

    #[test]
    fn layout_deserializes_from_tagged_form() {
        let layout: SetLayout =
            serde_json::from_str(r#"{"layout":"shared","set_name":"app-keys"}"#).expect("parse");
        assert_eq!(layout, SetLayout::shared("app-keys"));
    }
}
