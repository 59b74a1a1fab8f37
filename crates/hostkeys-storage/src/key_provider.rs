use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// Environment variable holding a base64 data-protection key on host instances.
pub const ENCRYPTION_KEY_ENV: &str = "HOSTKEYS_ENCRYPTION_KEY";

/// Key material used to seal secret values before they reach a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier written next to every sealed value (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; 32],
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("missing encryption key: set {0}")]
    Missing(&'static str),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides the data-protection key (environment on hosts, OS keychain for
/// operators, memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn current(&self) -> Result<KeyMaterial, KeyError>;
}

#[async_trait]
impl<T: KeyProvider + ?Sized> KeyProvider for Box<T> {
    async fn current(&self) -> Result<KeyMaterial, KeyError> {
        (**self).current().await
    }
}

/// Reads the key from [`ENCRYPTION_KEY_ENV`]; every host instance of one app shares it.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: &'static str,
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self {
            var: ENCRYPTION_KEY_ENV,
        }
    }
}

#[async_trait]
impl KeyProvider for EnvKeyProvider {
    async fn current(&self) -> Result<KeyMaterial, KeyError> {
        let encoded = std::env::var(self.var).map_err(|_| KeyError::Missing(self.var))?;
        decode_key("env", encoded.trim())
    }
}

/// OS keyring-backed provider; creates the key on first use.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn current(&self) -> Result<KeyMaterial, KeyError> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        if let Ok(secret) = entry.get_password() {
            return decode_key(&self.account, &secret);
        }

        let material = generate_key(&self.account);
        entry
            .set_password(&encode_key(&material))
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        Ok(material)
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl InMemoryKeyProvider {
    pub fn with_key(material: KeyMaterial) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(material))),
        }
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn current(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        Ok(guard.get_or_insert_with(|| generate_key("memory")).clone())
    }
}

pub fn generate_key(id: &str) -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: id.to_string(),
        bytes,
    }
}

pub fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(id: &str, secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| KeyError::Decode(format!("expected 32 bytes, got {}", b.len())))?;
    Ok(KeyMaterial {
        id: id.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_returns_same_key() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.current().await.unwrap();
        let second = provider.current().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.id, "memory");
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_key("env", "abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn encoded_key_decodes_back() {
        let material = generate_key("ops");
        let decoded = decode_key("ops", &encode_key(&material)).expect("decode");
        assert_eq!(decoded, material);
    }

    #[tokio::test]
    async fn env_provider_reports_missing_variable() {
        let provider = EnvKeyProvider {
            var: "HOSTKEYS_TEST_KEY_THAT_IS_NEVER_SET",
        };
        let err = provider.current().await.expect_err("unset");
        assert!(matches!(err, KeyError::Missing(_)));
    }
}
