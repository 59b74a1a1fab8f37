//! Caller-side sealing of key values for stores that accept encrypted content.
//!
//! A sealed value is self-describing: `enc:v1:<key id>:<nonce>:<ciphertext>`
//! (URL-safe base64, no padding). Values without the prefix pass through
//! `open` untouched, so stores may hold a mix during migration.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hostkeys_core::{
    secrets::{FunctionSecrets, HostSecrets, Key, ScriptSecrets},
    SecretsError,
};
use thiserror::Error;

use crate::key_provider::{KeyError, KeyMaterial, KeyProvider};

const SEALED_PREFIX: &str = "enc:v1:";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("key provider: {0}")]
    Key(#[from] KeyError),
    #[error("value for `{key}` was sealed with key `{found}`, current key is `{current}`")]
    KeyMismatch {
        key: String,
        found: String,
        current: String,
    },
    #[error("malformed sealed value for `{key}`")]
    Malformed { key: String },
    #[error("cipher failure: {0}")]
    Crypto(String),
}

impl From<CipherError> for SecretsError {
    fn from(err: CipherError) -> Self {
        SecretsError::invalid(err.to_string())
    }
}

pub fn is_sealed(value: &str) -> bool {
    value.starts_with(SEALED_PREFIX)
}

/// Seals and opens key values with AES-256-GCM.
pub struct KeyCipher<P: KeyProvider> {
    key_provider: P,
}

impl<P: KeyProvider> KeyCipher<P> {
    pub fn new(key_provider: P) -> Self {
        Self { key_provider }
    }

    pub async fn seal_secrets(&self, secrets: &ScriptSecrets) -> Result<ScriptSecrets, CipherError> {
        let material = self.key_provider.current().await?;
        map_secrets(secrets, |key| seal(&material, key))
    }

    pub async fn open_secrets(&self, secrets: &ScriptSecrets) -> Result<ScriptSecrets, CipherError> {
        let material = self.key_provider.current().await?;
        map_secrets(secrets, |key| open(&material, key))
    }
}

fn map_secrets<F>(secrets: &ScriptSecrets, f: F) -> Result<ScriptSecrets, CipherError>
where
    F: Fn(&Key) -> Result<Key, CipherError>,
{
    let map_all = |keys: &[Key]| keys.iter().map(&f).collect::<Result<Vec<_>, _>>();
    Ok(match secrets {
        ScriptSecrets::Host(host) => ScriptSecrets::Host(HostSecrets {
            master_key: host.master_key.as_ref().map(&f).transpose()?,
            function_keys: map_all(&host.function_keys)?,
            system_keys: map_all(&host.system_keys)?,
        }),
        ScriptSecrets::Function(function) => {
            ScriptSecrets::Function(FunctionSecrets::new(map_all(&function.keys)?))
        }
    })
}

fn seal(material: &KeyMaterial, key: &Key) -> Result<Key, CipherError> {
    if is_sealed(key.value()) {
        return Ok(key.clone());
    }
    let cipher = build_cipher(material)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, key.value().as_bytes())
        .map_err(|e| CipherError::Crypto(format!("encrypt failed: {e}")))?;

    Ok(key.with_value(format!(
        "{SEALED_PREFIX}{}:{}:{}",
        material.id,
        URL_SAFE_NO_PAD.encode(nonce.as_slice()),
        URL_SAFE_NO_PAD.encode(ciphertext)
    )))
}

fn open(material: &KeyMaterial, key: &Key) -> Result<Key, CipherError> {
    let Some(body) = key.value().strip_prefix(SEALED_PREFIX) else {
        return Ok(key.clone());
    };
    let malformed = || CipherError::Malformed {
        key: key.name().to_string(),
    };

    let mut parts = body.splitn(3, ':');
    let (Some(id), Some(nonce), Some(ciphertext)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };
    if id != material.id {
        return Err(CipherError::KeyMismatch {
            key: key.name().to_string(),
            found: id.to_string(),
            current: material.id.clone(),
        });
    }

    let nonce_bytes = URL_SAFE_NO_PAD.decode(nonce).map_err(|_| malformed())?;
    if nonce_bytes.len() != 12 {
        return Err(malformed());
    }
    let ciphertext = URL_SAFE_NO_PAD.decode(ciphertext).map_err(|_| malformed())?;

    let plaintext = build_cipher(material)?
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| CipherError::Crypto(format!("decrypt failed: {e}")))?;
    let value = String::from_utf8(plaintext).map_err(|_| malformed())?;
    Ok(key.with_value(value))
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, CipherError> {
    Aes256Gcm::new_from_slice(&material.bytes)
        .map_err(|e| CipherError::Crypto(format!("cipher init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::{generate_key, InMemoryKeyProvider};

    fn host() -> ScriptSecrets {
        ScriptSecrets::Host(HostSecrets {
            master_key: Some(Key::master("M1")),
            function_keys: vec![Key::new("default", "K1")],
            system_keys: vec![Key::new("sys1", "S1")],
        })
    }

    #[tokio::test]
    async fn seal_hides_values_and_open_restores_them() {
        let cipher = KeyCipher::new(InMemoryKeyProvider::default());
        let sealed = cipher.seal_secrets(&host()).await.expect("seal");

        let sealed_host = sealed.clone().into_host().expect("host");
        let master = sealed_host.master_key.expect("master");
        assert_eq!(master.name(), "master");
        assert!(is_sealed(master.value()));
        assert!(!master.value().contains("M1"));

        let opened = cipher.open_secrets(&sealed).await.expect("open");
        assert_eq!(opened, host());
    }

    #[tokio::test]
    async fn sealing_twice_is_a_no_op() {
        let cipher = KeyCipher::new(InMemoryKeyProvider::default());
        let once = cipher.seal_secrets(&host()).await.expect("seal");
        let twice = cipher.seal_secrets(&once).await.expect("seal again");
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn plaintext_values_pass_through_open() {
        let cipher = KeyCipher::new(InMemoryKeyProvider::default());
        let opened = cipher.open_secrets(&host()).await.expect("open");
        assert_eq!(opened, host());
    }

    #[tokio::test]
    async fn wrong_key_is_reported() {
        let sealed = KeyCipher::new(InMemoryKeyProvider::with_key(generate_key("old")))
            .seal_secrets(&host())
            .await
            .expect("seal");
        let err = KeyCipher::new(InMemoryKeyProvider::with_key(generate_key("new")))
            .open_secrets(&sealed)
            .await
            .expect_err("mismatch");
        assert!(matches!(err, CipherError::KeyMismatch { .. }));
    }

    #[tokio::test]
    async fn tampered_value_is_rejected() {
        let cipher = KeyCipher::new(InMemoryKeyProvider::default());
        let secrets = ScriptSecrets::Function(FunctionSecrets::new(vec![Key::new(
            "default",
            "enc:v1:memory:not-base64!",
        )]));
        let err = cipher.open_secrets(&secrets).await.expect_err("malformed");
        assert!(matches!(err, CipherError::Malformed { .. }));
    }
}
