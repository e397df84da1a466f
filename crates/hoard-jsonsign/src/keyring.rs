//! Keyring: armored public keys, sealed secret keys, passphrase plumbing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argon2::Argon2;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::armor::{PUBKEY_FOOTER, PUBKEY_HEADER, armor, unarmor};
use crate::error::SignError;

/// Key id of a public key: lowercase hex of its 32 raw bytes.
///
/// Derived from the public-key blob alone, so client and server agree on
/// it without sharing anything but the blob.
pub fn key_id(vk: &VerifyingKey) -> String {
    hex::encode(vk.as_bytes())
}

/// Generate a fresh signing key from OS randomness.
pub fn generate_signing_key() -> SigningKey {
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

/// The armored text form of a public key, stored as a blob and referenced
/// by `camliSigner`.
pub fn armored_public_key(vk: &VerifyingKey) -> String {
    armor(PUBKEY_HEADER, PUBKEY_FOOTER, vk.as_bytes())
}

/// Parse an armored public-key blob.
pub fn parse_armored_public_key(text: &str) -> Result<VerifyingKey, SignError> {
    if !text.starts_with(PUBKEY_HEADER) {
        return Err(SignError::BadPublicKey("missing armor header".into()));
    }
    let raw = unarmor(text)?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| SignError::BadPublicKey(format!("key is {} bytes, want 32", raw.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SignError::BadPublicKey(e.to_string()))
}

/// Source of passphrases for unsealing secret keys.
///
/// `attempt` starts at 0; implementations backed by an interactive prompt
/// can show `desc` and signal cancellation by returning an error.
pub trait PassphraseSource: Send + Sync {
    fn passphrase(&self, desc: &str, attempt: u32) -> Result<String, SignError>;
}

/// A fixed passphrase (tests, scripted use).
pub struct StaticPassphrase(pub String);

impl PassphraseSource for StaticPassphrase {
    fn passphrase(&self, _desc: &str, _attempt: u32) -> Result<String, SignError> {
        Ok(self.0.clone())
    }
}

/// Reads the passphrase from an environment variable; cancels when unset.
pub struct EnvPassphrase(pub &'static str);

impl PassphraseSource for EnvPassphrase {
    fn passphrase(&self, _desc: &str, _attempt: u32) -> Result<String, SignError> {
        std::env::var(self.0).map_err(|_| SignError::DecryptCanceled)
    }
}

/// Resolves a key id to its decrypted signing key.
pub trait KeyFetcher: Send + Sync {
    fn fetch_signing_key(&self, key_id: &str) -> Result<SigningKey, SignError>;
}

/// One sealed secret key in the keyring file.
#[derive(Debug, Serialize, Deserialize)]
struct SealedKey {
    #[serde(rename = "keyId")]
    key_id: String,
    /// argon2id salt, hex.
    salt: String,
    /// XChaCha20Poly1305 nonce, hex.
    nonce: String,
    /// Sealed 32-byte signing key seed, hex.
    #[serde(rename = "sealedKey")]
    sealed_key: String,
}

/// Serialized keyring file: a list of sealed keys.
#[derive(Debug, Serialize, Deserialize)]
pub struct Keyring {
    version: u32,
    keys: Vec<SealedKey>,
}

impl Default for Keyring {
    fn default() -> Self {
        Self {
            version: 1,
            keys: Vec::new(),
        }
    }
}

impl Keyring {
    /// Default keyring location: `$HOME/.hoard/secring.json`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hoard")
            .join("secring.json")
    }

    /// Load a keyring file; a missing file is an empty keyring.
    pub fn load(path: &Path) -> Result<Self, SignError> {
        match std::fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SignError::Io(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SignError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Seal `key` under `passphrase` and add it to the ring.
    pub fn add_key(&mut self, key: &SigningKey, passphrase: &str) -> Result<String, SignError> {
        let id = key_id(&key.verifying_key());

        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        let mut nonce = [0u8; 24];
        rand::rng().fill_bytes(&mut nonce);

        let kek = derive_kek(passphrase, &salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&kek)
            .map_err(|e| SignError::Crypto(e.to_string()))?;
        let sealed = cipher
            .encrypt(XNonce::from_slice(&nonce), key.to_bytes().as_slice())
            .map_err(|e| SignError::Crypto(e.to_string()))?;

        self.keys.push(SealedKey {
            key_id: id.clone(),
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            sealed_key: hex::encode(sealed),
        });
        Ok(id)
    }

    /// Key ids present in the ring.
    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.iter().map(|k| k.key_id.as_str()).collect()
    }

    fn unseal(&self, id: &str, passphrase: &str) -> Result<SigningKey, SignError> {
        let entry = self
            .keys
            .iter()
            .find(|k| k.key_id == id)
            .ok_or_else(|| SignError::KeyNotFound(id.to_owned()))?;

        let salt = hex::decode(&entry.salt).map_err(|e| SignError::Crypto(e.to_string()))?;
        let nonce = hex::decode(&entry.nonce).map_err(|e| SignError::Crypto(e.to_string()))?;
        let sealed =
            hex::decode(&entry.sealed_key).map_err(|e| SignError::Crypto(e.to_string()))?;

        let kek = derive_kek(passphrase, &salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&kek)
            .map_err(|e| SignError::Crypto(e.to_string()))?;
        let seed = cipher
            .decrypt(XNonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| SignError::DecryptFailed(id.to_owned()))?;

        let seed: [u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| SignError::Crypto("bad sealed key length".into()))?;
        Ok(SigningKey::from_bytes(&seed))
    }
}

fn derive_kek(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], SignError> {
    let mut kek = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut kek)
        .map_err(|e| SignError::Crypto(e.to_string()))?;
    Ok(kek)
}

/// Fetches keys from a keyring file, asking the passphrase source on
/// demand. Two attempts per key, then the operation is canceled.
pub struct KeyringFetcher<P> {
    path: PathBuf,
    passphrase: P,
}

impl<P: PassphraseSource> KeyringFetcher<P> {
    pub fn new(path: impl Into<PathBuf>, passphrase: P) -> Self {
        Self {
            path: path.into(),
            passphrase,
        }
    }
}

impl<P: PassphraseSource> KeyFetcher for KeyringFetcher<P> {
    fn fetch_signing_key(&self, id: &str) -> Result<SigningKey, SignError> {
        let ring = Keyring::load(&self.path)?;
        let desc = format!("Need to unlock key {id} to use it for signing.");

        for attempt in 0..2 {
            let pass = self.passphrase.passphrase(&desc, attempt)?;
            match ring.unseal(id, &pass) {
                Ok(key) => return Ok(key),
                Err(SignError::DecryptFailed(_)) => {
                    debug!(key_id = id, attempt, "passphrase failed to decrypt");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(SignError::DecryptCanceled)
    }
}

/// Decrypt-once wrapper around another [`KeyFetcher`].
///
/// The cache is shared and guarded; concurrent signers hit the passphrase
/// source at most once per key.
pub struct CachingKeyFetcher<F> {
    inner: F,
    cache: Mutex<HashMap<String, SigningKey>>,
}

impl<F: KeyFetcher> CachingKeyFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<F: KeyFetcher> KeyFetcher for CachingKeyFetcher<F> {
    fn fetch_signing_key(&self, id: &str) -> Result<SigningKey, SignError> {
        {
            let cache = self.cache.lock().expect("key cache poisoned");
            if let Some(key) = cache.get(id) {
                return Ok(key.clone());
            }
        }
        let key = self.inner.fetch_signing_key(id)?;
        self.cache
            .lock()
            .expect("key cache poisoned")
            .insert(id.to_owned(), key.clone());
        Ok(key)
    }
}
