//! Secret store: symmetric encryption for credentials kept in the config file.
//!
//! Ciphertext layout is `base64(salt[16] || nonce[24] || sealed)` using
//! XChaCha20-Poly1305. The key comes from `LIFEBOT_SECRET_KEY`: a base64-encoded
//! 32-byte key is used directly (the salt is carried but unused), any other
//! non-empty value is a passphrase run through Argon2id with the blob's salt.

use std::sync::OnceLock;

use argon2::Argon2;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use regex::Regex;

pub const SECRET_KEY_ENV: &str = "LIFEBOT_SECRET_KEY";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = SALT_LEN + NONCE_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("decryption failed: key material is not configured ({SECRET_KEY_ENV})")]
    KeyMissing,

    #[error("decryption failed: malformed ciphertext: {0}")]
    Malformed(String),

    #[error("decryption failed: ciphertext does not authenticate with the configured key")]
    Authentication,

    #[error("decrypted secret is not valid utf-8")]
    InvalidUtf8,

    #[error("failed to derive key from passphrase: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encryption,
}

#[derive(Clone)]
enum KeyMaterial {
    Raw([u8; 32]),
    Passphrase(String),
}

impl KeyMaterial {
    fn parse(material: &str) -> Self {
        if let Ok(decoded) = BASE64_STANDARD.decode(material) {
            if let Ok(key) = <[u8; 32]>::try_from(decoded.as_slice()) {
                return Self::Raw(key);
            }
        }
        Self::Passphrase(material.to_string())
    }

    fn key_for(&self, salt: &[u8; SALT_LEN]) -> Result<[u8; 32], SecretError> {
        match self {
            Self::Raw(key) => Ok(*key),
            Self::Passphrase(passphrase) => derive_key(passphrase, salt),
        }
    }
}

#[derive(Clone)]
pub struct SecretStore {
    key: Option<KeyMaterial>,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SecretStore {
    pub fn from_env() -> Self {
        Self::from_key_material(std::env::var(SECRET_KEY_ENV).ok().as_deref())
    }

    pub fn from_key_material(material: Option<&str>) -> Self {
        let key = material
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(KeyMaterial::parse);
        Self { key }
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let material = self.key.as_ref().ok_or(SecretError::KeyMissing)?;

        let mut salt = [0_u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let mut nonce = [0_u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let key = material.key_for(&salt)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        let sealed = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SecretError::Encryption)?;

        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(BASE64_STANDARD.encode(out))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, SecretError> {
        let material = self.key.as_ref().ok_or(SecretError::KeyMissing)?;

        let raw = BASE64_STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| SecretError::Malformed(format!("invalid base64: {e}")))?;
        if raw.len() < HEADER_LEN + TAG_LEN {
            return Err(SecretError::Malformed(format!(
                "expected at least {} bytes, got {}",
                HEADER_LEN + TAG_LEN,
                raw.len()
            )));
        }

        let (salt, rest) = raw.split_at(SALT_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let mut salt_arr = [0_u8; SALT_LEN];
        salt_arr.copy_from_slice(salt);

        let key = material.key_for(&salt_arr)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| SecretError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| SecretError::InvalidUtf8)
    }
}

/// Fresh random key, base64-encoded, suitable for `LIFEBOT_SECRET_KEY`.
pub fn generate_key() -> String {
    let mut key = [0_u8; 32];
    rand::rng().fill_bytes(&mut key);
    BASE64_STANDARD.encode(key)
}

fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> Result<[u8; 32], SecretError> {
    let mut key = [0_u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| SecretError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

// ============== Credential Validation ==============

#[derive(Clone, Debug)]
pub enum CredentialFormat {
    NonEmpty,
    Prefixed { prefix: String, min_len: usize },
    TelegramBotToken,
}

fn telegram_token_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{5,}:[A-Za-z0-9_-]{35}$").ok())
        .as_ref()
}

/// Check a decrypted credential against a format predicate.
///
/// Returns `(is_valid, reason)`; `reason` is empty when valid.
pub fn validate_credential(value: &str, format: &CredentialFormat) -> (bool, String) {
    let value = value.trim();
    if value.is_empty() {
        return (false, "credential is empty".to_string());
    }

    match format {
        CredentialFormat::NonEmpty => (true, String::new()),
        CredentialFormat::Prefixed { prefix, min_len } => {
            if !value.starts_with(prefix.as_str()) {
                return (false, format!("credential must start with '{prefix}'"));
            }
            if value.len() < *min_len {
                return (
                    false,
                    format!("credential is too short ({} < {min_len})", value.len()),
                );
            }
            (true, String::new())
        }
        CredentialFormat::TelegramBotToken => {
            if telegram_token_re().is_some_and(|re| re.is_match(value)) {
                (true, String::new())
            } else {
                (
                    false,
                    "expected '<bot id>:<35 character secret>' telegram token".to_string(),
                )
            }
        }
    }
}
