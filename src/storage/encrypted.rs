//! Journal payload sealing and the per-installation secret it is keyed from.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use ring::digest;
use std::path::{Path, PathBuf};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const SECRET_LEN: usize = 32;
const SECRET_FILE: &str = "journal.key";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("payload too short")]
    Truncated,
    #[error("secret file {path}: {source}")]
    Secret {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Prefix hashed ahead of the secret so the journal key differs from any
/// other key derived from `journal.key`.
const KEY_CONTEXT: &[u8] = b"secmon-agent/journal-payload/v1\0";

/// AES-256-GCM sealing of journal payloads under a key derived from the
/// installation's `journal.key` secret. Each payload is bound to a label
/// (the snapshot id), so a sealed blob copied onto another row fails to open.
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl PayloadCipher {
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(KEY_CONTEXT);
        ctx.update(secret);
        let key = ctx.finish();
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref())),
        }
    }

    /// base64(nonce || ciphertext || tag)
    pub fn seal(&self, label: &str, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = Payload {
            msg: plaintext,
            aad: label.as_bytes(),
        };
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| CryptoError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(BASE64.encode(out))
    }

    pub fn open(&self, label: &str, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = BASE64.decode(encoded)?;
        if raw.len() < NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let payload = Payload {
            msg: sealed,
            aad: label.as_bytes(),
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CryptoError::Decrypt)
    }
}

/// Read `<dir>/journal.key`, creating it with fresh random bytes on first use.
pub fn load_or_create_secret(dir: &Path) -> Result<Vec<u8>, CryptoError> {
    let path = dir.join(SECRET_FILE);
    let wrap = |source| CryptoError::Secret {
        path: path.clone(),
        source,
    };
    let create = || -> Result<Vec<u8>, CryptoError> {
        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        std::fs::write(&path, &secret).map_err(wrap)?;
        Ok(secret)
    };
    match std::fs::read(&path) {
        Ok(secret) if !secret.is_empty() => Ok(secret),
        Ok(_) => create(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => create(),
        Err(e) => Err(wrap(e)),
    }
}
