//! HMAC signatures for filesystem-served URLs.
//!
//! Message: `{key}\n{expires}` where `expires` is a unix timestamp in seconds.
//! Signature = base64url(HMAC-SHA256(secret, message)), unpadded.

use crate::traits::{StorageError, StorageResult};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        UrlSigner {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Unix timestamp `ttl` from now.
    pub fn expiry_from_now(ttl: Duration) -> u64 {
        now_secs().saturating_add(ttl.as_secs())
    }

    pub fn sign(&self, key: &str, expires: u64) -> StorageResult<String> {
        let mac = self.mac(key, expires)?;
        Ok(base64_url_encode(&mac.finalize().into_bytes()))
    }

    /// Check `signature` for `(key, expires)` and that `expires` has not passed.
    pub fn verify(&self, key: &str, expires: u64, signature: &str) -> bool {
        if now_secs() > expires {
            return false;
        }
        let Ok(tag) = base64_url_decode(signature) else {
            return false;
        };
        match self.mac(key, expires) {
            Ok(mac) => mac.verify_slice(&tag).is_ok(),
            Err(_) => false,
        }
    }

    fn mac(&self, key: &str, expires: u64) -> StorageResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| StorageError::ConfigError(format!("Invalid signing secret: {}", e)))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").field("secret", &"<redacted>").finish()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn base64_url_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s)
}
