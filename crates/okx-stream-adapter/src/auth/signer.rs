/*
[INPUT]:  Timestamp, method, path and body of a prehash string; API secret
[OUTPUT]: Base64 HMAC-SHA256 signatures and unix timestamps
[POS]:    Auth layer - cryptographic signing for the login handshake
[UPDATE]: When changing signing algorithm or timestamp source
*/

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{OkxError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signs the prehash string `timestamp + method + path + body`.
pub trait RequestSigner: Send + Sync + fmt::Debug {
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String>;
}

/// HMAC-SHA256 keyed by the API secret, base64 encoded
pub struct HmacSha256Signer {
    secret: String,
}

impl HmacSha256Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl RequestSigner for HmacSha256Signer {
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|err| OkxError::Authentication {
                message: format!("invalid secret: {err}"),
            })?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for HmacSha256Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSha256Signer")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Source of wall-clock seconds for login timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn unix_timestamp(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_timestamp(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
