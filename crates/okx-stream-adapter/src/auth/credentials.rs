/*
[INPUT]:  API key, passphrase and a request signer
[OUTPUT]: Signed login arguments for the WebSocket handshake
[POS]:    Auth layer - credential holder and login frame builder
[UPDATE]: When the login prehash or argument shape changes
*/

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::auth::signer::{Clock, HmacSha256Signer, RequestSigner};
use crate::error::Result;

pub const LOGIN_METHOD: &str = "GET";
pub const LOGIN_PATH: &str = "/users/self/verify";

/// API credentials for private and business endpoints
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub passphrase: String,
    signer: Arc<dyn RequestSigner>,
}

impl Credentials {
    /// Credentials signing with HMAC-SHA256 over `secret`
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self::with_signer(api_key, passphrase, Arc::new(HmacSha256Signer::new(secret)))
    }

    pub fn with_signer(
        api_key: impl Into<String>,
        passphrase: impl Into<String>,
        signer: Arc<dyn RequestSigner>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            passphrase: passphrase.into(),
            signer,
        }
    }

    /// Build the single login argument for the current second.
    pub fn login_args(&self, clock: &dyn Clock) -> Result<LoginArgs> {
        let timestamp = clock.unix_timestamp().to_string();
        let sign = self.signer.sign(&timestamp, LOGIN_METHOD, LOGIN_PATH, "")?;
        Ok(LoginArgs {
            api_key: self.api_key.clone(),
            passphrase: self.passphrase.clone(),
            timestamp,
            sign,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("passphrase", &"<redacted>")
            .field("signer", &self.signer)
            .finish()
    }
}

/// `{"apiKey", "passphrase", "timestamp", "sign"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginArgs {
    pub api_key: String,
    pub passphrase: String,
    pub timestamp: String,
    pub sign: String,
}
