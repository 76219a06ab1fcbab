//! Request signing
//!
//! Every platform call carries `timestamp` and `signature` headers where the
//! signature is `base64(HMAC-SHA256(secret, timestamp))`. Only the timestamp
//! is signed; the URL and body are not part of the MAC and the platform will
//! reject anything else.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header values for one signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Epoch milliseconds as a decimal string
    pub timestamp: String,
    pub signature: String,
}

/// Signs requests with the secret key of one credential set
#[derive(Clone)]
pub struct RequestSigner {
    secret: String,
}

impl RequestSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Sign with the current wall-clock instant
    pub fn sign_now(&self) -> SignedHeaders {
        self.sign_at(Utc::now().timestamp_millis())
    }

    pub fn sign_at(&self, timestamp_millis: i64) -> SignedHeaders {
        let timestamp = timestamp_millis.to_string();
        let signature = compute_signature(&self.secret, &timestamp);
        SignedHeaders { timestamp, signature }
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner").field("secret", &"***").finish()
    }
}

/// `base64(HMAC-SHA256(secret, message))`
pub fn compute_signature(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}
