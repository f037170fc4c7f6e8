//! Credential handling
//!
//! User profiles carry exchange API secrets as sealed envelopes rather
//! than plaintext. An envelope is `base64(mac || secret)` where `mac` is
//! an HMAC-SHA256 over the secret keyed by `PERPBOT_CREDENTIAL_KEY`.
//! Opening fails closed: a missing key, a malformed envelope, or a MAC
//! mismatch all reject the credential instead of trading without one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{BotError, Result};

type HmacSha256 = Hmac<Sha256>;

const MAC_LEN: usize = 32;
pub const CREDENTIAL_KEY_VAR: &str = "PERPBOT_CREDENTIAL_KEY";

/// Decoded exchange credentials for one user.
///
/// The secret never appears in Debug output.
#[derive(Clone)]
pub struct ApiCredentials {
    wallet_address: String,
    secret: String,
}

impl ApiCredentials {
    pub fn new(wallet_address: impl Into<String>, secret: impl Into<String>) -> Self {
        ApiCredentials {
            wallet_address: wallet_address.into(),
            secret: secret.into(),
        }
    }

    /// Open a sealed envelope using the key from the process environment
    pub fn from_sealed(wallet_address: &str, sealed: &str) -> Result<Self> {
        let key = sealing_key()?;
        let secret = open_secret(sealed, &key)?;
        Ok(ApiCredentials::new(wallet_address, secret))
    }

    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    /// Only for signing requests; never log the return value
    pub fn expose_secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("wallet_address", &self.wallet_address)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

fn sealing_key() -> Result<Vec<u8>> {
    dotenv::dotenv().ok();
    let key = std::env::var(CREDENTIAL_KEY_VAR)
        .map_err(|_| BotError::Auth(format!("{} is not set", CREDENTIAL_KEY_VAR)))?;
    if key.is_empty() {
        return Err(BotError::Auth(format!("{} is empty", CREDENTIAL_KEY_VAR)));
    }
    Ok(key.into_bytes())
}

fn mac_over(secret: &[u8], key: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(secret);
    mac.finalize().into_bytes().to_vec()
}

/// Seal a plaintext secret into an envelope string
pub fn seal_secret(secret: &str, key: &[u8]) -> String {
    let mut payload = mac_over(secret.as_bytes(), key);
    payload.extend_from_slice(secret.as_bytes());
    BASE64.encode(payload)
}

/// Open an envelope, verifying its MAC before returning the secret
pub fn open_secret(sealed: &str, key: &[u8]) -> Result<String> {
    let payload = BASE64
        .decode(sealed)
        .map_err(|e| BotError::Auth(format!("credential envelope is not valid base64: {}", e)))?;
    if payload.len() <= MAC_LEN {
        return Err(BotError::Auth(
            "credential envelope is too short".to_string(),
        ));
    }

    let (tag, secret) = payload.split_at(MAC_LEN);
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(secret);
    mac.verify_slice(tag)
        .map_err(|_| BotError::Auth("credential envelope failed integrity check".to_string()))?;

    String::from_utf8(secret.to_vec())
        .map_err(|_| BotError::Auth("credential secret is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open_round_trip() {
        let key = b"unit-test-key";
        let sealed = seal_secret("0xdeadbeef-private", key);
        assert_eq!(open_secret(&sealed, key).unwrap(), "0xdeadbeef-private");
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let sealed = seal_secret("secret", b"key-a");
        assert!(open_secret(&sealed, b"key-b").is_err());
    }

    #[test]
    fn test_open_rejects_tampered_envelope() {
        let key = b"unit-test-key";
        let sealed = seal_secret("secret", key);
        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert!(open_secret(&tampered, key).is_err());
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(open_secret("not base64!!!", b"key").is_err());
        assert!(open_secret("AAAA", b"key").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = ApiCredentials::new("0xwallet", "super_secret");
        let debug_str = format!("{:?}", creds);
        assert!(debug_str.contains("0xwallet"));
        assert!(!debug_str.contains("super_secret"));
        assert!(debug_str.contains("[REDACTED]"));
    }
}
