//! Time-based one-time codes (RFC 6238) for session logins.
//!
//! Codes are HMAC-SHA1 over the 30 second time step, truncated to six digits.
//! The shared secret is the base32 string the brokerage shows as a QR code.

use crate::{BrokerError, BrokerResult};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const TIME_STEP_SECS: u64 = 30;
pub const DIGITS: u32 = 6;

/// Decode a base32 shared secret, tolerating spaces, padding and lower case
pub fn decode_secret(secret: &str) -> BrokerResult<Vec<u8>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if normalized.is_empty() {
        return Err(BrokerError::Configuration(
            "one-time code secret is empty".to_string(),
        ));
    }

    data_encoding::BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| BrokerError::Configuration(format!("invalid base32 secret: {e}")))
}

/// HOTP value for a raw key and counter
fn hotp(key: &[u8], counter: u64) -> BrokerResult<u32> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|_| BrokerError::Configuration("invalid HMAC key length".to_string()))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset]) & 0x7f) << 24
        | u32::from(digest[offset + 1]) << 16
        | u32::from(digest[offset + 2]) << 8
        | u32::from(digest[offset + 3]);

    Ok(binary % 10u32.pow(DIGITS))
}

/// One-time code for the given unix time
pub fn generate_at(secret: &str, unix_time: u64) -> BrokerResult<String> {
    let key = decode_secret(secret)?;
    let code = hotp(&key, unix_time / TIME_STEP_SECS)?;
    Ok(format!("{:0width$}", code, width = DIGITS as usize))
}

/// One-time code for the current time window
pub fn generate_now(secret: &str) -> BrokerResult<String> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    generate_at(secret, now)
}
