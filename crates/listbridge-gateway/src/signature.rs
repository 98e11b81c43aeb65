//! Webhook signature verification
//!
//! Both systems sign deliveries with HMAC-SHA256 over the raw request body:
//!
//! - tracker: `X-Hook-Signature: hex(hmac(secret, body))`
//! - list: `X-Slack-Signature: v0=hex(hmac(secret, "v0:{timestamp}:{body}"))`
//!   with `X-Slack-Request-Timestamp` no older than [`SLACK_TOLERANCE_SECS`]

use listbridge_core::{Error, Result};
use ring::hmac;

pub const SLACK_TOLERANCE_SECS: i64 = 300;
const SLACK_VERSION: &str = "v0";

pub fn sign_hex(secret: &[u8], message: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hex::encode(hmac::sign(&key, message).as_ref())
}

/// Constant-time check of a hex signature.
pub fn verify_hex(secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(tag) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, message, &tag).is_ok()
}

pub fn verify_tracker(secret: &str, body: &[u8], signature: Option<&str>) -> Result<()> {
    let signature = signature.ok_or_else(|| Error::signature_invalid("missing X-Hook-Signature"))?;
    if !verify_hex(secret.as_bytes(), body, signature) {
        return Err(Error::signature_invalid("tracker signature mismatch"));
    }
    Ok(())
}

fn slack_base(timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut base = Vec::with_capacity(body.len() + timestamp.len() + 4);
    base.extend_from_slice(SLACK_VERSION.as_bytes());
    base.push(b':');
    base.extend_from_slice(timestamp.as_bytes());
    base.push(b':');
    base.extend_from_slice(body);
    base
}

pub fn slack_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    format!("{SLACK_VERSION}={}", sign_hex(secret.as_bytes(), &slack_base(timestamp, body)))
}

pub fn verify_slack(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now_secs: i64,
) -> Result<()> {
    let timestamp = timestamp.ok_or_else(|| Error::signature_invalid("missing X-Slack-Request-Timestamp"))?;
    let signature = signature.ok_or_else(|| Error::signature_invalid("missing X-Slack-Signature"))?;

    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| Error::signature_invalid("timestamp is not a number"))?;
    if now_secs.abs_diff(ts) > SLACK_TOLERANCE_SECS.unsigned_abs() {
        return Err(Error::signature_invalid("stale request timestamp"));
    }

    let hex_part = signature
        .strip_prefix("v0=")
        .ok_or_else(|| Error::signature_invalid("unsupported signature version"))?;
    if !verify_hex(secret.as_bytes(), &slack_base(timestamp, body), hex_part) {
        return Err(Error::signature_invalid("list signature mismatch"));
    }
    Ok(())
}
