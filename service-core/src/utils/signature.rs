//! HMAC-SHA256 signatures for inbound webhooks.
//!
//! Header format: `t=<unix seconds>,v1=<hex signature>[,v1=<hex signature>...]`
//! where each signature is `HMAC-SHA256("{t}.{payload}", secret)`. Several
//! `v1` entries may be present while a secret is being rolled.

use anyhow::{Result, anyhow};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `t=...,v1=...` header.
#[derive(Debug, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| anyhow!("Malformed signature header"))?;
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| anyhow!("Invalid signature timestamp"))?,
                    )
                }
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| anyhow!("Signature header missing timestamp"))?;
        if signatures.is_empty() {
            return Err(anyhow!("Signature header missing v1 signature"));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Hex-encoded `HMAC-SHA256("{timestamp}.{payload}", secret)`.
pub fn compute_webhook_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Invalid key length: {}", e))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a complete header value for `payload`, as the gateway would send it.
pub fn sign_webhook_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let signature = compute_webhook_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Verify a webhook signature header.
///
/// `Err` means the header itself is unusable; `Ok(false)` means it parsed but
/// no signature matched or the timestamp is outside `tolerance_seconds` of `now`.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<bool> {
    let parsed = SignatureHeader::parse(header)?;

    if now.abs_diff(parsed.timestamp) > tolerance_seconds.unsigned_abs() {
        return Ok(false);
    }

    let expected = compute_webhook_signature(secret, parsed.timestamp, payload)?;
    Ok(parsed
        .signatures
        .iter()
        .any(|candidate| constant_time_eq(&expected, candidate)))
}

/// Constant-time string comparison for secrets and signatures.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
