//! Token issuing and verification.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::policy::matcher::resolve_path;

use super::TOKEN_VERSION;

type HmacSha256 = Hmac<Sha256>;

/// Why a token failed verification. All four are non-fatal; the caller
/// re-runs preflight to obtain a fresh token.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    #[error("no preflight token supplied")]
    Missing,
    #[error("preflight token is malformed or its signature does not verify")]
    Invalid,
    #[error("preflight token has expired")]
    Expired,
    #[error("preflight token was issued for a different path or argument list")]
    Mismatch,
}

impl VerifyError {
    /// Stable wire identifier.
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::Missing => "missing",
            VerifyError::Invalid => "invalid",
            VerifyError::Expired => "expired",
            VerifyError::Mismatch => "mismatch",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    v: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    path: String,
    args_sha256: String,
    iat: i64,
    exp: i64,
}

/// A freshly issued token with its expiry, for echoing back to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies preflight tokens with a server-held secret.
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
    ephemeral: bool,
}

impl TokenSigner {
    /// Build a signer. Without a configured secret an ephemeral random one
    /// is generated; tokens then do not survive a process restart.
    pub fn new(secret: Option<Vec<u8>>, ttl: Duration) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => TokenSigner {
                secret,
                ttl,
                ephemeral: false,
            },
            _ => {
                let generated: [u8; 32] = rand::random();
                TokenSigner {
                    secret: generated.to_vec(),
                    ttl,
                    ephemeral: true,
                }
            }
        }
    }

    /// Whether the signing secret was generated for this process only.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Issue a token binding `(path, args)` until the configured TTL runs
    /// out. Call only after the evaluator returned an allow.
    pub fn issue(&self, path: &Path, args: &[String]) -> IssuedToken {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let exp = now + ttl;

        let header = Header {
            alg: "HS256".into(),
            v: TOKEN_VERSION,
        };
        let payload = Payload {
            path: normalize(path),
            args_sha256: hash_args(args),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let head = encode_segment(&header);
        let body = encode_segment(&payload);
        let signature = self.sign(&head, &body);

        IssuedToken {
            token: format!("{head}.{body}.{signature}"),
            // surface the second-granular expiry actually embedded in the token
            expires_at: Utc.timestamp_opt(payload.exp, 0).single().unwrap_or(exp),
        }
    }

    /// Verify a token against the current run request. Signature, expiry,
    /// and the exact (path, args) binding must all hold.
    pub fn verify(
        &self,
        token: &str,
        path: &Path,
        args: &[String],
    ) -> Result<(), VerifyError> {
        if token.is_empty() {
            return Err(VerifyError::Missing);
        }

        let segments: Vec<&str> = token.split('.').collect();
        let [head, body, signature] = segments.as_slice() else {
            return Err(VerifyError::Invalid);
        };

        let expected = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| VerifyError::Invalid)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(head.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        // constant-time comparison
        mac.verify_slice(&expected).map_err(|_| VerifyError::Invalid)?;

        let header: Header = decode_segment(head).ok_or(VerifyError::Invalid)?;
        if header.alg != "HS256" || header.v != TOKEN_VERSION {
            return Err(VerifyError::Invalid);
        }
        let payload: Payload = decode_segment(body).ok_or(VerifyError::Invalid)?;

        if Utc::now().timestamp() > payload.exp {
            return Err(VerifyError::Expired);
        }
        if payload.path != normalize(path) || payload.args_sha256 != hash_args(args) {
            return Err(VerifyError::Mismatch);
        }
        Ok(())
    }

    fn sign(&self, head: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(head.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

fn normalize(path: &Path) -> String {
    resolve_path(path)
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

/// Hex SHA-256 over the JSON encoding of the canonicalized argument list.
fn hash_args(args: &[String]) -> String {
    let canonical = serde_json::to_vec(args).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

fn encode_segment<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_vec(value).expect("token segments are plain structs");
    URL_SAFE_NO_PAD.encode(json)
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Option<T> {
    let raw = URL_SAFE_NO_PAD.decode(segment).ok()?;
    serde_json::from_slice(&raw).ok()
}
