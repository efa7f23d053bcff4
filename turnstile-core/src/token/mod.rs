//! Preflight token protocol - stateless, signed admission credentials.
//!
//! A token binds a prior allow decision to an exact (path, argument-hash)
//! pair with an expiry, so "may I run this?" and "run it" can happen in
//! different requests or processes without re-running the evaluator.
//! HMAC-SHA256 over a self-describing header keeps the format rotatable;
//! no secret material ever leaves the process.

pub mod signer;

pub use signer::{IssuedToken, TokenSigner, VerifyError};

/// Token format version, embedded in every header.
pub const TOKEN_VERSION: u32 = 1;
