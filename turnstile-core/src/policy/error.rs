//! Policy error taxonomy.
//!
//! Every failure in the core is a typed result; nothing here panics or
//! escapes as an unhandled error. Denials are recoverable by obtaining
//! approval; forbidden paths need administrator action; bad arguments are
//! caller mistakes.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    /// Preflight not satisfied. Carries machine-readable reasons and a
    /// human-actionable remediation hint.
    #[error("preflight required: {hint}")]
    Policy { reasons: Vec<String>, hint: String },

    /// Path outside the allowed root or not allowlisted. Usually not
    /// resolvable without an administrator adding a rule.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed input: unparseable path, disallowed flag, missing flag
    /// value. Fixable by correcting the request.
    #[error("bad argument: {0}")]
    BadArg(String),

    /// Persistence failure while writing the policy document. Reported
    /// distinctly from validation failures so admin tooling can tell a
    /// rejected mutation from a lost one.
    #[error("failed to persist policy state to {path}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PolicyError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            PolicyError::Policy { .. } => "E_POLICY",
            PolicyError::Forbidden(_) => "E_FORBIDDEN",
            PolicyError::BadArg(_) => "E_BAD_ARG",
            PolicyError::Store { .. } => "E_STORE",
        }
    }
}
