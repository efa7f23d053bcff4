//! The execution gate - the single choke point in front of the runner.
//!
//! A run is admitted by exactly one of two proofs: a signed preflight token
//! bound to the request, or a recorded session preflight within its TTL.
//! With enforcement off the gate passes unconditionally, but capability
//! clamping still applies - clamping is independent of enforcement.

pub mod session;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::audit::{self, AuditRecord};
use crate::config::GatewayConfig;
use crate::exec::{self, ExecOutcome};
use crate::policy::matcher::resolve_path;
use crate::policy::{self, PolicyError, PolicyStore, Preflight};
use crate::token::TokenSigner;

pub use session::SessionPreflightCache;

/// Evidence that a request already passed preflight.
#[derive(Debug, Clone, Copy)]
pub enum AdmissionProof<'a> {
    /// A signed preflight token.
    Token(&'a str),
    /// A session whose preflight for this request shape may still be cached.
    SessionCache { session_id: &'a str },
}

/// A preflight decision plus the token issued for it (when allowed).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightReport {
    #[serde(flatten)]
    pub preflight: Preflight,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// A gated run request.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub session_id: Option<String>,
    pub preflight_token: Option<String>,
}

/// Orchestrates evaluator, resolver, token protocol, session cache, and the
/// bounded runner behind one API.
pub struct ExecutionGate {
    config: GatewayConfig,
    store: PolicyStore,
    signer: TokenSigner,
    sessions: SessionPreflightCache,
}

impl ExecutionGate {
    pub fn new(config: GatewayConfig) -> Self {
        let signer = TokenSigner::new(config.signing_secret.clone(), config.token_ttl);
        if signer.is_ephemeral() && config.require_preflight {
            warn!(
                "no preflight signing secret configured - using an ephemeral one; \
                 issued tokens will not survive a restart"
            );
        }
        let store = PolicyStore::new(config.policy_file.clone());
        let sessions = SessionPreflightCache::new(config.session_ttl);
        ExecutionGate {
            config,
            store,
            signer,
            sessions,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Run the preflight evaluation. On an allow, the session cache is
    /// updated (when a session is present) and a token is issued, so the
    /// caller can execute later via either proof.
    pub fn check_script(
        &self,
        path: &Path,
        args: &[String],
        session_id: Option<&str>,
    ) -> PreflightReport {
        let state = self.store.load();
        let preflight =
            policy::evaluate_preflight(&self.config, &state, path, args, session_id);

        if !preflight.allowed {
            debug!("preflight denied for {:?}: {:?}", path, preflight.reasons);
            return PreflightReport {
                preflight,
                preflight_token: None,
                token_expires_at: None,
            };
        }

        let normalized = resolve_path(path).unwrap_or_else(|| path.to_path_buf());
        if let Some(session_id) = session_id {
            self.sessions.record(session_id, &normalized, args);
        }
        let issued = self.signer.issue(&normalized, args);
        PreflightReport {
            preflight,
            preflight_token: Some(issued.token),
            token_expires_at: Some(issued.expires_at),
        }
    }

    /// Issue a token for an already-evaluated request. Exposed for callers
    /// that performed `check_script` out of band.
    pub fn make_preflight_token(&self, path: &Path, args: &[String]) -> crate::token::IssuedToken {
        let normalized = resolve_path(path).unwrap_or_else(|| path.to_path_buf());
        self.signer.issue(&normalized, args)
    }

    /// Verify a token against the current request shape.
    pub fn verify_preflight_token(
        &self,
        token: &str,
        path: &Path,
        args: &[String],
    ) -> Result<(), crate::token::VerifyError> {
        self.signer.verify(token, path, args)
    }

    /// The admission dispatcher: decides whether a run may proceed.
    pub fn admit(
        &self,
        proof: Option<AdmissionProof<'_>>,
        path: &Path,
        args: &[String],
    ) -> Result<(), PolicyError> {
        if !self.config.require_preflight {
            return Ok(());
        }

        match proof {
            Some(AdmissionProof::Token(token)) => {
                self.signer.verify(token, path, args).map_err(|e| {
                    PolicyError::Policy {
                        reasons: vec![format!("preflight_token_{}", e.reason())],
                        hint: "re-run check_script to obtain a fresh token, then retry".into(),
                    }
                })
            }
            Some(AdmissionProof::SessionCache { session_id }) => {
                if self.sessions.contains(session_id, path, args) {
                    Ok(())
                } else {
                    Err(PolicyError::Policy {
                        reasons: vec!["preflight_required".into()],
                        hint: "run check_script for this path and args first, then retry".into(),
                    })
                }
            }
            None => Err(PolicyError::Policy {
                reasons: vec!["preflight_required".into()],
                hint: "run check_script and retry with the returned preflight token".into(),
            }),
        }
    }

    /// Validate, admit, clamp, execute, audit.
    pub async fn run_script(&self, request: RunRequest) -> Result<ExecOutcome, PolicyError> {
        let state = self.store.load();
        let session_id = request.session_id.as_deref();

        let mut prepared = exec::prepare(
            &self.config,
            &state,
            &request.path,
            &request.args,
            &request.env,
            request.timeout_ms,
            session_id,
        )?;

        let proof = match (&request.preflight_token, session_id) {
            (Some(token), _) => Some(AdmissionProof::Token(token)),
            (None, Some(session_id)) => Some(AdmissionProof::SessionCache { session_id }),
            (None, None) => None,
        };
        self.admit(proof, &prepared.path, &prepared.args)?;

        // caller-requested values are a ceiling candidate, never a floor
        if let Some(caps) =
            policy::effective_caps_for(&self.config, &state, &prepared.path, session_id)
        {
            prepared.timeout_ms = prepared.timeout_ms.min(caps.max_timeout_ms);
            prepared.max_bytes = prepared.max_bytes.min(caps.max_bytes);
            prepared.max_stdout_lines = prepared.max_stdout_lines.min(caps.max_stdout_lines);
        }

        info!(
            "executing {:?} (timeout {} ms, output budget {} bytes)",
            prepared.path, prepared.timeout_ms, prepared.max_bytes
        );
        let outcome = exec::run(&prepared).await;

        if let Some(log_dir) = &self.config.log_dir {
            let record = AuditRecord::for_run(&prepared.path, &prepared.args, &outcome);
            audit::append(log_dir, &record);
        }
        Ok(outcome)
    }
}
