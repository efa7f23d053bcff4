//! Gateway configuration and environment parsing.
//!
//! All environment access happens here, once, at construction time. The rest
//! of the engine receives an immutable `GatewayConfig` and stays free of
//! hidden global state, which keeps the policy functions deterministic and
//! directly testable.

use std::path::PathBuf;
use std::time::Duration;

use crate::policy::types::Caps;

/// Default lifetime of a preflight token / session preflight record.
pub const DEFAULT_PREFLIGHT_TTL_SECS: u64 = 600;

/// Immutable configuration consumed by the policy engine and the gate.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Boundary below which every candidate script must live.
    pub allowed_root: PathBuf,

    /// Statically allowlisted script paths (in addition to dynamic rules).
    pub allowed_scripts: Vec<PathBuf>,

    /// Globally permitted `--flag` tokens.
    pub global_flags: Vec<String>,

    /// Location of the persisted policy document.
    pub policy_file: PathBuf,

    /// Whether execution requires a prior successful preflight.
    pub require_preflight: bool,

    /// Fallback resource ceiling when no overlay or rule caps apply.
    pub default_caps: Caps,

    /// Lifetime of an issued preflight token.
    pub token_ttl: Duration,

    /// Lifetime of a recorded session preflight.
    pub session_ttl: Duration,

    /// Shared secret for token signing. When absent, an ephemeral per-process
    /// secret is generated and tokens do not survive a restart.
    pub signing_secret: Option<Vec<u8>>,

    /// Environment variable names that may be forwarded to executed scripts.
    pub env_allowlist: Vec<String>,

    /// Directory for the append-only execution audit log, if any.
    pub log_dir: Option<PathBuf>,
}

impl GatewayConfig {
    /// Build a configuration from `TURNSTILE_*` environment variables.
    pub fn from_env() -> Self {
        let allowed_root = std::env::var("TURNSTILE_ALLOWED_ROOT")
            .map(PathBuf::from)
            .unwrap_or_default();

        let policy_file = std::env::var("TURNSTILE_POLICY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("turnstile/policy.json"));

        let log_dir = match std::env::var("TURNSTILE_LOG_DIR") {
            Ok(v) if v.is_empty() => None,
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => Some(PathBuf::from("turnstile/logs")),
        };

        GatewayConfig {
            allowed_root,
            allowed_scripts: split_env_list(env_str("TURNSTILE_ALLOWED_SCRIPTS"))
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            global_flags: split_env_list(env_str("TURNSTILE_ALLOWED_ARGS")),
            policy_file,
            require_preflight: env_bool("TURNSTILE_REQUIRE_PREFLIGHT"),
            default_caps: Caps {
                max_timeout_ms: env_u64("TURNSTILE_TIMEOUT_MS_DEFAULT", 90_000),
                max_bytes: env_u64("TURNSTILE_MAX_OUTPUT_BYTES", 262_144),
                max_stdout_lines: env_u64("TURNSTILE_MAX_STDOUT_LINES", 1500),
                concurrency: env_u64("TURNSTILE_CONCURRENCY", 2) as u32,
            },
            token_ttl: Duration::from_secs(env_u64(
                "TURNSTILE_PREFLIGHT_TTL_SEC",
                DEFAULT_PREFLIGHT_TTL_SECS,
            )),
            session_ttl: Duration::from_secs(env_u64(
                "TURNSTILE_SESSION_TTL_SEC",
                DEFAULT_PREFLIGHT_TTL_SECS,
            )),
            signing_secret: env_str("TURNSTILE_PREFLIGHT_SECRET")
                .filter(|s| !s.is_empty())
                .map(String::into_bytes),
            env_allowlist: split_env_list(env_str("TURNSTILE_ENV_ALLOWLIST")),
            log_dir,
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_bool(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Split a list-valued setting on `:`, `;`, or `,`, dropping empty entries.
pub fn split_env_list(val: Option<String>) -> Vec<String> {
    let Some(val) = val else {
        return Vec::new();
    };
    val.split([':', ';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
