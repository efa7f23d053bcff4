//! Preflight evaluation: may this script run, and if not, why not.
//!
//! Deterministic and side-effect free. Reasons are machine-readable strings;
//! suggestions are advisory text to speed up rule creation and never affect
//! the decision.

use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::config::GatewayConfig;

use super::flags;
use super::matcher::{self, resolve_path};
use super::types::{PolicyState, Rule};

/// Advisory hint for an administrator considering a new rule.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub comment: String,
}

/// Outcome of a preflight evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preflight {
    pub allowed: bool,
    pub matched_rule: Option<Rule>,
    pub reasons: Vec<String>,
    pub suggestions: Vec<Suggestion>,
}

impl Preflight {
    fn denied(reasons: Vec<String>) -> Self {
        Preflight {
            allowed: false,
            matched_rule: None,
            reasons,
            suggestions: Vec::new(),
        }
    }
}

/// Evaluate admissibility of `(path, args)` for an optional session.
///
/// Boundary violations and flag violations accumulate in `reasons`; the
/// request is allowed iff no reason was recorded. The matched rule (if any)
/// is reported either way so callers can display what applied.
pub fn evaluate_preflight(
    config: &GatewayConfig,
    state: &PolicyState,
    path: &Path,
    args: &[String],
    session_id: Option<&str>,
) -> Preflight {
    let now = chrono::Utc::now();

    let Some(candidate) = resolve_path(path) else {
        return Preflight::denied(vec!["invalid_path".into()]);
    };

    let mut reasons = Vec::new();

    match resolve_path(&config.allowed_root) {
        Some(root) if matcher::is_within(&candidate, &root) => {}
        _ => reasons.push("outside_allowed_root".into()),
    }
    if !candidate.is_file() {
        reasons.push("path_not_found".into());
    }

    let overlay = session_id
        .and_then(|sid| matcher::select_overlay(&state.overlays, sid, &candidate, now));
    let profile = overlay.and_then(|o| {
        let found = state.profiles.get(&o.profile);
        if found.is_none() {
            debug!(
                "overlay {} names unknown profile {:?} - ignoring",
                o.id, o.profile
            );
        }
        found
    });

    let matched_rule = matcher::match_rule(&candidate, &state.rules, now);

    let allowed_flags = flags::effective_allowed_flags(&config.global_flags, profile, matched_rule);
    let offending = flags::disallowed_flags(args, &allowed_flags);
    if !offending.is_empty() {
        reasons.push(format!("disallowed_flags: {}", offending.join(",")));
    }

    let suggestions = suggest_for(&candidate);

    Preflight {
        allowed: reasons.is_empty(),
        matched_rule: matched_rule.cloned(),
        reasons,
        suggestions,
    }
}

fn suggest_for(candidate: &Path) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();
    if let Some(parent) = candidate.parent() {
        suggestions.push(Suggestion {
            kind: "scope".into(),
            value: parent.display().to_string(),
            comment: "Use the parent directory as a scope root".into(),
        });
    }
    if let Some(name) = candidate.file_name() {
        suggestions.push(Suggestion {
            kind: "pattern".into(),
            value: name.to_string_lossy().into_owned(),
            comment: "Use the file's basename as a pattern".into(),
        });
    }
    suggestions
}
