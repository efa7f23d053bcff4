//! Effective capability resolution.
//!
//! Computes the resource ceiling for a `(path, session)` pair by merging
//! overlay-profile caps and matched-rule caps via field-wise minimum. This
//! resolver only ever tightens; denial is exclusively the evaluator's job.

use chrono::Utc;
use std::path::Path;

use crate::config::GatewayConfig;

use super::matcher::{self, resolve_path};
use super::types::{Caps, PolicyState};

/// Effective caps for a candidate script, or `None` when neither an overlay
/// nor a rule contributes a ceiling (callers fall back to their defaults).
pub fn effective_caps_for(
    config: &GatewayConfig,
    state: &PolicyState,
    path: &Path,
    session_id: Option<&str>,
) -> Option<Caps> {
    let candidate = resolve_path(path)?;
    let root = resolve_path(&config.allowed_root)?;
    if !matcher::is_within(&candidate, &root) {
        return None;
    }

    let now = Utc::now();

    let overlay_caps = session_id
        .and_then(|sid| matcher::select_overlay(&state.overlays, sid, &candidate, now))
        .and_then(|overlay| state.profiles.get(&overlay.profile))
        .map(|profile| profile.caps);

    let rule_caps =
        matcher::match_rule(&candidate, &state.rules, now).and_then(|rule| rule.caps);

    match (overlay_caps, rule_caps) {
        (Some(a), Some(b)) => Some(a.min_with(&b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
