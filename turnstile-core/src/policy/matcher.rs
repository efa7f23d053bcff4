//! Path and scope matching.
//!
//! Pure functions deciding which rule or overlay applies to a candidate
//! script path. Glob patterns use shell semantics with literal separators:
//! `*` stays within a path segment, `**` spans segments.

use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::types::{Overlay, OverlaySelector, Rule, RuleSelector};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Resolve a path to canonical absolute form. Falls back to lexical
/// normalization when the path does not exist, so "not found" stays a
/// distinct condition from "unresolvable".
pub fn resolve_path(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if let Ok(resolved) = path.canonicalize() {
        return Some(resolved);
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Whether `path` equals or sits below `root` (both already resolved).
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Whether `candidate` is strictly inside `root` and its relative path
/// matches at least one glob pattern.
fn matches_scope(candidate: &Path, root: &Path, patterns: &[String]) -> bool {
    let Some(root) = resolve_path(root) else {
        return false;
    };
    let Ok(rel) = candidate.strip_prefix(&root) else {
        return false;
    };
    if rel.as_os_str().is_empty() {
        return false;
    }
    let rel = rel.to_string_lossy();
    patterns.iter().any(|pat| match Pattern::new(pat) {
        Ok(glob) => glob.matches_with(&rel, GLOB_OPTIONS),
        Err(e) => {
            debug!("skipping invalid glob pattern {:?}: {}", pat, e);
            false
        }
    })
}

fn selector_matches(selector: &RuleSelector, candidate: &Path) -> bool {
    match selector {
        RuleSelector::Path { path } => {
            resolve_path(path).as_deref() == Some(candidate)
        }
        RuleSelector::Scope {
            scope_root,
            patterns,
        } => matches_scope(candidate, scope_root, patterns),
    }
}

/// First unexpired rule whose selector matches the resolved candidate.
/// First-match-wins in list order; administrators control precedence
/// implicitly by addition order.
pub fn match_rule<'a>(
    candidate: &Path,
    rules: &'a [Rule],
    now: DateTime<Utc>,
) -> Option<&'a Rule> {
    rules
        .iter()
        .filter(|rule| !rule.is_expired(now))
        .find(|rule| selector_matches(&rule.selector, candidate))
}

/// Best-matching unexpired overlay for a session: a path selector beats a
/// scope selector beats a session-wide fallback; within one specificity
/// tier, list order decides.
pub fn select_overlay<'a>(
    overlays: &'a [Overlay],
    session_id: &str,
    candidate: &Path,
    now: DateTime<Utc>,
) -> Option<&'a Overlay> {
    let live: Vec<&Overlay> = overlays
        .iter()
        .filter(|o| o.session_id == session_id && !o.is_expired(now))
        .collect();

    let by_path = live
        .iter()
        .copied()
        .find(|o| match o.selector() {
            OverlaySelector::Path(path) => resolve_path(path).as_deref() == Some(candidate),
            _ => false,
        });
    if by_path.is_some() {
        return by_path;
    }

    let by_scope = live
        .iter()
        .copied()
        .find(|o| match o.selector() {
            OverlaySelector::Scope { root, patterns } => {
                matches_scope(candidate, root, patterns)
            }
            _ => false,
        });
    if by_scope.is_some() {
        return by_scope;
    }

    live.into_iter()
        .find(|o| o.selector() == OverlaySelector::SessionWide)
}
