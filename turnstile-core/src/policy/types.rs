//! Policy data model: rules, overlays, profiles, and resource caps.
//!
//! Everything here round-trips losslessly through the persisted JSON policy
//! document. Wire names are camelCase; rule selectors are an internally
//! tagged enum so the path/scope distinction is statically exhaustive
//! instead of optional-everything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Current version of the persisted policy document.
pub const POLICY_VERSION: u32 = 1;

/// Resource ceiling. Every field is an upper bound; merging two ceilings
/// takes the field-wise minimum, so caps can only ever tighten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caps {
    #[serde(default = "default_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_max_stdout_lines")]
    pub max_stdout_lines: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

fn default_timeout_ms() -> u64 {
    90_000
}

fn default_max_bytes() -> u64 {
    262_144
}

fn default_max_stdout_lines() -> u64 {
    1500
}

fn default_concurrency() -> u32 {
    2
}

impl Default for Caps {
    fn default() -> Self {
        Caps {
            max_timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            max_stdout_lines: default_max_stdout_lines(),
            concurrency: default_concurrency(),
        }
    }
}

impl Caps {
    /// Field-wise minimum of two ceilings.
    pub fn min_with(&self, other: &Caps) -> Caps {
        Caps {
            max_timeout_ms: self.max_timeout_ms.min(other.max_timeout_ms),
            max_bytes: self.max_bytes.min(other.max_bytes),
            max_stdout_lines: self.max_stdout_lines.min(other.max_stdout_lines),
            concurrency: self.concurrency.min(other.concurrency),
        }
    }
}

/// What a rule applies to: one exact script, or a directory subtree filtered
/// by glob patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleSelector {
    Path {
        path: PathBuf,
    },
    #[serde(rename_all = "camelCase")]
    Scope {
        scope_root: PathBuf,
        patterns: Vec<String>,
    },
}

/// An administrator-created allow entry. Never mutated in place; removed by
/// id. A rule whose `expiresAt` has passed is inert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,

    #[serde(flatten)]
    pub selector: RuleSelector,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags_allowed: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags_denied: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps: Option<Caps>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Rule {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// Named bundle of caps + allowed flags, referenced by overlays. Seeded in
/// the store out-of-band, not created through the rule API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub caps: Caps,
    #[serde(default)]
    pub flags_allowed: Vec<String>,
}

/// A session-scoped profile assignment, optionally narrowed to a path or a
/// scope. With no selector it applies session-wide as a fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub id: String,
    pub session_id: String,
    pub profile: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_root: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<String>>,
}

/// Overlay applicability, in decreasing specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlaySelector<'a> {
    Path(&'a Path),
    Scope {
        root: &'a Path,
        patterns: &'a [String],
    },
    SessionWide,
}

impl Overlay {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }

    /// The overlay's selector. A `scopeRoot` without patterns matches
    /// nothing under it, so it degrades to an empty scope, not session-wide.
    pub fn selector(&self) -> OverlaySelector<'_> {
        if let Some(path) = &self.path {
            OverlaySelector::Path(path)
        } else if let Some(root) = &self.scope_root {
            OverlaySelector::Scope {
                root,
                patterns: self.patterns.as_deref().unwrap_or(&[]),
            }
        } else {
            OverlaySelector::SessionWide
        }
    }
}

/// The aggregate policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

fn default_version() -> u32 {
    POLICY_VERSION
}

impl Default for PolicyState {
    fn default() -> Self {
        PolicyState {
            version: POLICY_VERSION,
            rules: Vec::new(),
            overlays: Vec::new(),
            profiles: BTreeMap::new(),
        }
    }
}
