//! Durable policy state: tolerant load, atomic save, admin mutations.
//!
//! The whole document is rewritten on every mutation (load, mutate, rename).
//! Writes are rare, human-triggered administrative actions, so last-writer
//! wins is acceptable; the mutex only serializes concurrent admins in the
//! same process.
//!
//! A missing or corrupt policy file degrades to the empty state: nothing is
//! allowed until an administrator re-seeds it. Fail closed, never crash.

use chrono::{Duration, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::PolicyError;
use super::types::{Caps, Overlay, PolicyState, Rule, RuleSelector};

/// Load the policy document. Missing file and unparseable content both
/// yield the empty state.
pub fn load_state(path: &Path) -> PolicyState {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return PolicyState::default();
        }
        Err(e) => {
            warn!("failed to read policy file {:?}: {} - treating as empty", path, e);
            return PolicyState::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(e) => {
            warn!(
                "policy file {:?} is not valid JSON: {} - treating as empty",
                path, e
            );
            PolicyState::default()
        }
    }
}

/// Serialize and atomically replace the policy document (write to a temp
/// file in the target directory, then rename over the destination).
pub fn save_state(path: &Path, state: &PolicyState) -> Result<(), PolicyError> {
    let store_err = |source: std::io::Error| PolicyError::Store {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(store_err)?;

    let json = serde_json::to_string_pretty(state).map_err(|e| PolicyError::Store {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(store_err)?;
    tmp.write_all(json.as_bytes()).map_err(store_err)?;
    tmp.persist(path).map_err(|e| store_err(e.error))?;
    Ok(())
}

/// Fields an administrator supplies when creating a rule.
#[derive(Debug, Clone)]
pub struct RuleDraft {
    pub selector: RuleSelector,
    pub flags_allowed: Option<Vec<String>>,
    pub flags_denied: Option<Vec<String>>,
    pub caps: Option<Caps>,
    pub ttl_sec: Option<u64>,
    pub created_by: Option<String>,
    pub label: Option<String>,
    pub note: Option<String>,
}

/// Fields an administrator supplies when assigning a session overlay.
#[derive(Debug, Clone)]
pub struct OverlayDraft {
    pub session_id: String,
    pub profile: String,
    pub ttl_sec: Option<u64>,
    pub path: Option<PathBuf>,
    pub scope_root: Option<PathBuf>,
    pub patterns: Option<Vec<String>>,
}

/// Handle to the persisted policy document plus the admin mutation API.
#[derive(Debug)]
pub struct PolicyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PolicyStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state snapshot. Reads are tolerant; a torn admin process
    /// never leaves a half-written file thanks to the rename-on-save.
    pub fn load(&self) -> PolicyState {
        load_state(&self.path)
    }

    pub fn add_rule(&self, draft: RuleDraft) -> Result<Rule, PolicyError> {
        match &draft.selector {
            RuleSelector::Path { path } if path.as_os_str().is_empty() => {
                return Err(PolicyError::BadArg("rule path must not be empty".into()));
            }
            RuleSelector::Scope { patterns, .. } if patterns.is_empty() => {
                return Err(PolicyError::BadArg(
                    "scope rule requires at least one pattern".into(),
                ));
            }
            _ => {}
        }

        let now = Utc::now();
        let rule = Rule {
            id: Uuid::new_v4().to_string(),
            selector: draft.selector,
            flags_allowed: draft.flags_allowed,
            flags_denied: draft.flags_denied,
            caps: draft.caps,
            created_at: now,
            expires_at: draft
                .ttl_sec
                .map(|secs| now + Duration::seconds(secs as i64)),
            created_by: draft.created_by,
            label: draft.label,
            note: draft.note,
        };

        let _guard = self.lock.lock().expect("policy store lock poisoned");
        let mut state = load_state(&self.path);
        state.rules.push(rule.clone());
        save_state(&self.path, &state)?;
        info!("added {} rule {}", selector_kind(&rule.selector), rule.id);
        Ok(rule)
    }

    /// Remove a rule by id. Returns whether anything was removed.
    pub fn remove_rule(&self, id: &str) -> Result<bool, PolicyError> {
        let _guard = self.lock.lock().expect("policy store lock poisoned");
        let mut state = load_state(&self.path);
        let before = state.rules.len();
        state.rules.retain(|r| r.id != id);
        let removed = state.rules.len() != before;
        if removed {
            save_state(&self.path, &state)?;
            info!("removed rule {}", id);
        }
        Ok(removed)
    }

    pub fn assign_overlay(&self, draft: OverlayDraft) -> Result<Overlay, PolicyError> {
        if draft.path.is_some() && draft.scope_root.is_some() {
            return Err(PolicyError::BadArg(
                "overlay selector is either a path or a scope, not both".into(),
            ));
        }
        if draft.scope_root.is_some()
            && draft.patterns.as_ref().map_or(true, |p| p.is_empty())
        {
            return Err(PolicyError::BadArg(
                "scope overlay requires at least one pattern".into(),
            ));
        }

        let _guard = self.lock.lock().expect("policy store lock poisoned");
        let mut state = load_state(&self.path);
        if !state.profiles.contains_key(&draft.profile) {
            return Err(PolicyError::BadArg(format!(
                "unknown profile: {}",
                draft.profile
            )));
        }

        let now = Utc::now();
        let has_scope = draft.scope_root.is_some();
        let overlay = Overlay {
            id: Uuid::new_v4().to_string(),
            session_id: draft.session_id,
            profile: draft.profile,
            created_at: now,
            expires_at: draft
                .ttl_sec
                .map(|secs| now + Duration::seconds(secs as i64)),
            path: draft.path,
            scope_root: draft.scope_root,
            patterns: if has_scope { draft.patterns } else { None },
        };

        state.overlays.push(overlay.clone());
        save_state(&self.path, &state)?;
        info!(
            "assigned profile {:?} to session {:?} as overlay {}",
            overlay.profile, overlay.session_id, overlay.id
        );
        Ok(overlay)
    }

    /// Remove an overlay by id. Returns whether anything was removed.
    pub fn remove_overlay(&self, id: &str) -> Result<bool, PolicyError> {
        let _guard = self.lock.lock().expect("policy store lock poisoned");
        let mut state = load_state(&self.path);
        let before = state.overlays.len();
        state.overlays.retain(|o| o.id != id);
        let removed = state.overlays.len() != before;
        if removed {
            save_state(&self.path, &state)?;
            info!("removed overlay {}", id);
        }
        Ok(removed)
    }
}

fn selector_kind(selector: &RuleSelector) -> &'static str {
    match selector {
        RuleSelector::Path { .. } => "path",
        RuleSelector::Scope { .. } => "scope",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn draft_path_rule(path: &str) -> RuleDraft {
        RuleDraft {
            selector: RuleSelector::Path { path: path.into() },
            flags_allowed: Some(vec!["--smoke".into()]),
            flags_denied: None,
            caps: None,
            ttl_sec: Some(60),
            created_by: None,
            label: None,
            note: None,
        }
    }

    #[test]
    fn missing_file_loads_empty_state() {
        let dir = TempDir::new().unwrap();
        let state = load_state(&dir.path().join("absent.json"));
        assert_eq!(state, PolicyState::default());
    }

    #[test]
    fn corrupt_file_loads_empty_state() {
        let dir = TempDir::new().unwrap();
        let fp = dir.path().join("policy.json");
        std::fs::write(&fp, b"{not json at all").unwrap();
        let state = load_state(&fp);
        assert!(state.rules.is_empty());
        assert!(state.overlays.is_empty());
        assert!(state.profiles.is_empty());
    }

    #[test]
    fn save_creates_parent_directories_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let fp = dir.path().join("nested/deeper/policy.json");

        let store = PolicyStore::new(&fp);
        let rule = store.add_rule(draft_path_rule("/proj/run.sh")).unwrap();

        let reloaded = load_state(&fp);
        assert_eq!(reloaded.rules.len(), 1);
        assert_eq!(reloaded.rules[0], rule);
        assert!(reloaded.rules[0].expires_at.is_some());
    }

    #[test]
    fn remove_rule_by_id() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::new(dir.path().join("policy.json"));

        let rule = store.add_rule(draft_path_rule("/proj/run.sh")).unwrap();
        assert!(store.remove_rule(&rule.id).unwrap());
        assert!(!store.remove_rule(&rule.id).unwrap());
        assert!(store.load().rules.is_empty());
    }

    #[test]
    fn overlay_requires_existing_profile() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::new(dir.path().join("policy.json"));

        let err = store
            .assign_overlay(OverlayDraft {
                session_id: "s1".into(),
                profile: "ghost".into(),
                ttl_sec: Some(60),
                path: None,
                scope_root: None,
                patterns: None,
            })
            .unwrap_err();
        assert_eq!(err.code(), "E_BAD_ARG");
    }

    #[test]
    fn overlay_assignment_persists_selector() {
        let dir = TempDir::new().unwrap();
        let fp = dir.path().join("policy.json");

        let mut seeded = PolicyState::default();
        seeded.profiles.insert("tiny".into(), Default::default());
        save_state(&fp, &seeded).unwrap();

        let store = PolicyStore::new(&fp);
        let overlay = store
            .assign_overlay(OverlayDraft {
                session_id: "s1".into(),
                profile: "tiny".into(),
                ttl_sec: Some(300),
                path: None,
                scope_root: Some("/proj/A".into()),
                patterns: Some(vec!["**".into()]),
            })
            .unwrap();

        let reloaded = store.load();
        assert_eq!(reloaded.overlays.len(), 1);
        assert_eq!(reloaded.overlays[0].id, overlay.id);
        assert_eq!(
            reloaded.overlays[0].scope_root.as_deref(),
            Some(Path::new("/proj/A"))
        );

        assert!(store.remove_overlay(&overlay.id).unwrap());
        assert!(store.load().overlays.is_empty());
    }

    #[test]
    fn scope_rule_without_patterns_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = PolicyStore::new(dir.path().join("policy.json"));
        let err = store
            .add_rule(RuleDraft {
                selector: RuleSelector::Scope {
                    scope_root: "/proj".into(),
                    patterns: vec![],
                },
                flags_allowed: None,
                flags_denied: None,
                caps: None,
                ttl_sec: None,
                created_by: None,
                label: None,
                note: None,
            })
            .unwrap_err();
        assert_eq!(err.code(), "E_BAD_ARG");
    }
}
