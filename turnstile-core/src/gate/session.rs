//! In-memory session preflight cache.
//!
//! Legacy admission mechanism kept alongside tokens: a successful preflight
//! for `(session, path, args)` admits an identical run for a short window.
//! Process-local and lost on restart, which simply forces a re-preflight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

type Key = (String, PathBuf, Vec<String>);

#[derive(Debug)]
pub struct SessionPreflightCache {
    ttl: Duration,
    entries: Mutex<HashMap<Key, Instant>>,
}

impl SessionPreflightCache {
    pub fn new(ttl: Duration) -> Self {
        SessionPreflightCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a successful preflight for this exact request shape.
    pub fn record(&self, session_id: &str, path: &Path, args: &[String]) {
        let mut entries = self.entries.lock().expect("session cache lock poisoned");
        entries.insert(
            (session_id.to_string(), path.to_path_buf(), args.to_vec()),
            Instant::now(),
        );
    }

    /// Whether an unexpired preflight record exists for this request shape.
    /// Expired entries are pruned as a side effect.
    pub fn contains(&self, session_id: &str, path: &Path, args: &[String]) -> bool {
        let mut entries = self.entries.lock().expect("session cache lock poisoned");
        entries.retain(|_, recorded| recorded.elapsed() <= self.ttl);
        entries.contains_key(&(session_id.to_string(), path.to_path_buf(), args.to_vec()))
    }
}
