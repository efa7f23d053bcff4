//! Request validation and invocation assembly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::config::GatewayConfig;
use crate::policy::error::PolicyError;
use crate::policy::flags::{self, SEPARATOR};
use crate::policy::matcher::{self, resolve_path};
use crate::policy::types::PolicyState;

/// Flags that consume the following token as their value.
const VALUE_FLAGS: &[&str] = &[
    "--host",
    "--port",
    "--default-code-root",
    "--logs-root",
    "--home",
];

/// A fully validated invocation, ready for the runner.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout_ms: u64,
    pub max_bytes: u64,
    pub max_stdout_lines: u64,
}

/// Validate a run request against the boundary, the allowlist, and the
/// effective flag set, and assemble the invocation.
///
/// Positional arguments are rejected unless they follow an explicit `--`
/// separator; everything after the separator is passed through verbatim.
pub fn prepare(
    config: &GatewayConfig,
    state: &PolicyState,
    path: &Path,
    args: &[String],
    user_env: &HashMap<String, String>,
    timeout_ms: Option<u64>,
    session_id: Option<&str>,
) -> Result<Prepared, PolicyError> {
    if config.allowed_root.as_os_str().is_empty() {
        return Err(PolicyError::Policy {
            reasons: vec!["allowed_root_not_configured".into()],
            hint: "set TURNSTILE_ALLOWED_ROOT to the directory scripts may run from".into(),
        });
    }

    let candidate =
        resolve_path(path).ok_or_else(|| PolicyError::BadArg("invalid path".into()))?;

    let root = resolve_path(&config.allowed_root)
        .ok_or_else(|| PolicyError::BadArg("invalid allowed root".into()))?;
    if !matcher::is_within(&candidate, &root) {
        return Err(PolicyError::Forbidden("path not under allowed root".into()));
    }
    if !candidate.is_file() {
        return Err(PolicyError::BadArg("path does not exist".into()));
    }

    let now = Utc::now();
    let matched_rule = matcher::match_rule(&candidate, &state.rules, now);
    let statically_allowed = config
        .allowed_scripts
        .iter()
        .any(|allowed| resolve_path(allowed).as_deref() == Some(candidate.as_path()));
    if !statically_allowed && matched_rule.is_none() {
        return Err(PolicyError::Forbidden("script not in allowlist".into()));
    }

    let profile = session_id
        .and_then(|sid| matcher::select_overlay(&state.overlays, sid, &candidate, now))
        .and_then(|overlay| state.profiles.get(&overlay.profile));
    let allowed_flags =
        flags::effective_allowed_flags(&config.global_flags, profile, matched_rule);

    let mut i = 0;
    let mut seen_separator = false;
    while i < args.len() {
        let token = &args[i];
        if token == SEPARATOR {
            seen_separator = true;
            i += 1;
            continue;
        }
        if seen_separator {
            i += 1;
            continue;
        }
        if token.starts_with("--") {
            if !allowed_flags.contains(token.as_str()) {
                return Err(PolicyError::BadArg(format!("flag not allowed: {token}")));
            }
            if VALUE_FLAGS.contains(&token.as_str()) {
                let Some(value) = args.get(i + 1) else {
                    return Err(PolicyError::BadArg(format!("missing value for {token}")));
                };
                if token == "--port" && !value.chars().all(|c| c.is_ascii_digit()) {
                    return Err(PolicyError::BadArg("port must be an integer".into()));
                }
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }
        return Err(PolicyError::BadArg(format!(
            "positional not allowed before '--' separator: {token}"
        )));
    }

    let mut env: HashMap<String, String> = std::env::vars().collect();
    for (key, value) in user_env {
        if config.env_allowlist.iter().any(|allowed| allowed == key) {
            env.insert(key.clone(), value.clone());
        }
    }

    let cwd = candidate
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.clone());

    Ok(Prepared {
        cwd,
        path: candidate,
        args: args.to_vec(),
        env,
        timeout_ms: timeout_ms.unwrap_or(config.default_caps.max_timeout_ms),
        max_bytes: config.default_caps.max_bytes,
        max_stdout_lines: config.default_caps.max_stdout_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::{Rule, RuleSelector};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> GatewayConfig {
        GatewayConfig {
            allowed_root: root.to_path_buf(),
            allowed_scripts: Vec::new(),
            global_flags: vec!["--smoke".into(), "--host".into(), "--port".into()],
            policy_file: root.join("policy.json"),
            require_preflight: false,
            default_caps: Default::default(),
            token_ttl: Duration::from_secs(600),
            session_ttl: Duration::from_secs(600),
            signing_secret: None,
            env_allowlist: vec!["API_URL".into()],
            log_dir: None,
        }
    }

    fn make_script(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, "#!/bin/sh\necho ok\n").unwrap();
        p
    }

    fn allow(config: &mut GatewayConfig, script: &Path) {
        config.allowed_scripts.push(script.to_path_buf());
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn script_outside_root_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir.path().join("inner"));
        std::fs::create_dir_all(dir.path().join("inner")).unwrap();
        let outside = make_script(dir.path(), "out.sh");

        let err = prepare(
            &config,
            &PolicyState::default(),
            &outside,
            &[],
            &no_env(),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_FORBIDDEN");
    }

    #[test]
    fn unlisted_script_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let script = make_script(dir.path(), "run.sh");

        let err = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &[],
            &no_env(),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_FORBIDDEN");
    }

    #[test]
    fn rule_matched_script_passes_without_static_entry() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let script = make_script(dir.path(), "run.sh");

        let mut state = PolicyState::default();
        state.rules.push(Rule {
            id: "r1".into(),
            selector: RuleSelector::Path {
                path: script.clone(),
            },
            flags_allowed: None,
            flags_denied: None,
            caps: None,
            created_at: Utc::now(),
            expires_at: None,
            created_by: None,
            label: None,
            note: None,
        });

        let prepared =
            prepare(&config, &state, &script, &[], &no_env(), None, None).unwrap();
        assert_eq!(prepared.cwd, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn positional_before_separator_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        let script = make_script(dir.path(), "run.sh");
        allow(&mut config, &script);

        let err = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &args(&["stray"]),
            &no_env(),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_BAD_ARG");
    }

    #[test]
    fn positional_after_separator_passes_through() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        let script = make_script(dir.path(), "run.sh");
        allow(&mut config, &script);

        let prepared = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &args(&["--smoke", "--", "positional", "--looks-like-a-flag"]),
            &no_env(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(prepared.args.len(), 4);
    }

    #[test]
    fn value_flags_require_a_value() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        let script = make_script(dir.path(), "run.sh");
        allow(&mut config, &script);

        let err = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &args(&["--host"]),
            &no_env(),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_BAD_ARG");

        let ok = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &args(&["--host", "127.0.0.1", "--port", "8080"]),
            &no_env(),
            None,
            None,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn port_must_be_numeric() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        let script = make_script(dir.path(), "run.sh");
        allow(&mut config, &script);

        let err = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &args(&["--port", "eighty"]),
            &no_env(),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_BAD_ARG");
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        let script = make_script(dir.path(), "run.sh");
        allow(&mut config, &script);

        let err = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &args(&["--forbidden"]),
            &no_env(),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_BAD_ARG");
    }

    #[test]
    fn only_allowlisted_env_keys_are_forwarded() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        let script = make_script(dir.path(), "run.sh");
        allow(&mut config, &script);

        let mut user_env = HashMap::new();
        user_env.insert("API_URL".to_string(), "http://localhost:9".to_string());
        user_env.insert("SECRET_KEY".to_string(), "nope".to_string());

        let prepared = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &[],
            &user_env,
            None,
            None,
        )
        .unwrap();
        assert_eq!(prepared.env.get("API_URL").map(String::as_str), Some("http://localhost:9"));
        assert!(!prepared.env.contains_key("SECRET_KEY"));
    }

    #[test]
    fn unset_allowed_root_is_a_policy_error() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.allowed_root = PathBuf::new();
        let script = make_script(dir.path(), "run.sh");

        let err = prepare(
            &config,
            &PolicyState::default(),
            &script,
            &[],
            &no_env(),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "E_POLICY");
    }
}
