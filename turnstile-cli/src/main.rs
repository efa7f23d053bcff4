//! Turnstile - policy-gated script execution gateway
//!
//! Command-line front end over the core engine: preflight checks, gated
//! runs, and the administrative rule/overlay surface. Configuration comes
//! from `TURNSTILE_*` environment variables; see `GatewayConfig::from_env`.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use turnstile_core::config::GatewayConfig;
use turnstile_core::gate::{ExecutionGate, RunRequest};
use turnstile_core::policy::{Caps, OverlayDraft, PolicyError, RuleDraft, RuleSelector};

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "turnstile",
    about = "Policy-gated script execution gateway",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Log level (default: warn); RUST_LOG overrides
    #[clap(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate preflight for a script and print the decision (and token)
    Check {
        /// Script path
        path: PathBuf,
        /// Session to record the preflight under
        #[clap(long)]
        session: Option<String>,
        /// Arguments the run would use
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run a script through the gate
    Run {
        /// Script path
        path: PathBuf,
        /// Session whose cached preflight (or overlay caps) apply
        #[clap(long)]
        session: Option<String>,
        /// Preflight token from a prior check
        #[clap(long)]
        preflight_token: Option<String>,
        /// Requested timeout; clamped by effective caps
        #[clap(long)]
        timeout_ms: Option<u64>,
        /// Arguments passed to the script
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Verify a preflight token against a path and argument list
    VerifyToken {
        #[clap(long)]
        token: String,
        path: PathBuf,
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print the effective caps for a path (and optional session)
    Caps {
        path: PathBuf,
        #[clap(long)]
        session: Option<String>,
    },

    /// Administer allow rules
    Rule {
        #[clap(subcommand)]
        command: RuleCommand,
    },

    /// Administer session profile overlays
    Overlay {
        #[clap(subcommand)]
        command: OverlayCommand,
    },

    /// Print the persisted policy state
    State,

    /// Print the statically allowlisted scripts and global flags
    ListAllowed,
}

#[derive(Subcommand, Debug)]
enum RuleCommand {
    /// Add a path or scope rule
    Add {
        /// Exact script path (path rule)
        #[clap(long, conflicts_with = "scope_root")]
        path: Option<PathBuf>,
        /// Scope root directory (scope rule)
        #[clap(long, requires = "patterns")]
        scope_root: Option<PathBuf>,
        /// Glob pattern relative to the scope root (repeatable)
        #[clap(long = "pattern")]
        patterns: Vec<String>,
        /// Flag permitted for matching scripts (repeatable)
        #[clap(long = "allow-flag")]
        flags_allowed: Vec<String>,
        /// Flag denied for matching scripts (repeatable)
        #[clap(long = "deny-flag")]
        flags_denied: Vec<String>,
        /// Rule lifetime in seconds (absent = never expires)
        #[clap(long)]
        ttl_sec: Option<u64>,
        #[clap(long)]
        max_timeout_ms: Option<u64>,
        #[clap(long)]
        max_bytes: Option<u64>,
        #[clap(long)]
        max_stdout_lines: Option<u64>,
        #[clap(long)]
        concurrency: Option<u32>,
        #[clap(long)]
        label: Option<String>,
        #[clap(long)]
        note: Option<String>,
        #[clap(long)]
        created_by: Option<String>,
    },
    /// Remove a rule by id
    Remove { id: String },
    /// List rules
    List,
}

#[derive(Subcommand, Debug)]
enum OverlayCommand {
    /// Assign a profile to a session, optionally narrowed to a path/scope
    Assign {
        #[clap(long)]
        session: String,
        #[clap(long)]
        profile: String,
        /// Overlay lifetime in seconds (absent = never expires)
        #[clap(long)]
        ttl_sec: Option<u64>,
        /// Narrow to one exact script
        #[clap(long, conflicts_with = "scope_root")]
        path: Option<PathBuf>,
        /// Narrow to a scope root
        #[clap(long, requires = "patterns")]
        scope_root: Option<PathBuf>,
        /// Glob pattern relative to the scope root (repeatable)
        #[clap(long = "pattern")]
        patterns: Vec<String>,
    },
    /// Remove an overlay by id
    Remove { id: String },
    /// List overlays
    List,
}

fn init_logging(level: &Option<LogLevel>) {
    let directive = level
        .as_ref()
        .map(LogLevel::to_filter_directive)
        .unwrap_or("warn");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_policy_error(err: &PolicyError) {
    let body = match err {
        PolicyError::Policy { reasons, hint } => serde_json::json!({
            "error": err.code(),
            "reasons": reasons,
            "hint": hint,
        }),
        other => serde_json::json!({
            "error": other.code(),
            "message": other.to_string(),
        }),
    };
    eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = GatewayConfig::from_env();
    let gate = ExecutionGate::new(config);

    match cli.command {
        Command::Check {
            path,
            session,
            args,
        } => {
            let report = gate.check_script(&path, &args, session.as_deref());
            print_json(&report)?;
            if !report.preflight.allowed {
                std::process::exit(2);
            }
        }

        Command::Run {
            path,
            session,
            preflight_token,
            timeout_ms,
            args,
        } => {
            let request = RunRequest {
                path,
                args,
                env: Default::default(),
                timeout_ms,
                session_id: session,
                preflight_token,
            };
            match gate.run_script(request).await {
                Ok(outcome) => {
                    let ok = outcome.ok();
                    print_json(&outcome)?;
                    if !ok {
                        std::process::exit(1);
                    }
                }
                Err(err) => {
                    print_policy_error(&err);
                    std::process::exit(2);
                }
            }
        }

        Command::VerifyToken { token, path, args } => {
            let body = match gate.verify_preflight_token(&token, &path, &args) {
                Ok(()) => serde_json::json!({ "ok": true }),
                Err(e) => serde_json::json!({ "ok": false, "reason": e.reason() }),
            };
            print_json(&body)?;
        }

        Command::Caps { path, session } => {
            let state = gate.store().load();
            let caps = turnstile_core::policy::effective_caps_for(
                gate.config(),
                &state,
                &path,
                session.as_deref(),
            );
            print_json(&caps)?;
        }

        Command::Rule { command } => handle_rule(&gate, command)?,
        Command::Overlay { command } => handle_overlay(&gate, command)?,

        Command::State => {
            print_json(&gate.store().load())?;
        }

        Command::ListAllowed => {
            let config = gate.config();
            let mut flags = config.global_flags.clone();
            flags.sort();
            let scripts: Vec<_> = config
                .allowed_scripts
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "path": p,
                        "allowedArgs": flags,
                    })
                })
                .collect();
            print_json(&serde_json::json!({ "scripts": scripts }))?;
        }
    }

    Ok(())
}

fn handle_rule(gate: &ExecutionGate, command: RuleCommand) -> Result<()> {
    match command {
        RuleCommand::Add {
            path,
            scope_root,
            patterns,
            flags_allowed,
            flags_denied,
            ttl_sec,
            max_timeout_ms,
            max_bytes,
            max_stdout_lines,
            concurrency,
            label,
            note,
            created_by,
        } => {
            let selector = match (path, scope_root) {
                (Some(path), None) => RuleSelector::Path { path },
                (None, Some(scope_root)) => RuleSelector::Scope {
                    scope_root,
                    patterns,
                },
                _ => return Err(anyhow!("rule add requires --path or --scope-root")),
            };

            let caps = if max_timeout_ms.is_some()
                || max_bytes.is_some()
                || max_stdout_lines.is_some()
                || concurrency.is_some()
            {
                let defaults = Caps::default();
                Some(Caps {
                    max_timeout_ms: max_timeout_ms.unwrap_or(defaults.max_timeout_ms),
                    max_bytes: max_bytes.unwrap_or(defaults.max_bytes),
                    max_stdout_lines: max_stdout_lines.unwrap_or(defaults.max_stdout_lines),
                    concurrency: concurrency.unwrap_or(defaults.concurrency),
                })
            } else {
                None
            };

            let draft = RuleDraft {
                selector,
                flags_allowed: if flags_allowed.is_empty() {
                    None
                } else {
                    Some(flags_allowed)
                },
                flags_denied: if flags_denied.is_empty() {
                    None
                } else {
                    Some(flags_denied)
                },
                caps,
                ttl_sec,
                created_by,
                label,
                note,
            };
            match gate.store().add_rule(draft) {
                Ok(rule) => print_json(&serde_json::json!({ "ok": true, "rule": rule })),
                Err(err) => {
                    print_policy_error(&err);
                    std::process::exit(2)
                }
            }
        }
        RuleCommand::Remove { id } => {
            let removed = gate.store().remove_rule(&id)?;
            print_json(&serde_json::json!({ "ok": removed }))
        }
        RuleCommand::List => print_json(&gate.store().load().rules),
    }
}

fn handle_overlay(gate: &ExecutionGate, command: OverlayCommand) -> Result<()> {
    match command {
        OverlayCommand::Assign {
            session,
            profile,
            ttl_sec,
            path,
            scope_root,
            patterns,
        } => {
            let draft = OverlayDraft {
                session_id: session,
                profile,
                ttl_sec,
                path,
                scope_root,
                patterns: if patterns.is_empty() {
                    None
                } else {
                    Some(patterns)
                },
            };
            match gate.store().assign_overlay(draft) {
                Ok(overlay) => {
                    print_json(&serde_json::json!({ "ok": true, "overlay": overlay }))
                }
                Err(err) => {
                    print_policy_error(&err);
                    std::process::exit(2)
                }
            }
        }
        OverlayCommand::Remove { id } => {
            let removed = gate.store().remove_overlay(&id)?;
            print_json(&serde_json::json!({ "ok": removed }))
        }
        OverlayCommand::List => print_json(&gate.store().load().overlays),
    }
}
