//! Flag allowance computation and argument-flag validation.
//!
//! The effective allowed set is global ∩ profile ∩ rule-allowed, minus
//! rule-denied; denial always wins over allowance. Only `--flag` tokens
//! before an explicit `--` separator are checked — everything after the
//! separator is opaque positional data for the execution-preparation path.

use std::collections::BTreeSet;

use super::types::{Profile, Rule};

/// Token that ends flag parsing; later tokens are passed through verbatim.
pub const SEPARATOR: &str = "--";

fn is_flag(token: &str) -> bool {
    token != SEPARATOR && token.starts_with("--")
}

/// Compute the effective allowed flag set for a request. A profile or rule
/// with an empty allowance leaves the set untouched, mirroring "no opinion";
/// an explicit rule denial removes flags unconditionally.
pub fn effective_allowed_flags(
    global: &[String],
    profile: Option<&Profile>,
    rule: Option<&Rule>,
) -> BTreeSet<String> {
    let mut allowed: BTreeSet<String> = global.iter().cloned().collect();

    if let Some(profile) = profile {
        if !profile.flags_allowed.is_empty() {
            let narrowed: BTreeSet<String> = profile.flags_allowed.iter().cloned().collect();
            allowed = allowed.intersection(&narrowed).cloned().collect();
        }
    }

    if let Some(rule) = rule {
        if let Some(rule_allowed) = &rule.flags_allowed {
            if !rule_allowed.is_empty() {
                let narrowed: BTreeSet<String> = rule_allowed.iter().cloned().collect();
                allowed = allowed.intersection(&narrowed).cloned().collect();
            }
        }
        if let Some(denied) = &rule.flags_denied {
            for flag in denied {
                allowed.remove(flag);
            }
        }
    }

    allowed
}

/// Flags in `args` (before any `--` separator) that are not in the allowed
/// set, in request order.
pub fn disallowed_flags(args: &[String], allowed: &BTreeSet<String>) -> Vec<String> {
    let mut offending = Vec::new();
    for token in args {
        if token == SEPARATOR {
            break;
        }
        if is_flag(token) && !allowed.contains(token.as_str()) {
            offending.push(token.clone());
        }
    }
    offending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::RuleSelector;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn global() -> Vec<String> {
        vec!["--smoke".into(), "--no-tests".into(), "--port".into()]
    }

    fn rule_with(allowed: Option<Vec<&str>>, denied: Option<Vec<&str>>) -> Rule {
        Rule {
            id: "r".into(),
            selector: RuleSelector::Path {
                path: PathBuf::from("/p/run.sh"),
            },
            flags_allowed: allowed.map(|v| v.into_iter().map(String::from).collect()),
            flags_denied: denied.map(|v| v.into_iter().map(String::from).collect()),
            caps: None,
            created_at: Utc::now(),
            expires_at: None,
            created_by: None,
            label: None,
            note: None,
        }
    }

    #[test]
    fn global_only_passes_through() {
        let allowed = effective_allowed_flags(&global(), None, None);
        assert!(allowed.contains("--smoke"));
        assert_eq!(allowed.len(), 3);
    }

    #[test]
    fn rule_allowance_only_narrows() {
        let baseline = effective_allowed_flags(&global(), None, None);
        let rule = rule_with(Some(vec!["--smoke", "--unknown"]), None);
        let narrowed = effective_allowed_flags(&global(), None, Some(&rule));

        // narrowing can never introduce a flag the wider set lacked
        assert!(narrowed.is_subset(&baseline));
        assert_eq!(narrowed.into_iter().collect::<Vec<_>>(), vec!["--smoke"]);
    }

    #[test]
    fn denial_wins_over_allowance() {
        let rule = rule_with(Some(vec!["--smoke", "--no-tests"]), Some(vec!["--smoke"]));
        let allowed = effective_allowed_flags(&global(), None, Some(&rule));
        assert!(!allowed.contains("--smoke"));
        assert!(allowed.contains("--no-tests"));
    }

    #[test]
    fn profile_intersects_with_global() {
        let profile = Profile {
            caps: Default::default(),
            flags_allowed: vec!["--smoke".into(), "--extra".into()],
        };
        let allowed = effective_allowed_flags(&global(), Some(&profile), None);
        assert_eq!(allowed.into_iter().collect::<Vec<_>>(), vec!["--smoke"]);
    }

    #[test]
    fn flags_after_separator_are_not_checked() {
        let allowed = effective_allowed_flags(&global(), None, None);
        let args: Vec<String> = vec![
            "--smoke".into(),
            "--".into(),
            "--not-a-real-flag".into(),
            "positional".into(),
        ];
        assert!(disallowed_flags(&args, &allowed).is_empty());
    }

    #[test]
    fn offending_flags_reported_in_order() {
        let allowed = effective_allowed_flags(&global(), None, None);
        let args: Vec<String> = vec!["--bad".into(), "--smoke".into(), "--worse".into()];
        assert_eq!(disallowed_flags(&args, &allowed), vec!["--bad", "--worse"]);
    }
}
