//! Turnstile policy engine - who may run what, with which arguments,
//! under which resource ceilings.
//!
//! The engine combines four layers into one allow/deny decision:
//! - static configuration (allowed root, allowlisted scripts, global flags)
//! - administrator-issued rules (TTL-bound path/scope allow entries)
//! - per-session profile overlays (capability clamps)
//! - flag validation against the intersection of all applicable allowances
//!
//! Everything here is synchronous and deterministic; persistence lives in
//! [`store`], and the only clock reads are for rule/overlay expiry.

pub mod error;
pub mod evaluate;
pub mod flags;
pub mod matcher;
pub mod resolver;
pub mod store;
pub mod types;

pub use error::PolicyError;
pub use evaluate::{evaluate_preflight, Preflight, Suggestion};
pub use resolver::effective_caps_for;
pub use store::{load_state, save_state, OverlayDraft, PolicyStore, RuleDraft};
pub use types::{Caps, Overlay, PolicyState, Profile, Rule, RuleSelector, POLICY_VERSION};
