//! Debug-flag configuration.
//!
//! The engine reads a family of environment flags once at startup:
//! `DEBUG_NULLABILITY` plus `O_DEBUG_{LOAD_ENV, EXPAND_ENV, MATCH, MATCHES,
//! PATCH, PATCHES, OP, EVAL}`. The flags gate tracing output of individual
//! passes and never influence semantics.
//!
//! ```bash
//! O_DEBUG_MATCH=true O_DEBUG_EXPAND_ENV=true my-tool ...
//! ```

use figment::{providers::Env, Figment};
use once_cell::sync::Lazy;
use serde::Deserialize;

/// Per-pass debug flags, false unless set in the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// `DEBUG_NULLABILITY`: trace nullability decisions in the SAT encoder.
    #[serde(default)]
    pub nullability: bool,

    /// `O_DEBUG_LOAD_ENV`: trace definition-environment loading.
    #[serde(default)]
    pub load_env: bool,

    /// `O_DEBUG_EXPAND_ENV`: trace the env-expansion pass.
    #[serde(default)]
    pub expand_env: bool,

    /// `O_DEBUG_MATCH`: trace top-level match outcomes.
    #[serde(default, rename = "match")]
    pub match_: bool,

    /// `O_DEBUG_MATCHES`: trace every recursive match step.
    #[serde(default)]
    pub matches: bool,

    /// `O_DEBUG_PATCH`: trace top-level patch outcomes.
    #[serde(default)]
    pub patch: bool,

    /// `O_DEBUG_PATCHES`: trace every recursive patch step.
    #[serde(default)]
    pub patches: bool,

    /// `O_DEBUG_OP`: trace operator instantiation.
    #[serde(default)]
    pub op: bool,

    /// `O_DEBUG_EVAL`: trace SAT formula construction.
    #[serde(default)]
    pub eval: bool,
}

static DEBUG: Lazy<DebugConfig> = Lazy::new(|| {
    Figment::new()
        .merge(Env::prefixed("O_DEBUG_"))
        .merge(Env::raw().only(&["DEBUG_NULLABILITY"]).map(|_| "nullability".into()))
        .extract()
        .unwrap_or_default()
});

/// The process-wide debug flags, read once on first access.
pub fn debug() -> &'static DebugConfig {
    &DEBUG
}
