//! Tree-wide policy knobs.

use std::env;

/// What reconciliation does when siblings share a key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicateKeyPolicy {
    /// Abort the pass with [`TreeError::DuplicateKey`](crate::TreeError::DuplicateKey).
    #[default]
    Fail,
    /// Report the conflict and leave the parent's previous children untouched.
    KeepPrevious,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeConfig {
    pub duplicate_keys: DuplicateKeyPolicy,
    pub capture_diagnostics: bool,
    pub diagnostics_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            duplicate_keys: DuplicateKeyPolicy::Fail,
            capture_diagnostics: true,
            diagnostics_capacity: 256,
        }
    }
}

impl TreeConfig {
    /// Keeps serving the last good children when a subtree is ambiguous.
    pub fn production() -> Self {
        Self {
            duplicate_keys: DuplicateKeyPolicy::KeepPrevious,
            ..Self::default()
        }
    }

    /// Defaults overridden by `ARBOR_DUPLICATE_KEYS` (`fail` | `keep`) and
    /// `ARBOR_CAPTURE_DIAGNOSTICS` (`0` disables capture).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(policy) = lookup("ARBOR_DUPLICATE_KEYS") {
            match policy.trim().to_ascii_lowercase().as_str() {
                "keep" | "keep-previous" => config.duplicate_keys = DuplicateKeyPolicy::KeepPrevious,
                "fail" => config.duplicate_keys = DuplicateKeyPolicy::Fail,
                other => tracing::warn!(value = other, "ignoring unknown ARBOR_DUPLICATE_KEYS"),
            }
        }
        if let Some(capture) = lookup("ARBOR_CAPTURE_DIAGNOSTICS") {
            config.capture_diagnostics = !matches!(capture.trim(), "0" | "false" | "off");
        }
        config
    }
}
