//! Advisory diagnostics gated behind `ZREPL_ZFS_DEBUG`.
//!
//! Mirrors the original's one-shot stderr warnings about OS-specific tuning
//! that can't be applied portably (e.g. pipe buffer sizing outside Linux).
//! Here it's a `tracing::warn!` that only fires when the env var is set to a
//! non-empty value, and at most once per call site, so a normal deployment
//! isn't spammed by tuning that's advisory only.

use std::sync::Once;

/// Whether `ZREPL_ZFS_DEBUG` is set to any non-empty value.
#[must_use]
pub fn debug_enabled() -> bool {
    std::env::var_os("ZREPL_ZFS_DEBUG").is_some_and(|v| !v.is_empty())
}

/// Emit `message` at most once per `once`, and only when [`debug_enabled`].
pub fn warn_once_if_debug(once: &Once, message: &str) {
    if !debug_enabled() {
        return;
    }
    once.call_once(|| {
        tracing::warn!("{message}");
    });
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    #[test]
    fn warn_once_fires_at_most_once() {
        // SAFETY-equivalent: single-threaded test process env mutation.
        unsafe {
            std::env::set_var("ZREPL_ZFS_DEBUG", "1");
        }
        let once = Once::new();
        warn_once_if_debug(&once, "first");
        warn_once_if_debug(&once, "second");
        assert!(once.is_completed());
        unsafe {
            std::env::remove_var("ZREPL_ZFS_DEBUG");
        }
    }

    #[test]
    fn disabled_by_default_when_unset() {
        unsafe {
            std::env::remove_var("ZREPL_ZFS_DEBUG");
        }
        assert!(!debug_enabled());
    }
}
