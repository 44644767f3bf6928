//! Subscriber installation.
//!
//! Filtering always comes from `RUST_LOG` when it is set and parses; the
//! directive passed by the caller is only the fallback.

use tracing_subscriber::EnvFilter;

/// Fallback filter when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "info";

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// JSON logs with timestamps on stdout.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with_default(default_directive: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(default_directive, "tracing initialised");
    }
}

/// Human-readable output captured by the test harness.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("skelmap_uow=debug"))
        .with_test_writer()
        .try_init();
}
