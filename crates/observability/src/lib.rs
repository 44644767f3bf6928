//! Process-wide tracing setup shared by the mapper crates, their tests and benches.

/// Subscriber configuration (filters, output format).
pub mod subscriber;

pub use subscriber::{DEFAULT_DIRECTIVE, init_for_tests, init_with_default};

/// Initialize process-wide tracing with JSON output.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    subscriber::init_with_default(DEFAULT_DIRECTIVE);
}
