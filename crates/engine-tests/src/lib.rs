#![allow(dead_code)]

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

pub mod backend;
pub mod utils;

/// Scopes a test-writer subscriber to the current thread for tests that
/// cannot use `#[traced_test]`. Filtered by `RUST_LOG`, silent by default.
///
/// Never installs a global default: `#[traced_test]` owns that slot for the
/// whole test binary.
pub fn init_logging() -> DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}
