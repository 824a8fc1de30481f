//! Tracing initialisation helpers for tests.
//!
//! Call [`init_test_tracing`] at the top of any test that emits tracing events
//! and wants them captured by the test harness. The subscriber is installed
//! at most once per process.

use spritenav_core::logging::env_filter;

/// Default directive when `RUST_LOG` is unset.
pub const TEST_DIRECTIVE: &str = "spritenav_core=debug,warn";

/// Install a subscriber writing to the test-harness writer, filtered by
/// `RUST_LOG` or [`TEST_DIRECTIVE`]. Later calls are ignored.
///
/// # Example
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     spritenav_test_utils::tracing_setup::init_test_tracing();
///     tracing::info!("visible when RUST_LOG=info");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(TEST_DIRECTIVE))
        .with_test_writer()
        .try_init();
}
