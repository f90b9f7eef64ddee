//! Support code shared by the workspace's tests.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::sync::Once;

use observability_deps::tracing::{self, info};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_SETUP: Once = Once::new();

/// Enables debug logging if the RUST_LOG environment variable is
/// set. Does nothing if RUST_LOG is not set. If enable_logging has
/// been set previously, does nothing.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Start logging regardless of the RUST_LOG environment variable.
pub fn start_logging() {
    // ensure the global has been initialized
    LOG_SETUP.call_once(|| {
        // honor any global log filter that was specified, defaulting to debug
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        // route `log` records through tracing as well
        LogTracer::init().expect("registering log forwarder");

        let subscriber = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting global tracing subscriber");

        info!("logging enabled for test");
    })
}

/// Asserts that `actual` is within `epsilon` of `expected`.
#[macro_export]
macro_rules! assert_close {
    ($actual:expr, $expected:expr, $epsilon:expr) => {{
        let actual = $actual;
        let expected = $expected;
        let epsilon = $epsilon;
        assert!(
            (actual - expected).abs() <= epsilon,
            "{} and {} differ by more than {}",
            actual,
            expected,
            epsilon
        );
    }};
}
