//! Tracing subscriber setup for binaries and tests.
//!
//! The library itself only emits events; installing a subscriber is the
//! embedding application's call. [`init`] is a convenience for the common
//! case: an env-filtered fmt subscriber, `RUST_LOG` honored, `info` default.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the default subscriber for this process.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Like [`init`] but with an explicit filter directive, e.g.
/// `"promptloom=debug"`.
pub fn init_with_filter(directives: &str) {
    let _ = fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(true)
        .try_init();
}
