//! Logging collaborator
//!
//! The pipeline and archive report lifecycle transitions through the
//! [`Logger`] trait so callers (and tests) can swap the destination. The
//! default implementation forwards to `tracing`, whose subscriber is installed
//! once by [`init`].

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Receives free-form progress messages. Purely observational.
pub trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

/// Forwards messages to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, msg: &str) {
        tracing::debug!(target: "splitgz", "{}", msg);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _msg: &str) {}
}

/// Map CLI verbosity to a default filter directive
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global fmt subscriber (stderr, with timestamps).
///
/// `RUST_LOG` wins over the verbosity-derived default when set. Calling this
/// twice is harmless; the second install is ignored.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
