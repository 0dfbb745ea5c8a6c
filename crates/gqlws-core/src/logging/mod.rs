//! Structured logging bootstrap.
//!
//! The client logs through `tracing` with `connection_id` / `operation_id`
//! fields. Applications that do not install their own subscriber can call
//! [`init_subscriber`] once at startup.

pub mod test_utils;

pub use test_utils::{CapturedLogs, capture_logs};

/// Environment variable that overrides the level passed to [`init_subscriber`].
pub const LOG_ENV: &str = "GQLWS_LOG";

/// Install the global `tracing` subscriber writing to stderr.
///
/// `level` is an `EnvFilter` directive (`"warn"`, `"gqlws_client=debug"`, ...)
/// and is ignored when [`LOG_ENV`] is set. `json` switches from the compact
/// human format to one JSON object per line. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global subscriber is already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_is_idempotent() {
        init_subscriber("warn", false);
        init_subscriber("debug", true);
    }
}
