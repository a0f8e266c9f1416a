//! Logging utilities and structured logging support

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system
///
/// `RUST_LOG` wins when it is set; otherwise `default_level` (e.g. `"info"`) is used.
/// Calling this more than once is harmless.
pub fn init(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    // A second init fails because a logger is already installed; nothing to do then
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
