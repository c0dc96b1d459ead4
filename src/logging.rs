use log::{error, info, log_enabled, Level};

/// Initializes the logger with the `env_logger` crate.
///
/// `RUST_LOG` controls the filter; without it only warnings and errors are
/// shown. Engine messages use the `mioty::` targets, e.g.
/// `RUST_LOG=mioty::layout=debug`. Calling this twice is harmless.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .try_init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}
