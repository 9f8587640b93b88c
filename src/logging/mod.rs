use log::{debug, error, info, trace, warn, LevelFilter};
use std::path::Path;
use std::sync::{Once, OnceLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the global logger from `RUST_LOG`, defaulting to `info`
pub fn init_logger() {
    init_logger_with_config("info", false, "logs");
}

/// Initialize logger with environment variable support
/// Uses RUST_LOG environment variable for configuration
pub fn init_logger_with_env() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    init_logger_with_config(&level, false, "logs");
}

/// Initialize logger with an explicit level filter and optional daily-rolling file output.
///
/// `RUST_LOG` still wins over `level` when it is set, so operators can raise
/// verbosity without touching the config file. Only the first call has any effect.
pub fn init_logger_with_config(level: &str, enable_file_logging: bool, log_dir: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level));

        let builder = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true);

        let installed = if enable_file_logging {
            let appender = tracing_appender::rolling::daily(Path::new(log_dir), "fanout-proxy.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let subscriber = builder
                .with_ansi(false)
                .with_writer(std::io::stdout.and(file_writer))
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        } else {
            let subscriber = builder.with_ansi(true).finish();
            tracing::subscriber::set_global_default(subscriber)
        };

        if let Err(e) = installed {
            eprintln!("Warning: Failed to install tracing subscriber: {:?}", e);
        }

        // Bridge log events to tracing (after subscriber is set up)
        if let Err(e) = LogTracer::init() {
            eprintln!("Warning: Failed to initialize LogTracer: {:?}", e);
        }

        log::set_max_level(
            level
                .parse::<LevelFilter>()
                .unwrap_or(LevelFilter::Info),
        );
    });
}

/// Short process marker prefixed to request logs
pub fn process_info() -> String {
    format!("[PID {}]", std::process::id())
}

/// Log an error message
pub fn log_error(message: &str) {
    error!("{}", message);
}

/// Log an info message
pub fn log_info(message: &str) {
    info!("{}", message);
}

/// Log a warning message
pub fn log_warning(message: &str) {
    warn!("{}", message);
}

/// Log a debug message
pub fn log_debug(message: &str) {
    debug!("{}", message);
}

/// Log a trace message
pub fn log_trace(message: &str) {
    trace!("{}", message);
}

/// Convenience macro for logging errors
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error(&format!($($arg)*));
    };
}

/// Convenience macro for logging info messages
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info(&format!($($arg)*));
    };
}

/// Convenience macro for logging warning messages
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::logging::log_warning(&format!($($arg)*));
    };
}

/// Convenience macro for logging debug messages
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug(&format!($($arg)*));
    };
}

/// Convenience macro for logging trace messages
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::log_trace(&format!($($arg)*));
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logger_with_config("debug", false, "logs");
        init_logger();
        crate::log_info!("logger initialised {} time(s)", 2);
        assert!(process_info().starts_with("[PID "));
    }
}
