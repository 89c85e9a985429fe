//! Structured logging setup.
//!
//! Mirrors the teacher's tracing-based startup path (`init_logging` +
//! a guard kept alive for the process lifetime so the non-blocking writer
//! keeps flushing), simplified to the two knobs this router's config
//! exposes: level and plain-vs-JSON formatting.

use tracing_subscriber::{fmt, EnvFilter};

/// Returned by [`init`]; dropping it stops the background flush thread, so
/// callers must hold it for as long as the process should keep logging.
pub struct LoggingGuard {
    _appender_guard: tracing_appender::non_blocking::WorkerGuard,
}

pub fn init(level: &str, json: bool) -> LoggingGuard {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, appender_guard) = tracing_appender::non_blocking(std::io::stdout());

    let subscriber = fmt().with_env_filter(filter).with_writer(writer);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    LoggingGuard {
        _appender_guard: appender_guard,
    }
}
