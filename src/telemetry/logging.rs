//! Process-wide logger construction.
//!
//! A single [`slog::Logger`] is built once at startup and installed as the global logger via
//! `slog_scope`, so any module can log through `slog_scope::logger()` without threading a
//! logger handle through every constructor.

use serde::{Deserialize, Serialize};
use slog::Drain;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn as_slog(self) -> slog::Level {
        match self {
            LogLevel::Trace => slog::Level::Trace,
            LogLevel::Debug => slog::Level::Debug,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Error => slog::Level::Error,
            LogLevel::Critical => slog::Level::Critical,
        }
    }
}

/// Builds the process logger and installs it globally, returning a guard that must be held for
/// the lifetime of the process (dropping it restores the previous global logger).
pub fn init(format: LogFormat, level: LogLevel) -> slog_scope::GlobalLoggerGuard {
    let min_level = level.as_slog();

    let logger = match format {
        LogFormat::Text => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            let drain = slog::LevelFilter::new(drain, min_level).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(drain, slog::o!("component" => "statsd-bridge"))
        }
        LogFormat::Json => {
            let drain = slog_json::Json::default(std::io::stdout()).fuse();
            let drain = slog::LevelFilter::new(drain, min_level).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(drain, slog::o!("component" => "statsd-bridge"))
        }
    };

    slog_scope::set_global_logger(logger)
}
