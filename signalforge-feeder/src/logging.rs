//! Log setup for the `signalforge` binary.
//!
//! Everything goes to stderr; stdout carries records. `--log-level` sets the
//! default, and `SIGNALFORGE_LOG` takes `EnvFilter` directives on top of it,
//! e.g. `SIGNALFORGE_LOG=signalforge_feeder::sbs=trace`.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Per-target overrides, read at startup.
pub const LOG_ENV: &str = "SIGNALFORGE_LOG";

/// HTTP client internals are chatty at debug; keep them at warn unless
/// `SIGNALFORGE_LOG` says otherwise.
const QUIET_DEPS: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Filter for `level` plus any extra directives. Bad directives are skipped.
pub fn build_filter(level: LogLevel, directives: Option<&str>) -> EnvFilter {
    let mut spec = String::new();
    if matches!(level, LogLevel::Debug | LogLevel::Trace) {
        spec.push_str(QUIET_DEPS);
    }
    if let Some(extra) = directives.map(str::trim).filter(|d| !d.is_empty()) {
        if !spec.is_empty() {
            spec.push(',');
        }
        spec.push_str(extra);
    }

    EnvFilter::builder()
        .with_default_directive(level.as_filter().into())
        .parse_lossy(spec)
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let directives = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, directives.as_deref()))
        .with_target(directives.is_some());

    // A second init (tests, embedding) keeps the first subscriber.
    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().with_ansi(false).try_init();
        }
    }
}
