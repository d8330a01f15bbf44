//! Unified logging for rig services
//!
//! Console output always; an optional daily-rolling file through
//! `tracing-appender`. Both use the bracketed-level line format unless JSON
//! is requested.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `timestamp [LEVEL] message`
///
/// Example output: `2026-10-17T08:00:01.000123Z [INFO] Link: CONNECTING -> CONNECTED`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer flushing until process exit
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the filter target and the log file prefix
    pub service_name: String,
    /// Level for the service's own targets; everything else stays at `info`
    pub level: String,
    /// Extra targets that follow `level` (e.g. the wire crate)
    pub extra_targets: Vec<String>,
    /// Directory for the rolling file
    pub log_dir: PathBuf,
    /// Write a daily-rolling file in addition to the console
    pub enable_file: bool,
    /// JSON lines instead of the bracketed format
    pub enable_json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            level: "debug".to_string(),
            extra_targets: Vec::new(),
            log_dir: PathBuf::from("logs"),
            enable_file: false,
            enable_json: false,
        }
    }
}

impl LogConfig {
    /// Filter directive in effect. `RUST_LOG` wins when set.
    pub fn filter_directive(&self, rust_log: Option<String>) -> String {
        if let Some(env_str) = rust_log.filter(|s| !s.trim().is_empty()) {
            return env_str;
        }
        let mut directive = format!("info,{}={}", self.service_name, self.level);
        for target in &self.extra_targets {
            directive.push_str(&format!(",{}={}", target, self.level));
        }
        directive
    }
}

/// Initialize the global subscriber
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let directive = config.filter_directive(std::env::var("RUST_LOG").ok());
    let env_filter = EnvFilter::try_new(&directive)?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer = if config.enable_json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_ansi(true)
            .event_format(BracketedLevelFormat)
            .boxed()
    };

    let file_layer = if config.enable_file {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(
            &config.log_dir,
            format!("{}.log", config.service_name),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
        match guards.lock() {
            Ok(mut guards) => guards.push(guard),
            Err(poisoned) => poisoned.into_inner().push(guard),
        }

        let layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    registry.with(console_layer).with(file_layer).try_init()?;

    tracing::info!("Logging: {} filter={}", config.service_name, directive);
    if config.enable_file {
        tracing::debug!("Log file: {:?}", config.log_dir);
    }
    Ok(())
}
