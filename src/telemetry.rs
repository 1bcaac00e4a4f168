/// Structured logging setup and progress sampling for long scans.
///
/// - `RUST_LOG` overrides the configured level
/// - `pretty` or `json` output
/// - stderr by default, optional rolling log file
/// - stdout stays free for tool output

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ChainstateError, Result};
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// "trace", "debug", "info", "warn" or "error"
    pub log_level: String,
    /// "json" or "pretty"
    pub log_format: String,
    /// None logs to stderr only
    pub log_file: Option<String>,
    /// "daily", "hourly" or "never"
    pub rotation: String,
}

impl From<&Settings> for TelemetryConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            log_level: settings.log_level.clone(),
            log_format: settings.log_format.clone(),
            log_file: settings.log_file.clone(),
            rotation: settings.log_rotation.clone(),
        }
    }
}

fn file_appender(log_file: &str, rotation: &str) -> Result<RollingFileAppender> {
    let path = Path::new(log_file);
    let directory = path
        .parent()
        .ok_or_else(|| ChainstateError::Config(format!("log file {:?} has no parent directory", log_file)))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| ChainstateError::Config(format!("log file {:?} has no file name", log_file)))?;

    Ok(match rotation {
        "daily" => rolling::daily(directory, file_name),
        "hourly" => rolling::hourly(directory, file_name),
        _ => rolling::never(directory, file_name),
    })
}

/// Install the global subscriber.
///
/// With a log file configured the returned guard flushes buffered lines on
/// drop; hold it until the process exits.
pub fn init_tracing(config: TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (writer, guard, to_file) = match &config.log_file {
        Some(log_file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(log_file, &config.rotation)?);
            (BoxMakeWriter::new(non_blocking), Some(guard), true)
        }
        None => (BoxMakeWriter::new(std::io::stderr), None, false),
    };

    let (json_layer, text_layer) = if config.log_format == "json" {
        (Some(fmt::layer().json().with_writer(writer)), None)
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_ansi(!to_file)
            .with_file(to_file)
            .with_line_number(to_file)
            .with_writer(writer);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| ChainstateError::Config(format!("tracing init: {}", e)))?;

    Ok(guard)
}

/// Shorten a hex string for log fields: "0a1b2c3d..." past `len` chars.
pub fn truncate_hex(hex: &str, len: usize) -> String {
    if hex.len() <= len {
        hex.to_string()
    } else {
        format!("{}...", &hex[..len])
    }
}

/// True on call 0, `interval`, `2 * interval`, ... Never for interval 0.
pub fn should_log_progress(counter: &AtomicU64, interval: u64) -> bool {
    let count = counter.fetch_add(1, Ordering::Relaxed);
    interval != 0 && count % interval == 0
}

/// Counts calls and says when a progress line is due.
pub struct ProgressCounter {
    counter: AtomicU64,
    interval: u64,
}

impl ProgressCounter {
    pub fn new(interval: u64) -> Self {
        Self { counter: AtomicU64::new(0), interval }
    }

    pub fn should_log(&self) -> bool {
        should_log_progress(&self.counter, self.interval)
    }
}
