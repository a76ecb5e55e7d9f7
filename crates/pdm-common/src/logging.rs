//! Logging setup shared by the PDM binaries
//!
//! A single `tracing` subscriber writes to the console, to a daily-rotated
//! file under `log_dir`, or to both, as text or JSON lines. Long ingest runs
//! are usually started with `LOG_OUTPUT=both` so the per-run file survives
//! the terminal session.
//!
//! Library code never prints; it emits structured events:
//!
//! ```rust,ignore
//! info!(batch_index = 3, rows = 120_000, "Batch loaded");
//! warn!(key = %key, error = %err, "Capture skipped");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pdm_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::for_binary("pdm-ingest").merge_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("Started");
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Directives applied by [`LogConfig::for_binary`]. The AWS SDK and sqlx are
/// chatty at info level once thousands of objects are fetched and copied.
pub const QUIET_DEPENDENCIES: &str = "aws_config=warn,aws_smithy_runtime=warn,sqlx=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

const LEVEL_NAMES: [(&str, LogLevel); 6] = [
    ("trace", LogLevel::Trace),
    ("debug", LogLevel::Debug),
    ("info", LogLevel::Info),
    ("warn", LogLevel::Warn),
    ("warning", LogLevel::Warn),
    ("error", LogLevel::Error),
];

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        LEVEL_NAMES
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, level)| *level)
            .ok_or_else(|| anyhow!("Invalid log level: {}", s))
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn targets(self) -> (bool, bool) {
        match self {
            LogOutput::Console => (true, false),
            LogOutput::File => (false, true),
            LogOutput::Both => (true, true),
        }
    }
}

impl FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            other => Err(anyhow!("Invalid log output: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("Invalid log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for rotated files; ignored for console-only output
    pub log_dir: PathBuf,
    /// `pdm-ingest` rotates into `pdm-ingest.2025-04-07`, ...
    pub log_file_prefix: String,
    /// Comma-separated `EnvFilter` directives layered over `level`
    pub filter_directives: Option<String>,
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "pdm".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

fn env_value<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{}={}: {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}

impl LogConfig {
    /// Defaults for a named binary: its own file prefix and quieter SDK logs.
    pub fn for_binary(prefix: impl Into<String>) -> Self {
        Self {
            log_file_prefix: prefix.into(),
            filter_directives: Some(QUIET_DEPENDENCIES.to_string()),
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Overlay whichever `LOG_*` variables are set.
    ///
    /// Recognised: `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`,
    /// `LOG_FILE_PREFIX`, `LOG_FILTER` (replaces the directives),
    /// `LOG_INCLUDE_LOCATION`, `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS`.
    /// A value that does not parse is an error rather than silently ignored.
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(level) = env_value("LOG_LEVEL")? {
            self.level = level;
        }
        if let Some(output) = env_value("LOG_OUTPUT")? {
            self.output = output;
        }
        if let Some(format) = env_value("LOG_FORMAT")? {
            self.format = format;
        }
        if let Some(dir) = env_value::<String>("LOG_DIR")? {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env_value("LOG_FILE_PREFIX")? {
            self.log_file_prefix = prefix;
        }
        if let Some(filter) = env_value("LOG_FILTER")? {
            self.filter_directives = Some(filter);
        }
        if let Some(flag) = env_value("LOG_INCLUDE_LOCATION")? {
            self.include_location = flag;
        }
        if let Some(flag) = env_value("LOG_INCLUDE_THREAD_IDS")? {
            self.include_thread_ids = flag;
        }
        if let Some(flag) = env_value("LOG_INCLUDE_TARGETS")? {
            self.include_targets = flag;
        }
        Ok(self)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let level = LevelFilter::from_level(self.level.into());
        let base = EnvFilter::default().add_directive(level.into());
        let directives = self.filter_directives.as_deref().unwrap_or_default();

        directives
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .try_fold(base, |filter, directive| {
                let parsed = directive
                    .parse()
                    .with_context(|| format!("Bad log filter directive '{}'", directive))?;
                Ok(filter.add_directive(parsed))
            })
    }
}

/// Keeps the background file writer alive; hold it until exit.
#[must_use = "dropping the guard stops the file writer"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let filter = config.env_filter()?;
    let (console, file) = config.output.targets();
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if console {
        layers.push(fmt_layer(config, std::io::stdout, true));
    }
    if file {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("Cannot create log directory {}", config.log_dir.display()))?;
        let (writer, worker) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
            &config.log_dir,
            &config.log_file_prefix,
        ));
        layers.push(fmt_layer(config, writer, false));
        guard = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" warning ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_output_targets() {
        assert_eq!("all".parse::<LogOutput>().unwrap().targets(), (true, true));
        assert_eq!(LogOutput::File.targets(), (false, true));
    }

    #[test]
    fn test_binary_defaults_quiet_sdk_logs() {
        let config = LogConfig::for_binary("pdm-ingest").with_level(LogLevel::Debug);
        assert_eq!(config.log_file_prefix, "pdm-ingest");
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.filter_directives.as_deref(), Some(QUIET_DEPENDENCIES));
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn test_bad_directive_is_reported() {
        let config = LogConfig {
            filter_directives: Some("sqlx=warn,=[".to_string()),
            ..LogConfig::default()
        };
        assert!(config.env_filter().is_err());
    }
}
