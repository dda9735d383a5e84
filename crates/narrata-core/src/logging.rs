//! Logging setup for players and the `nar` CLI.
//!
//! One subscriber is installed per process: an `EnvFilter` (`RUST_LOG`
//! wins over the configured level) in front of a stderr layer and, when a
//! log file is configured, a second layer appending to that file in the
//! same format.
//!
//! Spans and events use these fields:
//! - `script`, `line`, `inline`: the playback spot
//! - `index`: playlist index of the command
//! - `context`: `main` or `transient`
//!
//! Structural errors log at `error`, runtime warnings at `warn`, command
//! execution and mode transitions at `debug`, lifecycle at `info`.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use crate::config::LogFormat;

static INSTALLED: AtomicBool = AtomicBool::new(false);

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// `[logging]` section of `narrata.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level: trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
    /// Append log lines here as well as to stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("a log subscriber is already installed")]
    AlreadyInstalled,

    #[error("{0}")]
    Level(String),

    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to install log subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Minimum severity accepted in `logging.level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    #[must_use]
    pub fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: {s}. Expected one of: trace, debug, info, warn, error"
            )),
        }
    }
}

fn output_layer<W>(format: LogFormat, writer: W, ansi: bool) -> OutputLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LogError> {
    let open = || -> std::io::Result<std::fs::File> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
    };
    open().map_err(|source| LogError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}

fn build_layers(config: &LogConfig) -> Result<Vec<OutputLayer>, LogError> {
    let ansi = std::io::stderr().is_terminal();
    let mut layers = vec![output_layer(config.format, std::io::stderr, ansi)];
    if let Some(path) = &config.file {
        let file = open_log_file(path)?;
        layers.push(output_layer(config.format, Mutex::new(file), false));
    }
    Ok(layers)
}

/// Install the process-wide subscriber described by `config`.
///
/// Only the first call succeeds.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let level: LogLevel = config.level.parse().map_err(LogError::Level)?;
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return Err(LogError::AlreadyInstalled);
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.directive()));
    let installed = build_layers(config).and_then(|layers| {
        let subscriber = tracing_subscriber::registry().with(layers).with(filter);
        tracing::subscriber::set_global_default(subscriber).map_err(LogError::from)
    });
    if installed.is_err() {
        INSTALLED.store(false, Ordering::Release);
    }
    installed?;

    tracing::debug!(
        level = level.directive(),
        format = %config.format,
        file = ?config.file,
        "Logging ready"
    );
    Ok(())
}

/// Create a span carrying the playback correlation fields.
///
/// ```ignore
/// let span = narrata_core::playback_span!("execute", &command.spot, index, lane);
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! playback_span {
    ($name:expr, $spot:expr, $index:expr, $lane:expr $(, $field:ident = $value:expr)* $(,)?) => {
        tracing::debug_span!(
            $name,
            script = %$spot.script,
            line = $spot.line,
            inline = $spot.inline,
            index = $index,
            context = %$lane
            $(, $field = $value)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Lane;
    use crate::spot::PlaybackSpot;
    use std::sync::Arc;

    /// Shared in-memory sink for subscriber output.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_with(format: LogFormat, emit: impl FnOnce()) -> String {
        let capture = Capture::default();
        let sink = capture.clone();
        let layer = output_layer(format, move || sink.clone(), false);
        let subscriber = tracing_subscriber::registry()
            .with(vec![layer])
            .with(EnvFilter::new("debug"));
        tracing::subscriber::with_default(subscriber, emit);
        capture.text()
    }

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" TRACE ".parse::<LogLevel>().unwrap().directive(), "trace");
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Debug < LogLevel::Error);
    }

    #[test]
    fn default_config_is_pretty_info_on_stderr_only() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file.is_none());
        assert_eq!(build_layers(&config).unwrap().len(), 1);
    }

    #[test]
    fn playback_span_fields_reach_json_output() {
        let output = capture_with(LogFormat::Json, || {
            let spot = PlaybackSpot::new("intro", 3, 1);
            let span = crate::playback_span!("execute", spot, 7usize, Lane::Main);
            let _guard = span.enter();
            tracing::warn!("Skip refused");
        });

        let line = output.lines().find(|line| !line.trim().is_empty()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["message"], "Skip refused");
        let span = &parsed["span"];
        assert_eq!(span["script"], "intro");
        assert_eq!(span["line"], 3);
        assert_eq!(span["index"], 7);
        assert_eq!(span["context"], "main");
    }

    #[test]
    fn pretty_output_has_no_colour_codes_off_terminal() {
        let output = capture_with(LogFormat::Pretty, || {
            tracing::info!(script = "intro", "Playback started");
        });
        assert!(output.contains("Playback started"));
        assert!(output.contains("script=\"intro\""));
        assert!(!output.contains('\u{1b}'));
    }

    #[test]
    fn log_file_gets_parent_dirs_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("narrata.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "earlier\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        std::io::Write::write_all(&mut file, b"later\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");

        let nested = dir.path().join("a").join("b").join("n.log");
        open_log_file(&nested).unwrap();
        assert!(nested.is_file());

        let config = LogConfig {
            file: Some(dir.path().join("c.log")),
            ..LogConfig::default()
        };
        assert_eq!(build_layers(&config).unwrap().len(), 2);
    }

    #[test]
    fn bad_level_is_rejected_before_installing() {
        let config = LogConfig {
            level: "chatty".into(),
            ..LogConfig::default()
        };
        assert!(matches!(init_logging(&config), Err(LogError::Level(_))));
    }
}
