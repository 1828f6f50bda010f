//! Structured logging for steno runs.
//!
//! Two sinks are installed for the lifetime of a [`LogGuard`]:
//!
//! - **Log file**: one JSON object per event, filtered by `RUST_LOG` when set
//!   and by the configured [`LogLevel`] otherwise. The file is rotated by size.
//! - **stderr**: compact, human-readable, `warn` and above.
//!
//! Settings come from CLI flags (or their `STENO_LOG_*` env vars), then the
//! config file's `log` section, then built-in defaults.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{LazyLock, Mutex};

use anyhow::{Context, Result};
use clap::ValueEnum;
use regex::Regex;
use thiserror::Error;
use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt as tfmt, layer::SubscriberExt};

use crate::core::config::LogConfig;

pub const DEFAULT_LOG_PATH: &str = "steno.log";
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Debug;
pub const DEFAULT_ROTATION: &str = "10 MB";

static ROTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*([A-Za-z]*)\s*$").expect("rotation pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogSettingsError {
    #[error("unknown log level '{0}' (expected DEBUG, INFO, WARNING, ERROR or CRITICAL)")]
    Level(String),
    #[error("invalid log rotation '{0}' (expected a size such as '10 MB' or '512 KiB')")]
    Rotation(String),
}

/// Severity names accepted in config files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing` has no level above `error`, so CRITICAL shares it.
    pub fn as_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warning => LevelFilter::WARN,
            Self::Error | Self::Critical => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = LogSettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(LogSettingsError::Level(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Log options given explicitly on the command line or via env.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFlags {
    pub path: Option<PathBuf>,
    pub level: Option<LogLevel>,
    pub rotation: Option<String>,
}

/// Effective logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub path: PathBuf,
    pub level: LogLevel,
    pub rotation: String,
    pub max_bytes: u64,
}

impl LogSettings {
    /// Flags win over the config file, which wins over defaults.
    pub fn resolve(flags: &LogFlags, file: Option<&LogConfig>) -> Result<Self, LogSettingsError> {
        let path = match (&flags.path, file.and_then(|log| log.path.as_deref())) {
            (Some(path), _) => path.clone(),
            (None, Some(path)) => PathBuf::from(path),
            (None, None) => PathBuf::from(DEFAULT_LOG_PATH),
        };
        let level = match (flags.level, file.and_then(|log| log.level.as_deref())) {
            (Some(level), _) => level,
            (None, Some(level)) => level.parse()?,
            (None, None) => DEFAULT_LOG_LEVEL,
        };
        let rotation = flags
            .rotation
            .clone()
            .or_else(|| file.and_then(|log| log.rotation.clone()))
            .unwrap_or_else(|| DEFAULT_ROTATION.to_string());
        let max_bytes = parse_rotation(&rotation)?;
        Ok(Self {
            path,
            level,
            rotation,
            max_bytes,
        })
    }
}

/// Parse a size spec such as `10 MB`, `512KiB` or `1000` into bytes.
///
/// KB/MB/GB are decimal and KiB/MiB/GiB are binary; units are case-insensitive.
pub fn parse_rotation(spec: &str) -> Result<u64, LogSettingsError> {
    let invalid = || LogSettingsError::Rotation(spec.to_string());
    let caps = ROTATION_RE.captures(spec).ok_or_else(invalid)?;
    let amount: u64 = caps[1].parse().map_err(|_| invalid())?;
    let multiplier: u64 = match caps[2].to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        _ => return Err(invalid()),
    };
    match amount.checked_mul(multiplier) {
        Some(bytes) if bytes > 0 => Ok(bytes),
        _ => Err(invalid()),
    }
}

/// File writer that moves `path` to `path.1` once it would exceed `max_bytes`.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            file,
            written,
        })
    }

    /// Path of the previous generation.
    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.rotated_path())?;
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Keeps the logging dispatcher installed. Dropping it uninstalls the sinks
/// and closes the log file.
#[must_use = "logging stops when the guard is dropped"]
pub struct LogGuard {
    _default: DefaultGuard,
    settings: LogSettings,
}

impl LogGuard {
    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }
}

impl fmt::Debug for LogGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogGuard")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Install the file and stderr sinks for the current thread.
pub fn init(settings: &LogSettings) -> Result<LogGuard> {
    if let Some(parent) = settings.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let writer = RotatingFile::open(&settings.path, settings.max_bytes)
        .with_context(|| format!("open log file {}", settings.path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(settings.level.as_filter().into()));

    let subscriber = tracing_subscriber::registry()
        .with(
            tfmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(writer))
                .with_filter(filter),
        )
        .with(
            tfmt::layer()
                .with_writer(io::stderr)
                .compact()
                .with_filter(LevelFilter::WARN),
        );

    Ok(LogGuard {
        _default: tracing::subscriber::set_default(subscriber),
        settings: settings.clone(),
    })
}
