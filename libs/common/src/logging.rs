//! Logging bootstrap shared by omnitor services
//!
//! Console output and a daily rolling file, both in the
//! `timestamp [LEVEL] message` format, behind one reloadable filter.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the log root directory
pub const LOG_DIR_ENV: &str = "OMNITOR_LOG_DIR";

/// Default max file size: 50MB
const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `2026-01-02T00:50:44.809123Z [INFO] message`
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

// ============================================================================
// Log root
// ============================================================================

static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Fix the log root for the process
///
/// Priority: `OMNITOR_LOG_DIR` env > `config_dir` > `logs`.
/// Only the first call has an effect.
pub fn init_log_root(config_dir: Option<&Path>) -> PathBuf {
    LOG_ROOT
        .get_or_init(|| resolve_log_root(std::env::var(LOG_DIR_ENV).ok(), config_dir))
        .clone()
}

/// Current log root, falling back to env/default when not initialized
pub fn get_log_root() -> PathBuf {
    LOG_ROOT
        .get()
        .cloned()
        .unwrap_or_else(|| resolve_log_root(std::env::var(LOG_DIR_ENV).ok(), None))
}

fn resolve_log_root(env_dir: Option<String>, config_dir: Option<&Path>) -> PathBuf {
    match (env_dir, config_dir) {
        (Some(dir), _) if !dir.is_empty() => PathBuf::from(dir),
        (_, Some(dir)) => dir.to_path_buf(),
        _ => PathBuf::from("logs"),
    }
}

// ============================================================================
// Daily rolling writer
// ============================================================================

/// File writer named `{YYYYMMDD}_{service}.log`, switching files at
/// midnight and after `max_file_size` bytes (`{YYYYMMDD}_{service}.N.log`)
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    current_date: Arc<Mutex<String>>,
    current_file: Arc<Mutex<Option<File>>>,
    current_size: Arc<AtomicU64>,
    max_file_size: u64,
    rotation_count: Arc<AtomicU32>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        let current_date = chrono::Local::now().format("%Y%m%d").to_string();
        fs::create_dir_all(&log_dir)?;

        let file = open_append(&log_dir.join(format!("{}_{}.log", current_date, service_name)))?;
        let initial_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            current_date: Arc::new(Mutex::new(current_date)),
            current_file: Arc::new(Mutex::new(Some(file))),
            current_size: Arc::new(AtomicU64::new(initial_size)),
            max_file_size,
            rotation_count: Arc::new(AtomicU32::new(0)),
        })
    }

    fn rotate_by_size(&self) -> std::io::Result<()> {
        let current_date = self.current_date.lock().map_err(poisoned)?;
        let count = self.rotation_count.fetch_add(1, Ordering::SeqCst) + 1;

        let new_file = open_append(&self.log_dir.join(format!(
            "{}_{}.{}.log",
            *current_date, self.service_name, count
        )))?;
        self.current_size.store(0, Ordering::SeqCst);
        *self.current_file.lock().map_err(poisoned)? = Some(new_file);
        Ok(())
    }

    fn get_writer(&self) -> std::io::Result<std::sync::MutexGuard<'_, Option<File>>> {
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let mut current_date = self.current_date.lock().map_err(poisoned)?;

        if *current_date != today {
            fs::create_dir_all(&self.log_dir)?;
            let new_file =
                open_append(&self.log_dir.join(format!("{}_{}.log", today, self.service_name)))?;
            let initial_size = new_file.metadata().map(|m| m.len()).unwrap_or(0);

            *current_date = today;
            self.rotation_count.store(0, Ordering::SeqCst);
            self.current_size.store(initial_size, Ordering::SeqCst);
            *self.current_file.lock().map_err(poisoned)? = Some(new_file);
        }

        self.current_file.lock().map_err(poisoned)
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> std::io::Error {
    std::io::Error::other(format!("Mutex poisoned: {}", e))
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let current_size = self.current_size.load(Ordering::Relaxed);
        if current_size > 0 && current_size + buf.len() as u64 > self.max_file_size {
            self.rotate_by_size()?;
        }

        if let Some(ref mut file) = *self.get_writer()? {
            let written = file.write(buf)?;
            self.current_size
                .fetch_add(written as u64, Ordering::Relaxed);
            Ok(written)
        } else {
            Ok(0)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(ref mut file) = *self.get_writer()? {
            file.flush()
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Subscriber setup
// ============================================================================

static GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();

type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used in the file name and the default filter
    pub service_name: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Level used when `RUST_LOG` is not set
    pub level: Level,
    /// ANSI colors on the console
    pub ansi: bool,
    /// JSON lines in the file instead of the bracketed format
    pub enable_json: bool,
    /// Write a log file at all
    pub enable_file: bool,
    /// Size threshold for intra-day rotation
    pub max_file_size: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(),
            level: Level::INFO,
            ansi: true,
            enable_json: false,
            enable_file: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Filter string used when `RUST_LOG` is absent
fn default_filter(config: &LogConfig) -> String {
    let level = config.level.as_str().to_lowercase();
    format!("{},{}={}", level, config.service_name, level)
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already set.
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter_str = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_filter(&config));
    let env_filter = EnvFilter::try_new(&filter_str)?;

    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);
    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_file {
        let writer = DailyRollingWriter::new(
            config.service_name.clone(),
            config.log_dir.clone(),
            config.max_file_size,
        )?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);
        let slot = GUARD.get_or_init(|| Mutex::new(None));
        match slot.lock() {
            Ok(mut slot) => *slot = Some(guard),
            Err(poisoned) => *poisoned.into_inner() = Some(guard),
        }

        let layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
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

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if config.enable_file {
        tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    }
    Ok(())
}

/// Flush and release the file writer; later file output is discarded
pub fn shutdown() {
    if let Some(slot) = GUARD.get() {
        if let Ok(mut slot) = slot.lock() {
            slot.take();
        }
    }
}

/// Change the log filter at runtime
///
/// Accepts a level (`debug`) or a full directive (`info,linksrv=trace`).
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        if let Ok(mut guard) = current.lock() {
            *guard = level.to_string();
        }
    }

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Current log filter string, or `unknown` before initialization
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct CaptureWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        fn contents(&self) -> String {
            self.buf
                .lock()
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default()
        }
    }

    impl Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buf.lock().map_err(poisoned)?.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl MakeWriter<'_> for CaptureWriter {
        type Writer = Self;

        fn make_writer(&self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_resolve_log_root_priority() {
        assert_eq!(
            resolve_log_root(Some("/var/log/omnitor".into()), Some(Path::new("cfg"))),
            PathBuf::from("/var/log/omnitor")
        );
        assert_eq!(
            resolve_log_root(None, Some(Path::new("cfg"))),
            PathBuf::from("cfg")
        );
        assert_eq!(resolve_log_root(Some(String::new()), None), PathBuf::from("logs"));
        assert_eq!(resolve_log_root(None, None), PathBuf::from("logs"));
    }

    #[test]
    fn test_default_filter() {
        let config = LogConfig {
            service_name: "linksrv".into(),
            level: Level::DEBUG,
            ..Default::default()
        };
        assert_eq!(default_filter(&config), "debug,linksrv=debug");
    }

    #[test]
    fn test_daily_writer_creates_dated_file() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            DailyRollingWriter::new("linksrv".into(), dir.path().to_path_buf(), 1024).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let date = chrono::Local::now().format("%Y%m%d").to_string();
        let path = dir.path().join(format!("{}_linksrv.log", date));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello\n");
    }

    #[test]
    fn test_daily_writer_rotates_by_size() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            DailyRollingWriter::new("linksrv".into(), dir.path().to_path_buf(), 8).unwrap();
        writer.write_all(b"0123456").unwrap();
        writer.write_all(b"789abc").unwrap();
        writer.flush().unwrap();

        let date = chrono::Local::now().format("%Y%m%d").to_string();
        let rotated = dir.path().join(format!("{}_linksrv.1.log", date));
        assert_eq!(std::fs::read_to_string(rotated).unwrap(), "789abc");
    }

    #[test]
    fn test_bracketed_format() {
        let capture = CaptureWriter::default();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(capture.clone())
                .with_ansi(false)
                .event_format(BracketedLevelFormat),
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("port gone");
        });

        let out = capture.contents();
        assert!(out.contains("[WARN] port gone"), "got: {}", out);
    }

    #[test]
    fn test_get_log_level_before_init() {
        if LOG_FILTER_HANDLE.get().is_none() {
            assert_eq!(get_log_level(), "unknown");
            assert!(set_log_level("debug").is_err());
        }
    }
}
