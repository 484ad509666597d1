//! Logging setup.
//!
//! Console output always; a daily-rotated file when a log directory is
//! configured. Filters come from `RUST_LOG` with [`DEFAULT_LOG_FILTER`] as
//! fallback.

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Local;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "herald=info,fanout=info,sqlx=warn";

/// Log file name prefix used by the rolling appender.
const LOG_FILE_PREFIX: &str = "herald.log";

/// Log retention period.
const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Output settings for [`init_logging`].
#[derive(Debug, Clone, Default)]
pub struct LogSettings<'a> {
    /// Directory for rotated log files. Console only when `None`.
    pub log_dir: Option<&'a Path>,
    /// Emit JSON lines on the console instead of human-readable text.
    pub json: bool,
}

/// Initialize the global subscriber.
///
/// Keep the returned guard alive for the lifetime of the process, otherwise
/// buffered file output is lost.
pub fn init_logging(settings: &LogSettings<'_>) -> crate::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console = if settings.json {
        fmt::layer().json().with_timer(LocalTimer).boxed()
    } else {
        fmt::layer().with_ansi(true).with_timer(LocalTimer).boxed()
    };

    let mut removed = 0;
    let (file_layer, guard) = match settings.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            removed = cleanup_old_logs(dir, LOG_RETENTION, SystemTime::now());
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    if removed > 0 {
        debug!("Removed {} expired log files", removed);
    }

    Ok(guard)
}

/// Delete rotated log files last modified before `now - retention`.
///
/// Returns the number of files removed. Failures are logged and skipped.
pub fn cleanup_old_logs(dir: &Path, retention: Duration, now: SystemTime) -> usize {
    let Some(cutoff) = now.checked_sub(retention) else {
        return 0;
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read log directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        match modified {
            Ok(modified) if modified < cutoff => match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove log file"),
            },
            _ => {}
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_only_touches_expired_log_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("herald.log.2024-01-01"), "old").unwrap();
        std::fs::write(dir.path().join("other.txt"), "keep").unwrap();

        // Nothing is older than a week yet.
        assert_eq!(
            cleanup_old_logs(dir.path(), LOG_RETENTION, SystemTime::now()),
            0
        );

        let later = SystemTime::now() + Duration::from_secs(8 * 24 * 60 * 60);
        assert_eq!(cleanup_old_logs(dir.path(), LOG_RETENTION, later), 1);
        assert!(dir.path().join("other.txt").exists());
        assert!(!dir.path().join("herald.log.2024-01-01").exists());
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(
            cleanup_old_logs(&missing, LOG_RETENTION, SystemTime::now()),
            0
        );
    }
}
