//! Logging setup with a reloadable filter and daily-rolling log files.

use chrono::{Local, NaiveDate, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "courier=info,sqlx=warn,tower_http=info";

const LOG_FILE_PREFIX: &str = "courier.log";
const LOG_RETENTION_DAYS: i64 = 7;
const RETENTION_SWEEP_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

/// RFC 3339 timestamps with millisecond precision in local time.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().to_rfc3339_opts(SecondsFormat::Millis, false))
    }
}

pub type FilterHandle = Handle<EnvFilter, Registry>;

/// Runtime handle on the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Current filter directive.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(ToString::to_string)
            .unwrap_or_default()
    }

    /// Swap in a new directive such as `courier=debug,sqlx=warn`. The old
    /// filter stays active when the directive does not parse.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let filter = EnvFilter::try_new(directive).map_err(|e| {
            crate::Error::config(format!("Invalid filter directive '{}': {}", directive, e))
        })?;
        self.handle
            .reload(filter)
            .map_err(|e| crate::Error::Other(format!("Subscriber is gone: {}", e)))?;

        info!(%directive, "Log filter changed");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Prune rolled files past retention once a day until cancelled.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(RETENTION_SWEEP_EVERY);
            ticks.tick().await;

            while cancel_token
                .run_until_cancelled(ticks.tick())
                .await
                .is_some()
            {
                let cutoff = (Utc::now() - chrono::Duration::days(LOG_RETENTION_DAYS)).date_naive();
                match prune_rolled_logs(&log_dir, cutoff).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Pruned old log files"),
                    Err(e) => warn!(error = %e, dir = %log_dir.display(), "Log pruning failed"),
                }
            }
            debug!("Log retention task stopped");
        });
    }
}

/// Date suffix of a rolled log file name (`courier.log.YYYY-MM-DD`).
fn rolled_file_date(file_name: &str) -> Option<NaiveDate> {
    let date = file_name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Remove rolled files dated before `cutoff`; returns how many went.
async fn prune_rolled_logs(log_dir: &Path, cutoff: NaiveDate) -> std::io::Result<usize> {
    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let stale = entry
            .file_name()
            .to_str()
            .and_then(rolled_file_date)
            .is_some_and(|date| date < cutoff);
        if !stale {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove log file"),
        }
    }

    Ok(removed)
}

/// Install the global subscriber: reloadable filter, console output and a
/// daily-rolling file in `log_dir`.
///
/// Keep the returned guard alive for the lifetime of the process.
pub fn init_logging(log_dir: &str) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_path)?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: log_path,
    });

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("courier=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_rolled_file_date() {
        assert_eq!(
            rolled_file_date("courier.log.2026-01-31"),
            NaiveDate::from_ymd_opt(2026, 1, 31)
        );
        assert_eq!(rolled_file_date("courier.log"), None);
        assert_eq!(rolled_file_date("other.log.2026-01-31"), None);
        assert_eq!(rolled_file_date("courier.log.garbage"), None);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_rolled_files() {
        let dir = std::env::temp_dir().join(format!("courier-logs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let old = dir.join("courier.log.2000-01-01");
        let today = dir.join(format!(
            "courier.log.{}",
            Utc::now().date_naive().format("%Y-%m-%d")
        ));
        let unrelated = dir.join("notes.txt");
        for path in [&old, &today, &unrelated] {
            std::fs::write(path, "x").unwrap();
        }

        let cutoff = Utc::now().date_naive() - chrono::Duration::days(LOG_RETENTION_DAYS);
        assert_eq!(prune_rolled_logs(&dir, cutoff).await.unwrap(), 1);

        assert!(!old.exists());
        assert!(today.exists());
        assert!(unrelated.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
