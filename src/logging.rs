use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const RETENTION_DAYS: u64 = 30;
const LOG_FILE_PREFIX: &str = "latentspace";

pub struct LoggingSettings<'a> {
    pub level: Option<&'a str>,
    pub directory: Option<&'a str>,
    pub retention_days: Option<u64>,
    /// Keep stdout clean (e.g. while streaming an article to the terminal).
    pub suppress_stdout: bool,
}

pub fn setup_tracing_with_settings(settings: LoggingSettings<'_>) -> Result<PathBuf> {
    let log_dir = resolve_log_dir(settings.directory)?;
    let retention_days = settings.retention_days.unwrap_or(RETENTION_DAYS);
    let _ = cleanup_old_logs(&log_dir, retention_days);

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Dropping the guard stops the background writer.
    let _ = LOG_GUARD.set(guard);

    let stdout_layer = (!settings.suppress_stdout).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .compact()
            .boxed()
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .compact();

    let default_filter = || {
        let base = settings.level.unwrap_or("info");
        EnvFilter::new(format!(
            "latentspace={level},axum=warn,tower_http=warn,hyper=warn,hyper_util=warn,reqwest=warn,\
             html5ever=warn",
            level = base
        ))
    };

    let filter = if settings.level.is_some() {
        default_filter()
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(env_filter) => env_filter,
            Err(_) => default_filter(),
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    Ok(log_dir)
}

fn resolve_log_dir(configured: Option<&str>) -> Result<PathBuf> {
    let dir = match configured {
        Some(path) => expand_tilde(path),
        None => crate::paths::logs_dir(),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> Result<usize> {
    let now = SystemTime::now();
    let max_age = Duration::from_secs(60 * 60 * 24 * retention_days);
    let mut removed = 0;
    for entry in std::fs::read_dir(log_dir)?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age > max_age && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_skips_foreign_and_fresh_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("latentspace.2026-01-01"), "old?").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "keep").unwrap();

        // Everything was just written, so nothing is past retention.
        assert_eq!(cleanup_old_logs(tmp.path(), 1).unwrap(), 0);
        assert!(tmp.path().join("notes.txt").exists());
        assert!(tmp.path().join("latentspace.2026-01-01").exists());
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/var/log/ls"), PathBuf::from("/var/log/ls"));
    }
}
