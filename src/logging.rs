use crate::config::{ensure_logs_dir, get_logs_dir};
use crate::error::UploadCoreError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, OnceLock};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_LOG_BACKUPS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub component: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

static LOGGER_INITIALIZED: std::sync::Once = std::sync::Once::new();

// Component log files are only written once init_logging has picked a directory
static ACTIVITY_LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

/// Install console and file subscribers and enable per-component activity logs
pub fn init_logging() -> Result<(), UploadCoreError> {
    ensure_logs_dir()?;
    init_logging_in(&get_logs_dir()?)
}

pub fn init_logging_in(logs_dir: &Path) -> Result<(), UploadCoreError> {
    std::fs::create_dir_all(logs_dir)?;
    let _ = ACTIVITY_LOG_DIR.set(logs_dir.to_path_buf());

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Console logging for development - compact format
        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_filter(env_filter.clone());

        // File logging for all application output
        let file_appender = tracing_appender::rolling::never(logs_dir, "app.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
            *guard_mutex = Some(guard);
        }

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        // A host application may already own the global subscriber
        let _ = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });

    Ok(())
}

pub fn log_component_event(
    component: &str,
    level: &str,
    message: &str,
    details: Option<serde_json::Value>,
) -> Result<(), UploadCoreError> {
    match level {
        "ERROR" => error!(component = component, "{}", message),
        "WARN" => warn!(component = component, "{}", message),
        "DEBUG" => debug!(component = component, "{}", message),
        _ => info!(component = component, "{}", message),
    }

    let Some(logs_dir) = ACTIVITY_LOG_DIR.get() else {
        return Ok(());
    };

    let log_entry = LogEntry {
        timestamp: Utc::now().to_rfc3339(),
        level: level.to_string(),
        component: component.to_string(),
        message: message.to_string(),
        details,
    };

    write_component_log_entry(&logs_dir.join(format!("{}.log", component)), &log_entry)
}

fn write_component_log_entry(
    log_file_path: &Path,
    entry: &LogEntry,
) -> Result<(), UploadCoreError> {
    if should_rotate_log(log_file_path)? {
        rotate_log_file(log_file_path)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;

    let json_line = serde_json::to_string(entry)?;
    writeln!(file, "{}", json_line)?;
    file.flush()?;

    Ok(())
}

fn should_rotate_log(log_file_path: &Path) -> Result<bool, UploadCoreError> {
    if !log_file_path.exists() {
        return Ok(false);
    }

    let metadata = std::fs::metadata(log_file_path)?;
    Ok(metadata.len() > MAX_LOG_SIZE)
}

fn rotate_log_file(log_file_path: &Path) -> Result<(), UploadCoreError> {
    // Shift existing backups (4 -> 5, 3 -> 4, etc.)
    for i in (1..MAX_LOG_BACKUPS).rev() {
        let current_backup = log_file_path.with_extension(format!("log.{}", i));
        let next_backup = log_file_path.with_extension(format!("log.{}", i + 1));

        if current_backup.exists() {
            std::fs::rename(&current_backup, &next_backup)?;
        }
    }

    if log_file_path.exists() {
        let first_backup = log_file_path.with_extension("log.1");
        std::fs::rename(log_file_path, first_backup)?;
    }

    Ok(())
}

/// Read a component's activity log, newest entries first
pub fn read_component_logs(
    component: &str,
    max_lines: Option<usize>,
) -> Result<Vec<LogEntry>, UploadCoreError> {
    let logs_dir = match ACTIVITY_LOG_DIR.get() {
        Some(dir) => dir.clone(),
        None => get_logs_dir()?,
    };
    read_log_file(&logs_dir.join(format!("{}.log", component)), max_lines)
}

fn read_log_file(
    log_file_path: &Path,
    max_lines: Option<usize>,
) -> Result<Vec<LogEntry>, UploadCoreError> {
    if !log_file_path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(log_file_path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line?;
        // Lines written by older builds or by hand are skipped
        if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
            entries.push(entry);
        }
    }

    entries.reverse();

    if let Some(max) = max_lines {
        entries.truncate(max);
    }

    Ok(entries)
}

// Convenience functions for different log levels
pub fn log_debug(component: &str, message: &str) -> Result<(), UploadCoreError> {
    log_component_event(component, "DEBUG", message, None)
}

pub fn log_info(component: &str, message: &str) -> Result<(), UploadCoreError> {
    log_component_event(component, "INFO", message, None)
}

pub fn log_warn(component: &str, message: &str) -> Result<(), UploadCoreError> {
    log_component_event(component, "WARN", message, None)
}

pub fn log_error(component: &str, message: &str) -> Result<(), UploadCoreError> {
    log_component_event(component, "ERROR", message, None)
}

pub fn log_with_details(
    component: &str,
    level: &str,
    message: &str,
    details: serde_json::Value,
) -> Result<(), UploadCoreError> {
    log_component_event(component, level, message, Some(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            level: "INFO".to_string(),
            component: "upload-queue".to_string(),
            message: message.to_string(),
            details: None,
        }
    }

    #[test]
    fn test_log_rotation() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("test.log");

        {
            let mut file = File::create(&log_file).unwrap();
            let large_content = "x".repeat(11 * 1024 * 1024); // 11MB
            file.write_all(large_content.as_bytes()).unwrap();
        }

        assert!(should_rotate_log(&log_file).unwrap());

        rotate_log_file(&log_file).unwrap();

        let backup_file = log_file.with_extension("log.1");
        assert!(backup_file.exists());
        assert!(!log_file.exists());
    }

    #[test]
    fn test_entries_read_newest_first() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("upload-queue.log");

        for message in ["first", "second", "third"] {
            write_component_log_entry(&log_file, &entry(message)).unwrap();
        }

        let entries = read_log_file(&log_file, None).unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);

        let limited = read_log_file(&log_file, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].message, "third");
    }

    #[test]
    fn test_unparseable_lines_skipped() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("registry.log");
        std::fs::write(&log_file, "garbage line\n").unwrap();
        write_component_log_entry(&log_file, &entry("kept")).unwrap();

        let entries = read_log_file(&log_file, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "kept");
    }

    #[test]
    fn test_missing_log_file_is_empty() {
        let temp_dir = tempdir().unwrap();
        let entries = read_log_file(&temp_dir.path().join("none.log"), Some(10)).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_log_entry_serialization() {
        let mut original = entry("Test message");
        original.details = Some(serde_json::json!({"taskId": "photo-1"}));

        let json = serde_json::to_string(&original).unwrap();
        let parsed: LogEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(original.timestamp, parsed.timestamp);
        assert_eq!(original.level, parsed.level);
        assert_eq!(original.component, parsed.component);
        assert_eq!(original.message, parsed.message);
        assert_eq!(original.details, parsed.details);
    }
}
