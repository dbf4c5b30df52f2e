use crate::error::{ErrorContext, UploadCoreError};
use crate::notifications::ProgressScope;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Defaults mirror what the bulk upload screen has always used
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_DELAY_BASE_MS: u64 = 1000;
pub const DEFAULT_PROGRESS_TICK_MS: u64 = 200;
pub const DEFAULT_PROGRESS_STEP: u8 = 10;
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 50 * 1024 * 1024;

pub const DEFAULT_SWEEP_AFTER_SECS: u64 = 10;
pub const DEFAULT_SWEEP_GRACE_MS: u64 = 1000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_SUMMARY_SIZE: usize = 5;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// Completed rows linger a day at most
pub const MAX_SWEEP_AFTER_SECS: u64 = 24 * 60 * 60;
pub const MAX_SWEEP_GRACE_MS: u64 = 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub max_concurrency: usize,
    /// Retries after the first attempt
    pub retry_attempts: u32,
    pub retry_delay_base_ms: u64,
    pub progress_tick_ms: u64,
    pub progress_step: u8,
    pub max_payload_bytes: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_base_ms: DEFAULT_RETRY_DELAY_BASE_MS,
            progress_tick_ms: DEFAULT_PROGRESS_TICK_MS,
            progress_step: DEFAULT_PROGRESS_STEP,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl QueueConfig {
    pub fn retry_delay_base(&self) -> Duration {
        Duration::from_millis(self.retry_delay_base_ms)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }

    pub fn validate(&self) -> Result<(), UploadCoreError> {
        if self.max_concurrency == 0 {
            return Err(UploadCoreError::Config(
                "maxConcurrency must be at least 1".to_string(),
            ));
        }
        if self.progress_step == 0 || self.progress_step > 100 {
            return Err(UploadCoreError::Config(format!(
                "progressStep must be between 1 and 100, got {}",
                self.progress_step
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Age after which completed notifications become eligible for removal
    pub sweep_after_secs: u64,
    pub sweep_grace_ms: u64,
    pub sweep_interval_ms: u64,
    pub progress_scope: ProgressScope,
    /// Rows shown by the collapsed upload summary
    pub summary_size: usize,
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_after_secs: DEFAULT_SWEEP_AFTER_SECS,
            sweep_grace_ms: DEFAULT_SWEEP_GRACE_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            progress_scope: ProgressScope::default(),
            summary_size: DEFAULT_SUMMARY_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Minimum age of a completed notification before the sweeper drops it
    ///
    /// Saturates instead of overflowing, so an absurd value means "never"
    pub fn sweep_deadline(&self) -> TimeDelta {
        let after = i64::try_from(self.sweep_after_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let grace = i64::try_from(self.sweep_grace_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(TimeDelta::MAX);

        after.checked_add(&grace).unwrap_or(TimeDelta::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<(), UploadCoreError> {
        if self.sweep_interval_ms == 0 {
            return Err(UploadCoreError::Config(
                "sweepIntervalMs must be greater than 0".to_string(),
            ));
        }
        if self.sweep_after_secs > MAX_SWEEP_AFTER_SECS {
            return Err(UploadCoreError::Config(format!(
                "sweepAfterSecs must be at most {}, got {}",
                MAX_SWEEP_AFTER_SECS, self.sweep_after_secs
            )));
        }
        if self.sweep_grace_ms > MAX_SWEEP_GRACE_MS {
            return Err(UploadCoreError::Config(format!(
                "sweepGraceMs must be at most {}, got {}",
                MAX_SWEEP_GRACE_MS, self.sweep_grace_ms
            )));
        }
        if self.event_capacity == 0 {
            return Err(UploadCoreError::Config(
                "eventCapacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadCoreConfig {
    pub queue: QueueConfig,
    pub registry: RegistryConfig,
}

impl UploadCoreConfig {
    pub fn validate(&self) -> Result<(), UploadCoreError> {
        self.queue.validate()?;
        self.registry.validate()
    }
}

pub fn get_config_dir() -> Result<PathBuf, UploadCoreError> {
    if let Some(home_dir) = dirs::home_dir() {
        Ok(home_dir.join(".upload-core"))
    } else {
        Err(UploadCoreError::Config(
            "Could not find home directory".to_string(),
        ))
    }
}

pub fn get_config_file_path() -> Result<PathBuf, UploadCoreError> {
    Ok(get_config_dir()?.join("config.json"))
}

pub fn get_logs_dir() -> Result<PathBuf, UploadCoreError> {
    Ok(get_config_dir()?.join("logs"))
}

/// Create a directory readable by the owner only
fn ensure_private_dir(dir: &Path) -> Result<(), UploadCoreError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(dir)?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

pub fn ensure_config_dir() -> Result<(), UploadCoreError> {
    ensure_private_dir(&get_config_dir()?)
}

pub fn ensure_logs_dir() -> Result<(), UploadCoreError> {
    ensure_private_dir(&get_logs_dir()?)
}

pub fn load_config() -> Result<UploadCoreConfig, UploadCoreError> {
    ensure_config_dir()?;
    load_config_from(&get_config_file_path()?)
}

/// Load a config file, falling back to defaults when it does not exist
pub fn load_config_from(path: &Path) -> Result<UploadCoreConfig, UploadCoreError> {
    if !path.exists() {
        return Ok(UploadCoreConfig::default());
    }

    let content = fs::read_to_string(path).context("Failed to read config file")?;
    let config: UploadCoreConfig =
        serde_json::from_str(&content).context("Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &UploadCoreConfig) -> Result<(), UploadCoreError> {
    ensure_config_dir()?;
    save_config_to(config, &get_config_file_path()?)
}

pub fn save_config_to(config: &UploadCoreConfig, path: &Path) -> Result<(), UploadCoreError> {
    config.validate()?;
    let content = serde_json::to_string_pretty(config)?;

    fs::write(path, content)?;

    // Set permissions to 600 (read/write for owner only) on Unix systems
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = UploadCoreConfig::default();
        assert_eq!(config.queue.max_concurrency, 3);
        assert_eq!(config.queue.retry_attempts, 2);
        assert_eq!(config.queue.retry_delay_base_ms, 1000);
        assert_eq!(config.registry.sweep_after_secs, 10);
        assert_eq!(config.registry.progress_scope, ProgressScope::AllRows);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = load_config_from(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(config, UploadCoreConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");

        let mut config = UploadCoreConfig::default();
        config.queue.max_concurrency = 5;
        config.registry.progress_scope = ProgressScope::ActiveOnly;
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"queue":{"maxConcurrency":2}}"#).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.queue.max_concurrency, 2);
        assert_eq!(loaded.queue.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(loaded.registry, RegistryConfig::default());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"queue":{"maxConcurrency":0}}"#).unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("maxConcurrency"));
    }

    #[test]
    fn test_invalid_json_reports_context() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_sweep_deadline() {
        let config = RegistryConfig::default();
        assert_eq!(config.sweep_deadline(), chrono::Duration::milliseconds(11_000));
    }

    #[test]
    fn test_huge_sweep_deadline_saturates() {
        let config = RegistryConfig {
            sweep_after_secs: 10_000_000_000_000_000,
            sweep_grace_ms: u64::MAX,
            ..RegistryConfig::default()
        };
        assert_eq!(config.sweep_deadline(), TimeDelta::MAX);
    }

    #[test]
    fn test_huge_sweep_after_rejected() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"registry":{"sweepAfterSecs":10000000000000000}}"#).unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("sweepAfterSecs"));

        fs::write(&path, r#"{"registry":{"sweepGraceMs":18446744073709551615}}"#).unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("sweepGraceMs"));
    }
}
