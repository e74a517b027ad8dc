//! Process configuration, loaded once at startup from the environment.
//! Every `*Config` here gets a `Default` the way the teacher's component
//! configs do, so unit tests can build one without touching the environment.

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub region: String,
    pub bucket: String,
    pub kms_key_id: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
            bucket: "docflow-objects".into(),
            kms_key_id: "alias/docflow".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub object_store: ObjectStoreConfig,
    pub metadata_url: String,
    pub queue_url: String,
    pub bus_url: String,
    pub snapshot_window: Duration,
    pub session_idle_timeout: Duration,
    pub max_upload_bytes: u64,
    pub worker_task_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            object_store: ObjectStoreConfig::default(),
            metadata_url: "postgres://localhost/docflow".into(),
            queue_url: "redis://localhost:6379/0".into(),
            bus_url: "redis://localhost:6379/1".into(),
            snapshot_window: Duration::from_secs(300),
            session_idle_timeout: Duration::from_secs(1800),
            max_upload_bytes: 52_428_800,
            worker_task_timeout: Duration::from_secs(600),
        }
    }
}

impl AppConfig {
    /// Reads every `DOCFLOW_*` variable, falling back to [`Default`] for
    /// anything unset. Malformed numeric/duration values are a startup
    /// error rather than a silent fallback.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            object_store: ObjectStoreConfig {
                region: env_or("OBJECT_STORE_REGION", defaults.object_store.region),
                bucket: env_or("OBJECT_STORE_BUCKET", defaults.object_store.bucket),
                kms_key_id: env_or("OBJECT_STORE_KMS_KEY", defaults.object_store.kms_key_id),
            },
            metadata_url: env_or("METADATA_URL", defaults.metadata_url),
            queue_url: env_or("QUEUE_URL", defaults.queue_url),
            bus_url: env_or("BUS_URL", defaults.bus_url),
            snapshot_window: env_secs("SNAPSHOT_WINDOW_SECONDS", defaults.snapshot_window)?,
            session_idle_timeout: env_secs(
                "SESSION_IDLE_TIMEOUT_SECONDS",
                defaults.session_idle_timeout,
            )?,
            max_upload_bytes: env_u64("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            worker_task_timeout: env_secs(
                "WORKER_TASK_TIMEOUT_SECONDS",
                defaults.worker_task_timeout,
            )?,
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> AppResult<Duration> {
    match env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| AppError::ValidationFailed(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map_err(|e| AppError::ValidationFailed(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_env() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.max_upload_bytes, 52_428_800);
        assert_eq!(cfg.snapshot_window, Duration::from_secs(300));
    }

    #[test]
    fn rejects_unparseable_duration() {
        env::set_var("SNAPSHOT_WINDOW_SECONDS", "not-a-number");
        let result = AppConfig::from_env();
        env::remove_var("SNAPSHOT_WINDOW_SECONDS");
        assert!(result.is_err());
    }
}
