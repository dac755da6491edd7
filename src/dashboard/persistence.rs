//! Persistence gateway: the async API behind dashboard load and save, with
//! transport retry, plus a file-backed implementation used by local builds
//! and tests.

use crate::dashboard::config::DashboardConfig;
use crate::dashboard::layout;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Errors surfaced by a [`DashboardApi`] implementation. `Transport` is the
/// only retryable variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("no dashboard stored for user '{0}'")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// The remote (or local) store for dashboard configs.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn fetch_config(&self, user_id: &str) -> Result<DashboardConfig, ApiError>;

    /// Persist a config. The returned config is the stored copy, which may
    /// carry a refreshed `updated_at`.
    async fn store_config(&self, config: &DashboardConfig) -> Result<DashboardConfig, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("no stored dashboard")]
    NotFound,
    #[error("stored dashboard unreadable: {0}")]
    Rejected(String),
    #[error("dashboard service unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaveError {
    #[error("save rejected: {0}")]
    Rejected(String),
    #[error("dashboard service unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },
}

/// Exponential backoff with a little jitter so parallel tabs do not retry in
/// lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter = exp.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
        exp + jitter
    }
}

/// Wraps a [`DashboardApi`] with the retry policy. Transport errors are
/// retried; not-found and rejections come back immediately.
pub struct ConfigGateway {
    api: Arc<dyn DashboardApi>,
    retry: RetryPolicy,
}

impl ConfigGateway {
    pub fn new(api: Arc<dyn DashboardApi>) -> Self {
        Self::with_retry(api, RetryPolicy::default())
    }

    pub fn with_retry(api: Arc<dyn DashboardApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    pub async fn load(&self, user_id: &str) -> Result<DashboardConfig, LoadError> {
        let mut last = String::new();
        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt - 1)).await;
            }
            match self.api.fetch_config(user_id).await {
                Ok(config) => return Ok(config),
                Err(ApiError::NotFound(_)) => return Err(LoadError::NotFound),
                Err(ApiError::Rejected(message)) => return Err(LoadError::Rejected(message)),
                Err(ApiError::Transport(message)) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %message,
                        "dashboard fetch failed"
                    );
                    last = message;
                }
            }
        }
        Err(LoadError::Unavailable {
            attempts: self.retry.attempts,
            message: last,
        })
    }

    pub async fn save(&self, config: &DashboardConfig) -> Result<DashboardConfig, SaveError> {
        let mut last = String::new();
        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt - 1)).await;
            }
            match self.api.store_config(config).await {
                Ok(stored) => return Ok(stored),
                Err(ApiError::Rejected(message)) | Err(ApiError::NotFound(message)) => {
                    return Err(SaveError::Rejected(message));
                }
                Err(ApiError::Transport(message)) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %message,
                        "dashboard save failed"
                    );
                    last = message;
                }
            }
        }
        Err(SaveError::Unavailable {
            attempts: self.retry.attempts,
            message: last,
        })
    }
}

/// File-per-user store, one pretty-printed JSON document each. Doubles as
/// the offline backend and keeps the server contract honest by rejecting
/// configs that fail grid validation.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("dashboard-{user_id}.json"))
    }
}

#[async_trait]
impl DashboardApi for FileStore {
    async fn fetch_config(&self, user_id: &str) -> Result<DashboardConfig, ApiError> {
        let path = self.path_for(user_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ApiError::NotFound(user_id.to_string()));
            }
            Err(err) => return Err(ApiError::Transport(err.to_string())),
        };
        if raw.trim().is_empty() {
            return Err(ApiError::NotFound(user_id.to_string()));
        }
        serde_json::from_str(&raw)
            .map_err(|err| ApiError::Rejected(format!("corrupt dashboard file: {err}")))
    }

    async fn store_config(&self, config: &DashboardConfig) -> Result<DashboardConfig, ApiError> {
        let violations = layout::validate(config);
        if !violations.is_empty() {
            return Err(ApiError::Rejected(format!(
                "layout failed validation with {} problem(s)",
                violations.len()
            )));
        }
        let mut stored = config.clone();
        stored.updated_at = Utc::now();
        let body = serde_json::to_string_pretty(&stored)
            .map_err(|err| ApiError::Rejected(err.to_string()))?;
        let path = self.path_for(&stored.user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ApiError::Transport(err.to_string()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        Ok(stored)
    }
}
