use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

use crate::{pipeline::PipelineError, schema::MessageVersion, worker::WorkerSettings};

pub const CONFIG_PATH_ENV: &str = "TELEMETRY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "telemetry-config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub http_bind_addr: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            http_bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub kind: QueueKind,
    /// Connection string of the queue database; falls back to `storage.uri`.
    pub url: Option<String>,
    /// Deployment region label, reported at startup.
    pub region: Option<String>,
    pub max_connections: u32,
    pub visibility_timeout_secs: u64,
    pub poll_step_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind: QueueKind::Postgres,
            url: None,
            region: None,
            max_connections: 5,
            visibility_timeout_secs: 30,
            poll_step_ms: 250,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Pause between claim attempts while a receive long-polls.
    pub fn poll_step(&self) -> Result<Duration, PipelineError> {
        if self.poll_step_ms == 0 {
            return Err(PipelineError::Config(
                "queue.poll_step_ms must be positive".to_string(),
            ));
        }
        Ok(Duration::from_millis(self.poll_step_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub uri: Option<String>,
    pub max_connections: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uri: None,
            max_connections: 5,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub max_messages: usize,
    pub wait_seconds: u64,
    /// Version applied to bodies without a `schemaVersion` tag. 0 drops them.
    pub untagged_version: u8,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_messages: 10,
            wait_seconds: 5,
            untagged_version: 2,
        }
    }
}

impl WorkerConfig {
    pub fn settings(&self) -> Result<WorkerSettings, PipelineError> {
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::Config(
                "worker.poll_interval_ms must be positive".to_string(),
            ));
        }

        let untagged_version = match self.untagged_version {
            0 => None,
            v => Some(MessageVersion::try_from(v).map_err(|e| {
                PipelineError::Config(format!("worker.untagged_version: {e}"))
            })?),
        };

        Ok(WorkerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_messages: self.max_messages,
            receive_wait: Duration::from_secs(self.wait_seconds),
            untagged_version,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub directory: String,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,sqlx=warn".to_string(),
            file_enabled: true,
            directory: "logs".to_string(),
            max_files: 14,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub intake: IntakeConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    /// Read the TOML file named by `TELEMETRY_CONFIG` (if any), then apply
    /// environment overrides. `.env` is loaded first when present.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let _ = dotenvy::dotenv();

        let explicit = env::var(CONFIG_PATH_ENV).ok();
        let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut cfg = if explicit.is_some() || Path::new(&path).exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
            Self::from_toml_str(&contents)?
        } else {
            AppConfig::default()
        };

        cfg.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = get("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|e| PipelineError::Config(format!("invalid PORT {port:?}: {e}")))?;
            self.intake.http_bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(uri) = get("DATABASE_URL") {
            self.storage.uri = Some(uri);
        }
        if let Some(url) = get("QUEUE_URL") {
            self.queue.url = Some(url);
        }
        if let Some(region) = get("QUEUE_REGION") {
            self.queue.region = Some(region);
        }
        if let Some(kind) = get("QUEUE_KIND") {
            self.queue.kind = match kind.to_ascii_lowercase().as_str() {
                "postgres" => QueueKind::Postgres,
                "memory" => QueueKind::Memory,
                other => {
                    return Err(PipelineError::Config(format!(
                        "QUEUE_KIND must be postgres or memory, got {other:?}"
                    )))
                }
            };
        }
        if let Some(dir) = get("LOG_DIR") {
            self.logging.directory = dir;
        }

        Ok(())
    }

    pub fn storage_uri(&self) -> Result<&str, PipelineError> {
        self.storage.uri.as_deref().ok_or_else(|| {
            PipelineError::Config("storage.uri (or DATABASE_URL) is required".to_string())
        })
    }

    pub fn queue_uri(&self) -> Result<&str, PipelineError> {
        match self.queue.url.as_deref() {
            Some(url) => Ok(url),
            None => self.storage_uri().map_err(|_| {
                PipelineError::Config(
                    "queue.url (or QUEUE_URL) is required when no storage uri is set".to_string(),
                )
            }),
        }
    }
}
