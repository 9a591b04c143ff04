use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub conversion: ConversionConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Browser client assets. Relative paths resolve against the working directory.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Scoped working directory. Nothing outside of it is ever written.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub work_dir: PathBuf,
}

impl StorageConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join("staging")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.work_dir.join("artifacts")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    LibreOffice,
    Unoconv,
    Text,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConversionConfig {
    /// Upper bound for a single engine attempt.
    pub timeout_secs: u64,
    /// Engines tried in order until one succeeds.
    pub engines: Vec<EngineKind>,
    pub libreoffice_path: Option<PathBuf>,
}

impl ConversionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            engines: vec![EngineKind::LibreOffice, EngineKind::Unoconv, EngineKind::Text],
            libreoffice_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_age_secs: u64,
    pub sweep_interval_secs: u64,
    pub cleanup_endpoint_enabled: bool,
}

impl RetentionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 60 * 60,
            sweep_interval_secs: 10 * 60,
            cleanup_endpoint_enabled: true,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Defaults with every path rooted at `work_dir`.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                work_dir: work_dir.into(),
            },
            ..Self::default()
        }
    }
}
