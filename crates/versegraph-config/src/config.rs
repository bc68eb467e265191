use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "VERSEGRAPH_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerseGraphConfig {
    pub orchestrator: OrchestratorConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Expansion/fetch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Watchdog timeout for one load or expand operation.
    pub timeout_ms: u64,
    /// Translation used when a referenced verse has to be created.
    pub default_translation: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            default_translation: "KJV".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Background sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Period of the background loop.
    pub interval_secs: u64,
    /// Maximum pushes per entity class per pass.
    pub batch_ceiling: usize,
    /// Consecutive failed passes before backing off.
    pub failure_ceiling: u32,
    /// How long attempts are refused once the ceiling is hit.
    pub backoff_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            batch_ceiling: 10,
            failure_ceiling: 3,
            backoff_secs: 60,
        }
    }
}

/// Local cache location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for the file-backed cache. `None` keeps the cache in memory.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "versegraph=info".to_string(),
            json: false,
        }
    }
}

impl VerseGraphConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from `$VERSEGRAPH_CONFIG`, or from the platform
    /// config directory. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            debug!("No config location available; using defaults");
            return Ok(Self::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                debug!(path = %path.display(), "Loading configuration");
                Self::from_toml_str(&raw, &path)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        ProjectDirs::from("", "", "versegraph").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.orchestrator.default_translation.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "orchestrator.default_translation must not be empty".to_string(),
            ));
        }
        if self.sync.batch_ceiling == 0 {
            return Err(ConfigError::Invalid(
                "sync.batch_ceiling must be greater than zero".to_string(),
            ));
        }
        if self.sync.failure_ceiling == 0 {
            return Err(ConfigError::Invalid(
                "sync.failure_ceiling must be greater than zero".to_string(),
            ));
        }
        if self.sync.enabled && self.sync.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.interval_secs must be greater than zero when sync is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
