use anyhow::{bail, Context, Result};
use burst_detection::{BurstConfig, DEFAULT_BLUR_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub asset_store: AssetStoreConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub burst: BurstConfig,
}

fn default_database_path() -> PathBuf {
    batch_db::default_database_path()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetStoreConfig {
    /// Immich server root, without the `/api` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Upper bound on a single fetch, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:2283".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for AssetStoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Laplacian variance that maps to a blur score of 100
    #[serde(default = "default_blur_threshold")]
    pub blur_threshold: f64,

    /// Assets fetched and analyzed at the same time
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

fn default_blur_threshold() -> f64 {
    DEFAULT_BLUR_THRESHOLD
}

fn default_max_concurrent_fetches() -> usize {
    4
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            blur_threshold: default_blur_threshold(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            asset_store: AssetStoreConfig::default(),
            analysis: AnalysisConfig::default(),
            burst: BurstConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Invalid config file: {}", config_path.display()))?
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("photo-triage")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis.blur_threshold.is_nan() || self.analysis.blur_threshold <= 0.0 {
            bail!("analysis.blur_threshold must be positive, got {}", self.analysis.blur_threshold);
        }
        if self.analysis.max_concurrent_fetches == 0 {
            bail!("analysis.max_concurrent_fetches must be at least 1");
        }
        if self.burst.interval_seconds.is_nan() || self.burst.interval_seconds < 0.0 {
            bail!("burst.interval_seconds must not be negative, got {}", self.burst.interval_seconds);
        }
        if self.burst.min_burst_size < 2 {
            bail!("burst.min_burst_size must be at least 2, got {}", self.burst.min_burst_size);
        }
        if self.asset_store.timeout_secs == 0 {
            bail!("asset_store.timeout_secs must be at least 1");
        }
        Ok(())
    }
}
