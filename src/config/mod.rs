// src/config/mod.rs
//! Application configuration: four sections with documented defaults, loaded
//! from TOML or JSON. A missing file is not an error; a malformed one is.

pub mod duration;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_CONFIG_PATH: &str = "AGRI_CONFIG_PATH";
pub const ENV_JWT_SECRET: &str = "JWT_SECRET";
pub const DEFAULT_CONFIG_TOML: &str = "config/agri.toml";
pub const DEFAULT_CONFIG_JSON: &str = "config/agri.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub crawler: CrawlerConfig,
    pub api: ApiConfig,
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlite, postgres, ...
    pub engine: String,
    pub dsn: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    #[serde(with = "duration::serde_str")]
    pub conn_lifetime: Duration,
    pub migrations_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "sqlite".into(),
            dsn: "data/agricultural_data.db".into(),
            max_open_conns: 20,
            max_idle_conns: 5,
            conn_lifetime: Duration::from_secs(3_600),
            migrations_dir: "migrations".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub user_agent: String,
    /// Fetches in flight across all sources.
    pub concurrency: usize,
    /// Minimum spacing between request starts.
    #[serde(with = "duration::serde_str")]
    pub request_delay: Duration,
    pub respect_robots_txt: bool,
    #[serde(with = "duration::serde_str")]
    pub schedule_interval: Duration,
    pub max_retries: u32,
    #[serde(with = "duration::serde_str")]
    pub retry_delay: Duration,
    pub disallowed_domains: Vec<String>,
    #[serde(with = "duration::serde_str")]
    pub request_timeout: Duration,
    /// How far past "now" an observation date may lie.
    #[serde(with = "duration::serde_str")]
    pub clock_skew: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: "AgriculturalIntelligenceBot/1.0".into(),
            concurrency: 5,
            request_delay: Duration::from_secs(2),
            respect_robots_txt: true,
            schedule_interval: Duration::from_secs(24 * 3_600),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            disallowed_domains: Vec::new(),
            request_timeout: Duration::from_secs(30),
            clock_skew: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen_address: String,
    pub jwt_secret: String,
    #[serde(with = "duration::serde_str")]
    pub jwt_expiry: Duration,
    pub rate_limit: u32,
    pub cors_origins: Vec<String>,
    #[serde(with = "duration::serde_str")]
    pub read_timeout: Duration,
    #[serde(with = "duration::serde_str")]
    pub write_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: ":8080".into(),
            jwt_secret: String::new(),
            jwt_expiry: Duration::from_secs(24 * 3_600),
            rate_limit: 100,
            cors_origins: vec!["*".into()],
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Days to forecast ahead.
    pub forecast_window: u32,
    /// Days of history to use.
    pub history_window: u32,
    #[serde(with = "duration::serde_str")]
    pub update_interval: Duration,
    pub anomaly_threshold: f64,
    pub seasonal_adjustment: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            forecast_window: 30,
            history_window: 365,
            update_interval: Duration::from_secs(6 * 3_600),
            anomaly_threshold: 0.15,
            seasonal_adjustment: true,
        }
    }
}

impl Config {
    /// Load from an explicit path. TOML or JSON, picked by extension.
    /// A path that does not exist yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            })?;
            let ext = path
                .extension()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            parse_config(&content, ext.as_str()).map_err(|message| ConfigError::Parse {
                path: path.display().to_string(),
                message,
            })?
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };
        cfg.apply_env();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $AGRI_CONFIG_PATH
    /// 2) config/agri.toml
    /// 3) config/agri.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(ConfigError::MissingEnvPath(ENV_CONFIG_PATH));
            }
            return Self::load_from(&pb);
        }
        for candidate in [DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_JSON] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        let mut cfg = Config::default();
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(ENV_JWT_SECRET) {
            if !secret.is_empty() {
                self.api.jwt_secret = secret;
            }
        }
    }

    fn sanitize(&mut self) {
        if self.crawler.concurrency == 0 {
            self.crawler.concurrency = 1;
        }
        if self.database.max_idle_conns > self.database.max_open_conns {
            self.database.max_idle_conns = self.database.max_open_conns;
        }
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<Config, String> {
    match hint_ext {
        "json" => serde_json::from_str(s).map_err(|e| e.to_string()),
        "toml" => toml::from_str(s).map_err(|e| e.to_string()),
        // Unknown extension: TOML first, then JSON.
        _ => toml::from_str(s).or_else(|te: toml::de::Error| {
            serde_json::from_str(s).map_err(|je| format!("toml: {te}; json: {je}"))
        }),
    }
}
