use crate::application::optimizer::OptimizerConfig;
use crate::application::prober::ProberConfig;
use crate::application::traffic::TrafficConfig;
use crate::domain::error::GateError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub optimizer: OptimizerSection,
    #[serde(default)]
    pub prober: ProberSection,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_probe_table")]
    pub probe_table: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OptimizerSection {
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    #[serde(default = "default_ttl_ms")]
    pub health_ttl_ms: u64,
    #[serde(default = "default_collection_ttl_ms")]
    pub collection_ttl_ms: u64,
    #[serde(default = "default_health_marker")]
    pub health_marker: String,
    #[serde(default = "default_primary_collection")]
    pub primary_collection: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,
    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,
    #[serde(default = "default_warn_interval_ms")]
    pub warn_interval_ms: u64,
    #[serde(default = "default_throttle_duration_ms")]
    pub throttle_duration_ms: u64,
    #[serde(default = "default_history_window_ms")]
    pub history_window_ms: u64,
    #[serde(default = "default_backpressure_pause_ms")]
    pub backpressure_pause_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProberSection {
    #[serde(default = "default_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_missing_relation_codes")]
    pub missing_relation_codes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    #[serde(default = "default_enable")]
    pub enable: bool,
    pub path: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            probe_table: default_probe_table(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            health_ttl_ms: default_ttl_ms(),
            collection_ttl_ms: default_collection_ttl_ms(),
            health_marker: default_health_marker(),
            primary_collection: default_primary_collection(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            burst_threshold: default_burst_threshold(),
            burst_window_ms: default_burst_window_ms(),
            warn_interval_ms: default_warn_interval_ms(),
            throttle_duration_ms: default_throttle_duration_ms(),
            history_window_ms: default_history_window_ms(),
            backpressure_pause_ms: default_backpressure_pause_ms(),
        }
    }
}

impl Default for ProberSection {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_ttl_ms(),
            missing_relation_codes: default_missing_relation_codes(),
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            enable: true,
            path: None,
            level: default_log_level(),
        }
    }
}

impl Logging {
    /// `tracing` filter directive for the configured level.
    pub fn filter_directive(&self) -> &'static str {
        match self.level.to_ascii_uppercase().as_str() {
            "TRACE" => "trace",
            "DEBUG" => "debug",
            "INFO" => "info",
            "WARN" => "warn",
            "ERROR" => "error",
            _ => "warn",
        }
    }
}

impl OptimizerSection {
    pub fn to_optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            default_ttl: Duration::from_millis(self.default_ttl_ms),
            health_ttl: Duration::from_millis(self.health_ttl_ms),
            collection_ttl: Duration::from_millis(self.collection_ttl_ms),
            health_marker: self.health_marker.clone(),
            primary_collection: self.primary_collection.clone(),
            retry_count: self.retry_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            backpressure_pause: Duration::from_millis(self.backpressure_pause_ms),
            traffic: TrafficConfig {
                burst_threshold: self.burst_threshold,
                burst_window: Duration::from_millis(self.burst_window_ms),
                warn_interval: Duration::from_millis(self.warn_interval_ms),
                throttle_duration: Duration::from_millis(self.throttle_duration_ms),
                history_window: Duration::from_millis(self.history_window_ms),
            },
        }
    }
}

impl ProberSection {
    pub fn to_prober_config(&self) -> ProberConfig {
        ProberConfig {
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            missing_relation_codes: self.missing_relation_codes.clone(),
        }
    }
}

// Defaults
fn default_probe_table() -> String {
    "resources".to_string()
}
fn default_user_agent() -> String {
    format!("fetchgate/{}", env!("CARGO_PKG_VERSION"))
}
fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}
fn default_collection_ttl_ms() -> u64 {
    10 * 60 * 1000
}
fn default_health_marker() -> String {
    "health".to_string()
}
fn default_primary_collection() -> String {
    "resources".to_string()
}
fn default_retry_count() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_burst_threshold() -> usize {
    10
}
fn default_burst_window_ms() -> u64 {
    1000
}
fn default_warn_interval_ms() -> u64 {
    5000
}
fn default_throttle_duration_ms() -> u64 {
    10_000
}
fn default_history_window_ms() -> u64 {
    60_000
}
fn default_backpressure_pause_ms() -> u64 {
    2000
}
fn default_missing_relation_codes() -> Vec<String> {
    // Postgres undefined_table, PostgREST "table not in schema cache"
    vec!["42P01".to_string(), "PGRST205".to_string()]
}
fn default_enable() -> bool {
    true
}
fn default_log_level() -> String {
    "WARN".to_string()
}

pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fetchgate").join("config.toml"))
}

pub fn parse_config(content: &str) -> Result<Config, GateError> {
    Ok(toml::from_str::<Config>(content)?)
}

pub fn load_config() -> Result<Config, GateError> {
    let config_path = get_config_path();

    if let Some(path) = config_path {
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            match parse_config(&content) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    eprintln!(
                        "Warning: Failed to parse config file: {}. Using defaults.",
                        e
                    );
                }
            }
        }
    }

    Ok(Config::default())
}

pub fn generate_config_sample() -> Result<(), GateError> {
    let config_path = get_config_path();

    if let Some(path) = config_path {
        if path.exists() {
            eprintln!("Config file already exists at: {}", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let sample = Config::default();
        let toml_content = toml::to_string_pretty(&sample)
            .map_err(|e| GateError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(&path, toml_content)
            .map_err(|e| GateError::Config(format!("Failed to write config file: {}", e)))?;
        println!("Generated config file at: {}", path.display());
    } else {
        return Err(GateError::Config(
            "Cannot determine config directory".to_string(),
        ));
    }

    Ok(())
}
