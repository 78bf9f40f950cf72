use std::{
    fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("eipkeeper.sock")
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./state/sessions")
}

fn default_enabled_true() -> bool {
    true
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs/eipkeeper")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

fn default_quota() -> usize {
    5
}

fn default_unit_delay_ms() -> u64 {
    1_000
}

fn default_batch_delay_ms() -> u64 {
    60_000
}

fn default_release_retry_limit() -> u32 {
    3
}

fn default_release_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_acquisitions_per_run() -> u64 {
    100
}

pub fn default_allowed_prefixes() -> Vec<String> {
    [
        "43.204.6",
        "43.204.10",
        "43.204.11",
        "43.204.16",
        "43.204.17",
        "43.204.21",
        "43.205.28",
        "43.205.57",
        "43.205.71",
        "43.205.190",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_api_version() -> String {
    "2016-11-15".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            dir: default_store_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquisitionConfig {
    #[serde(default = "default_quota")]
    pub quota: usize,
    #[serde(default = "default_unit_delay_ms")]
    pub unit_delay_ms: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_release_retry_limit")]
    pub release_retry_limit: u32,
    #[serde(default = "default_release_retry_delay_ms")]
    pub release_retry_delay_ms: u64,
    #[serde(default = "default_max_acquisitions_per_run")]
    pub max_acquisitions_per_run: u64,
    #[serde(default = "default_allowed_prefixes")]
    pub allowed_prefixes: Vec<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            quota: default_quota(),
            unit_delay_ms: default_unit_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            release_retry_limit: default_release_retry_limit(),
            release_retry_delay_ms: default_release_retry_delay_ms(),
            max_acquisitions_per_run: default_max_acquisitions_per_run(),
            allowed_prefixes: default_allowed_prefixes(),
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.quota == 0 {
            return Err(anyhow!("acquisition.quota must be at least 1"));
        }
        if self.release_retry_limit == 0 {
            return Err(anyhow!("acquisition.release_retry_limit must be at least 1"));
        }
        if (self.max_acquisitions_per_run as u128) < self.quota as u128 {
            return Err(anyhow!(
                "acquisition.max_acquisitions_per_run ({}) cannot be below quota ({})",
                self.max_acquisitions_per_run,
                self.quota
            ));
        }
        for prefix in &self.allowed_prefixes {
            if !is_three_octet_prefix(prefix) {
                return Err(anyhow!(
                    "acquisition.allowed_prefixes entry '{prefix}' is not three numeric octets"
                ));
            }
        }
        Ok(())
    }
}

fn is_three_octet_prefix(prefix: &str) -> bool {
    format!("{prefix}.0").parse::<Ipv4Addr>().is_ok() && prefix.split('.').count() == 3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_ms: default_request_timeout_ms(),
            api_version: default_api_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = resolve_schema_path(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize config")?;
        config.acquisition.validate()?;

        if !config.server.socket_path.is_absolute() {
            config.server.socket_path = config_base.join(&config.server.socket_path);
        }
        if !config.store.dir.is_absolute() {
            config.store.dir = config_base.join(&config.store.dir);
        }

        Ok(config)
    }
}

fn resolve_schema_path(config_base: &Path, config_value: &Value) -> Result<PathBuf> {
    if let Some(path_text) = config_value.get("$schema").and_then(|value| value.as_str()) {
        let configured = PathBuf::from(path_text);
        if configured.is_absolute() {
            return Ok(configured);
        }
        return Ok(config_base.join(&configured));
    }

    let local_default = config_base.join("eipkeeper.schema.json");
    if local_default.exists() {
        return Ok(local_default);
    }

    Err(anyhow!(
        "unable to resolve schema path: expected $schema in config or eipkeeper.schema.json"
    ))
}

fn validate_against_schema(config_value: &Value, schema_path: &Path) -> Result<()> {
    let schema_content = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;

    let compiled =
        JSONSchema::compile(&schema).map_err(|e| anyhow!("failed to compile schema: {e}"))?;

    match compiled.validate(config_value) {
        Ok(()) => Ok(()),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            let messages: Vec<String> = validation_errors
                .into_iter()
                .map(|error| error.to_string())
                .collect();
            Err(anyhow!("config validation failed: {}", messages.join("; ")))
        }
    }
}
