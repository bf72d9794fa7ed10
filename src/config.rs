use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::MinerError;

pub const DEFAULT_CONFIG_FILE: &str = "ftu-miner.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub chat: Option<ChatSection>,
    #[serde(default)]
    pub gateway: Option<GatewaySection>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub clickhouse: Option<ClickHouseSection>,
    #[serde(default)]
    pub bioportal_api_key: Option<String>,
    #[serde(default)]
    pub models: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ChatSection {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub attempts: Option<usize>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GatewaySection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub attempts: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ClickHouseSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub endpoints: Vec<String>,
    pub model: String,
    pub timeout: Duration,
    pub attempts: usize,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub attempts: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ClickHouseSettings {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_root: Utf8PathBuf,
    pub chat: ChatSettings,
    pub gateway: GatewaySettings,
    pub batch_size: usize,
    pub max_rounds: u32,
    pub clickhouse: ClickHouseSettings,
    pub bioportal_api_key: Option<String>,
    pub models: BTreeMap<String, String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `ftu-miner.json` from the working directory, then
    /// from the user config directory. Implicit files are optional; an
    /// explicit path must exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MinerError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                match user_config_path() {
                    Some(user) if !local.exists() && user.exists() => user,
                    _ => local,
                }
            }
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(MinerError::MissingConfig(config_path));
            }
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MinerError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MinerError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MinerError> {
        let chat = config.chat.unwrap_or_default();
        let gateway = config.gateway.unwrap_or_default();
        let clickhouse = config.clickhouse.unwrap_or_default();

        let batch_size = config.batch_size.unwrap_or(100);
        if batch_size == 0 {
            return Err(MinerError::ConfigInvalid(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let attempts = chat.attempts.unwrap_or(3);
        if attempts == 0 {
            return Err(MinerError::ConfigInvalid(
                "chat.attempts must be at least 1".to_string(),
            ));
        }

        let timeout = Duration::from_secs(chat.timeout_secs.unwrap_or(60));

        Ok(ResolvedConfig {
            data_root: Utf8PathBuf::from(config.data_root.unwrap_or_else(|| "data".to_string())),
            chat: ChatSettings {
                endpoints: chat
                    .endpoints
                    .into_iter()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .collect(),
                model: chat.model.unwrap_or_else(|| "gemma2:27b".to_string()),
                timeout,
                attempts,
                retry_delay: Duration::from_millis(chat.retry_delay_ms.unwrap_or(0)),
            },
            gateway: GatewaySettings {
                url: gateway.url,
                api_key: env_secret("FTU_MINER_GATEWAY_KEY").or(gateway.api_key),
                attempts: gateway.attempts.unwrap_or(10).max(1),
                timeout,
            },
            batch_size,
            max_rounds: config.max_rounds.unwrap_or(10),
            clickhouse: ClickHouseSettings {
                url: clickhouse
                    .url
                    .unwrap_or_else(|| "http://localhost:8123".to_string()),
                database: clickhouse.database.unwrap_or_else(|| "default".to_string()),
                user: clickhouse.user.unwrap_or_else(|| "default".to_string()),
                password: env_secret("CLICKHOUSE_PASSWORD").or(clickhouse.password),
            },
            bioportal_api_key: env_secret("BIOPORTAL_API_KEY").or(config.bioportal_api_key),
            models: config.models.unwrap_or_else(default_models),
        })
    }
}

pub fn default_models() -> BTreeMap<String, String> {
    [
        ("qwen", "qwen2.5:72b"),
        ("llama32", "llama3.2:latest"),
        ("gemma", "gemma2:27b"),
        ("llama31", "llama3.1:70b"),
    ]
    .into_iter()
    .map(|(column, model)| (column.to_string(), model.to_string()))
    .collect()
}

pub fn user_config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join("ftu-miner").join(DEFAULT_CONFIG_FILE))
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
