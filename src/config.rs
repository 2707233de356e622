use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::loader::DEFAULT_BATCH_SIZE;
use crate::semantic::{DEFAULT_MODEL, DEFAULT_RERANKER};

const ENV_PREFIX: &str = "ISSUE_INDEX_";

const CONFIG_FILE: &str = "config.yaml";
const INDEX_FILE: &str = "issues.bin";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8001;
const DEFAULT_DATA_PATH: &str = "./data/index";
const DEFAULT_SOURCE_DIR: &str = "./data/issues";
/// Deadline for a single embedding or rerank call
const DEFAULT_CAPABILITY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_yml::Error,
    },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Holds issues.bin, config.yaml and downloaded models
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// CSV file or directory used for startup loads and reindexing
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_reranker_model")]
    pub reranker_model: String,

    /// Issues embedded per model call during bulk loads
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,

    /// Load `source_dir` at startup when the collection is empty
    #[serde(default = "default_load_on_startup")]
    pub load_on_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_path: default_data_path(),
            source_dir: default_source_dir(),
            embedding_model: default_embedding_model(),
            reranker_model: default_reranker_model(),
            batch_size: default_batch_size(),
            capability_timeout_secs: default_capability_timeout_secs(),
            load_on_startup: default_load_on_startup(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_data_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_PATH)
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SOURCE_DIR)
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_reranker_model() -> String {
    DEFAULT_RERANKER.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_capability_timeout_secs() -> u64 {
    DEFAULT_CAPABILITY_TIMEOUT_SECS
}

fn default_load_on_startup() -> bool {
    true
}

impl Config {
    /// Defaults, then `config.yaml` in the data path, then `ISSUE_INDEX_*`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    pub fn load_from<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        let data_path = var("DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_path);

        let mut config = Self::read_file(&data_path.join(CONFIG_FILE))?.unwrap_or_default();
        config.data_path = data_path;

        if let Some(host) = var("HOST") {
            config.host = host;
        }
        if let Some(port) = var("PORT") {
            config.port = parse_var("port", &port)?;
        }
        if let Some(source_dir) = var("SOURCE_DIR") {
            config.source_dir = PathBuf::from(source_dir);
        }
        if let Some(model) = var("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Some(model) = var("RERANKER_MODEL") {
            config.reranker_model = model;
        }
        if let Some(batch_size) = var("BATCH_SIZE") {
            config.batch_size = parse_var("batch_size", &batch_size)?;
        }
        if let Some(timeout) = var("CAPABILITY_TIMEOUT_SECS") {
            config.capability_timeout_secs = parse_var("capability_timeout_secs", &timeout)?;
        }
        if let Some(load) = var("LOAD_ON_STARTUP") {
            config.load_on_startup = parse_bool("load_on_startup", &load)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let config_str = match std::fs::read_to_string(path) {
            Ok(config_str) => config_str,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_yml::from_str(&config_str)
            .map(Some)
            .map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.host.trim().is_empty() {
            return invalid("host", "must not be empty");
        }
        if self.port == 0 {
            return invalid("port", "must be greater than 0");
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "must be greater than 0");
        }
        if self.capability_timeout_secs == 0 {
            return invalid("capability_timeout_secs", "must be greater than 0");
        }
        if self.embedding_model.trim().is_empty() {
            return invalid("embedding_model", "must not be empty");
        }
        if self.reranker_model.trim().is_empty() {
            return invalid("reranker_model", "must not be empty");
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn index_file(&self) -> PathBuf {
        self.data_path.join(INDEX_FILE)
    }
}

fn parse_var<T>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigError::Invalid {
            field,
            reason: format!("{value:?}: {err}"),
        })
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            field,
            reason: format!("{value:?} is not a boolean"),
        }),
    }
}
