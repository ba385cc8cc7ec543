use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level configuration for embedding hopper in a host process.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueSettings {
    #[serde(default)]
    pub store: StoreTemplate,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Store location template shared by every connection.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreTemplate {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// May contain a "%queue%" placeholder that will be replaced with the
    /// connection name
    #[serde(default = "default_path")]
    pub path: String,
    /// How often slatedb flushes; tests use a small value to keep writes fast
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
}

fn default_backend() -> Backend {
    Backend::Fs
}

fn default_path() -> String {
    "/tmp/hopper/%queue%".to_string()
}

impl Default for StoreTemplate {
    fn default() -> Self {
        StoreTemplate {
            backend: default_backend(),
            path: default_path(),
            flush_interval_ms: None,
        }
    }
}

/// Fully resolved store location for one connection.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub name: String,
    pub backend: Backend,
    pub path: String,
    pub flush_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Fs,
    Memory,
    Url,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            store: StoreTemplate::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl QueueSettings {
    /// Load settings from a TOML file, or fall back to defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }

    /// Expand the store template for one connection name.
    pub fn store_config(&self, queue: &str) -> StoreConfig {
        StoreConfig {
            name: queue.to_string(),
            backend: self.store.backend.clone(),
            path: self.store.path.replace("%queue%", queue),
            flush_interval_ms: self.store.flush_interval_ms,
        }
    }
}
