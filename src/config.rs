//! Service configuration loaded from `batchpress.toml`.
//!
//! Every field has a default, so a missing file is fine. The environment
//! variable `BATCHPRESS_CALLBACK_URL` takes precedence over the file for the
//! default callback address.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::pool::DEFAULT_QUALITY;

pub const DEFAULT_CONFIG_FILE: &str = "batchpress.toml";
pub const CALLBACK_ENV: &str = "BATCHPRESS_CALLBACK_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Root directory for blobs and records.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Address the HTTP service binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Callback used when a submission does not name one.
    #[serde(default)]
    pub default_callback_url: Option<String>,

    /// Prefix for output references in artifacts and item records.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Concurrent transforms in the worker pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Cap on concurrent downloads within one job; each job gets its own.
    /// Unbounded when absent.
    #[serde(default)]
    pub fetch_concurrency: Option<usize>,

    /// Re-encode quality, 0-100.
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Timeout for source downloads and callback delivery.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            listen_addr: default_listen_addr(),
            default_callback_url: None,
            public_base_url: None,
            pool_size: default_pool_size(),
            fetch_concurrency: None,
            quality: default_quality(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl BatchConfig {
    /// Loads `path`, or `batchpress.toml` in the working directory.
    /// Falls back to defaults when the file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<BatchConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(CALLBACK_ENV)
            && !url.is_empty()
        {
            config.default_callback_url = Some(url);
        }

        Ok(config)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.storage_dir.join("blobs")
    }

    pub fn record_dir(&self) -> PathBuf {
        self.storage_dir.join("records")
    }
}
