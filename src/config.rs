use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_BLOCK_SIZE: usize = 4096;
const MAX_BLOCK_SIZE: usize = 1024 * 1024;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub log_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout; unset means transfers may take as long as they need.
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
    /// Read size for upload bodies.
    pub block_size: usize,
    pub use_system_proxy: bool,
    /// Extra PEM trust anchors for HTTPS slots, on top of the built-in roots.
    /// Relative paths are taken from the config file's directory.
    pub ca_certs: Vec<PathBuf>,
    pub download_dir: Option<PathBuf>,
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            timeout_secs: None,
            user_agent: format!("http-upload/{}", env!("CARGO_PKG_VERSION")),
            block_size: DEFAULT_BLOCK_SIZE,
            use_system_proxy: false,
            ca_certs: Vec::new(),
            download_dir: None,
            config_path: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut cfg: Config = serde_json::from_str(&data).context("parse config json")?;
        cfg.config_path = Some(path.to_path_buf());
        if let Some(base) = path.parent() {
            for cert in &mut cfg.ca_certs {
                if cert.is_relative() {
                    *cert = base.join(&*cert);
                }
            }
        }
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    fn normalize(&mut self) {
        self.user_agent = self.user_agent.trim().to_string();
        if self.user_agent.is_empty() {
            self.user_agent = Config::default().user_agent;
        }
        if let Some(dir) = &self.download_dir {
            if dir.is_relative() {
                if let Ok(abs) = std::fs::canonicalize(dir) {
                    self.download_dir = Some(abs);
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            anyhow::bail!(
                "block_size must be between 1 and {MAX_BLOCK_SIZE}, got {}",
                self.block_size
            );
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be positive");
        }
        if self.timeout_secs == Some(0) {
            anyhow::bail!("timeout_secs must be positive when set");
        }
        Ok(())
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(default_log_file_path)
    }
}

pub fn default_log_file_path() -> PathBuf {
    std::env::temp_dir()
        .join("http-upload")
        .join("http-upload.log")
}
