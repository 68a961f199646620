use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Server origin, e.g. "https://api.warung.example"
  pub base_url: String,
  /// API version path segment, e.g. "v1"
  #[serde(default = "default_version")]
  pub version: String,
  /// Per-request timeout ceiling in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Fixed wait before resubmitting a rate-limited request, in milliseconds
  #[serde(default = "default_rate_limit_retry_ms")]
  pub rate_limit_retry_ms: u64,
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_rate_limit_retry_ms() -> u64 {
  1000
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn rate_limit_retry(&self) -> Duration {
    Duration::from_millis(self.rate_limit_retry_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./warung.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/warung/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/warung/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("warung.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("warung").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
