use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application is served from; relative asset paths resolve against it
  pub base_url: String,
  pub cache: CacheConfig,
  pub store: StoreConfig,
  pub notifications: NotificationsConfig,
  pub http: HttpConfig,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000/".to_string(),
      cache: CacheConfig::default(),
      store: StoreConfig::default(),
      notifications: NotificationsConfig::default(),
      http: HttpConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Version tag of the artifact cache; bump it for each deployed asset manifest
  pub version: String,
  /// Assets fetched and stored on install
  pub precache: Vec<String>,
  /// Document served to navigation requests when offline and nothing is cached
  pub offline_fallback: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "leitner-offline-cache-v2".to_string(),
      precache: [
        "./",
        "index.html",
        "style.css",
        "csv-files.json",
        "src/main.js",
        "src/core/leitnerApp.js",
        "src/core/leitnerEngine.js",
        "src/core/historyService.js",
        "src/data/storageService.js",
        "src/data/crud.js",
        "src/ui/uiManager.js",
        "mordor-2340048_1280.png",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      offline_fallback: "index.html".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Database file (default: $XDG_DATA_HOME/leitner-offline/offline.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub default_icon: String,
  pub default_title: String,
  /// Arm an in-process timer next to the durable wake registration
  pub fallback_timer: bool,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      default_icon: "mordor-2340048_1280.png".to_string(),
      default_title: "Leitner Reminder".to_string(),
      fallback_timer: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      user_agent: concat!("leitner-offline/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// EnvFilter directive used when RUST_LOG is unset
  pub filter: Option<String>,
  /// Write a daily-rolling log file into this directory as well as stderr
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./leitner-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/leitner-offline/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("leitner-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("leitner-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.base_url()?;
    if self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    Ok(())
  }

  /// Parsed base URL. A trailing slash is added so relative paths resolve beneath it.
  pub fn base_url(&self) -> Result<Url> {
    let raw = if self.base_url.ends_with('/') {
      self.base_url.clone()
    } else {
      format!("{}/", self.base_url)
    };
    Url::parse(&raw).map_err(|e| eyre!("Invalid base_url '{}': {}", self.base_url, e))
  }

  /// Resolve an asset path against the base URL. Absolute http(s) URLs pass through.
  pub fn resolve_asset(&self, path: &str) -> Result<Url> {
    resolve_against(&self.base_url()?, path)
  }

  /// Database path, honouring `store.path` before the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.store.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("leitner-offline").join("offline.db"))
  }
}

/// Resolve `path` against `base`; absolute http(s) URLs pass through.
pub fn resolve_against(base: &Url, path: &str) -> Result<Url> {
  let lower = path.to_ascii_lowercase();
  if lower.starts_with("http:") || lower.starts_with("https:") {
    return Url::parse(path).map_err(|e| eyre!("Invalid asset URL '{}': {}", path, e));
  }
  base
    .join(path)
    .map_err(|e| eyre!("Failed to resolve asset '{}': {}", path, e))
}
