// src/config.rs

//! DPMS configuration
//!
//! All paths the engine touches come from this struct. The composition root
//! (the CLI, or a test) builds one and hands it to `InstallEngine::new`;
//! nothing below reads the environment on its own.

use crate::archive::XzBackend;
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Name of the per-user state directory under `$HOME`
const STATE_DIR_NAME: &str = ".dpms";

/// Registry filename inside the install root
const REGISTRY_FILE_NAME: &str = "installed_packages.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Every installed package gets `<install_root>/<name>/`
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// JSON array of installed package names
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Local archives that can be installed by name
    #[serde(default = "default_package_dir")]
    pub package_dir: PathBuf,

    /// Where remote archives are downloaded before extraction
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Base URL for `<repository_url>/<name>.tar.xz` downloads
    #[serde(default = "default_repository_url")]
    pub repository_url: String,

    /// Directory listing endpoint (GitHub contents API shape)
    ///
    /// Stored as an empty string when unset, so `None` survives a save.
    #[serde(
        default = "default_repository_api_url",
        serialize_with = "serialize_api_url",
        deserialize_with = "deserialize_api_url"
    )]
    pub repository_api_url: Option<String>,

    /// HTTP timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Attempts per download on connection failures and timeouts
    #[serde(default = "default_download_retries")]
    pub download_retries: u32,

    /// Implementation used for tar.xz creation
    #[serde(default)]
    pub xz_backend: XzBackend,
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn state_dir() -> PathBuf {
    home_dir().join(STATE_DIR_NAME)
}

fn default_install_root() -> PathBuf {
    home_dir().join("system_root")
}

fn default_registry_path() -> PathBuf {
    default_install_root().join(REGISTRY_FILE_NAME)
}

fn default_package_dir() -> PathBuf {
    state_dir().join("packages")
}

fn default_download_dir() -> PathBuf {
    state_dir().join("downloads")
}

fn default_repository_url() -> String {
    "https://raw.githubusercontent.com/discoveryos/Dpms--pkg/main".to_string()
}

fn default_repository_api_url() -> Option<String> {
    Some("https://api.github.com/repos/discoveryos/Dpms--pkg/contents".to_string())
}

fn serialize_api_url<S: Serializer>(
    url: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(url.as_deref().unwrap_or(""))
}

fn deserialize_api_url<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let url = String::deserialize(deserializer)?;
    Ok(Some(url).filter(|u| !u.trim().is_empty()))
}

fn default_http_timeout() -> u64 {
    30
}

fn default_download_retries() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            registry_path: default_registry_path(),
            package_dir: default_package_dir(),
            download_dir: default_download_dir(),
            repository_url: default_repository_url(),
            repository_api_url: default_repository_api_url(),
            http_timeout_secs: default_http_timeout(),
            download_retries: default_download_retries(),
            xz_backend: XzBackend::default(),
        }
    }
}

impl Config {
    /// Lay out every path under a single directory
    ///
    /// Used for sandboxes and tests: `<root>/system_root`, `<root>/packages`,
    /// `<root>/downloads`. Repository settings keep their defaults.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let install_root = root.join("system_root");
        Self {
            registry_path: install_root.join(REGISTRY_FILE_NAME),
            install_root,
            package_dir: root.join("packages"),
            download_dir: root.join("downloads"),
            ..Self::default()
        }
    }

    /// Move the install root, keeping the registry inside it
    pub fn set_install_root(&mut self, install_root: impl Into<PathBuf>) {
        self.install_root = install_root.into();
        self.registry_path = self.install_root.join(REGISTRY_FILE_NAME);
    }

    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(STATE_DIR_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| Error::io("read config", path, e))?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            Error::CoreError(format!("Failed to parse config {}: {}", path.display(), e))
        })?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
        }

        let content = self
            .to_toml()
            .map_err(|e| Error::CoreError(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content).map_err(|e| Error::io("write config", path, e))?;
        Ok(())
    }

    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Create the directories the engine writes into
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.install_root, &self.package_dir, &self.download_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::io("create directory", dir, e))?;
        }
        Ok(())
    }

    /// Remove the download cache and the config file
    ///
    /// Installed packages and the registry are left alone.
    pub fn reset(&self, config_path: Option<&Path>) -> Result<bool> {
        let mut removed = false;

        if self.download_dir.exists() {
            fs::remove_dir_all(&self.download_dir)
                .map_err(|e| Error::io("remove", &self.download_dir, e))?;
            info!("Removed download cache {}", self.download_dir.display());
            removed = true;
        }

        if let Some(path) = config_path.filter(|p| p.exists()) {
            fs::remove_file(path).map_err(|e| Error::io("remove", path, e))?;
            info!("Removed config file {}", path.display());
            removed = true;
        }

        Ok(removed)
    }
}
