//! TOML configuration for hoardput.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
///
/// Default location: `$HOME/.hoard/config.toml`. Every section has
/// workable defaults so a missing file still yields a usable config for
/// local experimentation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Remote blob server and credentials.
    pub server: ServerSection,
    /// Signing keys.
    pub keys: KeysSection,
    /// Upload tuning.
    pub upload: UploadSection,
    /// `serve` mode settings.
    pub serve: ServeSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[server]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Base URL of the blob server.
    pub url: String,
    /// Basic-auth credentials.
    pub username: String,
    pub password: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:3179".to_string(),
            username: "hoard".to_string(),
            password: String::new(),
        }
    }
}

/// `[keys]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KeysSection {
    /// Path to the secret keyring file.
    pub keyring: Option<PathBuf>,
    /// Ref of the armored public-key blob (`camliSigner`).
    pub signer: Option<String>,
    /// Environment variable holding the keyring passphrase. An empty
    /// passphrase is used when unset.
    pub passphrase_env: Option<String>,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            keyring: None,
            signer: None,
            passphrase_env: Some("HOARD_PASSPHRASE".to_string()),
        }
    }
}

/// `[upload]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    /// Simultaneous file uploads.
    pub file_concurrency: Option<usize>,
    /// Outstanding child tasks per directory.
    pub dir_fanout: Option<usize>,
    /// Use content-defined chunking by default.
    pub rolling: bool,
    /// Directory for the stat/have cache database. Caching is disabled
    /// when set to the empty string.
    pub cache_dir: Option<PathBuf>,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            file_concurrency: None,
            dir_fanout: None,
            rolling: false,
            cache_dir: None,
        }
    }
}

/// `[serve]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServeSection {
    /// Listen address for `hoardput serve`.
    pub listen: String,
    /// Directory for stored blobs and the index.
    pub data_dir: Option<PathBuf>,
    /// Maintain the receive-time index.
    pub index: bool,
    /// Externally visible base URL advertised in stat responses.
    pub base_url: Option<String>,
}

impl Default for ServeSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3179".to_string(),
            data_dir: None,
            index: true,
            base_url: None,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn hoard_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hoard")
}

impl CliConfig {
    /// Default config location: `$HOME/.hoard/config.toml`.
    pub fn default_path() -> PathBuf {
        hoard_home().join("config.toml")
    }

    /// Load config from a TOML file; a missing default file yields the
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("reading {}: {e}", path.display())),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective keyring path.
    pub fn keyring_path(&self) -> PathBuf {
        self.keys
            .keyring
            .clone()
            .unwrap_or_else(|| hoard_home().join("secring.json"))
    }

    /// Effective cache directory, `None` when caching is disabled.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        match &self.upload.cache_dir {
            Some(p) if p.as_os_str().is_empty() => None,
            Some(p) => Some(p.clone()),
            None => Some(hoard_home().join("cache")),
        }
    }

    /// Effective data directory for `serve`.
    pub fn data_dir(&self) -> PathBuf {
        self.serve
            .data_dir
            .clone()
            .unwrap_or_else(|| hoard_home().join("blobs"))
    }
}
