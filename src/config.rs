//! Configuration loaded from a TOML file.
//!
//! The file lives in the OS config directory, e.g.
//! `~/.config/spotify-demux/config.toml` on Linux:
//!
//! ```toml
//! username = "someone"
//! preferred_bitrate = "high"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const APP_DIR: &str = "spotify-demux";
const CONFIG_FILE: &str = "config.toml";

/// Preferred streaming bitrate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bitrate {
    /// 96 kbps
    Low,
    /// 160 kbps
    Medium,
    /// 320 kbps
    #[default]
    High,
}

impl Bitrate {
    pub fn kbps(self) -> u32 {
        match self {
            Bitrate::Low => 96,
            Bitrate::Medium => 160,
            Bitrate::High => 320,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account name; empty means "ask the provider or the user"
    pub username: String,

    /// Password used together with `username`
    pub password: Option<String>,

    pub preferred_bitrate: Bitrate,

    /// Provider cache location (audio files, remembered user)
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Username/password pair when both are configured
    pub fn password_login(&self) -> Option<(String, String)> {
        match &self.password {
            Some(password) if !self.username.is_empty() && !password.is_empty() => {
                Some((self.username.clone(), password.clone()))
            }
            _ => None,
        }
    }

    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join(APP_DIR)))
    }
}

/// Full path of the config file
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}
