//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the data folder
pub const ROOT_FOLDER_ENV: &str = "TRIDENT_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "trident.db";

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TridentConfig {
    /// Data folder holding the database
    pub root_folder: Option<PathBuf>,

    /// Import driver options
    #[serde(default)]
    pub import: ImportConfig,
}

/// `[import]` table of `config.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Wallet used as sponsor when a referrer cannot be resolved
    pub fallback_sponsor: Option<String>,

    /// Referrer values that mark a record as a new tree root
    pub root_markers: Vec<String>,

    /// Caller-level placement attempts; overrides the `max_placement_attempts` setting
    pub max_placement_attempts: Option<u32>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            fallback_sponsor: None,
            root_markers: vec![String::new(), "root".to_string()],
            max_placement_attempts: None,
        }
    }
}

impl TridentConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }
}

/// Load configuration.
///
/// An explicit path must exist and parse. Without one, the platform config
/// file is used when present, otherwise defaults apply.
pub fn load_config(explicit: Option<&Path>) -> Result<TridentConfig> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        return TridentConfig::from_toml_str(&content);
    }

    match find_config_file() {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading config file");
            let content = std::fs::read_to_string(&path)?;
            TridentConfig::from_toml_str(&content)
        }
        None => Ok(TridentConfig::default()),
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TridentConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    get_default_root_folder()
}

/// Create the root folder if missing and return the database path inside it
pub fn prepare_root_folder(root_folder: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root_folder)?;
    Ok(root_folder.join(DATABASE_FILE))
}

/// Platform config file, if one exists
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("trident").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/trident/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/trident (or /var/lib/trident for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("trident"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/trident"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("trident"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/trident"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("trident"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\trident"))
    } else {
        PathBuf::from("./trident_data")
    }
}
