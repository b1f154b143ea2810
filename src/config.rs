//! User configuration.
//!
//! Loaded once at startup from a TOML file and passed explicitly into the
//! scan, merge and report calls:
//!
//! ```toml
//! extensions = [".jpg", ".JPG", ".ARW", ".mp4", ".MP4"]
//! db_path = "/home/me/.local/share/photo-inventory/photos.db"
//! remote_timeout_secs = 600
//! connect_timeout_secs = 10
//! ```
//!
//! When the file does not exist it is created with the defaults above.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::ExtensionFilter;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "PHOTOINV_CONFIG";

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine a config directory for this platform")]
    NoConfigDir,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write default config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config {0} lists no extensions; nothing would ever be scanned")]
    NoExtensions(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File suffixes that are in scope, matched case-sensitively.
    pub extensions: Vec<String>,
    /// Store location; the platform data dir is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Overall limit for one remote listing, in seconds.
    pub remote_timeout_secs: u64,
    /// ssh `ConnectTimeout`, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: [".jpg", ".JPG", ".ARW", ".mp4", ".MP4"]
                .into_iter()
                .map(String::from)
                .collect(),
            db_path: None,
            remote_timeout_secs: 600,
            connect_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Resolve the config path: explicit override, then `PHOTOINV_CONFIG`,
    /// then `<config dir>/photo-inventory/config.toml`.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = dotenvy::var(CONFIG_ENV)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }
        project_dirs()
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load the config at `path`, writing the defaults there first if the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "created default config");
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.extensions.iter().all(String::is_empty) {
            return Err(ConfigError::NoExtensions(path.to_path_buf()));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(write_err)
    }

    pub fn filter(&self) -> ExtensionFilter {
        ExtensionFilter::new(self.extensions.iter().cloned())
    }

    /// Store location: CLI override, then config, then the platform data dir.
    pub fn db_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.db_path.clone())
            .unwrap_or_else(default_db_path)
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "photo-inventory", "photo-inventory")
}

pub fn default_data_dir() -> PathBuf {
    project_dirs().map_or_else(|| PathBuf::from("."), |dirs| dirs.data_dir().to_path_buf())
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join("photos.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        // Second load reads what was written.
        let again = Config::load_or_create(&path).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "extensions = [\".heic\"]\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.extensions, vec![".heic".to_string()]);
        assert_eq!(config.remote_timeout_secs, 600);
        assert!(config.filter().allows("IMG_0001.heic"));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "extensions = ").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn empty_extension_list_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "extensions = []\n").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::NoExtensions(_))
        ));
    }

    #[test]
    fn db_path_precedence() {
        let mut config = Config::default();
        assert_eq!(config.db_path(None), default_db_path());

        config.db_path = Some(PathBuf::from("/from/config.db"));
        assert_eq!(config.db_path(None), PathBuf::from("/from/config.db"));
        assert_eq!(
            config.db_path(Some(Path::new("/from/cli.db"))),
            PathBuf::from("/from/cli.db")
        );
    }

    #[test]
    fn explicit_path_wins() {
        let explicit = Path::new("/tmp/explicit.toml");
        assert_eq!(
            Config::resolve_path(Some(explicit)).unwrap(),
            explicit.to_path_buf()
        );
    }
}
