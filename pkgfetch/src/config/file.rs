//! INI configuration file.
//!
//! The file lives at `<config dir>/pkgfetch/config.ini`:
//!
//! ```ini
//! [download]
//! directory = /Users/me/Downloads/Adobe
//! language = en_US
//! apple_silicon = true
//! max_concurrent = 3
//! chunk_size = 2097152
//! retries = 3
//! retry_delay_secs = 3
//!
//! [network]
//! cdn = https://ccmdls.adobe.com
//! timeout_secs = 300
//! user_agent = Creative Cloud
//! fatal_http_statuses = 400, 401, 403, 404, 410
//! ```
//!
//! Missing keys keep their defaults. A value that does not parse is an
//! error naming the offending key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::{
    default_data_dir, default_download_dir, EngineConfig, DEFAULT_CDN_BASE, DEFAULT_LANGUAGE,
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_USER_AGENT,
};
use crate::download::{DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT_SECS};
use crate::retry::{
    RetryPolicy, DEFAULT_FATAL_HTTP_STATUSES, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS,
};

/// Errors reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Path of the user's configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pkgfetch")
        .join("config.ini")
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSection {
    pub directory: PathBuf,
    pub language: String,
    pub apple_silicon: bool,
    pub max_concurrent: usize,
    pub chunk_size: u64,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            directory: default_download_dir(),
            language: DEFAULT_LANGUAGE.to_string(),
            apple_silicon: cfg!(target_arch = "aarch64"),
            max_concurrent: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

/// `[network]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSection {
    pub cdn: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// HTTP statuses that fail a task without retrying.
    pub fatal_http_statuses: Vec<u16>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            cdn: DEFAULT_CDN_BASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fatal_http_statuses: DEFAULT_FATAL_HTTP_STATUSES.to_vec(),
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub download: DownloadSection,
    pub network: NetworkSection,
}

/// Parse `value` of `key`, reporting the key on failure.
pub(super) fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl ConfigFile {
    /// Load the user's configuration file. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load a configuration file from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in super::ConfigKey::all() {
            if let Some(value) = ini
                .section(Some(key.section()))
                .and_then(|s| s.get(key.key_name()))
            {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Save to the user's configuration file.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut ini = Ini::new();
        for key in super::ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini.write_to_file(path).map_err(write_err)
    }

    /// Engine settings from this file, with state under the default data
    /// directory.
    pub fn to_engine_config(&self) -> EngineConfig {
        self.to_engine_config_in(default_data_dir())
    }

    /// Engine settings from this file, with state under `data_dir`.
    pub fn to_engine_config_in(&self, data_dir: impl Into<PathBuf>) -> EngineConfig {
        EngineConfig::new(data_dir)
            .with_download_dir(self.download.directory.clone())
            .with_language(self.download.language.clone())
            .with_apple_silicon(self.download.apple_silicon)
            .with_max_concurrent_downloads(self.download.max_concurrent)
            .with_chunk_size(self.download.chunk_size)
            .with_retry_policy(RetryPolicy::linear(
                self.download.retries,
                Duration::from_secs(self.download.retry_delay_secs),
            ))
            .with_cdn_base(self.network.cdn.clone())
            .with_request_timeout(Duration::from_secs(self.network.timeout_secs))
            .with_header("User-Agent", self.network.user_agent.clone())
            .with_fatal_http_statuses(self.network.fatal_http_statuses.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("config.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[download]\nlanguage = de_DE\nmax_concurrent = 5\n").unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.download.language, "de_DE");
        assert_eq!(config.download.max_concurrent, 5);
        assert_eq!(config.network, NetworkSection::default());
    }

    #[test]
    fn test_malformed_value_names_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[network]\ntimeout_secs = soon\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "network.timeout_secs");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");
        let mut config = ConfigFile::default();
        config.download.directory = PathBuf::from("/tmp/adobe");
        config.download.apple_silicon = true;
        config.network.cdn = "https://mirror.example.com".into();
        config.network.fatal_http_statuses = vec![404, 410];
        config.save_to(&path).unwrap();

        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_to_engine_config() {
        let mut config = ConfigFile::default();
        config.download.max_concurrent = 99;
        config.download.retries = 5;
        config.network.user_agent = "pkgfetch-test".into();
        config.network.fatal_http_statuses = vec![404];

        let engine = config.to_engine_config_in("/data");
        assert_eq!(engine.data_dir, PathBuf::from("/data"));
        assert_eq!(engine.max_concurrent_downloads, 10);
        assert_eq!(engine.retry_policy.max_retries(), 5);
        assert_eq!(engine.fatal_http_statuses, vec![404]);
        assert_eq!(
            engine.headers,
            vec![("User-Agent".to_string(), "pkgfetch-test".to_string())]
        );
    }
}
