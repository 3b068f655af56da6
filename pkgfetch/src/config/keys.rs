//! Addressable configuration keys (`section.key`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::{parse_value, ConfigError, ConfigFile};

/// One setting of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    DownloadDirectory,
    DownloadLanguage,
    DownloadAppleSilicon,
    DownloadMaxConcurrent,
    DownloadChunkSize,
    DownloadRetries,
    DownloadRetryDelaySecs,
    NetworkCdn,
    NetworkTimeoutSecs,
    NetworkUserAgent,
    NetworkFatalHttpStatuses,
}

impl ConfigKey {
    /// Every key, in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            Self::DownloadDirectory,
            Self::DownloadLanguage,
            Self::DownloadAppleSilicon,
            Self::DownloadMaxConcurrent,
            Self::DownloadChunkSize,
            Self::DownloadRetries,
            Self::DownloadRetryDelaySecs,
            Self::NetworkCdn,
            Self::NetworkTimeoutSecs,
            Self::NetworkUserAgent,
            Self::NetworkFatalHttpStatuses,
        ]
    }

    pub fn section(&self) -> &'static str {
        match self {
            Self::DownloadDirectory
            | Self::DownloadLanguage
            | Self::DownloadAppleSilicon
            | Self::DownloadMaxConcurrent
            | Self::DownloadChunkSize
            | Self::DownloadRetries
            | Self::DownloadRetryDelaySecs => "download",
            Self::NetworkCdn
            | Self::NetworkTimeoutSecs
            | Self::NetworkUserAgent
            | Self::NetworkFatalHttpStatuses => "network",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            Self::DownloadDirectory => "directory",
            Self::DownloadLanguage => "language",
            Self::DownloadAppleSilicon => "apple_silicon",
            Self::DownloadMaxConcurrent => "max_concurrent",
            Self::DownloadChunkSize => "chunk_size",
            Self::DownloadRetries => "retries",
            Self::DownloadRetryDelaySecs => "retry_delay_secs",
            Self::NetworkCdn => "cdn",
            Self::NetworkTimeoutSecs => "timeout_secs",
            Self::NetworkUserAgent => "user_agent",
            Self::NetworkFatalHttpStatuses => "fatal_http_statuses",
        }
    }

    /// Full name, e.g. `download.language`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value in `config`, formatted for the file.
    pub fn get(&self, config: &ConfigFile) -> String {
        let d = &config.download;
        let n = &config.network;
        match self {
            Self::DownloadDirectory => d.directory.display().to_string(),
            Self::DownloadLanguage => d.language.clone(),
            Self::DownloadAppleSilicon => d.apple_silicon.to_string(),
            Self::DownloadMaxConcurrent => d.max_concurrent.to_string(),
            Self::DownloadChunkSize => d.chunk_size.to_string(),
            Self::DownloadRetries => d.retries.to_string(),
            Self::DownloadRetryDelaySecs => d.retry_delay_secs.to_string(),
            Self::NetworkCdn => n.cdn.clone(),
            Self::NetworkTimeoutSecs => n.timeout_secs.to_string(),
            Self::NetworkUserAgent => n.user_agent.clone(),
            Self::NetworkFatalHttpStatuses => n
                .fatal_http_statuses
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Parse `value` and store it in `config`.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let name = self.name();
        let d = &mut config.download;
        let n = &mut config.network;
        match self {
            Self::DownloadDirectory => d.directory = PathBuf::from(value.trim()),
            Self::DownloadLanguage => d.language = value.trim().to_string(),
            Self::DownloadAppleSilicon => d.apple_silicon = parse_value(&name, value)?,
            Self::DownloadMaxConcurrent => {
                let limit: usize = parse_value(&name, value)?;
                if !(1..=10).contains(&limit) {
                    return Err(ConfigError::InvalidValue {
                        key: name,
                        value: value.to_string(),
                        reason: "must be between 1 and 10".to_string(),
                    });
                }
                d.max_concurrent = limit;
            }
            Self::DownloadChunkSize => {
                let size: u64 = parse_value(&name, value)?;
                if size == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: name,
                        value: value.to_string(),
                        reason: "must be greater than zero".to_string(),
                    });
                }
                d.chunk_size = size;
            }
            Self::DownloadRetries => d.retries = parse_value(&name, value)?,
            Self::DownloadRetryDelaySecs => d.retry_delay_secs = parse_value(&name, value)?,
            Self::NetworkCdn => n.cdn = value.trim().to_string(),
            Self::NetworkTimeoutSecs => n.timeout_secs = parse_value(&name, value)?,
            Self::NetworkUserAgent => n.user_agent = value.trim().to_string(),
            Self::NetworkFatalHttpStatuses => {
                let statuses = value
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| parse_value::<u16>(&name, s))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(bad) = statuses.iter().find(|s| !(400..=599).contains(*s)) {
                    return Err(ConfigError::InvalidValue {
                        key: name,
                        value: value.to_string(),
                        reason: format!("{} is not an HTTP error status", bad),
                    });
                }
                n.fatal_http_statuses = statuses;
            }
        }
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_names() {
        assert_eq!("download.language".parse::<ConfigKey>().unwrap(), ConfigKey::DownloadLanguage);
        assert_eq!("NETWORK.CDN".parse::<ConfigKey>().unwrap(), ConfigKey::NetworkCdn);
        assert!(matches!("download.nope".parse::<ConfigKey>(), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn test_names_unique() {
        let mut names: Vec<String> = ConfigKey::all().iter().map(ConfigKey::name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ConfigKey::all().len());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = ConfigFile::default();
        ConfigKey::DownloadAppleSilicon.set(&mut config, "true").unwrap();
        ConfigKey::NetworkTimeoutSecs.set(&mut config, " 120 ").unwrap();
        assert!(config.download.apple_silicon);
        assert_eq!(ConfigKey::NetworkTimeoutSecs.get(&config), "120");
    }

    #[test]
    fn test_status_list() {
        let mut config = ConfigFile::default();
        ConfigKey::NetworkFatalHttpStatuses.set(&mut config, "404, 410").unwrap();
        assert_eq!(config.network.fatal_http_statuses, vec![404, 410]);
        assert_eq!(ConfigKey::NetworkFatalHttpStatuses.get(&config), "404, 410");

        ConfigKey::NetworkFatalHttpStatuses.set(&mut config, "").unwrap();
        assert!(config.network.fatal_http_statuses.is_empty());

        assert!(ConfigKey::NetworkFatalHttpStatuses.set(&mut config, "200").is_err());
        assert!(ConfigKey::NetworkFatalHttpStatuses.set(&mut config, "404, nope").is_err());
    }

    #[test]
    fn test_range_checks() {
        let mut config = ConfigFile::default();
        assert!(ConfigKey::DownloadMaxConcurrent.set(&mut config, "11").is_err());
        assert!(ConfigKey::DownloadMaxConcurrent.set(&mut config, "0").is_err());
        assert!(ConfigKey::DownloadChunkSize.set(&mut config, "0").is_err());
        assert!(ConfigKey::DownloadAppleSilicon.set(&mut config, "maybe").is_err());
        assert_eq!(config, ConfigFile::default());
    }
}
