//! Configuration management CLI commands.
//!
//! `config get`, `config set`, `config list` and `config path` view and
//! change the INI settings file without opening an editor.

use clap::Subcommand;
use pkgfetch::config::{config_file_path, ConfigFile, ConfigKey};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key in format section.key (e.g., download.language)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key in format section.key (e.g., download.language)
        key: String,

        /// Value to set
        value: String,
    },

    /// List all configuration settings
    List,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => run_get(&key),
        ConfigCommands::Set { key, value } => run_set(&key, &value),
        ConfigCommands::List => run_list(),
        ConfigCommands::Path => run_path(),
    }
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'pkgfetch config list' to see available keys.",
            key
        ))
    })
}

/// Get a configuration value.
fn run_get(key: &str) -> Result<(), CliError> {
    let config_key = parse_key(key)?;

    let config = ConfigFile::load()?;
    println!("{}", display_value(&config_key.get(&config)));
    Ok(())
}

/// Set a configuration value.
fn run_set(key: &str, value: &str) -> Result<(), CliError> {
    let config_key = parse_key(key)?;

    let mut config = ConfigFile::load()?;
    config_key.set(&mut config, value)?;
    config.save()?;
    println!("{} = {}", config_key.name(), config_key.get(&config));
    Ok(())
}

/// List all settings, marking the ones that differ from the defaults.
fn run_list() -> Result<(), CliError> {
    let path = config_file_path();
    let config = ConfigFile::load()?;
    let defaults = ConfigFile::default();

    if path.exists() {
        println!("# {}", path.display());
    } else {
        println!("# {} (not created yet, showing defaults)", path.display());
    }

    let mut current_section = "";
    for key in ConfigKey::all() {
        if key.section() != current_section {
            current_section = key.section();
            println!();
            println!("[{}]", current_section);
        }
        let value = key.get(&config);
        let marker = if value != key.get(&defaults) { " *" } else { "" };
        println!("  {:<16} = {}{}", key.key_name(), display_value(&value), marker);
    }

    Ok(())
}

fn display_value(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}

/// Show the configuration file path.
fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(""), "(not set)");
        assert_eq!(display_value("en_US"), "en_US");
    }

    #[test]
    fn test_parse_key_reports_unknown() {
        assert_eq!(parse_key("network.cdn").unwrap(), ConfigKey::NetworkCdn);
        match parse_key("network.proxy") {
            Err(CliError::Config(message)) => assert!(message.contains("network.proxy")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
