// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Shared configuration file name, one section per binary.
pub const CONFIG_FILE_NAME: &str = "mflip-rs.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Invalid configuration in {0}: {1}")]
    Invalid(PathBuf, String),
}

/// Default search paths for `mflip-rs.toml`
/// (current directory, then the user config dir, then /etc).
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mflip-rs").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/mflip-rs").join(CONFIG_FILE_NAME));
    paths
}

/// Extract and deserialize a named section from TOML text.
///
/// `Ok(None)` when the section is absent.
fn parse_section<T: DeserializeOwned>(
    content: &str,
    key: &str,
    origin: &Path,
) -> Result<Option<T>, ConfigError> {
    let table: toml::Table = toml::from_str(content)
        .map_err(|e| ConfigError::ParseError(origin.to_path_buf(), e.to_string()))?;

    let Some(section) = table.get(key) else {
        return Ok(None);
    };

    // Round-trip the section so serde defaults apply to missing keys.
    let section_toml = toml::to_string(section)
        .map_err(|e| ConfigError::ParseError(origin.to_path_buf(), e.to_string()))?;
    toml::from_str::<T>(&section_toml)
        .map(Some)
        .map_err(|e| ConfigError::ParseError(origin.to_path_buf(), e.to_string()))
}

fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(&content, key, path)
}

/// A binary's section of `mflip-rs.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key, e.g. `"mflip-server"`.
    fn section_key() -> &'static str;

    /// Semantic checks run after parsing. Defaults to accepting anything.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Parse the section from TOML text (used by `--print-config` checks and
    /// tests).
    fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let origin = Path::new("<inline>");
        let cfg = parse_section::<Self>(content, Self::section_key(), origin)?
            .unwrap_or_default();
        cfg.validate()
            .map_err(|e| ConfigError::Invalid(origin.to_path_buf(), e))?;
        Ok(cfg)
    }

    /// Load the section from a specific file. A missing section is an error.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let cfg = load_section_from_file::<Self>(path, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })?;
        cfg.validate()
            .map_err(|e| ConfigError::Invalid(path.to_path_buf(), e))?;
        Ok(cfg)
    }

    /// Load the first default-path file that carries the section.
    ///
    /// Returns `(Default::default(), None)` when none is found.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if !path.exists() {
                continue;
            }
            if let Some(cfg) = load_section_from_file::<Self>(&path, Self::section_key())? {
                cfg.validate()
                    .map_err(|e| ConfigError::Invalid(path.clone(), e))?;
                return Ok((cfg, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Explicit path if given, otherwise the default search.
    fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match explicit {
            Some(path) => Ok((Self::load_from_file(path)?, Some(path.to_path_buf()))),
            None => Self::load_from_default_paths(),
        }
    }
}
