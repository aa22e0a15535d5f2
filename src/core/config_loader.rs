//! # Config Loader
//!
//! Resolves the bootstrap inputs (override module path, extraction directory) from
//! the environment and an optional `compat.toml`. Environment values win over the
//! file; programmatic overrides on [`crate::Bootstrap`] win over both.

use crate::constants::{CONFIG_PATH_ENV, EXTRACT_DIR_ENV, LIBRARY_PATH_ENV};
use crate::core::paths::{self, PathError};
use serde::Deserialize;
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Path(#[from] PathError),
}

/// On-disk shape of `compat.toml`. Both keys accept `~` and `$VAR`.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompatConfigFile {
    pub library_path: Option<String>,
    pub extract_dir: Option<String>,
}

/// Effective bootstrap configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompatConfig {
    /// Prebuilt module to load in place. Disables extraction entirely.
    pub library_path: Option<PathBuf>,
    /// Persistent extraction directory; `None` means a fresh temporary directory.
    pub extract_dir: Option<PathBuf>,
}

impl CompatConfig {
    /// Applies environment values on top of `self`. Empty values are ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(path) = non_empty(LIBRARY_PATH_ENV) {
            self.library_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = non_empty(EXTRACT_DIR_ENV) {
            self.extract_dir = Some(PathBuf::from(dir));
        }
        self
    }
}

/// Parses the contents of a `compat.toml`.
pub fn parse_config(content: &str, origin: &Path) -> Result<CompatConfig, ConfigError> {
    let file: CompatConfigFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: origin.to_path_buf(),
        source: e,
    })?;

    let expand = |value: Option<String>| -> Result<Option<PathBuf>, ConfigError> {
        value
            .map(|v| paths::expand_path(&v).map_err(ConfigError::from))
            .transpose()
    };

    Ok(CompatConfig {
        library_path: expand(file.library_path)?,
        extract_dir: expand(file.extract_dir)?,
    })
}

/// Loads a config file. A file that does not exist yields the defaults.
pub fn load_config_file(path: &Path) -> Result<CompatConfig, ConfigError> {
    if !path.exists() {
        log::debug!("No config file at '{}', using defaults.", path.display());
        return Ok(CompatConfig::default());
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_config(&content, path)
}

/// Loads the effective configuration for this process: `$COMPAT_CONFIG` (or the default
/// config file) overlaid with the environment.
pub fn load_compat_config() -> Result<CompatConfig, ConfigError> {
    let file_path = match std::env::var_os(CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
        Some(explicit) => PathBuf::from(explicit),
        None => paths::get_config_file_path()?,
    };
    let from_file = load_config_file(&file_path)?;
    Ok(from_file.with_env_overrides(|key| std::env::var_os(key)))
}

/// Environment-only configuration, used when the config file is unusable.
pub fn env_only_config() -> CompatConfig {
    CompatConfig::default().with_env_overrides(|key| std::env::var_os(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_config_expands_paths() {
        let config = parse_config(
            "library_path = \"/opt/compat/libcompat-amd64.so\"\nextract_dir = \"~/compat-cache\"\n",
            Path::new("compat.toml"),
        )
        .unwrap();

        assert_eq!(
            config.library_path,
            Some(PathBuf::from("/opt/compat/libcompat-amd64.so"))
        );
        let extract_dir = config.extract_dir.unwrap();
        assert!(extract_dir.ends_with("compat-cache"));
        assert!(!extract_dir.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let result = parse_config("library = \"x\"\n", Path::new("compat.toml"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_file(&dir.path().join("compat.toml")).unwrap();
        assert_eq!(config, CompatConfig::default());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, OsString> = HashMap::from([
            (LIBRARY_PATH_ENV, OsString::from("/env/libcompat-amd64.so")),
            (EXTRACT_DIR_ENV, OsString::new()),
        ]);
        let base = CompatConfig {
            library_path: Some(PathBuf::from("/file/libcompat-amd64.so")),
            extract_dir: Some(PathBuf::from("/file/extract")),
        };

        let merged = base.with_env_overrides(|key| env.get(key).cloned());

        assert_eq!(
            merged.library_path,
            Some(PathBuf::from("/env/libcompat-amd64.so"))
        );
        // An empty value does not clear the file setting.
        assert_eq!(merged.extract_dir, Some(PathBuf::from("/file/extract")));
    }
}
