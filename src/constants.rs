// src/constants.rs

//! Names shared between the bootstrap, the configuration layer and the CLI.

/// Environment variable holding an absolute path to a prebuilt native module.
/// When set, resolution, extraction and caching are skipped entirely.
pub const LIBRARY_PATH_ENV: &str = "COMPAT_LIBRARY_PATH";

/// Environment variable naming a persistent extraction directory.
pub const EXTRACT_DIR_ENV: &str = "COMPAT_EXTRACT_DIR";

/// Environment variable pointing at an alternative `compat.toml`.
pub const CONFIG_PATH_ENV: &str = "COMPAT_CONFIG";

/// The name of the directory containing the configuration (in `~/.config/`).
pub const CONFIG_DIR_NAME: &str = "multiplatform-compat";

/// The name of the configuration file inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILENAME: &str = "compat.toml";

/// Prefix of the temporary directory created for extraction.
pub const EXTRACT_DIR_PREFIX: &str = "multiplatform-compat-";

/// Base name of the native module; decorated per platform as `{prefix}compat-{arch}.{ext}`.
pub const LIBRARY_STEM: &str = "compat";

/// Exit code reported for a Windows process terminated through `kill`.
pub const KILLED_EXIT_CODE: u32 = 255;
