// src/core/paths.rs

// `atexit` registration for the temporary extraction directory.
#![allow(unsafe_code)]

use crate::constants::{CONFIG_DIR_NAME, CONFIG_FILENAME, EXTRACT_DIR_PREFIX};
use lazy_static::lazy_static;
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use thiserror::Error;
use walkdir::WalkDir;

lazy_static! {
    static ref COMPAT_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
    static ref PENDING_DELETIONS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
}

static EXIT_HOOK: Once = Once::new();

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not expand path template '{template}': {reason}")]
    Expansion { template: String, reason: String },
}

/// Returns the path to the configuration directory (`~/.config/multiplatform-compat`).
///
/// This function is memoized: the first call computes and caches the path,
/// subsequent calls return the cached value instantly. The directory is not created.
pub fn get_config_dir() -> Result<PathBuf, PathError> {
    let mut cached_path_guard = COMPAT_CONFIG_DIR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(path) = &*cached_path_guard {
        return Ok(path.clone());
    }

    let config_path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join(CONFIG_DIR_NAME);

    *cached_path_guard = Some(config_path.clone());
    Ok(config_path)
}

/// Returns the path of the default `compat.toml`.
pub fn get_config_file_path() -> Result<PathBuf, PathError> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Expands `~` and `$VAR`/`${VAR}` in a user-supplied path.
pub fn expand_path(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Picks the directory the native module is extracted into.
///
/// With an override the directory is created if absent and left in place afterwards;
/// its lifetime belongs to the caller. Without one, a fresh temporary directory is
/// created and scheduled for recursive deletion when the process exits.
pub fn prepare_extract_dir(override_dir: Option<&Path>) -> io::Result<PathBuf> {
    if let Some(dir) = override_dir {
        fs::create_dir_all(dir)?;
        debug!("Using caller-owned extraction directory '{}'", dir.display());
        return Ok(dir.to_path_buf());
    }

    let dir = tempfile::Builder::new()
        .prefix(EXTRACT_DIR_PREFIX)
        .tempdir()?
        .keep();
    debug!("Created temporary extraction directory '{}'", dir.display());
    delete_on_exit(dir.clone());
    Ok(dir)
}

/// Schedules `path` for best-effort recursive deletion at process exit.
pub fn delete_on_exit(path: PathBuf) {
    PENDING_DELETIONS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(path);

    EXIT_HOOK.call_once(|| {
        // SAFETY: `run_exit_deletions` is a plain `extern "C" fn()` with no captured state.
        let registered = unsafe { libc::atexit(run_exit_deletions) };
        if registered != 0 {
            warn!("Could not register exit cleanup; temporary extraction directories will be left behind.");
        }
    });
}

extern "C" fn run_exit_deletions() {
    // A panic must not unwind across the C exit machinery.
    let _ = std::panic::catch_unwind(|| {
        let paths = match PENDING_DELETIONS.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for path in paths {
            remove_tree(&path);
        }
    });
}

/// Deletes a directory tree bottom-up, ignoring every error. Files still in use
/// (a loaded DLL on Windows) simply stay behind.
pub fn remove_tree(root: &Path) {
    for entry in WalkDir::new(root).contents_first(true).into_iter().flatten() {
        let path = entry.path();
        let _ = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
    }
}
