// src/state.rs

//! Process-wide native module state.
//!
//! The global [`Bootstrap`] is built lazily from `compat.toml`, the environment, the
//! extraction override set through [`set_override_extract_dir`] and the module embedded
//! at build time. It runs at most once; every later call sees the same outcome.

use crate::core::bootstrap::{Bootstrap, BootstrapError, LoadOrigin};
use crate::core::config_loader;
use crate::core::library::NativeLibrary;
use lazy_static::lazy_static;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

lazy_static! {
    static ref EXTRACT_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);
}

static GLOBAL_BOOTSTRAP: OnceLock<Bootstrap> = OnceLock::new();

/// Extracts the native module into `dir` instead of a temporary directory.
///
/// Only effective before the first call to [`ensure_loaded`]. The directory is created
/// when needed and never deleted; `None` restores the temporary-directory default.
pub fn set_override_extract_dir(dir: Option<PathBuf>) {
    if GLOBAL_BOOTSTRAP.get().is_some() {
        warn!("Extraction directory override set after bootstrap; it will be ignored.");
    }
    *EXTRACT_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = dir;
}

fn global_bootstrap() -> &'static Bootstrap {
    GLOBAL_BOOTSTRAP.get_or_init(|| {
        let config = config_loader::load_compat_config().unwrap_or_else(|e| {
            warn!("{}. Falling back to environment settings.", e);
            config_loader::env_only_config()
        });
        let override_dir = EXTRACT_DIR_OVERRIDE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        debug!("Bootstrap config: {:?}, extraction override: {:?}", config, override_dir);

        Bootstrap::from_config(&config).with_extract_dir(override_dir)
    })
}

/// Loads the native module on first call and returns it; later calls return the
/// stored outcome without doing any work.
pub fn ensure_loaded() -> Result<&'static NativeLibrary, BootstrapError> {
    global_bootstrap().ensure_loaded()
}

/// `true` when the native module is (or can be) loaded. Triggers the bootstrap.
pub fn is_available() -> bool {
    ensure_loaded().is_ok()
}

/// The loaded module, if the bootstrap succeeded.
pub fn native() -> Option<&'static NativeLibrary> {
    ensure_loaded().ok()
}

/// Where the global module came from. `None` until a successful bootstrap.
pub fn origin() -> Option<&'static LoadOrigin> {
    GLOBAL_BOOTSTRAP.get().and_then(Bootstrap::origin)
}
