// src/core/library.rs

// Loading a shared library runs its initializers; resolving a symbol trusts its signature.
#![allow(unsafe_code)]

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

/// Error type produced by a [`ModuleLoader`].
pub type LoadFailure = Box<dyn Error + Send + Sync + 'static>;

/// Turns a file on disk into a loaded module.
///
/// The bootstrap is generic over this seam so the extraction pipeline can be driven
/// without a real shared library.
pub trait ModuleLoader: Send + Sync {
    type Module: Send + Sync;

    fn load(&self, path: &Path) -> Result<Self::Module, LoadFailure>;
}

/// Loads modules with the platform dynamic loader (`dlopen` / `LoadLibraryW`).
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

impl ModuleLoader for DynamicLoader {
    type Module = NativeLibrary;

    fn load(&self, path: &Path) -> Result<NativeLibrary, LoadFailure> {
        NativeLibrary::open(path).map_err(|e| Box::new(e) as LoadFailure)
    }
}

/// The loaded native module. Lives for the rest of the process; it is never unloaded.
pub struct NativeLibrary {
    path: PathBuf,
    library: libloading::Library,
}

impl NativeLibrary {
    fn open(path: &Path) -> Result<Self, libloading::Error> {
        // SAFETY: the module is the one this crate ships for the current platform;
        // its initializers are expected to be safe to run from any thread.
        let library = unsafe { libloading::Library::new(path) }?;
        Ok(Self {
            path: path.to_path_buf(),
            library,
        })
    }

    /// The file this module was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves an exported symbol. This is the single gateway through which the
    /// external native operations (notifications, tray, theme, shell) are dispatched.
    ///
    /// # Safety
    /// `T` must match the actual type of the exported symbol, and the returned value
    /// must not be used in a way the native side does not support.
    pub unsafe fn symbol<T>(&self, name: &str) -> Result<libloading::Symbol<'_, T>, libloading::Error> {
        // SAFETY: forwarded to the caller.
        unsafe { self.library.get(name.as_bytes()) }
    }

    /// Returns `true` if the module exports `name`.
    pub fn has_symbol(&self, name: &str) -> bool {
        // SAFETY: the symbol is only looked up, never called or dereferenced.
        unsafe { self.library.get::<*const ()>(name.as_bytes()) }.is_ok()
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
