// src/core/bootstrap.rs

//! # Library Bootstrap
//!
//! Locates, optionally extracts, and loads the one native module matching the
//! running platform. The whole sequence runs at most once per [`Bootstrap`]:
//!
//! 1. **Platform:** map the host OS/arch onto a [`PlatformTarget`]. Anything else
//!    fails with [`BootstrapError::UnsupportedPlatform`] before touching the disk.
//! 2. **Resolution:** an override path wins. Otherwise a packaged resource is used,
//!    then a copy sitting next to the executable.
//! 3. **Extraction:** packaged resources are copied into the extraction directory
//!    unless an earlier copy is at least as new as its container.
//! 4. **Load:** the resulting file is handed to the [`ModuleLoader`].
//!
//! Every failure after step 1 becomes [`BootstrapError::LibraryLoad`]. The outcome
//! (success or failure) is stored and handed to every later caller unchanged.

use crate::core::bundle::{EmbeddedResource, ResourceSource};
use crate::core::config_loader::CompatConfig;
use crate::core::library::{DynamicLoader, ModuleLoader};
use crate::core::timer::StageTimer;
use crate::core::{cache, paths};
use crate::models::{LibraryLocation, PlatformTarget};
use log::{debug, error, info};
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// The captured cause of a failed bootstrap, shared by every caller that observes it.
#[derive(Clone)]
pub struct SharedCause(Arc<dyn StdError + Send + Sync + 'static>);

impl SharedCause {
    fn new<E>(cause: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self(Arc::from(cause.into()))
    }
}

impl fmt::Debug for SharedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for SharedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for SharedCause {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

#[derive(Error, Debug, Clone)]
pub enum BootstrapError {
    #[error("Native support unavailable: unsupported platform (os '{os}', arch '{arch}').")]
    UnsupportedPlatform { os: String, arch: String },
    #[error("Native support unavailable: could not load '{file_name}': {cause}")]
    LibraryLoad {
        file_name: String,
        #[source]
        cause: SharedCause,
    },
}

impl BootstrapError {
    /// Always `true`: every bootstrap error means the native module will not be
    /// available for the rest of the process. Lets callers holding a boxed error
    /// tell this apart from a transient I/O failure.
    pub fn is_native_unavailable(&self) -> bool {
        true
    }

    /// The module file name involved, when the platform was recognized.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::UnsupportedPlatform { .. } => None,
            Self::LibraryLoad { file_name, .. } => Some(file_name),
        }
    }
}

/// How the module was obtained. Available after a successful bootstrap.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LoadOrigin {
    pub target: PlatformTarget,
    pub file_name: String,
    pub location: LibraryLocation,
    /// The file actually handed to the loader.
    pub path: PathBuf,
    /// `true` when the file came out of a packaged resource.
    pub extracted: bool,
    /// `true` when an earlier extraction was reused instead of rewritten.
    pub reused_extraction: bool,
}

struct Loaded<M> {
    module: M,
    origin: LoadOrigin,
}

enum Resolved<'a> {
    File(PathBuf),
    Packaged(&'a dyn ResourceSource),
}

/// One-shot loader for the platform native module.
pub struct Bootstrap<L: ModuleLoader = DynamicLoader> {
    host_os: String,
    host_arch: String,
    library_path: Option<PathBuf>,
    extract_dir: Option<PathBuf>,
    resource: Option<Arc<dyn ResourceSource>>,
    search_dirs: Vec<PathBuf>,
    loader: L,
    outcome: OnceLock<Result<Loaded<L::Module>, BootstrapError>>,
}

impl Bootstrap<DynamicLoader> {
    /// A bootstrap for the running host using the dynamic loader, the module
    /// embedded at build time (if any) and the executable's directory.
    pub fn new() -> Self {
        Self::with_loader(DynamicLoader)
    }

    /// Like [`Bootstrap::new`], with the override path and extraction directory taken from `config`.
    pub fn from_config(config: &CompatConfig) -> Self {
        Self::new()
            .with_library_path(config.library_path.clone())
            .with_extract_dir(config.extract_dir.clone())
    }
}

impl Default for Bootstrap<DynamicLoader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ModuleLoader> Bootstrap<L> {
    pub fn with_loader(loader: L) -> Self {
        let resource = EmbeddedResource::bundled().map(|r| Arc::new(r) as Arc<dyn ResourceSource>);
        let search_dirs = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .into_iter()
            .collect();

        Self {
            host_os: std::env::consts::OS.to_string(),
            host_arch: std::env::consts::ARCH.to_string(),
            library_path: None,
            extract_dir: None,
            resource,
            search_dirs,
            loader,
            outcome: OnceLock::new(),
        }
    }

    /// Pretends to run on another host. Unknown names fail the bootstrap.
    pub fn with_host(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.host_os = os.into();
        self.host_arch = arch.into();
        self
    }

    /// Loads this file in place, skipping resolution and extraction.
    pub fn with_library_path(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.library_path = path;
        }
        self
    }

    /// Extracts into this caller-owned directory instead of a temporary one.
    pub fn with_extract_dir(mut self, dir: Option<PathBuf>) -> Self {
        if dir.is_some() {
            self.extract_dir = dir;
        }
        self
    }

    pub fn with_resource(mut self, resource: Option<Arc<dyn ResourceSource>>) -> Self {
        self.resource = resource;
        self
    }

    /// Directories searched for an unpacked `{file name}` when nothing else applies.
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = dirs;
        self
    }

    /// Runs the bootstrap on first call; every call returns the same outcome.
    ///
    /// Concurrent callers block until the first one finishes.
    pub fn ensure_loaded(&self) -> Result<&L::Module, BootstrapError> {
        match self.outcome.get_or_init(|| self.run()) {
            Ok(loaded) => Ok(&loaded.module),
            Err(e) => Err(e.clone()),
        }
    }

    /// Where the module came from, once loaded.
    pub fn origin(&self) -> Option<&LoadOrigin> {
        self.outcome
            .get()
            .and_then(|outcome| outcome.as_ref().ok())
            .map(|loaded| &loaded.origin)
    }

    /// `true` once a bootstrap attempt finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        self.outcome.get().is_some()
    }

    fn run(&self) -> Result<Loaded<L::Module>, BootstrapError> {
        let mut timer = StageTimer::start("native bootstrap");

        let target = PlatformTarget::from_names(&self.host_os, &self.host_arch).map_err(|(os, arch)| {
            error!("No native module for os '{}' / arch '{}'.", os, arch);
            BootstrapError::UnsupportedPlatform { os, arch }
        })?;
        let file_name = target.library_file_name();

        let result = self.locate_and_load(target, &file_name, &mut timer);
        match &result {
            Ok(loaded) => info!("Native module loaded from '{}'.", loaded.origin.path.display()),
            Err(e) => error!("{}", e),
        }
        result
    }

    fn locate_and_load(
        &self,
        target: PlatformTarget,
        file_name: &str,
        timer: &mut StageTimer,
    ) -> Result<Loaded<L::Module>, BootstrapError> {
        let fail = |cause: SharedCause| BootstrapError::LibraryLoad {
            file_name: file_name.to_string(),
            cause,
        };

        let resolved = self.resolve(file_name);
        timer.mark("resolve");
        let (location, path, extracted, reused_extraction) = match resolved {
            Some(Resolved::File(path)) => {
                let path = std::path::absolute(&path).map_err(|e| fail(SharedCause::new(e)))?;
                debug!("Loading native module in place from '{}'.", path.display());
                (LibraryLocation::File { path: path.clone() }, path, false, false)
            }
            Some(Resolved::Packaged(resource)) => {
                let (path, reused) = self
                    .extract(resource, file_name)
                    .map_err(|e| fail(SharedCause::new(e)))?;
                timer.mark("extract");
                let location = LibraryLocation::Packaged {
                    container: resource.container().map(Path::to_path_buf),
                };
                (location, path, true, reused)
            }
            None => {
                let cause = io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no override path, no packaged module and no '{}' next to the executable", file_name),
                );
                return Err(fail(SharedCause::new(cause)));
            }
        };

        let module = self
            .loader
            .load(&path)
            .map_err(|e| fail(SharedCause::new(e)))?;
        timer.mark("load");

        Ok(Loaded {
            module,
            origin: LoadOrigin {
                target,
                file_name: file_name.to_string(),
                location,
                path,
                extracted,
                reused_extraction,
            },
        })
    }

    fn resolve(&self, file_name: &str) -> Option<Resolved<'_>> {
        if let Some(path) = &self.library_path {
            return Some(Resolved::File(path.clone()));
        }
        if let Some(resource) = &self.resource {
            return Some(Resolved::Packaged(resource.as_ref()));
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.is_file())
            .map(Resolved::File)
    }

    /// Copies the packaged module into the extraction directory, unless the copy
    /// already there is current. Returns the file and whether it was reused.
    fn extract(&self, resource: &dyn ResourceSource, file_name: &str) -> io::Result<(PathBuf, bool)> {
        let dir = paths::prepare_extract_dir(self.extract_dir.as_deref())?;
        let target = dir.join(file_name);

        if let Some(container) = resource.container()
            && cache::is_extraction_current(container, &target)
        {
            debug!("Reusing extracted module '{}'.", target.display());
            return Ok((target, true));
        }

        // Stage next to the target so the final rename stays on one filesystem.
        let mut staged = tempfile::NamedTempFile::new_in(&dir)?;
        let written = io::copy(&mut resource.open()?, staged.as_file_mut())?;
        staged.as_file().sync_all()?;
        staged.persist(&target).map_err(|e| e.error)?;

        debug!("Extracted {} bytes to '{}'.", written, target.display());
        Ok((target, false))
    }
}

impl<L: ModuleLoader + fmt::Debug> fmt::Debug for Bootstrap<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("host_os", &self.host_os)
            .field("host_arch", &self.host_arch)
            .field("library_path", &self.library_path)
            .field("extract_dir", &self.extract_dir)
            .field("resource", &self.resource)
            .field("search_dirs", &self.search_dirs)
            .field("loader", &self.loader)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::library::LoadFailure;
    use std::fs::{self, File};
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const PAYLOAD: &[u8] = b"pretend this is libcompat-amd64.so";

    /// Records loads; the "module" is the file content it was given.
    #[derive(Debug, Default)]
    struct RecordingLoader {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ModuleLoader for RecordingLoader {
        type Module = Vec<u8>;

        fn load(&self, path: &Path) -> Result<Vec<u8>, LoadFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for concurrent callers.
            std::thread::sleep(Duration::from_millis(20));
            if self.fail {
                return Err("symbol table corrupted".into());
            }
            Ok(fs::read(path)?)
        }
    }

    #[derive(Debug)]
    struct CountingResource {
        bytes: Vec<u8>,
        container: Option<PathBuf>,
        opens: AtomicUsize,
    }

    impl CountingResource {
        fn new(container: Option<PathBuf>) -> Arc<Self> {
            Arc::new(Self {
                bytes: PAYLOAD.to_vec(),
                container,
                opens: AtomicUsize::new(0),
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl ResourceSource for CountingResource {
        fn open(&self) -> io::Result<Box<dyn Read + '_>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(self.bytes.as_slice()))
        }

        fn container(&self) -> Option<&Path> {
            self.container.as_deref()
        }
    }

    fn make_container(dir: &Path, modified: SystemTime) -> PathBuf {
        let container = dir.join("app-bundle.bin");
        let file = File::create(&container).unwrap();
        file.set_modified(modified).unwrap();
        container
    }

    fn bootstrap(resource: &Arc<CountingResource>, extract_dir: &Path) -> Bootstrap<RecordingLoader> {
        let resource: Arc<dyn ResourceSource> = resource.clone();
        Bootstrap::with_loader(RecordingLoader::default())
            .with_host("linux", "x86_64")
            .with_resource(Some(resource))
            .with_search_dirs(Vec::new())
            .with_extract_dir(Some(extract_dir.to_path_buf()))
    }

    #[test]
    fn test_concurrent_callers_share_one_load() {
        let scratch = TempDir::new().unwrap();
        let container = make_container(scratch.path(), SystemTime::now() - Duration::from_secs(60));
        let resource = CountingResource::new(Some(container));
        let boot = bootstrap(&resource, &scratch.path().join("extract"));

        let modules: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..16)
                            .map(|_| boot.ensure_loaded().unwrap() as *const Vec<u8> as usize)
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(modules.len(), 8 * 16);
        assert!(modules.iter().all(|m| *m == modules[0]));
        assert_eq!(boot.loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resource.opens(), 1);
        assert_eq!(boot.ensure_loaded().unwrap().as_slice(), PAYLOAD);
    }

    #[test]
    fn test_failure_is_sticky_and_shared() {
        let scratch = TempDir::new().unwrap();
        let resource = CountingResource::new(None);
        let resource_dyn: Arc<dyn ResourceSource> = resource.clone();
        let boot = Bootstrap::with_loader(RecordingLoader {
            calls: AtomicUsize::new(0),
            fail: true,
        })
        .with_host("linux", "x86_64")
        .with_resource(Some(resource_dyn))
        .with_search_dirs(Vec::new())
        .with_extract_dir(Some(scratch.path().to_path_buf()));

        let messages: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| boot.ensure_loaded().unwrap_err().to_string()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(messages.iter().all(|m| m == &messages[0]));
        assert!(messages[0].contains("libcompat-amd64.so"));
        assert!(messages[0].contains("symbol table corrupted"));

        let again = boot.ensure_loaded().unwrap_err();
        assert_eq!(again.file_name(), Some("libcompat-amd64.so"));
        assert!(again.is_native_unavailable());
        assert!(again.source().is_some());
        assert_eq!(boot.loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resource.opens(), 1);
        assert!(boot.origin().is_none());
    }

    #[test]
    fn test_unsupported_platform_fails_before_any_io() {
        let scratch = TempDir::new().unwrap();
        let extract_dir = scratch.path().join("never-created");
        let resource = CountingResource::new(None);
        let boot = bootstrap(&resource, &extract_dir).with_host("plan9", "x86_64");

        let err = boot.ensure_loaded().unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::UnsupportedPlatform { ref os, ref arch } if os == "plan9" && arch == "x86_64"
        ));
        assert_eq!(err.file_name(), None);
        assert_eq!(resource.opens(), 0);
        assert_eq!(boot.loader.calls.load(Ordering::SeqCst), 0);
        assert!(!extract_dir.exists());
    }

    #[test]
    fn test_fresh_extraction_is_reused_by_next_process() {
        let scratch = TempDir::new().unwrap();
        let extract_dir = scratch.path().join("extract");
        let container = make_container(scratch.path(), SystemTime::now() - Duration::from_secs(3600));

        let first_resource = CountingResource::new(Some(container.clone()));
        let first = bootstrap(&first_resource, &extract_dir);
        first.ensure_loaded().unwrap();
        let first_origin = first.origin().unwrap().clone();
        assert!(first_origin.extracted);
        assert!(!first_origin.reused_extraction);
        assert_eq!(first_resource.opens(), 1);

        let extracted = extract_dir.join("libcompat-amd64.so");
        let modified_before = fs::metadata(&extracted).unwrap().modified().unwrap();

        // A second bootstrap stands in for a fresh process using the same directory.
        let second_resource = CountingResource::new(Some(container));
        let second = bootstrap(&second_resource, &extract_dir);
        assert_eq!(second.ensure_loaded().unwrap().as_slice(), PAYLOAD);

        assert_eq!(second_resource.opens(), 0);
        assert!(second.origin().unwrap().reused_extraction);
        assert_eq!(
            fs::metadata(&extracted).unwrap().modified().unwrap(),
            modified_before
        );
    }

    #[test]
    fn test_newer_container_forces_re_extraction() {
        let scratch = TempDir::new().unwrap();
        let extract_dir = scratch.path().join("extract");
        fs::create_dir_all(&extract_dir).unwrap();
        let extracted = extract_dir.join("libcompat-amd64.so");
        fs::write(&extracted, b"stale copy").unwrap();
        File::options()
            .write(true)
            .open(&extracted)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(7200))
            .unwrap();
        let container = make_container(scratch.path(), SystemTime::now() - Duration::from_secs(60));

        let resource = CountingResource::new(Some(container));
        let boot = bootstrap(&resource, &extract_dir);

        assert_eq!(boot.ensure_loaded().unwrap().as_slice(), PAYLOAD);
        assert_eq!(resource.opens(), 1);
        assert_eq!(fs::read(&extracted).unwrap(), PAYLOAD);
    }

    #[test]
    fn test_unknown_container_always_extracts() {
        let scratch = TempDir::new().unwrap();
        let extract_dir = scratch.path().join("extract");

        for _ in 0..2 {
            let resource = CountingResource::new(None);
            let boot = bootstrap(&resource, &extract_dir);
            boot.ensure_loaded().unwrap();
            assert_eq!(resource.opens(), 1);
        }
    }

    #[test]
    fn test_override_path_is_loaded_in_place() {
        let scratch = TempDir::new().unwrap();
        let prebuilt = scratch.path().join("prebuilt.so");
        fs::write(&prebuilt, b"prebuilt module").unwrap();
        let extract_dir = scratch.path().join("extract");
        let resource = CountingResource::new(None);

        let boot = bootstrap(&resource, &extract_dir).with_library_path(Some(prebuilt.clone()));

        assert_eq!(boot.ensure_loaded().unwrap().as_slice(), b"prebuilt module");
        let origin = boot.origin().unwrap();
        assert!(!origin.extracted);
        assert_eq!(origin.path, prebuilt);
        assert_eq!(origin.location, LibraryLocation::File { path: prebuilt });
        assert_eq!(resource.opens(), 0);
        assert!(!extract_dir.exists());
    }

    #[test]
    fn test_sibling_file_is_used_without_resource() {
        let scratch = TempDir::new().unwrap();
        let sibling = scratch.path().join("libcompat-amd64.so");
        fs::write(&sibling, PAYLOAD).unwrap();

        let boot = Bootstrap::with_loader(RecordingLoader::default())
            .with_host("linux", "x86_64")
            .with_resource(None)
            .with_search_dirs(vec![scratch.path().join("empty"), scratch.path().to_path_buf()]);

        boot.ensure_loaded().unwrap();
        assert_eq!(boot.origin().unwrap().path, sibling);
    }

    #[test]
    fn test_nothing_to_load_reports_file_name() {
        let boot = Bootstrap::with_loader(RecordingLoader::default())
            .with_host("windows", "amd64")
            .with_resource(None)
            .with_search_dirs(Vec::new());

        let err = boot.ensure_loaded().unwrap_err();

        assert_eq!(err.file_name(), Some("compat-amd64.dll"));
        assert!(err.to_string().starts_with("Native support unavailable"));
        assert_eq!(boot.loader.calls.load(Ordering::SeqCst), 0);
    }
}
