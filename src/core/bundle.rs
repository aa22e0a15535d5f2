// src/core/bundle.rs

//! Packaged copies of the native module that must be extracted before loading.

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

include!(concat!(env!("OUT_DIR"), "/bundled.rs"));

/// A native module packaged inside some container.
///
/// `container` is the file the payload lives in. Its modification time decides
/// whether an earlier extraction is still valid. Returning `None` disables the
/// cache check, so every bootstrap re-extracts.
pub trait ResourceSource: Send + Sync + fmt::Debug {
    /// Opens a fresh stream over the packaged bytes.
    fn open(&self) -> io::Result<Box<dyn Read + '_>>;

    fn container(&self) -> Option<&Path>;
}

/// A payload compiled into the binary with `include_bytes!`.
#[derive(Clone)]
pub struct EmbeddedResource {
    bytes: &'static [u8],
    container: Option<PathBuf>,
}

impl EmbeddedResource {
    pub fn new(bytes: &'static [u8], container: Option<PathBuf>) -> Self {
        Self { bytes, container }
    }

    /// The module embedded by `build.rs` (from `COMPAT_BUNDLE_LIBRARY`), if any.
    /// Its container is the running executable.
    pub fn bundled() -> Option<Self> {
        BUNDLED_LIBRARY.map(|bytes| Self::new(bytes, std::env::current_exe().ok()))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for EmbeddedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedResource")
            .field("len", &self.bytes.len())
            .field("container", &self.container)
            .finish()
    }
}

impl ResourceSource for EmbeddedResource {
    fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.bytes))
    }

    fn container(&self) -> Option<&Path> {
        self.container.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PAYLOAD: &[u8] = b"\x7fELF not really a module";

    #[test]
    fn test_embedded_resource_streams_payload() {
        let resource = EmbeddedResource::new(PAYLOAD, Some(PathBuf::from("/usr/bin/app")));

        let mut out = Vec::new();
        resource.open().unwrap().read_to_end(&mut out).unwrap();

        assert_eq!(out, PAYLOAD);
        assert_eq!(resource.len(), PAYLOAD.len());
        assert_eq!(resource.container(), Some(Path::new("/usr/bin/app")));
    }
}
