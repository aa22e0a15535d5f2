// src/core/cache.rs

use log::debug;
use std::{fs, io, path::Path, time::SystemTime};

/// Modification times used to decide whether an earlier extraction can be reused.
#[derive(Debug, PartialEq, Eq)]
pub struct ExtractionStamp {
    pub container_modified: SystemTime,
    pub extracted_modified: SystemTime,
}

impl ExtractionStamp {
    /// Reads both timestamps.
    ///
    /// # Errors
    /// Returns an I/O error if either file is missing or its metadata cannot be read.
    pub fn read(container: &Path, extracted: &Path) -> io::Result<Self> {
        let container_modified = fs::metadata(container)?.modified()?;
        let extracted_modified = fs::metadata(extracted)?.modified()?;
        Ok(Self {
            container_modified,
            extracted_modified,
        })
    }

    /// An extraction is current when the container is not newer than the extracted copy.
    pub fn is_current(&self) -> bool {
        self.container_modified <= self.extracted_modified
    }
}

/// Returns `true` when `extracted` exists and is at least as new as `container`.
///
/// Any failure to compare (missing file, unreadable metadata, no mtime support) counts
/// as a miss, so the caller re-extracts.
pub fn is_extraction_current(container: &Path, extracted: &Path) -> bool {
    match ExtractionStamp::read(container, extracted) {
        Ok(stamp) => {
            debug!(
                "Extraction stamp for '{}': container={:?}, extracted={:?}",
                extracted.display(),
                stamp.container_modified,
                stamp.extracted_modified
            );
            stamp.is_current()
        }
        Err(e) => {
            debug!(
                "Cannot compare '{}' against '{}' ({}); treating as stale.",
                extracted.display(),
                container.display(),
                e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(path: &Path, modified: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn test_extraction_newer_than_container_is_current() {
        let dir = TempDir::new().unwrap();
        let container = dir.path().join("app.bin");
        let extracted = dir.path().join("libcompat-amd64.so");
        let now = SystemTime::now();

        touch(&container, now - Duration::from_secs(3600));
        touch(&extracted, now);

        assert!(is_extraction_current(&container, &extracted));
    }

    #[test]
    fn test_equal_timestamps_are_current() {
        let dir = TempDir::new().unwrap();
        let container = dir.path().join("app.bin");
        let extracted = dir.path().join("lib.so");
        let at = SystemTime::now() - Duration::from_secs(60);

        touch(&container, at);
        touch(&extracted, at);

        assert!(is_extraction_current(&container, &extracted));
    }

    #[test]
    fn test_container_newer_than_extraction_is_stale() {
        let dir = TempDir::new().unwrap();
        let container = dir.path().join("app.bin");
        let extracted = dir.path().join("lib.so");
        let now = SystemTime::now();

        touch(&container, now);
        touch(&extracted, now - Duration::from_secs(3600));

        assert!(!is_extraction_current(&container, &extracted));
    }

    #[test]
    fn test_missing_files_are_stale() {
        let dir = TempDir::new().unwrap();
        let container = dir.path().join("app.bin");
        touch(&container, SystemTime::now());

        assert!(!is_extraction_current(&container, &dir.path().join("missing.so")));
        assert!(!is_extraction_current(&dir.path().join("missing.bin"), &container));
    }
}
