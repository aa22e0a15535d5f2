// src/core/platform.rs

use crate::constants::LIBRARY_STEM;
use crate::models::{Arch, Os, PlatformTarget};
use std::env::consts;

impl PlatformTarget {
    /// Detects the target of the running process.
    ///
    /// # Errors
    /// Returns the unrecognized `(os, arch)` names when no native module exists for them.
    pub fn current() -> Result<Self, (String, String)> {
        Self::from_names(consts::OS, consts::ARCH)
    }

    /// Maps loose OS/architecture names (as reported by `std::env::consts`, `uname`,
    /// or a JVM-style `os.arch`) onto a supported target.
    pub fn from_names(os: &str, arch: &str) -> Result<Self, (String, String)> {
        let os_name = os.to_lowercase();
        let arch_name = arch.to_lowercase();

        let os = if os_name.contains("windows") {
            Some(Os::Windows)
        } else if os_name.contains("linux") {
            Some(Os::Linux)
        } else {
            None
        };

        let arch = match arch_name.as_str() {
            "amd64" | "x86_64" | "x64" => Some(Arch::Amd64),
            "aarch64" | "arm64" => Some(Arch::Arm64),
            _ => None,
        };

        match (os, arch) {
            (Some(os), Some(arch)) => Ok(Self { os, arch }),
            _ => Err((os_name, arch_name)),
        }
    }

    /// The platform-decorated module file name, e.g. `libcompat-amd64.so` or `compat-amd64.dll`.
    pub fn library_file_name(&self) -> String {
        match self.os {
            Os::Windows => format!("{}-{}.dll", LIBRARY_STEM, self.arch),
            Os::Linux => format!("lib{}-{}.so", LIBRARY_STEM, self.arch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_names_accepts_known_spellings() {
        let linux = PlatformTarget::from_names("Linux", "x86_64").unwrap();
        assert_eq!(linux.os, Os::Linux);
        assert_eq!(linux.arch, Arch::Amd64);

        let windows = PlatformTarget::from_names("Windows 11", "amd64").unwrap();
        assert_eq!(windows.os, Os::Windows);

        let arm = PlatformTarget::from_names("linux", "aarch64").unwrap();
        assert_eq!(arm.arch, Arch::Arm64);
    }

    #[test]
    fn test_from_names_rejects_unknown() {
        assert_eq!(
            PlatformTarget::from_names("freebsd", "x86_64"),
            Err(("freebsd".to_string(), "x86_64".to_string()))
        );
        assert!(PlatformTarget::from_names("linux", "riscv64").is_err());
    }

    #[test]
    fn test_library_file_name() {
        let linux = PlatformTarget::from_names("linux", "x86_64").unwrap();
        assert_eq!(linux.library_file_name(), "libcompat-amd64.so");

        let windows = PlatformTarget::from_names("windows", "x86_64").unwrap();
        assert_eq!(windows.library_file_name(), "compat-amd64.dll");
    }
}
