// build.rs

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // --- 1. Inform Cargo about rerun triggers ---
    println!("cargo:rerun-if-env-changed=COMPAT_BUNDLE_LIBRARY");
    println!("cargo:rerun-if-changed=build.rs");

    // --- 2. Locate the prebuilt native module, if one should be bundled ---
    // The module itself is produced by a separate native build; this crate only embeds it.
    let bundled: Option<PathBuf> = match env::var_os("COMPAT_BUNDLE_LIBRARY") {
        Some(raw) if !raw.is_empty() => {
            let path = PathBuf::from(raw);
            if path.is_file() {
                println!("cargo:rerun-if-changed={}", path.display());
                Some(fs::canonicalize(&path).unwrap_or(path))
            } else {
                println!(
                    "cargo:warning=COMPAT_BUNDLE_LIBRARY points to '{}', which is not a file. Building without a bundled module.",
                    path.display()
                );
                None
            }
        }
        _ => None,
    };

    // --- 3. Generate the `BUNDLED_LIBRARY` static ---
    let code = match &bundled {
        Some(path) => format!(
            "/// Native module embedded at build time.\npub(crate) static BUNDLED_LIBRARY: Option<&[u8]> = Some(include_bytes!({:?}));\n",
            path.display().to_string()
        ),
        None => String::from(
            "/// Native module embedded at build time.\npub(crate) static BUNDLED_LIBRARY: Option<&[u8]> = None;\n",
        ),
    };

    // --- 4. Write the generated code to the `OUT_DIR` directory ---
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is always set by Cargo");
    let dest_path = Path::new(&out_dir).join("bundled.rs");
    fs::write(&dest_path, code).expect("Failed to write bundled.rs");
}
