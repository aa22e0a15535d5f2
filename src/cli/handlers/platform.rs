// src/cli/handlers/platform.rs

use crate::constants::{CONFIG_PATH_ENV, EXTRACT_DIR_ENV, LIBRARY_PATH_ENV};
use crate::core::paths;
use crate::models::PlatformTarget;
use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;
use std::env;

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Shows the detected platform target and the native module it selects."
)]
struct PlatformArgs {}

pub fn handle(args: Vec<String>) -> Result<()> {
    let _platform_args = PlatformArgs::try_parse_from(&args)?;

    let target = PlatformTarget::current().map_err(|(os, arch)| {
        anyhow!("Native support unavailable: unsupported platform (os '{}', arch '{}').", os, arch)
    })?;

    println!("\n--- {} ---", "Platform".yellow());
    println!("  {:<14} {}", "target".blue(), target);
    println!("  {:<14} {}", "module".blue(), target.library_file_name().cyan());

    println!("\n--- {} ---", "Settings".yellow());
    for key in [LIBRARY_PATH_ENV, EXTRACT_DIR_ENV, CONFIG_PATH_ENV] {
        let value = env::var_os(key)
            .map(|v| v.to_string_lossy().into_owned())
            .unwrap_or_else(|| "(unset)".dimmed().to_string());
        println!("  {:<20} {}", key.blue(), value);
    }
    match paths::get_config_file_path() {
        Ok(path) => println!("  {:<20} {}", "default config".blue(), path.display()),
        Err(e) => println!("  {:<20} {}", "default config".blue(), e.to_string().red()),
    }
    Ok(())
}
