// src/cli/handlers/load.rs

use crate::models::LibraryLocation;
use crate::state;
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Runs the native bootstrap and reports where the module came from."
)]
struct LoadArgs {
    /// Print the load origin as JSON.
    #[arg(long)]
    json: bool,

    /// Extract into this directory instead of a temporary one. It is kept afterwards.
    #[arg(long, value_name = "DIR")]
    extract_dir: Option<PathBuf>,

    /// Symbols to look up in the loaded module.
    #[arg(long = "symbol", value_name = "NAME")]
    symbols: Vec<String>,
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let load_args = LoadArgs::try_parse_from(&args)?;

    if load_args.extract_dir.is_some() {
        state::set_override_extract_dir(load_args.extract_dir.clone());
    }

    let library = state::ensure_loaded()?;
    let origin = state::origin().context("Bootstrap succeeded without recording an origin")?;

    if load_args.json {
        println!("{}", serde_json::to_string_pretty(origin)?);
        return Ok(());
    }

    println!("\n--- {} ---", "Native module".yellow());
    println!("  {:<12} {}", "target".blue(), origin.target);
    println!("  {:<12} {}", "path".blue(), library.path().display());
    let source = match &origin.location {
        LibraryLocation::File { .. } => "loaded in place".to_string(),
        LibraryLocation::Packaged { container } => match container {
            Some(container) => format!("extracted from '{}'", container.display()),
            None => "extracted".to_string(),
        },
    };
    println!("  {:<12} {}", "source".blue(), source);
    if origin.extracted {
        let cache = if origin.reused_extraction {
            "reused".green()
        } else {
            "written".cyan()
        };
        println!("  {:<12} {}", "extraction".blue(), cache);
    }

    for name in &load_args.symbols {
        let status = if library.has_symbol(name) {
            "found".green()
        } else {
            "missing".red()
        };
        println!("  {:<12} {} {}", "symbol".blue(), name, status);
    }
    Ok(())
}
