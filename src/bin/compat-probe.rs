// src/bin/compat-probe.rs

use clap::Parser;
use colored::*;
use multiplatform_compat::cli::{Cli, dispatcher, handlers::spawn::ChildExited};

/// The main entry point of `compat-probe`.
/// It sets up logging, parses arguments, dispatches to the correct handler,
/// and performs centralized error handling.
fn main() {
    env_logger::init();

    if let Err(e) = dispatcher::run_cli(Cli::parse()) {
        // A failing child already reported itself; mirror its exit code.
        if let Some(exited) = e.downcast_ref::<ChildExited>() {
            std::process::exit(exited.code);
        }

        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}
