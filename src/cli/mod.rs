// src/cli/mod.rs

use clap::Parser;

pub mod dispatcher;
pub mod handlers;

/// compat-probe: exercises the native bootstrap and the process controller.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Exercises the native bootstrap and the process controller.\n\n\
                  Commands:\n  \
                  platform            Show the detected target and module file name\n  \
                  load [--json]       Run the bootstrap and report where the module came from\n  \
                  spawn <cmdline>     Run a command with its output piped through the controller",
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
#[command(trailing_var_arg = true)]
pub struct Cli {
    /// The command to run.
    pub command: Option<String>,

    /// Arguments handed to the command's own parser.
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}
