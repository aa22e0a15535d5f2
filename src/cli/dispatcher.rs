// src/cli/dispatcher.rs

use crate::cli::{Cli, handlers};
use anyhow::{Result, bail};

/// A probe command, its aliases, and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>) -> Result<()>,
}

/// The single source of truth for all probe commands.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "platform",
        aliases: &["target"],
        handler: handlers::platform::handle,
    },
    CommandDefinition {
        name: "load",
        aliases: &[],
        handler: handlers::load::handle,
    },
    CommandDefinition {
        name: "spawn",
        aliases: &["run"],
        handler: handlers::spawn::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

/// Routes the parsed command line to its handler. No command means `platform`.
pub fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(name) = cli.command else {
        return handlers::platform::handle(Vec::new());
    };
    match find_command(&name) {
        Some(command) => (command.handler)(cli.args),
        None => {
            let known: Vec<&str> = COMMAND_REGISTRY.iter().map(|cmd| cmd.name).collect();
            bail!("Unknown command '{}'. Expected one of: {}.", name, known.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_command_by_name_and_alias() {
        assert_eq!(find_command("spawn").unwrap().name, "spawn");
        assert_eq!(find_command("run").unwrap().name, "spawn");
        assert_eq!(find_command("target").unwrap().name, "platform");
        assert!(find_command("ping").is_none());
    }

    #[test]
    fn test_unknown_command_is_an_error() {
        let cli = Cli {
            command: Some("frobnicate".to_string()),
            args: Vec::new(),
        };
        let message = run_cli(cli).unwrap_err().to_string();
        assert!(message.contains("frobnicate"));
        assert!(message.contains("platform, load, spawn"));
    }
}
