// src/cli/handlers/spawn.rs

use crate::system::descriptor::create_pipe;
use crate::system::process::{ProcessBuilder, ProcessState};
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use colored::*;
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// The child ran to completion with a non-zero code. `main` exits with the same code.
#[derive(Error, Debug)]
#[error("Child exited with code {code}.")]
pub struct ChildExited {
    pub code: i32,
}

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    about = "Runs a command through the process controller, streaming its output."
)]
struct SpawnArgs {
    /// The command line to run, split with shell quoting rules.
    command_line: String,

    /// Working directory for the child.
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Kill the child if it is still running after this many milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
}

pub fn handle(args: Vec<String>) -> Result<()> {
    let spawn_args = SpawnArgs::try_parse_from(&args)?;

    let parts = shlex::split(&spawn_args.command_line)
        .ok_or_else(|| anyhow!("Command could not be parsed: {}", spawn_args.command_line))?;
    let Some(program) = parts.first() else {
        bail!("No command specified to run.");
    };
    let executable = find_executable(program)
        .with_context(|| format!("'{}' was not found in PATH", program))?;

    let pipe = create_pipe()?;
    let mut builder = ProcessBuilder::new(&executable)
        .arguments(&parts)
        .stdout(&pipe.writer)
        .stderr(&pipe.writer);
    if let Some(cwd) = &spawn_args.cwd {
        builder = builder.working_dir(cwd);
    }
    let child = builder.spawn()?;
    // The child holds its own copy; ours would keep the reader from seeing EOF.
    pipe.writer.release();

    log::debug!("Started pid {} ({})", child.id(), executable.display());
    let exit = child.result();

    std::thread::scope(|scope| -> Result<()> {
        if let Some(ms) = spawn_args.timeout_ms {
            let child = &child;
            let exit = exit.clone();
            scope.spawn(move || {
                if exit.wait_timeout(Duration::from_millis(ms)).is_none()
                    && let Err(e) = child.kill()
                {
                    log::warn!("Failed to kill pid {} after timeout: {}", child.id(), e);
                }
            });
        }

        let mut stdout = io::stdout().lock();
        io::copy(&mut &pipe.reader, &mut stdout)?;
        stdout.flush()?;
        Ok(())
    })?;

    let code = exit.wait();
    if child.state() == ProcessState::Killed {
        bail!(
            "'{}' did not finish within {} ms and was killed.",
            program,
            spawn_args.timeout_ms.unwrap_or_default()
        );
    }
    if code != 0 {
        eprintln!("{} exited with code {}", program.yellow(), code.to_string().red());
        return Err(ChildExited { code }.into());
    }
    Ok(())
}

/// Resolves `program` the way a shell would: paths are taken as given, bare names are
/// searched in `PATH`.
fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let extensions: Vec<String> = if cfg!(windows) {
        env::var("PATHEXT")
            .unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string())
            .split(';')
            .map(str::to_string)
            .chain(std::iter::once(String::new()))
            .collect()
    } else {
        vec![String::new()]
    };

    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .flat_map(|dir| {
            extensions
                .iter()
                .map(move |ext| dir.join(format!("{}{}", program, ext)))
        })
        .find(|full| full.is_file())
}
