use anyhow::Result;
use clap::Args;
use clap_complete::{Shell, generate};
use std::io::{self, Write};

const BIN_NAME: &str = "ferry";

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to emit a completion script for.
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Write the completion script for `shell` into `out`.
pub fn write_completions(shell: Shell, command: &mut clap::Command, out: &mut dyn Write) {
    generate(shell, command, BIN_NAME, out);
}

/// Print the completion script for `shell` on stdout.
///
/// # Errors
///
/// Returns an error if stdout cannot be flushed.
pub fn run_completions(shell: Shell, command: &mut clap::Command) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_completions(shell, command, &mut out);
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{Command, arg};

    fn command() -> Command {
        Command::new(BIN_NAME)
            .subcommand(Command::new("migrate").arg(arg!(--export <PATH>)))
            .subcommand(Command::new("history"))
    }

    #[test]
    fn bash_script_names_subcommands() {
        let mut out = Vec::new();
        write_completions(Shell::Bash, &mut command(), &mut out);
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("ferry"));
        assert!(script.contains("migrate"));
        assert!(script.contains("--export"));
    }

    #[test]
    fn every_shell_produces_output() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell, Shell::Elvish] {
            let mut out = Vec::new();
            write_completions(shell, &mut command(), &mut out);
            assert!(!out.is_empty(), "{shell} produced nothing");
        }
    }
}
