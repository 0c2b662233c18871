//! Shell completion scripts for the `safelease` command.

use std::io;

use clap::CommandFactory;
use clap_complete::{Shell, generate};

pub const BIN_NAME: &str = "safelease";

/// Writes the completion script for `shell` to `out`.
pub fn write_completion(shell: Shell, out: &mut dyn io::Write) {
    let mut app = crate::Cli::command();
    generate(shell, &mut app, BIN_NAME, out);
}

pub fn generate_completion(shell: Shell) {
    write_completion(shell, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_script_mentions_every_subcommand() {
        let mut out = Vec::new();
        write_completion(Shell::Bash, &mut out);
        let script = String::from_utf8(out).unwrap();
        for name in ["serve", "chat", "token", "config", "spec", "completion"] {
            assert!(script.contains(name), "missing {name}");
        }
    }
}
