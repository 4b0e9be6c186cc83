use std::io::{self, Write};
use std::path::Path;

use clap::CommandFactory;
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

const BIN_NAME: &str = "recall";

pub fn render_completions(shell: CompletionShell) -> Vec<u8> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();
    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }
    buffer
}

pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let buffer = render_completions(shell);
    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, BIN_NAME, buffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_completions_writes_bash_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("recall.bash");

        run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

        let script = std::fs::read_to_string(&output_path).unwrap();
        assert!(script.contains("_recall()"));
        assert!(script.contains("offline-sets"));
    }

    #[test]
    fn fish_completions_name_the_binary() {
        let script = String::from_utf8(render_completions(CompletionShell::Fish)).unwrap();
        assert!(script.contains("complete -c recall"));
    }
}
