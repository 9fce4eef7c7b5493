//! Shell completion script generation.

use clap::{Parser, ValueEnum};
use clap_complete::{generate, shells};
use color_eyre::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum CompletionShell {
    Bash,
    Zsh,
    Powershell,
}

#[derive(Debug, Parser)]
pub struct CompleteOpts {
    /// Shell to generate a completion script for
    #[clap(value_enum)]
    pub shell: CompletionShell,
}

pub fn run(opts: CompleteOpts, cmd: &mut clap::Command) -> Result<()> {
    let bin_name = cmd.get_name().to_string();
    let mut stdout = std::io::stdout();
    match opts.shell {
        CompletionShell::Bash => generate(shells::Bash, cmd, bin_name, &mut stdout),
        CompletionShell::Zsh => generate(shells::Zsh, cmd, bin_name, &mut stdout),
        CompletionShell::Powershell => generate(shells::PowerShell, cmd, bin_name, &mut stdout),
    }
    Ok(())
}
