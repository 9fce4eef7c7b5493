//! Tests of the bare CLI surface: help, version and completions.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use xshell::{cmd, Shell};

use crate::get_harvctl_command;

pub fn test_help_lists_commands() -> Result<()> {
    let sh = Shell::new()?;
    let harvctl = get_harvctl_command()?;
    let help = cmd!(sh, "{harvctl} --help").read()?;

    for command in [
        "login",
        "get-config",
        "virtualmachine",
        "shell",
        "template",
        "image",
        "keypair",
        "import",
        "complete",
    ] {
        if !help.contains(command) {
            return Err(eyre!("help output is missing the {command} command:\n{help}"));
        }
    }
    Ok(())
}

pub fn test_version_flag() -> Result<()> {
    let sh = Shell::new()?;
    let harvctl = get_harvctl_command()?;
    let version = cmd!(sh, "{harvctl} --version").read()?;
    if !version.contains("harvctl") {
        return Err(eyre!("unexpected version output: {version}"));
    }
    Ok(())
}

pub fn test_vm_alias_help() -> Result<()> {
    let sh = Shell::new()?;
    let harvctl = get_harvctl_command()?;
    let help = cmd!(sh, "{harvctl} vm --help").read()?;
    for subcommand in ["list", "create", "delete", "start", "stop", "restart"] {
        if !help.contains(subcommand) {
            return Err(eyre!("vm help is missing {subcommand}:\n{help}"));
        }
    }
    Ok(())
}

pub fn test_completion_scripts() -> Result<()> {
    let sh = Shell::new()?;
    let harvctl = get_harvctl_command()?;
    for shell in ["bash", "zsh", "powershell"] {
        let script = cmd!(sh, "{harvctl} complete {shell}").read()?;
        if script.trim().is_empty() {
            return Err(eyre!("empty completion script for {shell}"));
        }
        if !script.contains("harvctl") {
            return Err(eyre!("completion script for {shell} does not mention harvctl"));
        }
    }
    Ok(())
}

pub fn test_unknown_subcommand_fails() -> Result<()> {
    let sh = Shell::new()?;
    let harvctl = get_harvctl_command()?;
    let output = cmd!(sh, "{harvctl} frobnicate").ignore_status().output()?;
    if output.status.success() {
        return Err(eyre!("unknown subcommand unexpectedly succeeded"));
    }
    Ok(())
}
