//! Integration tests driving the built harvctl binary.
//!
//! These tests exercise the CLI surface without a cluster: help output,
//! completion scripts, flag validation and the configuration error paths.
//! Anything that needs a live Harvester cluster belongs in a separate
//! environment, not here.

use std::path::Path;
use std::sync::OnceLock;

use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use xshell::{cmd, Shell};

mod tests {
    pub mod cli_surface;
    pub mod offline_validation;
}

static HARVCTL: OnceLock<String> = OnceLock::new();

/// Path to the harvctl binary, checking HARVCTL_PATH first, then the
/// workspace target directory (building it when missing), then PATH.
pub(crate) fn get_harvctl_command() -> Result<String> {
    if let Some(path) = HARVCTL.get() {
        return Ok(path.clone());
    }
    let path = resolve_harvctl()?;
    Ok(HARVCTL.get_or_init(|| path).clone())
}

fn probe_target_dir() -> Option<String> {
    let candidates = [
        "../../target/debug/harvctl",
        "../../target/release/harvctl",
        "target/debug/harvctl",
        "target/release/harvctl",
    ];
    for candidate in candidates {
        if Path::new(candidate).exists() {
            if let Ok(absolute) = std::fs::canonicalize(candidate) {
                return Some(absolute.to_string_lossy().into_owned());
            }
        }
    }
    None
}

fn resolve_harvctl() -> Result<String> {
    if let Ok(path) = std::env::var("HARVCTL_PATH") {
        return Ok(path);
    }
    if let Some(path) = probe_target_dir() {
        return Ok(path);
    }
    // Running straight from the workspace without a prior build.
    let sh = Shell::new()?;
    cmd!(sh, "cargo build -p harvctl").run()?;
    Ok(probe_target_dir().unwrap_or_else(|| "harvctl".to_owned()))
}

fn main() {
    let args = Arguments::from_args();

    let tests = vec![
        Trial::test("help_lists_commands", || {
            tests::cli_surface::test_help_lists_commands()?;
            Ok(())
        }),
        Trial::test("version_flag", || {
            tests::cli_surface::test_version_flag()?;
            Ok(())
        }),
        Trial::test("vm_alias_help", || {
            tests::cli_surface::test_vm_alias_help()?;
            Ok(())
        }),
        Trial::test("completion_scripts", || {
            tests::cli_surface::test_completion_scripts()?;
            Ok(())
        }),
        Trial::test("unknown_subcommand_fails", || {
            tests::cli_surface::test_unknown_subcommand_fails()?;
            Ok(())
        }),
        Trial::test("vm_create_count_zero", || {
            tests::offline_validation::test_vm_create_count_zero()?;
            Ok(())
        }),
        Trial::test("template_show_rejects_bad_reference", || {
            tests::offline_validation::test_template_show_rejects_bad_reference()?;
            Ok(())
        }),
        Trial::test("import_source_add_flag_matrix", || {
            tests::offline_validation::test_import_source_add_flag_matrix()?;
            Ok(())
        }),
        Trial::test("login_rejects_invalid_token", || {
            tests::offline_validation::test_login_rejects_invalid_token()?;
            Ok(())
        }),
        Trial::test("vm_list_without_kubeconfig", || {
            tests::offline_validation::test_vm_list_without_kubeconfig()?;
            Ok(())
        }),
        Trial::test("get_config_without_login", || {
            tests::offline_validation::test_get_config_without_login()?;
            Ok(())
        }),
    ];

    libtest_mimic::run(&args, tests).exit();
}
