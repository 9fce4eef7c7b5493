//! Validation and configuration error paths that fail before any network
//! call, exercised end-to-end through the binary.

use std::process::Output;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use xshell::{cmd, Shell};

use crate::get_harvctl_command;

/// Run harvctl with the config env vars pinned inside a temp directory so
/// the tests never touch (or depend on) a real configuration.
fn run_isolated(args: &[&str]) -> Result<Output> {
    let sh = Shell::new()?;
    let harvctl = get_harvctl_command()?;
    let dir = tempfile::tempdir()?;
    let output = cmd!(sh, "{harvctl} {args...}")
        .env(
            "HARVESTER_CONFIG",
            dir.path().join("harvester").join("config"),
        )
        .env("RANCHER_CONFIG", dir.path().join("rancher"))
        .ignore_status()
        .output()?;
    Ok(output)
}

fn expect_failure_containing(args: &[&str], needle: &str) -> Result<()> {
    let output = run_isolated(args)?;
    if output.status.success() {
        return Err(eyre!("command {args:?} unexpectedly succeeded"));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.contains(needle) {
        return Err(eyre!(
            "command {args:?} failed without the expected message {needle:?}; stderr:\n{stderr}"
        ));
    }
    Ok(())
}

pub fn test_vm_create_count_zero() -> Result<()> {
    expect_failure_containing(
        &["vm", "create", "some-vm", "--count", "0"],
        "VM count provided is 0",
    )
}

pub fn test_template_show_rejects_bad_reference() -> Result<()> {
    expect_failure_containing(
        &["template", "show", "no-version-given"],
        "format <VM_TEMPLATE_NAME>:<VERSION>",
    )?;
    expect_failure_containing(
        &["template", "show", "some-template:latest"],
        "failed to convert version to integer",
    )
}

pub fn test_import_source_add_flag_matrix() -> Result<()> {
    let base = [
        "import",
        "source-add",
        "my-source",
        "--source-cluster-namespace",
        "default",
        "--endpoint",
        "https://vcenter.example.com",
        "--credentials-secret",
        "default/creds",
    ];

    // vmware requires dc and forbids region
    let mut args = base.to_vec();
    args.extend(["--source-cluster-type", "vmware"]);
    expect_failure_containing(&args, "dc is required for vmware")?;

    let mut args = base.to_vec();
    args.extend(["--source-cluster-type", "vmware", "--dc", "dc-1", "--region", "eu"]);
    expect_failure_containing(&args, "region is not supported for vmware")?;

    // openstack requires region and forbids dc
    let mut args = base.to_vec();
    args.extend(["--source-cluster-type", "openstack"]);
    expect_failure_containing(&args, "region is required for openstack")?;

    let mut args = base.to_vec();
    args.extend(["--source-cluster-type", "openstack", "--region", "eu", "--dc", "dc-1"]);
    expect_failure_containing(&args, "dc is not supported for openstack")?;

    // bad credentials secret format
    let args = [
        "import",
        "source-add",
        "my-source",
        "--source-cluster-namespace",
        "default",
        "--endpoint",
        "https://vcenter.example.com",
        "--credentials-secret",
        "no-slash",
        "--source-cluster-type",
        "vmware",
        "--dc",
        "dc-1",
    ];
    expect_failure_containing(&args, "invalid credentials secret")
}

pub fn test_login_rejects_invalid_token() -> Result<()> {
    expect_failure_containing(
        &["login", "https://rancher.example.com", "--token", "not-a-token"],
        "invalid token",
    )
}

pub fn test_vm_list_without_kubeconfig() -> Result<()> {
    // The temp kubeconfig path does not exist, so the client cannot be
    // built and the command points the user at login.
    let output = run_isolated(&["vm", "list"])?;
    if output.status.success() {
        return Err(eyre!("vm list without a kubeconfig unexpectedly succeeded"));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.contains("kubeconfig") {
        return Err(eyre!("unexpected error output:\n{stderr}"));
    }
    Ok(())
}

pub fn test_get_config_without_login() -> Result<()> {
    expect_failure_containing(&["get-config"], "no configuration found")
}
