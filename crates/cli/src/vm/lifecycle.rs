//! VM lifecycle operations: start, stop, restart, delete.
//!
//! Each operation accepts any mix of literal names and `*`/`?` patterns;
//! patterns expand against the VM list while unmatched literal names are a
//! hard error. Batches are sequential with no rollback.

use clap::Parser;
use color_eyre::Result;
use tracing::info;

use crate::client::{self, HarvesterClient};
use crate::errors::HarvesterError;
use crate::resources::{VirtualMachine, ANNOTATION_REMOVED_PVCS};
use crate::vm::wildcard::{is_wildcard, match_vm_names};
use crate::vm::NamespaceOpts;
use crate::Settings;

#[derive(Debug, Parser)]
pub struct NamesOpts {
    /// VM names, or glob patterns using `*` and `?`
    #[clap(required = true)]
    pub names: Vec<String>,

    #[clap(flatten)]
    pub namespace: NamespaceOpts,
}

pub fn start(opts: NamesOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    for vm in resolve_vms(&c, &opts)? {
        set_running(&c, &opts.namespace.namespace, vm, true)?;
    }
    Ok(())
}

pub fn stop(opts: NamesOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    for vm in resolve_vms(&c, &opts)? {
        set_running(&c, &opts.namespace.namespace, vm, false)?;
    }
    Ok(())
}

/// Power-cycle: stop everything, then start it again.
pub fn restart(opts: NamesOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    for vm in resolve_vms(&c, &opts)? {
        set_running(&c, &opts.namespace.namespace, vm, false)?;
    }
    for vm in resolve_vms(&c, &opts)? {
        set_running(&c, &opts.namespace.namespace, vm, true)?;
    }
    Ok(())
}

pub fn delete(opts: NamesOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    for vm in resolve_vms(&c, &opts)? {
        delete_with_pvcs(&c, &opts.namespace.namespace, vm)?;
    }
    Ok(())
}

/// Expand the name arguments into VM objects: literal names resolve via GET
/// (not found is an error), patterns filter the full list in input order.
fn resolve_vms(c: &HarvesterClient, opts: &NamesOpts) -> Result<Vec<VirtualMachine>> {
    let ns = &opts.namespace.namespace;
    let mut result = Vec::new();
    for name in &opts.names {
        if is_wildcard(name) {
            let all: Vec<VirtualMachine> =
                c.list(&client::kubevirt(ns, "virtualmachines", None), None)?;
            let all_names: Vec<String> =
                all.iter().map(|vm| vm.metadata.name.clone()).collect();
            let matching = match_vm_names(name, &all_names)?;
            info!(
                "number of matching VMs for pattern {}: {}",
                name,
                matching.len()
            );
            for vm in all {
                if matching.contains(&vm.metadata.name) {
                    result.push(vm);
                }
            }
        } else {
            let vm: VirtualMachine = c
                .get_opt(&client::kubevirt(ns, "virtualmachines", Some(name)))?
                .ok_or_else(|| {
                    HarvesterError::lookup(format!("no VM with the name {name} found"))
                })?;
            result.push(vm);
        }
    }
    Ok(result)
}

/// Flip the power state. A merge-patch keeps every field the server holds
/// beyond the ones this client models.
fn set_running(
    c: &HarvesterClient,
    namespace: &str,
    vm: VirtualMachine,
    running: bool,
) -> Result<()> {
    let name = vm.metadata.name;
    let _: VirtualMachine = c.merge_patch(
        &client::kubevirt(namespace, "virtualmachines", Some(&name)),
        &serde_json::json!({"spec": {"running": running}}),
    )?;
    info!(
        "VM {} {} successfully",
        name,
        if running { "started" } else { "stopped" }
    );
    Ok(())
}

/// Record the VM's claims for removal, then delete the VM itself.
fn delete_with_pvcs(c: &HarvesterClient, namespace: &str, vm: VirtualMachine) -> Result<()> {
    let removed_pvcs: Vec<&str> = vm
        .spec
        .template
        .iter()
        .flat_map(|template| template.spec.volumes.iter())
        .filter_map(|volume| {
            volume
                .persistent_volume_claim
                .as_ref()
                .map(|pvc| pvc.claim_name.as_str())
        })
        .collect();

    let name = vm.metadata.name.clone();
    let path = client::kubevirt(namespace, "virtualmachines", Some(&name));
    let annotation = serde_json::json!({
        "metadata": {"annotations": {ANNOTATION_REMOVED_PVCS: removed_pvcs.join(",")}}
    });
    let _: VirtualMachine = c.merge_patch(&path, &annotation).map_err(|e| {
        HarvesterError::upstream(0, format!("error during removal of PVCs in the VM reference, {e}"))
    })?;
    c.delete(&path)?;
    info!("VM {} deleted successfully", name);
    Ok(())
}
