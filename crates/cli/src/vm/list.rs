//! `vm list` output.

use std::collections::HashMap;

use clap::Parser;
use color_eyre::Result;

use crate::client;
use crate::resources::{VirtualMachine, VirtualMachineInstance};
use crate::tableutil::new_table;
use crate::vm::NamespaceOpts;
use crate::Settings;

#[derive(Debug, Parser)]
pub struct ListOpts {
    #[clap(flatten)]
    pub namespace: NamespaceOpts,
}

pub fn run(opts: ListOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    let ns = &opts.namespace.namespace;

    let vms: Vec<VirtualMachine> = c.list(&client::kubevirt(ns, "virtualmachines", None), None)?;
    let vmis: Vec<VirtualMachineInstance> =
        c.list(&client::kubevirt(ns, "virtualmachineinstances", None), None)?;
    let vmi_map: HashMap<&str, &VirtualMachineInstance> = vmis
        .iter()
        .map(|vmi| (vmi.metadata.name.as_str(), vmi))
        .collect();

    let mut table = new_table(&["STATE", "NAME", "NODE", "CPU", "RAM", "IP ADDRESS"]);
    for vm in &vms {
        let vmi = vmi_map.get(vm.metadata.name.as_str());
        let ip = vmi
            .and_then(|vmi| vmi.status.interfaces.first())
            .map(|iface| iface.ip_address.as_str())
            .unwrap_or("");
        let node = vmi.map(|vmi| vmi.status.node_name.as_str()).unwrap_or("");

        let (cpu, memory) = vm
            .spec
            .template
            .as_ref()
            .map(|template| {
                let domain = &template.spec.domain;
                let cores = domain.cpu.as_ref().map(|cpu| cpu.cores).unwrap_or(0);
                // RAM column shows the limit, falling back to the request
                // when no limit was set.
                let memory = domain
                    .resources
                    .limits
                    .get("memory")
                    .or_else(|| domain.resources.requests.get("memory"))
                    .cloned()
                    .unwrap_or_default();
                (cores, memory)
            })
            .unwrap_or((0, String::new()));

        table.add_row(vec![
            vm.status.printable_status.clone(),
            vm.metadata.name.clone(),
            node.to_string(),
            cpu.to_string(),
            memory,
            ip.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
