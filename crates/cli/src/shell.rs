//! `shell`: SSH into a VM.
//!
//! Bridge-networked VMs are reached directly over their interface IP. VMs on
//! the pod network are reached through a port-forward tunnel to the
//! launcher pod: one task holds the tunnel open, a second runs the
//! interactive session once the tunnel reports ready, and Ctrl-C unblocks
//! both.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tokio::io::AsyncBufReadExt;
use tracing::debug;

use crate::client::{self, HarvesterClient};
use crate::errors::HarvesterError;
use crate::resources::{
    Pod, VirtualMachine, VirtualMachineInstance, LABEL_VM_NAME, LABEL_VM_NAME_PREFIX,
};
use crate::vm::NamespaceOpts;
use crate::Settings;

#[derive(Debug, Parser)]
pub struct ShellOpts {
    /// Name of the VM to access
    pub vm_name: String,

    #[clap(flatten)]
    pub namespace: NamespaceOpts,

    /// SSH user to be used for connecting to the VM
    #[clap(long, alias = "user", env = "HARVESTER_VM_SSH_USER", default_value = "ubuntu")]
    pub ssh_user: String,

    /// Path to the SSH private key to use, defaults to ~/.ssh/id_rsa
    #[clap(long, short = 'i', env = "HARVESTER_VM_SSH_KEY")]
    pub ssh_key: Option<PathBuf>,

    /// TCP port to be used to connect to the VM using SSH
    #[clap(long, env = "HARVESTER_VM_SSH_PORT", default_value_t = 22)]
    pub ssh_port: u16,

    /// Connect to the VM through the pod network
    #[clap(long, env = "HARVESTER_VM_POD_NETWORK")]
    pub pod_network: bool,
}

/// How the VM is reachable, with the interface index involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetworkKind {
    Bridge(usize),
    Pod(usize),
}

pub fn run(opts: ShellOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    let ns = &opts.namespace.namespace;

    let vmi: VirtualMachineInstance = c
        .get_opt(&client::kubevirt(ns, "virtualmachineinstances", Some(&opts.vm_name)))?
        .ok_or_else(|| {
            HarvesterError::validation(
                "no virtual machine instance with this name exists in harvester, please check \
                 that it is created and started",
            )
        })?;

    let vm: VirtualMachine =
        c.get(&client::kubevirt(ns, "virtualmachines", Some(&opts.vm_name)))?;
    let kind = network_kind(&vm)?;

    if opts.pod_network || matches!(kind, NetworkKind::Pod(_)) {
        let pod = find_launcher_pod(&c, ns, &opts.vm_name)?;
        let local_port = free_local_port()?;
        debug!("forwarding 127.0.0.1:{} to pod {}", local_port, pod);
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(ssh_over_port_forward(settings, &opts, ns, &pod, local_port))
    } else {
        let NetworkKind::Bridge(index) = kind else {
            unreachable!("pod networks are handled above")
        };
        let ip = vmi
            .status
            .interfaces
            .get(index)
            .map(|iface| iface.ip_address.clone())
            .unwrap_or_default();
        if ip.is_empty() {
            return Err(HarvesterError::validation(
                "the designated VM does not have a valid IP address",
            )
            .into());
        }
        do_ssh(&opts, &ip, opts.ssh_port)
    }
}

/// Any Multus attachment makes the VM bridge-reachable; otherwise fall back
/// to the pod network.
fn network_kind(vm: &VirtualMachine) -> crate::errors::Result<NetworkKind> {
    let networks = vm
        .spec
        .template
        .as_ref()
        .map(|template| template.spec.networks.as_slice())
        .unwrap_or_default();

    let mut pod_index = None;
    for (i, network) in networks.iter().enumerate() {
        if network.multus.is_some() {
            return Ok(NetworkKind::Bridge(i));
        }
        if network.pod.is_some() {
            pod_index = Some(i);
        }
    }
    pod_index.map(NetworkKind::Pod).ok_or_else(|| {
        HarvesterError::validation(format!(
            "no valid network type found for VM: {}",
            vm.metadata.name
        ))
    })
}

/// The launcher pod backing the VM, by name-prefix label first and the
/// plain name label as fallback.
fn find_launcher_pod(c: &HarvesterClient, namespace: &str, vm_name: &str) -> Result<String> {
    let by_prefix = format!("{LABEL_VM_NAME_PREFIX}={vm_name}");
    let mut pods: Vec<Pod> = c.list(&client::core(namespace, "pods", None), Some(&by_prefix))?;
    if pods.is_empty() {
        let by_name = format!("{LABEL_VM_NAME}={vm_name}");
        pods = c.list(&client::core(namespace, "pods", None), Some(&by_name))?;
    }
    pods.into_iter()
        .next()
        .map(|pod| pod.metadata.name)
        .ok_or_else(|| {
            HarvesterError::lookup(format!("unable to find pods for the VM: {vm_name}")).into()
        })
}

/// A port the kernel considers free right now.
fn free_local_port() -> crate::errors::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| HarvesterError::validation(format!("unable to find free local port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| HarvesterError::validation(format!("unable to find free local port: {e}")))?
        .port();
    Ok(port)
}

/// Hold a port-forward tunnel open and run the interactive session through
/// it. Ctrl-C tears both down.
async fn ssh_over_port_forward(
    settings: &Settings,
    opts: &ShellOpts,
    namespace: &str,
    pod_name: &str,
    local_port: u16,
) -> Result<()> {
    println!("pod name: {pod_name}");

    let mut forwarder = tokio::process::Command::new("kubectl")
        .arg("--kubeconfig")
        .arg(&settings.harvester_config)
        .args([
            "port-forward",
            "-n",
            namespace,
            &format!("pod/{pod_name}"),
            &format!("{local_port}:{}", opts.ssh_port),
            "--address",
            "127.0.0.1",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| eyre!("spawning kubectl port-forward (is kubectl installed?): {e}"))?;

    let stdout = forwarder
        .stdout
        .take()
        .ok_or_else(|| eyre!("port-forward stdout was not captured"))?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    // Task one: wait for the tunnel to report readiness.
    let ready = async {
        while let Some(line) = lines.next_line().await? {
            debug!("port-forward: {}", line);
            if line.contains("Forwarding from") {
                return Ok::<bool, std::io::Error>(true);
            }
        }
        Ok(false)
    };

    tokio::select! {
        became_ready = ready => {
            if !became_ready? {
                let _ = forwarder.kill().await;
                return Err(eyre!("port forwarding failed to start"));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Bye...");
            let _ = forwarder.kill().await;
            return Ok(());
        }
        _ = tokio::time::sleep(Duration::from_secs(60)) => {
            let _ = forwarder.kill().await;
            return Err(eyre!("timeout waiting for port forwarding to become ready"));
        }
    }

    // Task two: the interactive session, racing the done signal.
    let mut ssh = ssh_command(opts, "localhost", local_port);
    let result = tokio::select! {
        status = ssh.status() => {
            let status = status.map_err(|e| eyre!("error during execution of ssh command: {e}"))?;
            if status.success() {
                Ok(())
            } else {
                Err(eyre!("ssh exited with {status}"))
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Bye...");
            Ok(())
        }
    };

    let _ = forwarder.kill().await;
    result
}

fn ssh_key_path(opts: &ShellOpts) -> PathBuf {
    opts.ssh_key.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ssh")
            .join("id_rsa")
    })
}

fn ssh_command(opts: &ShellOpts, host: &str, port: u16) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("ssh");
    cmd.arg("-i")
        .arg(ssh_key_path(opts))
        .args(["-p", &port.to_string()])
        .arg(format!("{}@{}", opts.ssh_user, host));
    cmd
}

/// Direct interactive SSH with inherited stdio.
fn do_ssh(opts: &ShellOpts, ip_address: &str, port: u16) -> Result<()> {
    let status = std::process::Command::new("ssh")
        .arg("-i")
        .arg(ssh_key_path(opts))
        .args(["-p", &port.to_string()])
        .arg(format!("{}@{}", opts.ssh_user, ip_address))
        .status()
        .map_err(|e| eyre!("error during execution of ssh command: {e}"))?;
    if !status.success() {
        return Err(eyre!("ssh exited with {status}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{MultusNetwork, Network, PodNetwork, VmiTemplateSpec};

    fn vm_with_networks(networks: Vec<Network>) -> VirtualMachine {
        let mut vm = VirtualMachine::default();
        vm.metadata.name = "web".to_string();
        vm.spec.template = Some(VmiTemplateSpec::default());
        if let Some(template) = vm.spec.template.as_mut() {
            template.spec.networks = networks;
        }
        vm
    }

    #[test]
    fn test_network_kind_prefers_bridge() {
        let vm = vm_with_networks(vec![
            Network {
                name: "default".to_string(),
                multus: None,
                pod: Some(PodNetwork {}),
            },
            Network {
                name: "nic-1".to_string(),
                multus: Some(MultusNetwork {
                    network_name: "vlan1".to_string(),
                }),
                pod: None,
            },
        ]);
        assert_eq!(network_kind(&vm).unwrap(), NetworkKind::Bridge(1));
    }

    #[test]
    fn test_network_kind_pod_only() {
        let vm = vm_with_networks(vec![Network {
            name: "default".to_string(),
            multus: None,
            pod: Some(PodNetwork {}),
        }]);
        assert_eq!(network_kind(&vm).unwrap(), NetworkKind::Pod(0));
    }

    #[test]
    fn test_network_kind_none_is_an_error() {
        let vm = vm_with_networks(Vec::new());
        assert!(network_kind(&vm).is_err());
    }

    #[test]
    fn test_free_local_port_is_nonzero() {
        assert_ne!(free_local_port().unwrap(), 0);
    }
}
