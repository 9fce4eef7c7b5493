//! Virtual machine subcommands.
//!
//! `virtualmachine` (alias `vm`) groups the listing, creation and lifecycle
//! operations. Running the group without a subcommand lists, matching the
//! upstream default action.

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;

use crate::Settings;

pub mod create;
pub mod lifecycle;
pub mod list;
pub mod wildcard;

/// Shared namespace flag.
#[derive(Debug, Clone, Args)]
pub struct NamespaceOpts {
    /// Namespace of the VM
    #[clap(
        long,
        short = 'n',
        env = "HARVESTER_VM_NAMESPACE",
        default_value = "default"
    )]
    pub namespace: String,
}

/// Manage virtual machines on Harvester.
#[derive(Debug, Parser)]
pub struct VmOpts {
    #[command(subcommand)]
    command: Option<VmCommands>,

    #[clap(flatten)]
    namespace: NamespaceOpts,
}

#[derive(Debug, Subcommand)]
pub enum VmCommands {
    /// List all VMs in the current Harvester cluster
    #[clap(alias = "ls")]
    List(list::ListOpts),

    /// Create one or more VMs from an image or a template
    #[clap(alias = "c")]
    Create(create::CreateOpts),

    /// Delete VMs together with their disks
    #[clap(aliases = ["del", "rm"])]
    Delete(lifecycle::NamesOpts),

    /// Power on VMs
    Start(lifecycle::NamesOpts),

    /// Power off VMs
    Stop(lifecycle::NamesOpts),

    /// Restart VMs
    Restart(lifecycle::NamesOpts),
}

impl VmOpts {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let command = self.command.unwrap_or(VmCommands::List(list::ListOpts {
            namespace: self.namespace,
        }));
        match command {
            VmCommands::List(opts) => list::run(opts, settings),
            VmCommands::Create(opts) => create::run(opts, settings),
            VmCommands::Delete(opts) => lifecycle::delete(opts, settings),
            VmCommands::Start(opts) => lifecycle::start(opts, settings),
            VmCommands::Stop(opts) => lifecycle::stop(opts, settings),
            VmCommands::Restart(opts) => lifecycle::restart(opts, settings),
        }
    }
}
