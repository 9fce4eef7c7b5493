//! SSH keypair subcommands.

use clap::{Parser, Subcommand};
use color_eyre::Result;

use crate::client;
use crate::resources::KeyPair;
use crate::tableutil::new_table;
use crate::vm::NamespaceOpts;
use crate::Settings;

/// Manage SSH keypairs.
#[derive(Debug, Parser)]
pub struct KeypairOpts {
    #[command(subcommand)]
    command: Option<KeypairCommands>,

    #[clap(flatten)]
    namespace: NamespaceOpts,
}

#[derive(Debug, Subcommand)]
pub enum KeypairCommands {
    /// List all the SSH keypairs available in Harvester
    #[clap(alias = "ls")]
    List(ListOpts),
}

#[derive(Debug, Parser)]
pub struct ListOpts {
    #[clap(flatten)]
    pub namespace: NamespaceOpts,
}

impl KeypairOpts {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let KeypairCommands::List(opts) = self.command.unwrap_or(KeypairCommands::List(ListOpts {
            namespace: self.namespace,
        }));
        list(opts, settings)
    }
}

fn list(opts: ListOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    let keys: Vec<KeyPair> = c.list(
        &client::harvester(Some(&opts.namespace.namespace), "keypairs", None),
        None,
    )?;

    let mut table = new_table(&["NAME", "FINGERPRINT", "CREATION TIMESTAMP"]);
    for key in &keys {
        table.add_row(vec![
            key.metadata.name.clone(),
            key.status.finger_print.clone(),
            key.metadata.creation_timestamp.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}
