//! `get-config`: fetch the Harvester cluster kubeconfig from the management
//! server and store it locally.

use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::Result;
use tracing::info;

use crate::config::{create_private_dir, Config, ServerConfig};
use crate::errors::HarvesterError;
use crate::rancher::{self, ManagementClient};
use crate::Settings;

/// File name of the stored kubeconfig.
pub const KUBECONFIG_FILENAME: &str = "config";

#[derive(Debug, Parser)]
pub struct GetConfigOpts {
    /// Directory in which to store the kubeconfig file
    #[clap(long)]
    pub path: Option<PathBuf>,

    /// Name of the cluster in Rancher for which the kubeconfig is generated
    #[clap(long, env = "HARVESTER_CLUSTER_NAME", default_value = "local")]
    pub cluster: String,
}

pub fn run(opts: GetConfigOpts, settings: &Settings) -> Result<()> {
    let config = Config::load(&settings.rancher_config_dir)?;
    let server = config.focused_server()?;
    fetch_and_write(server, &opts.cluster, opts.path.as_deref())
}

/// Lookup the cluster, generate its kubeconfig and write it to
/// `<dir>/config` (default `~/.harvester`).
pub fn fetch_and_write(server: &ServerConfig, cluster: &str, dir: Option<&Path>) -> Result<()> {
    let client = ManagementClient::from_server(server)?;
    let resource = rancher::lookup(&client, cluster, &["cluster"]).map_err(|e| {
        HarvesterError::lookup(format!(
            "no cluster found for [{cluster}], run `harvctl login` first: {e}"
        ))
    })?;
    let kubeconfig = client.generate_kubeconfig(&resource.id)?;
    write_kubeconfig(&kubeconfig, dir)
}

fn write_kubeconfig(content: &str, dir: Option<&Path>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::home_dir()
            .ok_or_else(|| HarvesterError::config("unable to determine the home directory"))?
            .join(".harvester"),
    };
    create_private_dir(&dir)?;

    let path = dir.join(KUBECONFIG_FILENAME);
    info!("Saving config to {}", path.display());
    std::fs::write(&path, content)
        .map_err(|e| HarvesterError::config(format!("writing {}: {e}", path.display())))?;
    info!(
        "Successfully written {} bytes to {}",
        content.len(),
        path.display()
    );
    Ok(())
}
