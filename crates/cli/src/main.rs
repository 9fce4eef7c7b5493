use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use color_eyre::{Report, Result};

mod client;
mod cloudinit;
mod complete;
mod config;
mod errors;
mod getconfig;
mod image;
mod import;
mod keypair;
mod kubeconfig;
mod login;
mod overcommit;
mod quantity;
mod rancher;
mod resources;
mod shell;
mod tableutil;
mod template;
mod term;
mod vm;

/// A command-line client for Harvester clusters managed through Rancher.
///
/// harvctl talks to the management server for login and kubeconfig
/// handling, and to the cluster-native Harvester/KubeVirt APIs for
/// everything else: virtual machines, images, templates, keypairs and VM
/// imports.
#[derive(Debug, Parser)]
#[clap(name = "harvctl", version)]
struct Cli {
    /// Debug logging
    #[clap(long, global = true)]
    debug: bool,

    /// Path to the Harvester kubeconfig file
    #[clap(long, env = "HARVESTER_CONFIG", global = true)]
    harvester_config: Option<PathBuf>,

    /// Directory holding the Rancher CLI configuration
    #[clap(long, env = "RANCHER_CONFIG", global = true)]
    rancher_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available harvctl commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Log in to a Rancher server managing Harvester
    #[clap(alias = "l")]
    Login(login::LoginOpts),

    /// Get the KUBECONFIG of a Harvester cluster from Rancher
    #[clap(name = "get-config", alias = "c")]
    GetConfig(getconfig::GetConfigOpts),

    /// Manage virtual machines on Harvester
    #[clap(name = "virtualmachine", alias = "vm")]
    VirtualMachine(vm::VmOpts),

    /// Access a VM using SSH
    #[clap(alias = "sh")]
    Shell(shell::ShellOpts),

    /// Manipulate VM templates
    #[clap(alias = "tpl")]
    Template(template::TemplateOpts),

    /// Manipulate VM images
    #[clap(alias = "img")]
    Image(image::ImageOpts),

    /// Manipulate SSH keypairs
    #[clap(aliases = ["key", "ssh-key"])]
    Keypair(keypair::KeypairOpts),

    /// Manage VM imports
    #[clap(subcommand)]
    Import(import::ImportCommands),

    /// Generate shell completion scripts
    Complete(complete::CompleteOpts),
}

/// Resolved global settings threaded through every command.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the Harvester kubeconfig file.
    pub harvester_config: PathBuf,
    /// Directory holding the Rancher-style configuration.
    pub rancher_config_dir: PathBuf,
}

impl Settings {
    fn resolve(cli: &Cli) -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            errors::HarvesterError::config("not able to determine home folder of current user")
        })?;
        Ok(Settings {
            harvester_config: cli
                .harvester_config
                .clone()
                .unwrap_or_else(|| home.join(".harvester").join("config")),
            rancher_config_dir: cli
                .rancher_config
                .clone()
                .unwrap_or_else(|| home.join(".rancher")),
        })
    }

    /// Client for the cluster-native APIs, from the stored kubeconfig.
    pub fn harvester_client(&self) -> errors::Result<client::HarvesterClient> {
        let rest = kubeconfig::load(&self.harvester_config)?;
        client::HarvesterClient::new(&rest)
    }
}

/// Install and configure the tracing/logging system.
///
/// Structured logging with environment-based filtering, error layer
/// integration and stderr output. `--debug` lowers the default filter.
fn install_tracing(debug: bool) {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_filter = if debug { "debug" } else { "info" };
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

/// Main entry point for the harvctl CLI application.
fn main() -> Result<(), Report> {
    let cli = Cli::parse();
    install_tracing(cli.debug);
    color_eyre::install()?;

    let settings = Settings::resolve(&cli)?;

    match cli.command {
        Commands::Login(opts) => login::run(opts, &settings)?,
        Commands::GetConfig(opts) => getconfig::run(opts, &settings)?,
        Commands::VirtualMachine(opts) => opts.run(&settings)?,
        Commands::Shell(opts) => shell::run(opts, &settings)?,
        Commands::Template(opts) => opts.run(&settings)?,
        Commands::Image(opts) => opts.run(&settings)?,
        Commands::Keypair(opts) => opts.run(&settings)?,
        Commands::Import(cmd) => cmd.run(&settings)?,
        Commands::Complete(opts) => complete::run(opts, &mut Cli::command())?,
    }
    Ok(())
}
