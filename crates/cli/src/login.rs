//! `login`: store a management server entry and fetch the Harvester
//! kubeconfig in one go.
//!
//! The flow mirrors the management CLI: validate the URL and token, settle
//! the CA trust question (configured file, server-advertised certificate
//! with interactive acceptance, or pre-trusted), pick the focused project
//! and persist everything before pulling the kubeconfig.

use std::io::Write as _;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{self, Config, ServerConfig};
use crate::errors::HarvesterError;
use crate::getconfig;
use crate::rancher::{self, ManagementClient};
use crate::tableutil::new_table;
use crate::term;
use crate::Settings;

#[derive(Debug, Parser)]
pub struct LoginOpts {
    /// URL of the management server, e.g. https://rancher.yourdomain.com
    pub server_url: String,

    /// Set the project context during login, e.g. c-xxxxx:p-xxxxx
    #[clap(long, default_value = "")]
    pub context: String,

    /// Token from the management server UI, <access-key>:<secret-key>
    #[clap(long, short = 't')]
    pub token: String,

    /// Location of the CA certificates file to use
    #[clap(long)]
    pub cacert: Option<PathBuf>,

    /// Name of the server entry in the local configuration
    #[clap(long, default_value = "rancherDefault")]
    pub name: String,

    /// Skip verification of the CA certificate presented by the server
    #[clap(long)]
    pub skip_verify: bool,

    /// Folder in which the Harvester kubeconfig will be created
    #[clap(long, alias = "path")]
    pub harvester_config_path: Option<PathBuf>,

    /// Harvester cluster for which a kubeconfig should be downloaded
    #[clap(long, default_value = "")]
    pub cluster: String,
}

pub fn run(opts: LoginOpts, settings: &Settings) -> Result<()> {
    let mut config = Config::load(&settings.rancher_config_dir)?;

    let mut server = ServerConfig {
        url: normalize_server_url(&opts.server_url)?,
        ..Default::default()
    };
    let (access_key, secret_key) = parse_token(&opts.token)?;
    server.access_key = access_key;
    server.secret_key = secret_key;
    server.token_key = opts.token.clone();

    if let Some(cacert) = &opts.cacert {
        server.ca_certs = config::load_and_verify_cert(cacert)?;
    }

    let client = match probe(&server) {
        Ok(client) => client,
        // No CA was configured and the server presented an unknown one:
        // fetch it over an unverified connection and let the user decide.
        Err(e) if server.ca_certs.is_empty() && is_certificate_error(&e) => {
            trust_server_cert(&opts, &mut server)?
        }
        Err(e) => return Err(e.into()),
    };

    let project = project_context(&opts, &client)?;
    server.project = project.clone();

    config.current_server = opts.name.clone();
    config.servers.insert(opts.name.clone(), server.clone());
    config.write()?;
    info!("Saved server entry {}", opts.name);

    // Immediately fetch the kubeconfig for the project's cluster so the
    // cluster commands work right after login.
    let cluster_ref = match server.cluster_id() {
        Some(cluster_id) => cluster_id.to_string(),
        None if !opts.cluster.is_empty() => opts.cluster.clone(),
        None => {
            warn!("no project context was selected, skipping kubeconfig download");
            return Ok(());
        }
    };
    getconfig::fetch_and_write(&server, &cluster_ref, opts.harvester_config_path.as_deref())
}

/// Validate the URL and drop any path component.
fn normalize_server_url(raw: &str) -> crate::errors::Result<String> {
    let mut url = reqwest::Url::parse(raw).map_err(|e| {
        HarvesterError::validation(format!(
            "failed to parse SERVERURL ({raw}), make sure it is a valid HTTPS URL \
             (e.g. https://rancher.yourdomain.com or https://1.1.1.1). Error: {e}"
        ))
    })?;
    if !url.has_host() {
        return Err(HarvesterError::validation(format!(
            "failed to parse SERVERURL ({raw}), make sure it is a valid HTTPS URL"
        )));
    }
    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string().trim_end_matches('/').to_string())
}

/// Split a UI token into its access/secret halves.
fn parse_token(token: &str) -> crate::errors::Result<(String, String)> {
    match token.split(':').collect::<Vec<_>>().as_slice() {
        [access, secret] if !access.is_empty() && !secret.is_empty() => {
            Ok((access.to_string(), secret.to_string()))
        }
        _ => Err(HarvesterError::auth("invalid token")),
    }
}

fn probe(server: &ServerConfig) -> crate::errors::Result<ManagementClient> {
    let client = ManagementClient::from_server(server)?;
    client.ping()?;
    Ok(client)
}

fn is_certificate_error(e: &HarvesterError) -> bool {
    matches!(e, HarvesterError::Upstream { .. }) && e.to_string().contains("certificate")
}

/// Fetch the server-advertised CA over an unverified connection and ask the
/// user to accept it (unless `--skip-verify`).
fn trust_server_cert(opts: &LoginOpts, server: &mut ServerConfig) -> Result<ManagementClient> {
    let response = rancher::fetch_cacert_insecure(server)?;
    let cert = config::verify_cert(&response.value)?;

    if !opts.skip_verify {
        println!(
            "The authenticity of server '{}' can't be established.",
            server.url
        );
        println!("CA certificate presented by the server:\n{cert}");
        print!("Do you want to continue connecting (yes/no)? ");
        std::io::stdout().flush().ok();
        let stdin = std::io::stdin();
        if !term::confirm(&mut stdin.lock())? {
            return Err(
                HarvesterError::auth("CA cert of server was not accepted, unable to login").into(),
            );
        }
    }

    server.ca_certs = cert;
    Ok(probe(server)?)
}

/// Decide the focused project: an explicit context, the single project, the
/// conventional Default/System pair, or an interactive pick.
fn project_context(opts: &LoginOpts, client: &ManagementClient) -> Result<String> {
    if !opts.context.is_empty() {
        parse_cluster_and_project_id(&opts.context)?;
        rancher::lookup(client, &opts.context, &["project"]).map_err(|e| {
            HarvesterError::lookup(format!(
                "unable to find context ({}). Make sure the context exists and you have \
                 permissions to use it. Error: {e}",
                opts.context
            ))
        })?;
        return Ok(opts.context.clone());
    }

    let projects = client.projects()?;
    match projects.len() {
        0 => {
            warn!("No projects found, context could not be set. Please create a project and log in again.");
            Ok(String::new())
        }
        1 => {
            info!("Only 1 project available: {}", projects[0].name);
            Ok(projects[0].id.clone())
        }
        len => {
            if len == 2 {
                let has_system = projects.iter().any(|p| p.name == "System");
                let default = projects.iter().find(|p| p.name == "Default");
                if let (true, Some(default)) = (has_system, default) {
                    return Ok(default.id.clone());
                }
            }
            select_project_interactively(client, &projects)
        }
    }
}

fn select_project_interactively(
    client: &ManagementClient,
    projects: &[rancher::Project],
) -> Result<String> {
    let clusters = client.clusters()?;
    let cluster_name = |id: &str| {
        clusters
            .iter()
            .find(|cluster| cluster.id == id)
            .map(|cluster| {
                if cluster.name.is_empty() {
                    cluster.id.clone()
                } else {
                    cluster.name.clone()
                }
            })
            .unwrap_or_else(|| id.to_string())
    };

    let mut table = new_table(&[
        "NUMBER",
        "CLUSTER NAME",
        "PROJECT ID",
        "PROJECT NAME",
        "PROJECT DESCRIPTION",
    ]);
    for (i, project) in projects.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            cluster_name(&project.cluster_id),
            project.id.clone(),
            project.name.clone(),
            project.description.clone(),
        ]);
    }
    println!("{table}");
    print!("Select a Project:");
    std::io::stdout().flush().ok();

    let stdin = std::io::stdin();
    let selection = term::selection_from_input(&mut stdin.lock(), projects.len())?;
    Ok(projects[selection - 1].id.clone())
}

/// Validate a `<cluster>:<project>` context id.
pub(crate) fn parse_cluster_and_project_id(id: &str) -> crate::errors::Result<(String, String)> {
    // Examples: c-qmpbm:p-mm62v, c-qmpbm:project-mm62v, local:p-mm62v
    let pattern = Regex::new("^((local)|(c-[[:alnum:]]{5})):(p|project)-[[:alnum:]]{5}$")
        .map_err(|e| HarvesterError::validation(format!("building context pattern: {e}")))?;
    if !pattern.is_match(id) {
        return Err(HarvesterError::validation(format!(
            "unable to extract clusterid and projectid from [{id}]. Please provide context as \
             local:p-xxxxx, c-xxxxx:p-xxxxx, or c-xxxxx:project-xxxxx"
        )));
    }
    let (cluster, project) = id
        .split_once(':')
        .unwrap_or_default();
    Ok((cluster.to_string(), project.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token() {
        let (access, secret) = parse_token("token-abcde:somesecret").unwrap();
        assert_eq!(access, "token-abcde");
        assert_eq!(secret, "somesecret");
        assert!(parse_token("nocolon").is_err());
        assert!(parse_token("a:b:c").is_err());
        assert!(parse_token(":secret").is_err());
    }

    #[test]
    fn test_normalize_server_url_drops_path() {
        assert_eq!(
            normalize_server_url("https://rancher.example.com/some/path?q=1").unwrap(),
            "https://rancher.example.com"
        );
        assert_eq!(
            normalize_server_url("https://1.1.1.1:8443/").unwrap(),
            "https://1.1.1.1:8443"
        );
        assert!(normalize_server_url("not a url").is_err());
    }

    #[test]
    fn test_parse_cluster_and_project_id() {
        assert_eq!(
            parse_cluster_and_project_id("c-qmpbm:p-mm62v").unwrap(),
            ("c-qmpbm".to_string(), "p-mm62v".to_string())
        );
        assert_eq!(
            parse_cluster_and_project_id("local:p-mm62v").unwrap().0,
            "local"
        );
        assert_eq!(
            parse_cluster_and_project_id("c-qmpbm:project-mm62v").unwrap().1,
            "project-mm62v"
        );
        assert!(parse_cluster_and_project_id("c-toolong1:p-mm62v").is_err());
        assert!(parse_cluster_and_project_id("garbage").is_err());
    }
}
