//! VM image management: list, create (download or upload) and the
//! interactive catalog browser.

use std::collections::HashMap;
use std::path::Path;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde::Deserialize;
use tracing::{debug, info};

use crate::client::{self, HarvesterClient};
use crate::config::{Config, ServerConfig};
use crate::errors::HarvesterError;
use crate::resources::{ObjectMeta, VirtualMachineImage, VirtualMachineImageSpec};
use crate::tableutil::new_table;
use crate::vm::NamespaceOpts;
use crate::Settings;

const DEFAULT_CATALOG_SOURCE: &str =
    "https://raw.githubusercontent.com/belgaied2/harvester-cli/feature-image-upload/image-metadata.json";

/// Manage VM images.
#[derive(Debug, Parser)]
pub struct ImageOpts {
    #[command(subcommand)]
    command: Option<ImageCommands>,

    #[clap(flatten)]
    namespace: NamespaceOpts,
}

#[derive(Debug, Subcommand)]
pub enum ImageCommands {
    /// List all the VM images available in Harvester
    #[clap(alias = "ls")]
    List(ListOpts),

    /// Create a VM image from an HTTP(S) link or a local file
    #[clap(alias = "add")]
    Create(CreateOpts),

    /// Browse a catalog of freely available images and import one
    #[clap(alias = "cat")]
    Catalog(CatalogOpts),
}

#[derive(Debug, Parser)]
pub struct ListOpts {
    #[clap(flatten)]
    pub namespace: NamespaceOpts,
}

#[derive(Debug, Parser)]
pub struct CreateOpts {
    /// Display name of the VM image
    pub display_name: String,

    #[clap(flatten)]
    pub namespace: NamespaceOpts,

    /// HTTP(S) link or local file path Harvester will use to get the image
    #[clap(long, env = "HARVESTER_VM_IMAGE_LINK")]
    pub source: String,

    /// Description of the VM image
    #[clap(long, env = "HARVESTER_VM_IMAGE_DESCRIPTION", default_value = "")]
    pub description: String,
}

#[derive(Debug, Parser)]
pub struct CatalogOpts {
    #[clap(flatten)]
    pub namespace: NamespaceOpts,

    /// Location of the catalog metadata JSON file
    #[clap(long, env = "HARVESTER_CATALOG_METADATA", default_value = DEFAULT_CATALOG_SOURCE)]
    pub metadata_url: String,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(rename = "HarvesterImageCatalog", default)]
    harvester_image_catalog: HashMap<String, Vec<CatalogEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CatalogEntry {
    short_name: String,
    version: String,
    url: String,
    build: String,
}

impl ImageOpts {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let command = self.command.unwrap_or(ImageCommands::List(ListOpts {
            namespace: self.namespace,
        }));
        match command {
            ImageCommands::List(opts) => list(opts, settings),
            ImageCommands::Create(opts) => create(opts, settings),
            ImageCommands::Catalog(opts) => catalog(opts, settings),
        }
    }
}

fn list(opts: ListOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    let images: Vec<VirtualMachineImage> = c.list(
        &client::harvester(Some(&opts.namespace.namespace), "virtualmachineimages", None),
        None,
    )?;

    let mut table = new_table(&["NAME", "ID", "SOURCE TYPE", "URL"]);
    for image in &images {
        table.add_row(vec![
            image.spec.display_name.clone(),
            image.metadata.name.clone(),
            image.spec.source_type.clone(),
            image.spec.url.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn create(opts: CreateOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    let ns = &opts.namespace.namespace;

    if opts.source.starts_with("http") {
        let _ = create_image_object(&c, ns, &opts.display_name, &opts.description, "download", &opts.source)?;
        return Ok(());
    }

    let path = Path::new(&opts.source);
    let metadata = std::fs::metadata(path).map_err(|_| {
        HarvesterError::validation(
            "source flag is neither a valid http link nor a valid filepath",
        )
    })?;
    debug!("source is a valid file");

    let (server, harvester_url) = harvester_api_from_config(settings)?;
    info!("successfully computed URL and credentials to Harvester");

    let image_name =
        create_image_object(&c, ns, &opts.display_name, &opts.description, "upload", "")?;
    info!("image object successfully created in the Kubernetes API");

    upload_image_file(&server, &harvester_url, ns, &image_name, path, metadata.len())?;
    info!("successfully uploaded the image file");
    Ok(())
}

/// POST the image file as multipart to the Harvester upload action, going
/// through the management server's proxy with its token and CA.
fn upload_image_file(
    server: &ServerConfig,
    harvester_url: &str,
    namespace: &str,
    image_name: &str,
    path: &Path,
    size: u64,
) -> Result<()> {
    let mut builder = reqwest::blocking::Client::builder();
    if !server.ca_certs.is_empty() {
        let pem = crate::config::normalize_cert(&server.ca_certs);
        let cert = reqwest::Certificate::from_pem(pem.as_bytes())
            .map_err(|e| HarvesterError::auth(format!("invalid CA certificate in configuration: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }
    let http = builder
        .build()
        .map_err(|e| HarvesterError::config(format!("building HTTP client: {e}")))?;

    let form = reqwest::blocking::multipart::Form::new().part(
        "chunk",
        reqwest::blocking::multipart::Part::file(path)
            .map_err(|e| HarvesterError::validation(format!("reading image file: {e}")))?,
    );
    info!("uploading image file ...");

    let url = format!(
        "{harvester_url}/v1/harvester/harvesterhci.io.virtualmachineimages/{namespace}/{image_name}"
    );
    let response = http
        .post(&url)
        .query(&[("action", "upload"), ("size", &size.to_string())])
        .bearer_auth(&server.token_key)
        .multipart(form)
        .send()
        .map_err(|e| HarvesterError::upstream(0, format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(HarvesterError::upstream(
            status.as_u16(),
            format!("uploading image file to harvester was not successful: {body}"),
        )
        .into());
    }
    Ok(())
}

/// Create the VirtualMachineImage API object and return its generated name.
fn create_image_object(
    c: &HarvesterClient,
    namespace: &str,
    display_name: &str,
    description: &str,
    source_type: &str,
    source: &str,
) -> Result<String> {
    let image = VirtualMachineImage {
        metadata: ObjectMeta {
            generate_name: Some("image-".to_string()),
            ..Default::default()
        },
        spec: VirtualMachineImageSpec {
            display_name: display_name.to_string(),
            description: description.to_string(),
            source_type: source_type.to_string(),
            url: source.to_string(),
        },
        ..Default::default()
    };
    let created: VirtualMachineImage = c.create(
        &client::harvester(Some(namespace), "virtualmachineimages", None),
        &image,
    )?;
    Ok(created.metadata.name)
}

/// Match the kubeconfig's API host against the stored server entries to
/// recover the management token and CA for that cluster.
fn harvester_api_from_config(settings: &Settings) -> Result<(ServerConfig, String)> {
    let rest = crate::kubeconfig::load(&settings.harvester_config)?;
    let api_url = reqwest::Url::parse(&rest.host)
        .map_err(|e| HarvesterError::config(format!("parsing API server URL: {e}")))?;
    let api_host = url_host(&api_url);

    let config = Config::load(&settings.rancher_config_dir)?;
    for server in config.servers.values() {
        let Ok(server_url) = reqwest::Url::parse(&server.url) else {
            continue;
        };
        if url_host(&server_url) == api_host {
            return Ok((server.clone(), rest.host.clone()));
        }
    }
    Err(HarvesterError::config("not able to determine harvester API URL").into())
}

fn url_host(url: &reqwest::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn catalog(opts: CatalogOpts, settings: &Settings) -> Result<()> {
    debug!("current metadata url: {}", opts.metadata_url);

    let body = reqwest::blocking::get(&opts.metadata_url)
        .and_then(|response| response.text())
        .map_err(|e| HarvesterError::upstream(0, format!("fetching image catalog: {e}")))?;
    let catalog: Catalog = serde_json::from_str(&body)
        .map_err(|e| HarvesterError::parse(format!("decoding image catalog: {e}")))?;

    let mut table = new_table(&["NUMBER", "NAME", "NUMBER OF IMAGES"]);
    let mut os_choices = Vec::new();
    for (os, images) in &catalog.harvester_image_catalog {
        os_choices.push(os.clone());
        table.add_row(vec![
            os_choices.len().to_string(),
            os.clone(),
            images.len().to_string(),
        ]);
    }
    println!("{table}");

    println!("Insert a number to select the image OS: ");
    let stdin = std::io::stdin();
    let mut reader = stdin.lock();
    let selection = crate::term::selection_from_input(&mut reader, os_choices.len())?;
    let os_selection = &os_choices[selection - 1];

    println!("\nHere are the images available for {os_selection}\n");
    let entries = &catalog.harvester_image_catalog[os_selection];
    let mut table = new_table(&["NUMBER", "NAME", "VERSION", "BUILD", "URL"]);
    for (i, entry) in entries.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            entry.short_name.clone(),
            entry.version.clone(),
            entry.build.clone(),
            entry.url.clone(),
        ]);
    }
    println!("{table}");

    println!("\nInsert a number to select an image to download: ");
    let selection = crate::term::selection_from_input(&mut reader, entries.len())?;
    let image_url = &entries[selection - 1].url;
    println!("\nYour image URL is: {image_url}");

    let parsed = reqwest::Url::parse(image_url).map_err(|e| {
        HarvesterError::parse(format!("the url parsed from the metadata file is invalid, {e}"))
    })?;
    let image_filename = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or("image")
        .to_string();

    let c = settings.harvester_client()?;
    let created_name = create_image_object(
        &c,
        &opts.namespace.namespace,
        &image_filename,
        "",
        "download",
        image_url,
    )?;
    info!(
        "image was created in Harvester with display name {} and id {}",
        image_filename, created_name
    );
    Ok(())
}
