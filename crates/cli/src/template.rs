//! VM template subcommands: list and show.

use base64::Engine;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde::Serialize;

use crate::client::{self, HarvesterClient};
use crate::errors::HarvesterError;
use crate::resources::{
    PersistentVolumeClaim, Secret, VirtualMachineTemplate, VirtualMachineTemplateVersion,
    ANNOTATION_IMAGE_ID, ANNOTATION_SSH_NAMES, ANNOTATION_VOLUME_CLAIM_TEMPLATES,
    LABEL_TEMPLATE_ID,
};
use crate::tableutil::new_table;
use crate::vm::NamespaceOpts;
use crate::Settings;

/// Manage VM templates.
#[derive(Debug, Parser)]
pub struct TemplateOpts {
    #[command(subcommand)]
    command: Option<TemplateCommands>,

    #[clap(flatten)]
    namespace: NamespaceOpts,
}

#[derive(Debug, Subcommand)]
pub enum TemplateCommands {
    /// List all the VM templates available in Harvester
    #[clap(alias = "ls")]
    List(ListOpts),

    /// Show the content of a VM template version
    #[clap(alias = "get")]
    Show(ShowOpts),
}

#[derive(Debug, Parser)]
pub struct ListOpts {
    #[clap(flatten)]
    pub namespace: NamespaceOpts,
}

#[derive(Debug, Parser)]
pub struct ShowOpts {
    /// Template reference in the format <VM_TEMPLATE_NAME>:<VERSION>
    pub template: String,

    #[clap(flatten)]
    pub namespace: NamespaceOpts,
}

/// The YAML document `template show` renders.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateData {
    name: String,
    version: i32,
    image: String,
    cpus: u32,
    memory: String,
    interfaces: Vec<InterfaceData>,
    keypairs: Vec<String>,
    volumes: Vec<VolumeData>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct InterfaceData {
    name: String,
    #[serde(rename = "type")]
    model: String,
    network_type: String,
    network_name: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct VolumeData {
    name: String,
    #[serde(rename = "type")]
    volume_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    persistent_volume_claim: Option<PvcData>,
    #[serde(rename = "cloudInit", skip_serializing_if = "Option::is_none")]
    cloud_init_data: Option<CloudInitData>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct PvcData {
    claim_name: String,
    size: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudInitData {
    name: String,
    network_data: String,
    user_data: String,
}

impl TemplateOpts {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let command = self.command.unwrap_or(TemplateCommands::List(ListOpts {
            namespace: self.namespace,
        }));
        match command {
            TemplateCommands::List(opts) => list(opts, settings),
            TemplateCommands::Show(opts) => show(opts, settings),
        }
    }
}

fn list(opts: ListOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    let templates: Vec<VirtualMachineTemplate> = c.list(
        &client::harvester(
            Some(&opts.namespace.namespace),
            "virtualmachinetemplates",
            None,
        ),
        None,
    )?;

    let mut table = new_table(&["NAME", "LATEST_VERSION"]);
    for template in &templates {
        table.add_row(vec![
            template.metadata.name.clone(),
            template.status.latest_version.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn show(opts: ShowOpts, settings: &Settings) -> Result<()> {
    let (name, version) = parse_show_ref(&opts.template)?;
    let c = settings.harvester_client()?;
    let ns = &opts.namespace.namespace;

    let selector = format!("{LABEL_TEMPLATE_ID}={name}");
    let versions: Vec<VirtualMachineTemplateVersion> = c.list(
        &client::harvester(Some(ns), "virtualmachinetemplateversions", None),
        Some(&selector),
    )?;
    let matching = versions
        .into_iter()
        .find(|candidate| candidate.status.version == version)
        .ok_or_else(|| {
            HarvesterError::lookup(format!("no version {version} found for template {name}"))
        })?;

    let data = TemplateData {
        name: matching
            .metadata
            .labels
            .get(LABEL_TEMPLATE_ID)
            .cloned()
            .unwrap_or_else(|| name.clone()),
        version: matching.status.version,
        image: image_display_name(&matching, &c)?,
        cpus: matching
            .spec
            .vm
            .spec
            .template
            .as_ref()
            .and_then(|t| t.spec.domain.cpu.as_ref())
            .map(|cpu| cpu.cores)
            .unwrap_or(0),
        memory: matching
            .spec
            .vm
            .spec
            .template
            .as_ref()
            .and_then(|t| t.spec.domain.resources.limits.get("memory"))
            .cloned()
            .unwrap_or_default(),
        interfaces: map_interface_data(&matching),
        keypairs: keypairs_from_annotation(&matching)?,
        volumes: map_volume_data(&c, &matching)?,
    };

    let rendered = serde_yaml::to_string(&data)
        .map_err(|e| HarvesterError::parse(format!("failed during encoding to YAML: {e}")))?;
    println!("{rendered}");
    Ok(())
}

/// `<name>:<version>` with a numeric version; anything else is rejected.
fn parse_show_ref(raw: &str) -> crate::errors::Result<(String, i32)> {
    let (name, version) = raw.split_once(':').ok_or_else(|| {
        HarvesterError::validation(
            "please give a VM template with a version in the format <VM_TEMPLATE_NAME>:<VERSION>",
        )
    })?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(HarvesterError::validation(format!(
            "template name {name:?} has an unexpected format"
        )));
    }
    let version = version
        .parse()
        .map_err(|_| HarvesterError::validation("failed to convert version to integer"))?;
    Ok((name.to_string(), version))
}

fn keypairs_from_annotation(
    version: &VirtualMachineTemplateVersion,
) -> crate::errors::Result<Vec<String>> {
    let Some(raw) = version
        .spec
        .vm
        .spec
        .template
        .as_ref()
        .and_then(|t| t.metadata.annotations.get(ANNOTATION_SSH_NAMES))
    else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw)
        .map_err(|e| HarvesterError::parse(format!("decoding ssh names annotation: {e}")))
}

fn claim_templates(
    version: &VirtualMachineTemplateVersion,
) -> crate::errors::Result<Vec<PersistentVolumeClaim>> {
    let Some(raw) = version
        .spec
        .vm
        .metadata
        .annotations
        .get(ANNOTATION_VOLUME_CLAIM_TEMPLATES)
    else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw)
        .map_err(|e| HarvesterError::parse(format!("decoding volume claim templates: {e}")))
}

/// Resolve the image display name through the claim template annotation.
fn image_display_name(
    version: &VirtualMachineTemplateVersion,
    c: &HarvesterClient,
) -> Result<String> {
    let claims = claim_templates(version)?;
    let image_id_full = claims
        .iter()
        .find_map(|claim| claim.metadata.annotations.get(ANNOTATION_IMAGE_ID))
        .cloned()
        .ok_or_else(|| HarvesterError::lookup("no image id found in template"))?;

    let (image_ns, image_id) = image_id_full
        .split_once('/')
        .ok_or_else(|| HarvesterError::parse(format!("malformed image id {image_id_full:?}")))?;

    let image: crate::resources::VirtualMachineImage = c.get(&client::harvester(
        Some(image_ns),
        "virtualmachineimages",
        Some(image_id),
    ))?;
    Ok(image.spec.display_name)
}

fn map_interface_data(version: &VirtualMachineTemplateVersion) -> Vec<InterfaceData> {
    let Some(template) = version.spec.vm.spec.template.as_ref() else {
        return Vec::new();
    };
    template
        .spec
        .domain
        .devices
        .interfaces
        .iter()
        .map(|iface| {
            let (network_type, network_name) = template
                .spec
                .networks
                .iter()
                .find(|network| network.name == iface.name)
                .map(|network| match &network.multus {
                    Some(multus) => ("multus".to_string(), multus.network_name.clone()),
                    None => ("pod".to_string(), String::new()),
                })
                .unwrap_or_default();
            InterfaceData {
                name: iface.name.clone(),
                model: iface.model.clone().unwrap_or_default(),
                network_type,
                network_name,
            }
        })
        .collect()
}

fn map_volume_data(
    c: &HarvesterClient,
    version: &VirtualMachineTemplateVersion,
) -> Result<Vec<VolumeData>> {
    let claims = claim_templates(version)?;
    let Some(template) = version.spec.vm.spec.template.as_ref() else {
        return Ok(Vec::new());
    };

    let mut volumes = Vec::new();
    for volume in &template.spec.volumes {
        if let Some(pvc) = &volume.persistent_volume_claim {
            let size = claims
                .iter()
                .find(|claim| claim.metadata.name == pvc.claim_name)
                .and_then(|claim| claim.spec.resources.requests.get("storage"))
                .cloned()
                .unwrap_or_default();
            volumes.push(VolumeData {
                name: volume.name.clone(),
                volume_type: "persistentVolumeClaim".to_string(),
                persistent_volume_claim: Some(PvcData {
                    claim_name: pvc.claim_name.clone(),
                    size,
                }),
                cloud_init_data: None,
            });
        }
        if let Some(cloud_init) = &volume.cloud_init_no_cloud {
            let secret_name = cloud_init
                .user_data_secret_ref
                .as_ref()
                .map(|secret_ref| secret_ref.name.clone())
                .unwrap_or_default();
            let (user_data, network_data) = if secret_name.is_empty() {
                (
                    cloud_init.user_data.clone().unwrap_or_default(),
                    cloud_init.network_data.clone().unwrap_or_default(),
                )
            } else {
                (
                    cloud_init_from_secret(c, &secret_name, &version.metadata.namespace, "userdata")?,
                    cloud_init_from_secret(
                        c,
                        &secret_name,
                        &version.metadata.namespace,
                        "networkdata",
                    )?,
                )
            };
            volumes.push(VolumeData {
                name: volume.name.clone(),
                volume_type: "cloudInit".to_string(),
                persistent_volume_claim: None,
                cloud_init_data: Some(CloudInitData {
                    name: secret_name,
                    network_data,
                    user_data,
                }),
            });
        }
    }
    Ok(volumes)
}

/// Cloud-init text stored in a secret; values arrive base64-encoded.
fn cloud_init_from_secret(
    c: &HarvesterClient,
    secret_name: &str,
    namespace: &str,
    data_type: &str,
) -> Result<String> {
    let secret: Secret = c
        .get_opt(&client::core(namespace, "secrets", Some(secret_name)))?
        .ok_or_else(|| {
            HarvesterError::lookup(format!("cloud-init secret {secret_name} was not found"))
        })?;
    let Some(encoded) = secret.data.get(data_type) else {
        return Ok(String::new());
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| HarvesterError::parse(format!("decoding secret {secret_name}: {e}")))?;
    String::from_utf8(decoded)
        .map_err(|e| HarvesterError::parse(format!("secret {secret_name} is not UTF-8: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_show_ref() {
        assert_eq!(
            parse_show_ref("ubuntu-template:2").unwrap(),
            ("ubuntu-template".to_string(), 2)
        );
        assert!(parse_show_ref("ubuntu-template").is_err());
        assert!(parse_show_ref("ubuntu-template:latest").is_err());
        assert!(parse_show_ref("bad name:1").is_err());
        assert!(parse_show_ref(":1").is_err());
    }
}
