//! VM import management against the migration API group.
//!
//! Source clusters (VMware or OpenStack) are registered first, then
//! individual VMs are imported from them. The vm-import-controller addon
//! has to be enabled once per cluster.

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use tracing::info;

use crate::client::{self, HarvesterClient};
use crate::errors::HarvesterError;
use crate::resources::*;
use crate::tableutil::new_table;
use crate::Settings;

/// Namespace the vm-import-controller and its sources live in.
const IMPORT_NAMESPACE: &str = "harvester-system";
const IMPORT_ADDON_NAME: &str = "vm-import-controller";

/// Manage VM imports.
#[derive(Debug, Subcommand)]
pub enum ImportCommands {
    /// Enable the VM import addon
    Enable,

    /// List VM imports
    List,

    /// Create a VM import
    Create(CreateOpts),

    /// Delete a VM import
    Delete(DeleteOpts),

    /// Add a source cluster for VM imports
    SourceAdd(SourceAddOpts),

    /// Delete a source cluster for VM imports
    SourceDelete(SourceDeleteOpts),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum SourceClusterType {
    Vmware,
    Openstack,
}

impl SourceClusterType {
    fn kind(&self) -> &'static str {
        match self {
            SourceClusterType::Vmware => "VmwareSource",
            SourceClusterType::Openstack => "OpenstackSource",
        }
    }

    fn resource(&self) -> &'static str {
        match self {
            SourceClusterType::Vmware => "vmwaresources",
            SourceClusterType::Openstack => "openstacksources",
        }
    }
}

#[derive(Debug, Parser)]
pub struct CreateOpts {
    /// Name of the VM import
    pub name: String,

    /// Name of the VM to import from the source infrastructure
    #[clap(long, env = "HARVESTER_IMPORT_VM_NAME")]
    pub vm_name: String,

    /// Network mapping in the format <source-network>:<target-network>
    #[clap(long, alias = "net-map")]
    pub network_mapping: Vec<String>,

    /// Name of the source cluster to import the VM from
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER")]
    pub source_cluster: String,

    /// Type of the source cluster to import the VM from
    #[clap(
        long,
        env = "HARVESTER_IMPORT_SOURCE_CLUSTER_TYPE",
        default_value = "vmware"
    )]
    pub source_cluster_type: SourceClusterType,

    /// Namespace of the source cluster configuration
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER_NAMESPACE")]
    pub source_cluster_namespace: String,

    /// Datacenter of the source cluster (vmware only)
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER_DC", default_value = "")]
    pub dc: String,

    /// Region of the source cluster (openstack only)
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER_REGION", default_value = "")]
    pub region: String,
}

#[derive(Debug, Parser)]
pub struct DeleteOpts {
    /// Name of the VM import
    pub name: String,

    /// Namespace of the VM import to be deleted
    #[clap(long, short = 'n', default_value = IMPORT_NAMESPACE)]
    pub namespace: String,
}

#[derive(Debug, Parser)]
pub struct SourceAddOpts {
    /// Name of the source cluster
    pub name: String,

    /// Type of the source cluster to import VMs from
    #[clap(
        long,
        env = "HARVESTER_IMPORT_SOURCE_CLUSTER_TYPE",
        default_value = "vmware"
    )]
    pub source_cluster_type: SourceClusterType,

    /// Namespace of the source cluster configuration
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER_NAMESPACE")]
    pub source_cluster_namespace: String,

    /// Endpoint of the source cluster
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER_ENDPOINT")]
    pub endpoint: String,

    /// Datacenter of the source cluster (vmware only)
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER_DC", default_value = "")]
    pub dc: String,

    /// Region of the source cluster (openstack only)
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER_REGION", default_value = "")]
    pub region: String,

    /// Secret with the source cluster credentials, <namespace>/<secret-name>
    #[clap(long, env = "HARVESTER_IMPORT_SOURCE_CLUSTER_CREDENTIALS_SECRET")]
    pub credentials_secret: String,
}

#[derive(Debug, Parser)]
pub struct SourceDeleteOpts {
    /// Name of the source cluster
    pub name: String,

    /// Namespace of the source cluster to be deleted
    #[clap(long, short = 'n', default_value = IMPORT_NAMESPACE)]
    pub namespace: String,

    /// Type of the source cluster
    #[clap(long, alias = "type", env = "HARVESTER_IMPORT_SOURCE_CLUSTER_TYPE")]
    pub source_cluster_type: SourceClusterType,
}

impl ImportCommands {
    pub fn run(self, settings: &Settings) -> Result<()> {
        match self {
            ImportCommands::Enable => enable(settings),
            ImportCommands::List => list(settings),
            ImportCommands::Create(opts) => create(opts, settings),
            ImportCommands::Delete(opts) => delete(opts, settings),
            ImportCommands::SourceAdd(opts) => source_add(opts, settings),
            ImportCommands::SourceDelete(opts) => source_delete(opts, settings),
        }
    }
}

fn enable(settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    let addon: Addon = c
        .get_opt(&client::harvester(
            Some(IMPORT_NAMESPACE),
            "addons",
            Some(IMPORT_ADDON_NAME),
        ))?
        .ok_or_else(|| {
            HarvesterError::lookup(format!(
                "failed to get {IMPORT_ADDON_NAME} addon resource in Harvester"
            ))
        })?;

    if addon.spec.enabled {
        return Ok(());
    }

    let patched: Addon = c.merge_patch(
        &client::harvester(Some(IMPORT_NAMESPACE), "addons", Some(IMPORT_ADDON_NAME)),
        &serde_json::json!({"spec": {"enabled": true}}),
    )?;
    if !patched.spec.enabled {
        return Err(HarvesterError::upstream(0, "failed to enable vm-import-controller").into());
    }
    info!("VM import enabled");
    Ok(())
}

fn list(settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    let imports: Vec<VirtualMachineImport> = c.list(
        &client::migration(IMPORT_NAMESPACE, "virtualmachineimports", None),
        None,
    )?;

    let mut table = new_table(&["NAME", "VM NAME", "STATUS", "SOURCE_CLUSTER", "CLUSTER_TYPE"]);
    for import in &imports {
        table.add_row(vec![
            import.metadata.name.clone(),
            import.spec.virtual_machine_name.clone(),
            import.status.import_status.clone(),
            import.spec.source_cluster.name.clone(),
            import.spec.source_cluster.kind.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// The dc flag belongs to vmware sources and region to openstack ones; any
/// other combination is rejected before a call is made.
fn validate_source_flags(
    cluster_type: SourceClusterType,
    dc: &str,
    region: &str,
) -> crate::errors::Result<()> {
    match cluster_type {
        SourceClusterType::Vmware => {
            if !region.is_empty() {
                return Err(HarvesterError::validation(
                    "region is not supported for vmware source cluster type",
                ));
            }
            if dc.is_empty() {
                return Err(HarvesterError::validation(
                    "dc is required for vmware source cluster type",
                ));
            }
        }
        SourceClusterType::Openstack => {
            if !dc.is_empty() {
                return Err(HarvesterError::validation(
                    "dc is not supported for openstack source cluster type",
                ));
            }
            if region.is_empty() {
                return Err(HarvesterError::validation(
                    "region is required for openstack source cluster type",
                ));
            }
        }
    }
    Ok(())
}

/// `<namespace>/<name>` of the credentials secret.
fn parse_secret_ref(raw: &str) -> crate::errors::Result<SecretReference> {
    let (namespace, name) = raw.split_once('/').ok_or_else(|| {
        HarvesterError::validation(format!(
            "invalid credentials secret {raw:?}, expected <namespace>/<secret-name>"
        ))
    })?;
    if namespace.is_empty() || name.is_empty() {
        return Err(HarvesterError::validation(format!(
            "invalid credentials secret {raw:?}, expected <namespace>/<secret-name>"
        )));
    }
    Ok(SecretReference {
        name: name.to_string(),
        namespace: namespace.to_string(),
    })
}

fn parse_network_mappings(raw: &[String]) -> crate::errors::Result<Vec<NetworkMapping>> {
    raw.iter()
        .map(|mapping| {
            let (source, destination) = mapping.split_once(':').ok_or_else(|| {
                HarvesterError::validation(format!(
                    "invalid mapping format: {mapping}, must be <source-network>:<target-network>"
                ))
            })?;
            Ok(NetworkMapping {
                source_network: source.to_string(),
                destination_network: destination.to_string(),
            })
        })
        .collect()
}

fn source_add(opts: SourceAddOpts, settings: &Settings) -> Result<()> {
    validate_source_flags(opts.source_cluster_type, &opts.dc, &opts.region)?;
    let credentials = parse_secret_ref(&opts.credentials_secret)?;

    let c = settings.harvester_client()?;
    let path = client::migration(
        &opts.source_cluster_namespace,
        opts.source_cluster_type.resource(),
        None,
    );
    match opts.source_cluster_type {
        SourceClusterType::Vmware => {
            let source = VmwareSource {
                api_version: MIGRATION_API_VERSION.to_string(),
                kind: "VmwareSource".to_string(),
                metadata: ObjectMeta {
                    name: opts.name.clone(),
                    namespace: IMPORT_NAMESPACE.to_string(),
                    ..Default::default()
                },
                spec: VmwareSourceSpec {
                    endpoint: opts.endpoint.clone(),
                    dc: opts.dc.clone(),
                    credentials,
                },
            };
            let _: serde_json::Value = c.create(&path, &source)?;
        }
        SourceClusterType::Openstack => {
            let source = OpenstackSource {
                api_version: MIGRATION_API_VERSION.to_string(),
                kind: "OpenstackSource".to_string(),
                metadata: ObjectMeta {
                    name: opts.name.clone(),
                    namespace: IMPORT_NAMESPACE.to_string(),
                    ..Default::default()
                },
                spec: OpenstackSourceSpec {
                    endpoint: opts.endpoint.clone(),
                    region: opts.region.clone(),
                    credentials,
                },
            };
            let _: serde_json::Value = c.create(&path, &source)?;
        }
    }
    info!("VM import source created successfully ({})", opts.name);
    Ok(())
}

fn source_delete(opts: SourceDeleteOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    c.delete(&client::migration(
        &opts.namespace,
        opts.source_cluster_type.resource(),
        Some(&opts.name),
    ))?;
    info!("VM import source deleted successfully ({})", opts.name);
    Ok(())
}

fn create(opts: CreateOpts, settings: &Settings) -> Result<()> {
    validate_source_flags(opts.source_cluster_type, &opts.dc, &opts.region)?;
    let mapping = parse_network_mappings(&opts.network_mapping)?;

    let c = settings.harvester_client()?;
    let import = VirtualMachineImport {
        api_version: MIGRATION_API_VERSION.to_string(),
        kind: "VirtualMachineImport".to_string(),
        metadata: ObjectMeta {
            name: opts.name.clone(),
            namespace: IMPORT_NAMESPACE.to_string(),
            ..Default::default()
        },
        spec: VirtualMachineImportSpec {
            virtual_machine_name: opts.vm_name.clone(),
            source_cluster: ObjectReference {
                name: opts.source_cluster.clone(),
                kind: opts.source_cluster_type.kind().to_string(),
                namespace: opts.source_cluster_namespace.clone(),
                api_version: MIGRATION_API_VERSION.to_string(),
            },
            network_mapping: mapping,
        },
        status: Default::default(),
    };

    let _: serde_json::Value = c.create(
        &client::migration(&opts.source_cluster_namespace, "virtualmachineimports", None),
        &import,
    )?;
    info!("VM import created successfully ({})", opts.name);
    Ok(())
}

fn delete(opts: DeleteOpts, settings: &Settings) -> Result<()> {
    let c = settings.harvester_client()?;
    c.delete(&client::migration(
        &opts.namespace,
        "virtualmachineimports",
        Some(&opts.name),
    ))?;
    info!("VM import deleted successfully ({})", opts.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_source_flags_matrix() {
        assert!(validate_source_flags(SourceClusterType::Vmware, "dc-1", "").is_ok());
        assert!(validate_source_flags(SourceClusterType::Vmware, "", "").is_err());
        assert!(validate_source_flags(SourceClusterType::Vmware, "dc-1", "eu-1").is_err());
        assert!(validate_source_flags(SourceClusterType::Openstack, "", "eu-1").is_ok());
        assert!(validate_source_flags(SourceClusterType::Openstack, "", "").is_err());
        assert!(validate_source_flags(SourceClusterType::Openstack, "dc-1", "eu-1").is_err());
    }

    #[test]
    fn test_parse_secret_ref() {
        let secret = parse_secret_ref("default/vmware-creds").unwrap();
        assert_eq!(secret.namespace, "default");
        assert_eq!(secret.name, "vmware-creds");
        assert!(parse_secret_ref("no-slash").is_err());
        assert!(parse_secret_ref("/name-only").is_err());
    }

    #[test]
    fn test_parse_network_mappings() {
        let mappings =
            parse_network_mappings(&["vm-net:vlan1".to_string(), "mgmt:vlan2".to_string()])
                .unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].source_network, "vm-net");
        assert_eq!(mappings[0].destination_network, "vlan1");
        assert!(parse_network_mappings(&["no-colon".to_string()]).is_err());
    }
}
