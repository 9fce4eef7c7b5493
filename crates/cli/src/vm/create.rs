//! `vm create`: assemble and submit VirtualMachine objects.
//!
//! A VM is created either from an image (flags supply the compute shape) or
//! from a stored template (`--template`, which overrides the other compute
//! flags). Multi-replica creation (`--count`) derives `-<index>` names and
//! spreads replicas across hosts with a soft anti-affinity rule.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use rand::Rng;
use tracing::{debug, warn};

use crate::client::{self, HarvesterClient};
use crate::cloudinit;
use crate::errors::HarvesterError;
use crate::overcommit::{self, OverCommitSettings, OVERCOMMIT_SETTING_NAME};
use crate::resources::*;
use crate::vm::NamespaceOpts;
use crate::Settings;

const DEFAULT_DISK_SIZE: &str = "10Gi";
const DEFAULT_MEM_SIZE: &str = "1Gi";
const UBUNTU_DEFAULT_IMAGE: &str =
    "https://cloud-images.ubuntu.com/minimal/daily/focal/current/focal-minimal-cloudimg-amd64.img";
/// Annotation the dashboard reads for a free-form description.
const ANNOTATION_DESCRIPTION: &str = "field.cattle.io/description";

#[derive(Debug, Parser)]
pub struct CreateOpts {
    /// Name of the VM to create
    pub name: String,

    #[clap(flatten)]
    pub namespace: NamespaceOpts,

    /// Optional description of your VM
    #[clap(long, env = "HARVESTER_VM_DESCRIPTION", default_value = "")]
    pub vm_description: String,

    /// Harvester image id of the VM to create
    #[clap(long, env = "HARVESTER_VM_IMAGE_ID", default_value = "")]
    pub vm_image_id: String,

    /// Size of the primary VM disk
    #[clap(
        long,
        short = 'd',
        alias = "disk",
        env = "HARVESTER_VM_DISKSIZE",
        default_value = DEFAULT_DISK_SIZE
    )]
    pub disk_size: String,

    /// Name of the SSH key to use with this VM
    #[clap(long, short = 'i', env = "HARVESTER_VM_KEY", default_value = "")]
    pub ssh_keyname: String,

    /// Number of CPUs to dedicate to the VM
    #[clap(long, short = 'c', env = "HARVESTER_VM_CPUS", default_value_t = 1)]
    pub cpus: u32,

    /// Amount of memory in the format XXGi
    #[clap(long, short = 'm', env = "HARVESTER_VM_MEMORY", default_value = DEFAULT_MEM_SIZE)]
    pub memory: String,

    /// Name of a cloud-init user-data ConfigMap already in Harvester
    #[clap(
        long,
        alias = "user-data-cm",
        env = "HARVESTER_USER_DATA_CM_REF",
        default_value = ""
    )]
    pub user_data_cm_ref: String,

    /// Name of a cloud-init network-data ConfigMap already in Harvester
    #[clap(
        long,
        alias = "network-data-cm",
        env = "HARVESTER_NETWORK_DATA_CM_REF",
        default_value = ""
    )]
    pub network_data_cm_ref: String,

    /// Path to a cloud-init user-data YAML file to use for the VM
    #[clap(long, alias = "user-data-file", env = "HARVESTER_USER_DATA_FILEPATH")]
    pub user_data_filepath: Option<PathBuf>,

    /// Path to a cloud-init network-data YAML file to use for the VM
    #[clap(long, alias = "network-data-file", env = "HARVESTER_NETWORK_DATA_FILEPATH")]
    pub network_data_filepath: Option<PathBuf>,

    /// VM template to create from, `<name>` or `<name>:<version>`
    #[clap(long, alias = "from-template", env = "HARVESTER_VM_TEMPLATE", default_value = "")]
    pub template: String,

    /// Number of identical VMs to create
    #[clap(long, alias = "number", env = "HARVESTER_VM_COUNT", default_value_t = 1)]
    pub count: u32,

    /// Network to which the VM should belong
    #[clap(long, alias = "net", env = "HARVESTER_VM_NETWORK", default_value = "vlan1")]
    pub network: String,
}

pub fn run(opts: CreateOpts, settings: &Settings) -> Result<()> {
    if opts.count == 0 {
        return Err(
            HarvesterError::validation("VM count provided is 0, no VM will be created").into(),
        );
    }
    let c = settings.harvester_client()?;
    if !opts.template.is_empty() {
        create_from_template(&opts, &c)
    } else {
        create_from_image(&opts, &c, None)
    }
}

/// Template reference `<name>[:<version>]`; version 0 means "default".
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TemplateRef {
    pub name: String,
    pub version: i32,
}

pub(crate) fn parse_template_ref(raw: &str) -> crate::errors::Result<TemplateRef> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [name] => Ok(TemplateRef {
            name: name.to_string(),
            version: 0,
        }),
        [name, version] => {
            let version = version.parse().map_err(|_| {
                HarvesterError::validation(format!(
                    "version given in template flag {version} is not an integer"
                ))
            })?;
            Ok(TemplateRef {
                name: name.to_string(),
                version,
            })
        }
        _ => Err(HarvesterError::validation(
            "given template flag does not have the format <template_name> or <template_name>:<version>",
        )),
    }
}

/// Compute shape taken from a template instead of the flags.
struct TemplateOverrides {
    vm_template: VmiTemplateSpec,
    image_id: String,
    disk_size: String,
}

fn create_from_template(opts: &CreateOpts, c: &HarvesterClient) -> Result<()> {
    warn!("You are using a template flag, please be aware that any other flag will be IGNORED!");

    let ns = &opts.namespace.namespace;
    let template_ref = parse_template_ref(&opts.template)?;

    let template: VirtualMachineTemplate = c
        .get_opt(&client::harvester(
            Some(ns),
            "virtualmachinetemplates",
            Some(&template_ref.name),
        ))?
        .ok_or_else(|| {
            HarvesterError::lookup(format!(
                "template {} was not found on the Harvester cluster",
                template_ref.name
            ))
        })?;

    let version: VirtualMachineTemplateVersion = if template_ref.version == 0 {
        let default_id = &template.spec.default_version_id;
        debug!("templateVersion found is: {}", default_id);
        let (version_ns, version_name) = default_id.split_once('/').ok_or_else(|| {
            HarvesterError::parse(format!("malformed default version id {default_id:?}"))
        })?;
        c.get(&client::harvester(
            Some(version_ns),
            "virtualmachinetemplateversions",
            Some(version_name),
        ))?
    } else {
        fetch_template_version(c, ns, template_ref.version, &template_ref.name)?
    };

    let claim_annotation = version
        .spec
        .vm
        .metadata
        .annotations
        .get(ANNOTATION_VOLUME_CLAIM_TEMPLATES)
        .ok_or_else(|| {
            HarvesterError::parse("template version carries no volume claim templates")
        })?;
    debug!("VM annotation for PVC (should be JSON): {}", claim_annotation);
    let claims: Vec<PersistentVolumeClaim> =
        serde_json::from_str(claim_annotation).map_err(|e| {
            HarvesterError::parse(format!("decoding volume claim templates annotation: {e}"))
        })?;
    let claim = claims
        .first()
        .ok_or_else(|| HarvesterError::parse("template version has an empty claim list"))?;

    let image_id_full = claim
        .metadata
        .annotations
        .get(ANNOTATION_IMAGE_ID)
        .cloned()
        .unwrap_or_default();
    let image_id = image_id_full
        .split_once('/')
        .map(|(_, id)| id.to_string())
        .unwrap_or(image_id_full);

    let disk_size = claim
        .spec
        .resources
        .requests
        .get("storage")
        .cloned()
        .unwrap_or_else(|| DEFAULT_DISK_SIZE.to_string());

    let vm_template = version.spec.vm.spec.template.clone().ok_or_else(|| {
        HarvesterError::parse("template version carries no VM template spec")
    })?;

    create_from_image(
        opts,
        c,
        Some(TemplateOverrides {
            vm_template,
            image_id,
            disk_size,
        }),
    )
}

/// Template version with the requested integer version, via the templateID
/// label.
fn fetch_template_version(
    c: &HarvesterClient,
    namespace: &str,
    version: i32,
    template_name: &str,
) -> Result<VirtualMachineTemplateVersion> {
    let selector = format!("{LABEL_TEMPLATE_ID}={template_name}");
    let versions: Vec<VirtualMachineTemplateVersion> = c.list(
        &client::harvester(Some(namespace), "virtualmachinetemplateversions", None),
        Some(&selector),
    )?;
    versions
        .into_iter()
        .find(|candidate| candidate.status.version == version)
        .ok_or_else(|| HarvesterError::lookup("no template with the same version found").into())
}

fn create_from_image(
    opts: &CreateOpts,
    c: &HarvesterClient,
    overrides: Option<TemplateOverrides>,
) -> Result<()> {
    let ns = &opts.namespace.namespace;

    let image_id = overrides
        .as_ref()
        .map(|o| o.image_id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| opts.vm_image_id.clone());
    let image = if !image_id.is_empty() {
        let image: VirtualMachineImage = c
            .get_opt(&client::harvester(
                Some(ns),
                "virtualmachineimages",
                Some(&image_id),
            ))?
            .ok_or_else(|| HarvesterError::lookup(format!("image {image_id} was not found")))?;
        debug!("image id {} given does exist", image_id);
        image
    } else {
        default_vm_image(c, ns)?
    };
    let image_id = image.metadata.name.clone();
    let storage_class = image.status.storage_class_name.clone();

    let disk_size = overrides
        .as_ref()
        .map(|o| o.disk_size.clone())
        .unwrap_or_else(|| opts.disk_size.clone());

    // The named network must exist before anything is submitted.
    let _network: NetworkAttachmentDefinition = c
        .get_opt(&client::cni(
            ns,
            "network-attachment-definitions",
            Some(&opts.network),
        ))?
        .ok_or_else(|| {
            HarvesterError::validation(format!(
                "problem while verifying network existence; network {} does not exist in namespace {}",
                opts.network, ns
            ))
        })?;

    // Inputs shared by every replica are resolved once; only the claim name
    // and replica name vary inside the loop.
    let resolved = match &overrides {
        None => Some(resolve_template_inputs(opts, c)?),
        Some(_) => None,
    };

    for vm_name in replica_names(&opts.name, opts.count) {
        let disk_random_id = random_disk_id();
        let pvc_name = format!("{vm_name}-disk-0-{disk_random_id}");

        let vm_template = match (&overrides, &resolved) {
            (Some(o), _) => stamp_template(o.vm_template.clone(), &pvc_name, &opts.name),
            (None, Some(inputs)) => build_vm_template(opts, inputs, &pvc_name, &vm_name)?,
            (None, None) => unreachable!("inputs resolved for the non-template path"),
        };

        let vm = assemble_vm(AssembleParams {
            vm_name: &vm_name,
            namespace: ns,
            description: &opts.vm_description,
            image_id: &image_id,
            disk_size: &disk_size,
            storage_class: &storage_class,
            pvc_name: &pvc_name,
            vm_template,
        })?;

        let _: VirtualMachine =
            c.create(&client::kubevirt(ns, "virtualmachines", None), &vm)?;
        debug!("VM {} submitted", vm_name);
    }

    Ok(())
}

/// Replica names for a batch: the bare name for a single VM, `-<index>`
/// suffixes (1-based) otherwise.
pub(crate) fn replica_names(base: &str, count: u32) -> Vec<String> {
    if count <= 1 {
        vec![base.to_string()]
    } else {
        (1..=count).map(|i| format!("{base}-{i}")).collect()
    }
}

/// Collision-resistant disk claim suffix, pattern `[a-z]{3}[0-9][a-z]`.
pub(crate) fn random_disk_id() -> String {
    let mut rng = rand::rng();
    let mut id = String::with_capacity(5);
    for _ in 0..3 {
        id.push(rng.random_range(b'a'..=b'z') as char);
    }
    id.push(rng.random_range(b'0'..=b'9') as char);
    id.push(rng.random_range(b'a'..=b'z') as char);
    id
}

/// Everything fetched from the cluster that the template build needs.
struct ResolvedInputs {
    user_data_override: String,
    network_data: String,
    ssh_key: KeyPair,
    overcommit: OverCommitSettings,
    network: String,
}

fn resolve_template_inputs(opts: &CreateOpts, c: &HarvesterClient) -> Result<ResolvedInputs> {
    let ns = &opts.namespace.namespace;

    let user_data_override = cloud_init_source(
        c,
        ns,
        &opts.user_data_cm_ref,
        opts.user_data_filepath.as_deref(),
    )?
    .unwrap_or_default();
    let network_data = cloud_init_source(
        c,
        ns,
        &opts.network_data_cm_ref,
        opts.network_data_filepath.as_deref(),
    )?
    .unwrap_or_else(|| cloudinit::DEFAULT_NETWORK_DATA.to_string());

    let ssh_key = if !opts.ssh_keyname.is_empty() {
        let key: KeyPair = c
            .get_opt(&client::harvester(Some(ns), "keypairs", Some(&opts.ssh_keyname)))?
            .ok_or_else(|| {
                HarvesterError::lookup(format!("keypair {} was not found", opts.ssh_keyname))
            })?;
        debug!("SSH key name {} given does exist", opts.ssh_keyname);
        key
    } else {
        default_ssh_key(c, ns)?
    };

    let setting: Setting = c.get(&client::harvester(
        None,
        "settings",
        Some(OVERCOMMIT_SETTING_NAME),
    ))?;
    let overcommit = overcommit::parse_settings(&setting.default)?;

    Ok(ResolvedInputs {
        user_data_override,
        network_data,
        ssh_key,
        overcommit,
        network: opts.network.clone(),
    })
}

/// Cloud-init text from exclusively a ConfigMap reference or a file path;
/// `None` when neither was supplied.
fn cloud_init_source(
    c: &HarvesterClient,
    namespace: &str,
    cm_ref: &str,
    filepath: Option<&std::path::Path>,
) -> crate::errors::Result<Option<String>> {
    match (cm_ref.is_empty(), filepath) {
        (false, Some(_)) => Err(HarvesterError::validation(
            "you can't specify both a configmap reference and a file path for the cloud-init data",
        )),
        (false, None) => {
            let cm: ConfigMap = c
                .get_opt(&client::core(namespace, "configmaps", Some(cm_ref)))?
                .ok_or_else(|| {
                    HarvesterError::lookup(format!(
                        "{cm_ref} config map was not found, please specify another configmap or remove the flag to use the default"
                    ))
                })?;
            Ok(Some(cm.data.get("cloudInit").cloned().unwrap_or_default()))
        }
        (true, Some(path)) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                HarvesterError::validation(format!("error during reading of cloud-init file: {e}"))
            })?;
            Ok(Some(content))
        }
        (true, None) => Ok(None),
    }
}

fn default_ssh_key(c: &HarvesterClient, namespace: &str) -> crate::errors::Result<KeyPair> {
    let keys: Vec<KeyPair> = c.list(&client::harvester(Some(namespace), "keypairs", None), None)?;
    keys.into_iter().next().ok_or_else(|| {
        HarvesterError::validation("no ssh keys exist in harvester, please add a new ssh key")
    })
}

/// First existing image, or a freshly created default Ubuntu image.
fn default_vm_image(
    c: &HarvesterClient,
    namespace: &str,
) -> crate::errors::Result<VirtualMachineImage> {
    let images: Vec<VirtualMachineImage> = c.list(
        &client::harvester(Some(namespace), "virtualmachineimages", None),
        None,
    )?;
    if let Some(image) = images.into_iter().next() {
        return Ok(image);
    }
    create_vm_image(
        c,
        namespace,
        "ubuntu-default-image",
        UBUNTU_DEFAULT_IMAGE,
    )
}

/// Create a VM image object pointing at a download URL.
pub(crate) fn create_vm_image(
    c: &HarvesterClient,
    namespace: &str,
    image_name: &str,
    url: &str,
) -> crate::errors::Result<VirtualMachineImage> {
    let image = VirtualMachineImage {
        metadata: ObjectMeta {
            name: "ubuntu-default".to_string(),
            ..Default::default()
        },
        spec: VirtualMachineImageSpec {
            display_name: image_name.to_string(),
            source_type: "download".to_string(),
            url: url.to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    c.create(
        &client::harvester(Some(namespace), "virtualmachineimages", None),
        &image,
    )
}

/// Build the VMI template for the flag-driven path.
fn build_vm_template(
    opts: &CreateOpts,
    inputs: &ResolvedInputs,
    pvc_name: &str,
    vm_name: &str,
) -> Result<VmiTemplateSpec> {
    let user_data = cloudinit::merge_user_data(
        &inputs.user_data_override,
        cloudinit::DEFAULT_USER_DATA,
        &inputs.ssh_key.spec.public_key,
    )?;

    let mut requests = BTreeMap::new();
    requests.insert(
        "cpu".to_string(),
        overcommit::compute_cpu_request(&inputs.overcommit, i64::from(opts.cpus)).to_string(),
    );
    requests.insert(
        "memory".to_string(),
        overcommit::compute_memory_request(&inputs.overcommit, &opts.memory)?.to_string(),
    );
    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), opts.cpus.to_string());
    limits.insert("memory".to_string(), opts.memory.clone());

    Ok(VmiTemplateSpec {
        metadata: ObjectMeta {
            annotations: vmi_annotations(pvc_name, &inputs.ssh_key.metadata.name),
            labels: vmi_labels(vm_name, &opts.name),
            ..Default::default()
        },
        spec: VmiSpec {
            hostname: Some(opts.name.clone()),
            networks: vec![Network {
                name: "nic-1".to_string(),
                multus: Some(MultusNetwork {
                    network_name: inputs.network.clone(),
                }),
                pod: None,
            }],
            volumes: vec![
                Volume {
                    name: "disk-0".to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: pvc_name.to_string(),
                    }),
                    cloud_init_no_cloud: None,
                },
                Volume {
                    name: "cloudinitdisk".to_string(),
                    persistent_volume_claim: None,
                    cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                        user_data: Some(user_data),
                        network_data: Some(inputs.network_data.clone()),
                        ..Default::default()
                    }),
                },
            ],
            domain: DomainSpec {
                cpu: Some(Cpu {
                    cores: opts.cpus,
                    sockets: Some(1),
                    threads: Some(1),
                }),
                devices: Devices {
                    inputs: vec![Input {
                        name: "tablet".to_string(),
                        input_type: "tablet".to_string(),
                        bus: "usb".to_string(),
                    }],
                    interfaces: vec![Interface {
                        name: "nic-1".to_string(),
                        model: Some("virtio".to_string()),
                        bridge: Some(BridgeBinding {}),
                    }],
                    disks: vec![
                        Disk {
                            name: "disk-0".to_string(),
                            disk: Some(DiskTarget {
                                bus: "virtio".to_string(),
                            }),
                        },
                        Disk {
                            name: "cloudinitdisk".to_string(),
                            disk: Some(DiskTarget {
                                bus: "virtio".to_string(),
                            }),
                        },
                    ],
                },
                resources: ResourceRequirements { requests, limits },
            },
            affinity: Some(anti_affinity(&opts.name)),
        },
    })
}

/// Re-stamp a template-sourced VMI template for one replica: fresh claim
/// name, shared name-prefix label and the spreading rule.
fn stamp_template(mut template: VmiTemplateSpec, pvc_name: &str, base_name: &str) -> VmiTemplateSpec {
    if let Some(volume) = template
        .spec
        .volumes
        .iter_mut()
        .find(|volume| volume.persistent_volume_claim.is_some())
    {
        if let Some(pvc) = volume.persistent_volume_claim.as_mut() {
            pvc.claim_name = pvc_name.to_string();
        }
    }
    template
        .metadata
        .labels
        .insert(LABEL_VM_NAME_PREFIX.to_string(), base_name.to_string());
    template.spec.affinity = Some(anti_affinity(base_name));
    template
}

/// Soft spreading rule: replicas sharing the name prefix prefer distinct
/// hosts but never block scheduling.
fn anti_affinity(base_name: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: vec![WeightedPodAffinityTerm {
                weight: 1,
                pod_affinity_term: PodAffinityTerm {
                    topology_key: "kubernetes.io/hostname".to_string(),
                    label_selector: Some(LabelSelector {
                        match_labels: BTreeMap::from([(
                            LABEL_VM_NAME_PREFIX.to_string(),
                            base_name.to_string(),
                        )]),
                    }),
                },
            }],
        }),
    }
}

fn vmi_labels(vm_name: &str, base_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CREATOR.to_string(), "harvester".to_string()),
        (LABEL_VM_NAME.to_string(), vm_name.to_string()),
        (LABEL_VM_NAME_PREFIX.to_string(), base_name.to_string()),
    ])
}

/// Annotations tying the VMI to its disk claim and SSH key.
fn vmi_annotations(pvc_name: &str, ssh_key_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            ANNOTATION_DISK_NAMES.to_string(),
            serde_json::json!([pvc_name]).to_string(),
        ),
        (
            ANNOTATION_SSH_NAMES.to_string(),
            serde_json::json!([ssh_key_name]).to_string(),
        ),
    ])
}

struct AssembleParams<'a> {
    vm_name: &'a str,
    namespace: &'a str,
    description: &'a str,
    image_id: &'a str,
    disk_size: &'a str,
    storage_class: &'a str,
    pvc_name: &'a str,
    vm_template: VmiTemplateSpec,
}

/// Wrap a VMI template into the VirtualMachine object submitted to the
/// cluster, carrying the claim template annotation.
fn assemble_vm(params: AssembleParams<'_>) -> crate::errors::Result<VirtualMachine> {
    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: params.pvc_name.to_string(),
            annotations: BTreeMap::from([(
                ANNOTATION_IMAGE_ID.to_string(),
                format!("{}/{}", params.namespace, params.image_id),
            )]),
            ..Default::default()
        },
        spec: PersistentVolumeClaimSpec {
            access_modes: vec!["ReadWriteMany".to_string()],
            resources: VolumeResourceRequirements {
                requests: BTreeMap::from([(
                    "storage".to_string(),
                    params.disk_size.to_string(),
                )]),
            },
            volume_mode: Some("Block".to_string()),
            storage_class_name: Some(params.storage_class.to_string()),
        },
    };
    let claim_annotation = serde_json::to_string(&vec![claim])
        .map_err(|e| HarvesterError::parse(format!("encoding claim templates: {e}")))?;

    let mut annotations = BTreeMap::from([
        (
            ANNOTATION_VOLUME_CLAIM_TEMPLATES.to_string(),
            claim_annotation,
        ),
        (ANNOTATION_NETWORK_IPS.to_string(), "[]".to_string()),
    ]);
    if !params.description.is_empty() {
        annotations.insert(
            ANNOTATION_DESCRIPTION.to_string(),
            params.description.to_string(),
        );
    }

    Ok(VirtualMachine {
        api_version: "kubevirt.io/v1".to_string(),
        kind: "VirtualMachine".to_string(),
        metadata: ObjectMeta {
            name: params.vm_name.to_string(),
            namespace: params.namespace.to_string(),
            annotations,
            labels: BTreeMap::from([(
                LABEL_CREATOR.to_string(),
                "harvester".to_string(),
            )]),
            ..Default::default()
        },
        spec: VirtualMachineSpec {
            running: Some(true),
            template: Some(params.vm_template),
        },
        status: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overcommit::parse_settings;
    use crate::quantity::Quantity;

    fn stock_inputs() -> ResolvedInputs {
        ResolvedInputs {
            user_data_override: String::new(),
            network_data: cloudinit::DEFAULT_NETWORK_DATA.to_string(),
            ssh_key: KeyPair {
                metadata: ObjectMeta {
                    name: "dev-key".to_string(),
                    ..Default::default()
                },
                spec: KeyPairSpec {
                    public_key: "ssh-rsa AAAA dev@host".to_string(),
                },
                status: Default::default(),
            },
            overcommit: parse_settings(r#"{"cpu":1600,"memory":150,"disk":200}"#).unwrap(),
            network: "vlan1".to_string(),
        }
    }

    fn stock_opts() -> CreateOpts {
        CreateOpts {
            name: "web".to_string(),
            namespace: NamespaceOpts {
                namespace: "default".to_string(),
            },
            vm_description: String::new(),
            vm_image_id: String::new(),
            disk_size: DEFAULT_DISK_SIZE.to_string(),
            ssh_keyname: String::new(),
            cpus: 4,
            memory: "4Gi".to_string(),
            user_data_cm_ref: String::new(),
            network_data_cm_ref: String::new(),
            user_data_filepath: None,
            network_data_filepath: None,
            template: String::new(),
            count: 1,
            network: "vlan1".to_string(),
        }
    }

    #[test]
    fn test_parse_template_ref() {
        assert_eq!(
            parse_template_ref("ubuntu-template").unwrap(),
            TemplateRef {
                name: "ubuntu-template".to_string(),
                version: 0
            }
        );
        assert_eq!(
            parse_template_ref("ubuntu-template:3").unwrap(),
            TemplateRef {
                name: "ubuntu-template".to_string(),
                version: 3
            }
        );
        assert!(parse_template_ref("a:b:c").is_err());
        assert!(parse_template_ref("ubuntu-template:latest").is_err());
    }

    #[test]
    fn test_replica_names() {
        assert_eq!(replica_names("web", 1), vec!["web"]);
        assert_eq!(replica_names("web", 3), vec!["web-1", "web-2", "web-3"]);
    }

    #[test]
    fn test_random_disk_id_shape() {
        let pattern = regex::Regex::new("^[a-z]{3}[0-9][a-z]$").unwrap();
        for _ in 0..64 {
            let id = random_disk_id();
            assert!(pattern.is_match(&id), "unexpected id {id:?}");
        }
    }

    #[test]
    fn test_build_vm_template_resources() {
        let template = build_vm_template(&stock_opts(), &stock_inputs(), "web-disk-0-abc1d", "web")
            .unwrap();
        let resources = &template.spec.domain.resources;
        assert_eq!(resources.requests.get("cpu").unwrap(), "250m");
        assert_eq!(resources.limits.get("cpu").unwrap(), "4");
        assert_eq!(resources.limits.get("memory").unwrap(), "4Gi");

        // request <= limit for ratios >= 100
        let request = Quantity::parse(resources.requests.get("memory").unwrap()).unwrap();
        let limit = Quantity::parse(resources.limits.get("memory").unwrap()).unwrap();
        assert!(request.milli_value() <= limit.milli_value());
    }

    #[test]
    fn test_build_vm_template_wires_cloud_init_and_network() {
        let template = build_vm_template(&stock_opts(), &stock_inputs(), "web-disk-0-abc1d", "web")
            .unwrap();
        assert_eq!(template.spec.volumes.len(), 2);
        assert_eq!(
            template.spec.volumes[0]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "web-disk-0-abc1d"
        );
        let cloud_init = template.spec.volumes[1].cloud_init_no_cloud.as_ref().unwrap();
        assert!(cloud_init
            .user_data
            .as_ref()
            .unwrap()
            .contains("ssh-rsa AAAA dev@host"));
        assert_eq!(
            cloud_init.network_data.as_deref(),
            Some(cloudinit::DEFAULT_NETWORK_DATA)
        );
        assert_eq!(
            template.spec.networks[0].multus.as_ref().unwrap().network_name,
            "vlan1"
        );
        assert_eq!(
            template.metadata.labels.get(LABEL_VM_NAME_PREFIX).unwrap(),
            "web"
        );
    }

    #[test]
    fn test_assemble_vm_is_deterministic() {
        let build = || {
            let template =
                build_vm_template(&stock_opts(), &stock_inputs(), "web-disk-0-abc1d", "web")
                    .unwrap();
            assemble_vm(AssembleParams {
                vm_name: "web",
                namespace: "default",
                description: "",
                image_id: "image-xyz",
                disk_size: "10Gi",
                storage_class: "longhorn-image-xyz",
                pvc_name: "web-disk-0-abc1d",
                vm_template: template,
            })
            .unwrap()
        };
        let first = serde_json::to_value(build()).unwrap();
        let second = serde_json::to_value(build()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_assemble_vm_claim_annotation() {
        let template = build_vm_template(&stock_opts(), &stock_inputs(), "web-disk-0-abc1d", "web")
            .unwrap();
        let vm = assemble_vm(AssembleParams {
            vm_name: "web",
            namespace: "default",
            description: "a test vm",
            image_id: "image-xyz",
            disk_size: "10Gi",
            storage_class: "longhorn-image-xyz",
            pvc_name: "web-disk-0-abc1d",
            vm_template: template,
        })
        .unwrap();

        let annotation = vm
            .metadata
            .annotations
            .get(ANNOTATION_VOLUME_CLAIM_TEMPLATES)
            .unwrap();
        let claims: Vec<PersistentVolumeClaim> = serde_json::from_str(annotation).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metadata.name, "web-disk-0-abc1d");
        assert_eq!(
            claims[0].metadata.annotations.get(ANNOTATION_IMAGE_ID).unwrap(),
            "default/image-xyz"
        );
        assert_eq!(claims[0].spec.access_modes, vec!["ReadWriteMany"]);
        assert_eq!(claims[0].spec.volume_mode.as_deref(), Some("Block"));
        assert_eq!(
            claims[0].spec.storage_class_name.as_deref(),
            Some("longhorn-image-xyz")
        );
        assert_eq!(vm.spec.running, Some(true));
        assert_eq!(
            vm.metadata.annotations.get(ANNOTATION_DESCRIPTION).unwrap(),
            "a test vm"
        );
    }

    #[test]
    fn test_stamp_template_rewrites_claim_and_affinity() {
        let mut template =
            build_vm_template(&stock_opts(), &stock_inputs(), "old-claim", "web").unwrap();
        template.spec.affinity = None;
        let stamped = stamp_template(template, "web-disk-0-zzz9z", "web");
        assert_eq!(
            stamped.spec.volumes[0]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "web-disk-0-zzz9z"
        );
        let affinity = stamped.spec.affinity.unwrap();
        let term = &affinity
            .pod_anti_affinity
            .unwrap()
            .preferred_during_scheduling_ignored_during_execution[0];
        assert_eq!(term.weight, 1);
        assert_eq!(term.pod_affinity_term.topology_key, "kubernetes.io/hostname");
    }
}
