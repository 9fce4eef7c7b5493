//! Cloud-init document handling.
//!
//! A created VM boots from a merged user-data document: the stock defaults
//! below, extended by an optional caller-supplied document, with the
//! resolved SSH public key always appended. The three well-known sequence
//! keys are concatenated (defaults first); every other top-level key is a
//! plain override where the caller wins.

use yaml_rust2::yaml::Hash;
use yaml_rust2::{Yaml, YamlEmitter, YamlLoader};

use crate::errors::{HarvesterError, Result};

/// Stock user-data: console password access plus the qemu guest agent.
pub const DEFAULT_USER_DATA: &str = "#cloud-config\npassword: password\nchpasswd: { expire: False}\nssh_pwauth: True\npackages:\n  - qemu-guest-agent\nruncmd:\n  - [ systemctl, daemon-reload ]\n  - [ systemctl, enable, qemu-guest-agent.service ]\n  - [ systemctl, start, --no-block, qemu-guest-agent.service ]";

/// Stock network-data: single DHCP interface rendered by networkd.
pub const DEFAULT_NETWORK_DATA: &str =
    "version: 2\nrenderer: networkd\nethernets:\n  enp1s0:\n    dhcp4: true";

/// Top-level keys whose sequences are concatenated instead of replaced.
const MERGED_SEQUENCE_KEYS: &[&str] = &["ssh_authorized_keys", "packages", "runcmd"];

/// Merge a caller-supplied cloud-init document over the defaults and inject
/// an SSH public key.
///
/// `user_data` may be empty (no overrides). The result carries the
/// `#cloud-config` header; key order beyond the contract is not preserved.
pub fn merge_user_data(user_data: &str, base_data: &str, public_key: &str) -> Result<String> {
    let base = load_mapping(base_data)?;
    let user = load_mapping(user_data)?;

    let mut merged = base.clone();
    for (key, value) in user.iter() {
        if is_merged_sequence_key(key) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    for key in MERGED_SEQUENCE_KEYS {
        let mut entries = sequence_entries(&base, key)?;
        entries.extend(sequence_entries(&user, key)?);
        if !entries.is_empty() {
            merged.insert(Yaml::String((*key).to_string()), Yaml::Array(entries));
        }
    }

    let ssh_key = Yaml::String("ssh_authorized_keys".to_string());
    if !matches!(merged.get(&ssh_key), Some(Yaml::Array(_))) {
        merged.insert(ssh_key.clone(), Yaml::Array(Vec::new()));
    }
    if let Some(Yaml::Array(keys)) = merged.get_mut(&ssh_key) {
        keys.push(Yaml::String(public_key.to_string()));
    }

    emit_cloud_config(&Yaml::Hash(merged))
}

fn is_merged_sequence_key(key: &Yaml) -> bool {
    key.as_str()
        .map(|k| MERGED_SEQUENCE_KEYS.contains(&k))
        .unwrap_or(false)
}

/// Parse a YAML document into a top-level mapping; empty input is an empty
/// mapping, anything that is not a mapping is a parse error.
fn load_mapping(input: &str) -> Result<Hash> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|e| HarvesterError::parse(format!("invalid cloud-init YAML: {e}")))?;
    match docs.into_iter().next() {
        None | Some(Yaml::Null) => Ok(Hash::new()),
        Some(Yaml::Hash(h)) => Ok(h),
        Some(_) => Err(HarvesterError::parse(
            "cloud-init document is not a mapping",
        )),
    }
}

/// Entries of a known sequence key; absent keys yield an empty vector and a
/// present non-sequence value is a parse error.
fn sequence_entries(doc: &Hash, key: &str) -> Result<Vec<Yaml>> {
    match doc.get(&Yaml::String(key.to_string())) {
        None => Ok(Vec::new()),
        Some(Yaml::Array(entries)) => Ok(entries.clone()),
        Some(_) => Err(HarvesterError::parse(format!(
            "cloud-init key {key:?} is not a sequence"
        ))),
    }
}

fn emit_cloud_config(doc: &Yaml) -> Result<String> {
    let mut out = String::new();
    let mut emitter = YamlEmitter::new(&mut out);
    emitter
        .dump(doc)
        .map_err(|e| HarvesterError::parse(format!("emitting cloud-init YAML: {e}")))?;
    let body = out.strip_prefix("---\n").unwrap_or(&out);
    Ok(format!("#cloud-config\n{body}\n"))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const USER_DATA: &str = "ssh_authorized_keys:
  - ssh-rsa AAAAB3NzaC1yc2EAAA ... custom@foo
packages:
  - docker
runcmd:
  - docker run -d --restart=unless-stopped -p 80:80 rancher/hello-world
";

    const PUBLIC_KEY: &str = "ssh-rsa AAAAB4MabD2zd3FBBB ... predef@bar";

    fn parse(result: &str) -> Hash {
        let docs = YamlLoader::load_from_str(result).unwrap();
        match docs.into_iter().next().unwrap() {
            Yaml::Hash(h) => h,
            other => panic!("expected mapping, got {other:?}"),
        }
    }

    fn sequence_len(doc: &Hash, key: &str) -> usize {
        doc.get(&Yaml::String(key.to_string()))
            .and_then(Yaml::as_vec)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    #[test]
    fn test_merge_options_in_user_data() {
        let result = merge_user_data(USER_DATA, DEFAULT_USER_DATA, PUBLIC_KEY).unwrap();
        let doc = parse(&result);

        assert_eq!(sequence_len(&doc, "ssh_authorized_keys"), 2);
        assert_eq!(sequence_len(&doc, "packages"), 2);
        assert_eq!(sequence_len(&doc, "runcmd"), 4);
    }

    #[test]
    fn test_merge_keeps_defaults_first() {
        let result = merge_user_data(USER_DATA, DEFAULT_USER_DATA, PUBLIC_KEY).unwrap();
        let doc = parse(&result);
        let packages = doc
            .get(&Yaml::String("packages".to_string()))
            .and_then(Yaml::as_vec)
            .unwrap();
        assert_eq!(packages[0].as_str(), Some("qemu-guest-agent"));
        assert_eq!(packages[1].as_str(), Some("docker"));
    }

    #[test]
    fn test_user_scalars_override_defaults() {
        let result =
            merge_user_data("password: hunter2\n", DEFAULT_USER_DATA, PUBLIC_KEY).unwrap();
        let doc = parse(&result);
        assert_eq!(
            doc.get(&Yaml::String("password".to_string()))
                .and_then(Yaml::as_str),
            Some("hunter2")
        );
    }

    #[test]
    fn test_empty_user_data_still_injects_key() {
        let result = merge_user_data("", DEFAULT_USER_DATA, PUBLIC_KEY).unwrap();
        let doc = parse(&result);
        assert_eq!(sequence_len(&doc, "ssh_authorized_keys"), 1);
        assert!(result.starts_with("#cloud-config\n"));
    }

    #[test]
    fn test_key_injected_without_base_section() {
        let result = merge_user_data("", "foo: bar", PUBLIC_KEY).unwrap();
        let doc = parse(&result);
        assert_eq!(sequence_len(&doc, "ssh_authorized_keys"), 1);
    }

    #[test]
    fn test_invalid_yaml_is_a_parse_error() {
        assert!(merge_user_data("foo: [unclosed", DEFAULT_USER_DATA, PUBLIC_KEY).is_err());
        assert!(merge_user_data("- a scalar list", DEFAULT_USER_DATA, PUBLIC_KEY).is_err());
    }

    #[test]
    fn test_non_sequence_known_key_is_a_parse_error() {
        let err = merge_user_data("packages: docker\n", DEFAULT_USER_DATA, PUBLIC_KEY)
            .unwrap_err();
        assert!(matches!(err, HarvesterError::Parse(_)));
    }
}
