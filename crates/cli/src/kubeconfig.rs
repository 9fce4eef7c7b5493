//! Minimal kubeconfig parsing.
//!
//! The kubeconfig written by `login`/`get-config` is a plain
//! clusters/users/contexts document with bearer-token auth, which is all the
//! Rancher-generated files contain. We resolve the current context into a
//! [`RestConfig`] the API clients can consume.

use std::path::Path;

use base64::Engine;
use serde::Deserialize;

use crate::errors::{HarvesterError, Result};

/// Connection parameters resolved from a kubeconfig context.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// API server base URL.
    pub host: String,
    /// Bearer token, when the user entry carries one.
    pub token: Option<String>,
    /// Decoded CA certificate bundle (PEM).
    pub ca_pem: Option<Vec<u8>>,
    /// Whether certificate verification is disabled for this cluster.
    pub insecure: bool,
}

#[derive(Debug, Deserialize)]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: Option<String>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: String,
}

/// Load a kubeconfig file and resolve its current context.
pub fn load(path: &Path) -> Result<RestConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HarvesterError::config(format!(
            "reading Harvester kubeconfig {}: {e}; run `harvctl login` or `harvctl get-config`",
            path.display()
        ))
    })?;
    parse(&content)
}

fn parse(content: &str) -> Result<RestConfig> {
    let kc: Kubeconfig = serde_yaml::from_str(content)
        .map_err(|e| HarvesterError::config(format!("parsing kubeconfig: {e}")))?;

    let context = match &kc.current_context {
        Some(name) => kc
            .contexts
            .iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| {
                HarvesterError::config(format!("kubeconfig context {name:?} not found"))
            })?,
        None => kc
            .contexts
            .first()
            .ok_or_else(|| HarvesterError::config("kubeconfig has no contexts"))?,
    };

    let cluster = kc
        .clusters
        .iter()
        .find(|c| c.name == context.context.cluster)
        .ok_or_else(|| {
            HarvesterError::config(format!(
                "kubeconfig cluster {:?} not found",
                context.context.cluster
            ))
        })?;

    let user = kc.users.iter().find(|u| u.name == context.context.user);

    let ca_pem = match &cluster.cluster.certificate_authority_data {
        Some(data) => Some(
            base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| {
                    HarvesterError::config(format!("decoding certificate-authority-data: {e}"))
                })?,
        ),
        None => None,
    };

    Ok(RestConfig {
        host: cluster.cluster.server.trim_end_matches('/').to_string(),
        token: user.and_then(|u| u.user.token.clone()),
        ca_pem,
        insecure: cluster.cluster.insecure_skip_tls_verify,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: local
  cluster:
    server: https://harvester.example.com/k8s/clusters/c-qmpbm
    certificate-authority-data: LS0tLS1CRUdJTg==
users:
- name: local
  user:
    token: kubeconfig-user-abcde:sometoken
contexts:
- name: local
  context:
    cluster: local
    user: local
current-context: local
"#;

    #[test]
    fn test_parse_resolves_current_context() {
        let rest = parse(KUBECONFIG).unwrap();
        assert_eq!(rest.host, "https://harvester.example.com/k8s/clusters/c-qmpbm");
        assert_eq!(
            rest.token.as_deref(),
            Some("kubeconfig-user-abcde:sometoken")
        );
        assert_eq!(rest.ca_pem.as_deref(), Some(&b"-----BEGIN"[..]));
        assert!(!rest.insecure);
    }

    #[test]
    fn test_parse_rejects_contextless_config() {
        assert!(matches!(
            parse("apiVersion: v1\nkind: Config\n"),
            Err(HarvesterError::Config(_))
        ));
    }

    #[test]
    fn test_parse_rejects_dangling_context() {
        let broken = KUBECONFIG.replace("current-context: local", "current-context: other");
        assert!(parse(&broken).is_err());
    }
}
