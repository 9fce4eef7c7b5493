//! Client for the Rancher-style management API.
//!
//! The management server fronts the Harvester clusters: it issues the
//! kubeconfig we use for everything else and owns the project/cluster
//! catalog. Requests authenticate with the token's access/secret halves as
//! HTTP basic auth against `<server>/v3`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::ServerConfig;
use crate::errors::{HarvesterError, Result};

/// Typed access to one management server.
#[derive(Debug)]
pub struct ManagementClient {
    http: reqwest::blocking::Client,
    base: String,
    access_key: String,
    secret_key: String,
}

/// A generic management API resource, enough to identify it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cluster_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Cluster {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateKubeconfigOutput {
    config: String,
}

/// Response of the public `settings/cacerts` endpoint.
#[derive(Debug, Deserialize)]
pub struct CaCertResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl ManagementClient {
    /// Build a client for a stored server entry.
    pub fn from_server(server: &ServerConfig) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        if !server.ca_certs.is_empty() {
            let pem = crate::config::normalize_cert(&server.ca_certs);
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| HarvesterError::auth(format!("configured CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| HarvesterError::config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: format!("{}/v3", server.url.trim_end_matches('/')),
            access_key: server.access_key.clone(),
            secret_key: server.secret_key.clone(),
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!("GET {}{}", self.base, path);
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .query(query)
            .send()
            .map_err(|e| HarvesterError::upstream(0, format!("request failed: {e}")))?;
        Self::handle(response)
    }

    fn handle<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| HarvesterError::upstream(status.as_u16(), e.to_string()))?;
        match status.as_u16() {
            401 | 403 => Err(HarvesterError::auth(
                "the management server rejected the configured token",
            )),
            s if !status.is_success() => Err(HarvesterError::upstream(s, body.trim().to_string())),
            _ => serde_json::from_str(&body).map_err(|e| {
                HarvesterError::parse(format!("decoding management API response: {e}"))
            }),
        }
    }

    /// Cheap authenticated probe, used by `login` to validate credentials
    /// and surface certificate failures early.
    pub fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self.get_json("", &[])?;
        Ok(())
    }

    /// All projects visible to the token.
    pub fn projects(&self) -> Result<Vec<Project>> {
        let collection: Collection<Project> = self.get_json("/projects", &[])?;
        Ok(collection.data)
    }

    /// All clusters visible to the token.
    pub fn clusters(&self) -> Result<Vec<Cluster>> {
        let collection: Collection<Cluster> = self.get_json("/clusters", &[])?;
        Ok(collection.data)
    }

    /// Fetch a resource of the given type by exact id; `None` on 404.
    pub fn by_id(&self, resource_type: &str, id: &str) -> Result<Option<Resource>> {
        let path = format!("/{}/{}", collection_name(resource_type), id);
        match self.get_json(&path, &[]) {
            Ok(resource) => Ok(Some(resource)),
            Err(HarvesterError::Upstream { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List resources of the given type filtered by name.
    pub fn list_by_name(&self, resource_type: &str, name: &str) -> Result<Vec<Resource>> {
        let path = format!("/{}", collection_name(resource_type));
        let collection: Collection<Resource> =
            self.get_json(&path, &[("name", name), ("removed_null", "1")])?;
        Ok(collection.data)
    }

    /// Ask the server to generate a kubeconfig for a cluster.
    pub fn generate_kubeconfig(&self, cluster_id: &str) -> Result<String> {
        let url = format!("{}/clusters/{}", self.base, cluster_id);
        debug!("POST {}?action=generateKubeconfig", url);
        let response = self
            .http
            .post(url)
            .query(&[("action", "generateKubeconfig")])
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .map_err(|e| HarvesterError::upstream(0, format!("request failed: {e}")))?;
        let output: GenerateKubeconfigOutput = Self::handle(response)?;
        Ok(output.config)
    }
}

/// Fetch the server's advertised CA certificate without verification. Only
/// used during `login` against servers with self-signed certificates; the
/// result is verified and shown to the user before being trusted.
pub fn fetch_cacert_insecure(server: &ServerConfig) -> Result<CaCertResponse> {
    let http = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| HarvesterError::config(format!("building HTTP client: {e}")))?;
    let url = format!("{}/v3/settings/cacerts", server.url.trim_end_matches('/'));
    let response = http
        .get(&url)
        .basic_auth(&server.access_key, Some(&server.secret_key))
        .send()
        .map_err(|e| HarvesterError::upstream(0, format!("request failed: {e}")))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|e| HarvesterError::upstream(status.as_u16(), e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| {
        HarvesterError::auth(format!(
            "unable to parse response from {url}: {e}\nResponse:\n{body}"
        ))
    })
}

/// Collection endpoint for a resource type name.
fn collection_name(resource_type: &str) -> String {
    format!("{}s", resource_type.trim())
}

/// Resolve a human-supplied name or id against an ordered list of candidate
/// resource types.
///
/// For each type in order, the name is probed as an exact id first, then as
/// a `name` filter. More than one match within a type, or matches in two
/// different types, is a hard error; guessing is never attempted.
pub fn lookup(client: &ManagementClient, name: &str, types: &[&str]) -> Result<Resource> {
    let mut by_name: Option<Resource> = None;

    for resource_type in types {
        if let Some(resource) = client.by_id(resource_type, name)? {
            if resource.id == name {
                return Ok(resource);
            }
        }

        let matches = client.list_by_name(resource_type, name)?;
        if matches.len() > 1 {
            let ids: Vec<&str> = matches.iter().map(|r| r.id.as_str()).collect();
            return Err(HarvesterError::lookup(format!(
                "multiple resources of type {resource_type} found for name {name}: {ids:?}"
            )));
        }
        let Some(found) = matches.into_iter().next() else {
            continue;
        };
        if let Some(previous) = &by_name {
            return Err(HarvesterError::lookup(format!(
                "multiple resources named {name}: {}:{}, {}:{}",
                found.resource_type, found.id, previous.resource_type, previous.id
            )));
        }
        by_name = Some(found);
    }

    by_name.ok_or_else(|| HarvesterError::lookup(format!("not found: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name() {
        assert_eq!(collection_name("cluster"), "clusters");
        assert_eq!(collection_name("project"), "projects");
    }
}
