//! Blocking client for the Harvester cluster APIs.
//!
//! Harvester exposes plain Kubernetes-style REST groups; every subcommand
//! issues a small bounded sequence of synchronous calls and exits, so a
//! blocking client matches the execution model. Timeouts and retries are
//! left to the reqwest defaults.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::errors::{HarvesterError, Result};
use crate::kubeconfig::RestConfig;
use crate::resources::List;

/// Typed REST access to one Harvester cluster.
#[derive(Debug)]
pub struct HarvesterClient {
    http: reqwest::blocking::Client,
    base: String,
}

/// Path of a namespaced resource collection or object in an API group.
pub fn group_path(
    group_version: &str,
    namespace: Option<&str>,
    resource: &str,
    name: Option<&str>,
) -> String {
    let root = if group_version == "v1" {
        format!("/api/{group_version}")
    } else {
        format!("/apis/{group_version}")
    };
    let mut path = match namespace {
        Some(ns) => format!("{root}/namespaces/{ns}/{resource}"),
        None => format!("{root}/{resource}"),
    };
    if let Some(name) = name {
        path.push('/');
        path.push_str(name);
    }
    path
}

/// `kubevirt.io/v1` collection/object path.
pub fn kubevirt(namespace: &str, resource: &str, name: Option<&str>) -> String {
    group_path("kubevirt.io/v1", Some(namespace), resource, name)
}

/// `harvesterhci.io/v1beta1` collection/object path.
pub fn harvester(namespace: Option<&str>, resource: &str, name: Option<&str>) -> String {
    group_path("harvesterhci.io/v1beta1", namespace, resource, name)
}

/// `migration.harvesterhci.io/v1beta1` collection/object path.
pub fn migration(namespace: &str, resource: &str, name: Option<&str>) -> String {
    group_path(
        "migration.harvesterhci.io/v1beta1",
        Some(namespace),
        resource,
        name,
    )
}

/// Core `v1` collection/object path.
pub fn core(namespace: &str, resource: &str, name: Option<&str>) -> String {
    group_path("v1", Some(namespace), resource, name)
}

/// `k8s.cni.cncf.io/v1` collection/object path.
pub fn cni(namespace: &str, resource: &str, name: Option<&str>) -> String {
    group_path("k8s.cni.cncf.io/v1", Some(namespace), resource, name)
}

impl HarvesterClient {
    /// Build a client from a resolved kubeconfig context.
    pub fn new(rest: &RestConfig) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(ca) = &rest.ca_pem {
            let cert = reqwest::Certificate::from_pem(ca)
                .map_err(|e| HarvesterError::auth(format!("cluster CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        if rest.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(token) = &rest.token {
            let mut headers = reqwest::header::HeaderMap::new();
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| HarvesterError::auth(format!("bearer token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        let http = builder
            .build()
            .map_err(|e| HarvesterError::config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: rest.host.clone(),
        })
    }

    /// The API server base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn handle<T: DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| HarvesterError::upstream(status.as_u16(), e.to_string()))?;
        if !status.is_success() {
            return Err(HarvesterError::upstream(status.as_u16(), api_message(&body)));
        }
        serde_json::from_str(&body)
            .map_err(|e| HarvesterError::parse(format!("decoding API response: {e}")))
    }

    /// GET a single object.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!("GET {}", path);
        let response = self
            .http
            .get(self.url(path))
            .send()
            .map_err(request_error)?;
        Self::handle(response)
    }

    /// GET a single object, mapping 404 to `None`.
    pub fn get_opt<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get(path) {
            Ok(obj) => Ok(Some(obj)),
            Err(HarvesterError::Upstream { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List a collection, optionally filtered by a label selector.
    pub fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<T>> {
        debug!("GET {} (selector: {:?})", path, label_selector);
        let mut request = self.http.get(self.url(path));
        if let Some(selector) = label_selector {
            request = request.query(&[("labelSelector", selector)]);
        }
        let response = request.send().map_err(request_error)?;
        let list: List<T> = Self::handle(response)?;
        Ok(list.items)
    }

    /// POST a new object to a collection.
    pub fn create<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        debug!("POST {}", path);
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(request_error)?;
        Self::handle(response)
    }

    /// Merge-patch an object.
    pub fn merge_patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        debug!("PATCH {}", path);
        let response = self
            .http
            .patch(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/merge-patch+json")
            .body(body.to_string())
            .send()
            .map_err(request_error)?;
        Self::handle(response)
    }

    /// DELETE an object.
    pub fn delete(&self, path: &str) -> Result<()> {
        debug!("DELETE {}", path);
        let response = self
            .http
            .delete(self.url(path))
            .send()
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(HarvesterError::upstream(status.as_u16(), api_message(&body)));
        }
        Ok(())
    }
}

fn request_error(e: reqwest::Error) -> HarvesterError {
    HarvesterError::upstream(0, format!("request failed: {e}"))
}

/// Pull the human message out of a Kubernetes `Status` body, falling back to
/// the raw text.
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_path_layout() {
        assert_eq!(
            kubevirt("default", "virtualmachines", Some("web-1")),
            "/apis/kubevirt.io/v1/namespaces/default/virtualmachines/web-1"
        );
        assert_eq!(
            harvester(None, "settings", Some("overcommit-config")),
            "/apis/harvesterhci.io/v1beta1/settings/overcommit-config"
        );
        assert_eq!(
            core("default", "configmaps", None),
            "/api/v1/namespaces/default/configmaps"
        );
        assert_eq!(
            cni("default", "network-attachment-definitions", Some("vlan1")),
            "/apis/k8s.cni.cncf.io/v1/namespaces/default/network-attachment-definitions/vlan1"
        );
        assert_eq!(
            migration("harvester-system", "virtualmachineimports", None),
            "/apis/migration.harvesterhci.io/v1beta1/namespaces/harvester-system/virtualmachineimports"
        );
    }

    #[test]
    fn test_api_message_extraction() {
        assert_eq!(
            api_message(r#"{"kind":"Status","message":"boom","code":404}"#),
            "boom"
        );
        assert_eq!(api_message("plain text\n"), "plain text");
    }
}
