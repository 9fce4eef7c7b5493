//! Local Rancher-style server configuration.
//!
//! `login` persists one entry per management server into a JSON file
//! (`cli2.json`) under the Rancher config directory; every other command
//! only reads the focused entry. The file is the single piece of state this
//! CLI keeps on disk besides the fetched kubeconfig.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{HarvesterError, Result};

/// File name inside the Rancher config directory.
pub const CONFIG_FILENAME: &str = "cli2.json";

/// One remote management server with its credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub token_key: String,
    #[serde(rename = "cacert")]
    pub ca_certs: String,
    /// Focused project id, `<cluster>:<project>`.
    pub project: String,
}

impl ServerConfig {
    /// Cluster half of the focused project id, when one is set.
    pub fn cluster_id(&self) -> Option<&str> {
        self.project.split(':').next().filter(|s| !s.is_empty())
    }
}

/// The full on-disk configuration, keyed by server nickname.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(rename = "Servers", default)]
    pub servers: HashMap<String, ServerConfig>,
    #[serde(rename = "CurrentServer", default)]
    pub current_server: String,
}

impl Config {
    /// Load `cli2.json` from the given directory. A missing file yields an
    /// empty configuration; an unreadable or unparsable one is an error.
    pub fn load(dir: &Path) -> Result<Config> {
        let path = dir.join(CONFIG_FILENAME);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config {
                    path,
                    ..Default::default()
                })
            }
            Err(e) => {
                return Err(HarvesterError::config(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            }
        };
        let mut cf: Config = serde_json::from_slice(&content).map_err(|e| {
            HarvesterError::config(format!("parsing {}: {e}", path.display()))
        })?;
        cf.path = path;
        Ok(cf)
    }

    /// Persist the configuration, creating the directory with restrictive
    /// permissions on first use.
    pub fn write(&self) -> Result<()> {
        let dir = self.path.parent().ok_or_else(|| {
            HarvesterError::config(format!("no parent directory for {}", self.path.display()))
        })?;
        if !dir.exists() {
            info!("configuration folder {} does not exist, creating it", dir.display());
            create_private_dir(dir)?;
        }
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| HarvesterError::config(format!("serializing configuration: {e}")))?;
        std::fs::write(&self.path, content).map_err(|e| {
            HarvesterError::config(format!("writing {}: {e}", self.path.display()))
        })
    }

    /// The currently focused server entry.
    pub fn focused_server(&self) -> Result<&ServerConfig> {
        self.servers
            .get(&self.current_server)
            .ok_or_else(|| HarvesterError::config("no configuration found, run `harvctl login`"))
    }
}

/// Create a directory tree with mode 0700 on the leaf.
pub fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| HarvesterError::config(format!("creating {}: {e}", dir.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(dir, perms)
            .map_err(|e| HarvesterError::config(format!("chmod {}: {e}", dir.display())))?;
    }
    Ok(())
}

/// Undo the escaped line breaks some tooling writes into stored PEM blobs.
pub fn normalize_cert(ca_cert: &str) -> String {
    ca_cert.replace("\\n", "\n")
}

/// Normalize a CA certificate and check that it is a parsable PEM
/// certificate. Returns the normalized text.
pub fn verify_cert(ca_cert: &str) -> Result<String> {
    let normalized = normalize_cert(ca_cert);
    if !normalized.contains("-----BEGIN CERTIFICATE-----") {
        return Err(HarvesterError::auth("no cert was found"));
    }
    reqwest::Certificate::from_pem(normalized.as_bytes())
        .map_err(|e| HarvesterError::auth(format!("CA certificate is not valid: {e}")))?;
    Ok(normalized)
}

/// Read a CA certificate from disk and verify it.
pub fn load_and_verify_cert(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| HarvesterError::auth(format!("reading {}: {e}", path.display())))?;
    verify_cert(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_yields_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let cf = Config::load(dir.path()).unwrap();
        assert!(cf.servers.is_empty());
        assert!(cf.focused_server().is_err());
        assert_eq!(cf.path, dir.path().join(CONFIG_FILENAME));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "{not json").unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(HarvesterError::Config(_))
        ));
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cf = Config::load(dir.path().join("sub").as_path()).unwrap();
        cf.current_server = "rancherDefault".to_string();
        cf.servers.insert(
            "rancherDefault".to_string(),
            ServerConfig {
                url: "https://rancher.example.com".to_string(),
                access_key: "token-abcde".to_string(),
                secret_key: "secret".to_string(),
                token_key: "token-abcde:secret".to_string(),
                project: "c-qmpbm:p-mm62v".to_string(),
                ..Default::default()
            },
        );
        cf.write().unwrap();

        let loaded = Config::load(dir.path().join("sub").as_path()).unwrap();
        let server = loaded.focused_server().unwrap();
        assert_eq!(server.url, "https://rancher.example.com");
        assert_eq!(server.cluster_id(), Some("c-qmpbm"));
    }

    #[test]
    fn test_normalize_cert_unescapes_line_breaks() {
        let cert = "-----BEGIN CERTIFICATE-----\\nabc\\n-----END CERTIFICATE-----";
        let normalized = normalize_cert(cert);
        assert!(normalized.contains("\n"));
        assert!(!normalized.contains("\\n"));
    }

    #[test]
    fn test_verify_cert_rejects_non_pem_input() {
        assert!(matches!(
            verify_cert("definitely not a certificate"),
            Err(HarvesterError::Auth(_))
        ));
    }
}
