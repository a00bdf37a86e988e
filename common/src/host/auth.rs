use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File names of the client-side TLS triple copied into every host directory.
pub const CLIENT_CA_FILE: &str = "ca.pem";
pub const CLIENT_CERT_FILE: &str = "cert.pem";
pub const CLIENT_KEY_FILE: &str = "key.pem";

pub const SERVER_CERT_FILE: &str = "server.pem";
pub const SERVER_KEY_FILE: &str = "server-key.pem";

/// Paths of every certificate and key a host's TLS setup touches.
///
/// CA and client material is shared by the whole store; the server pair and
/// `client_dir` are per host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    /// Directory receiving `ca.pem`, `cert.pem` and `key.pem` for clients.
    pub client_dir: PathBuf,
}

impl CertificateBundle {
    /// Shared CA and client paths under `certs_dir`, server paths under `host_dir`.
    pub fn for_host(certs_dir: &Path, host_dir: &Path) -> Self {
        Self {
            ca_cert: certs_dir.join("ca.pem"),
            ca_key: certs_dir.join("ca-key.pem"),
            client_cert: certs_dir.join("cert.pem"),
            client_key: certs_dir.join("key.pem"),
            server_cert: host_dir.join(SERVER_CERT_FILE),
            server_key: host_dir.join(SERVER_KEY_FILE),
            client_dir: host_dir.to_path_buf(),
        }
    }
}
