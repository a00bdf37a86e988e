//! Backends a host can be reached through.
//!
//! The set is closed: a bare remote host driven over SSH, or an already
//! running daemon addressed only by URL. Capabilities that a backend lacks
//! return [`DriverError::Unsupported`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::credentials::{Credentials, SshAuth, SshTarget};

pub const REMOTE_DRIVER: &str = "remote";
pub const URL_DRIVER: &str = "none";

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver '{driver}' does not support {capability}")]
    Unsupported {
        driver: &'static str,
        capability: &'static str,
    },

    #[error("invalid daemon url '{0}'")]
    InvalidUrl(String),
}

/// A bare host reached over SSH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHost {
    pub host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub daemon_port: u16,
    /// Host directory, holds the generated key pair.
    pub store_path: PathBuf,
    #[serde(skip)]
    pub credentials: Credentials,
}

impl RemoteHost {
    pub fn new(
        host: impl Into<String>,
        ssh_port: u16,
        ssh_user: impl Into<String>,
        daemon_port: u16,
        store_path: impl Into<PathBuf>,
        password: Option<String>,
    ) -> Self {
        let store_path = store_path.into();
        Self {
            host: host.into(),
            ssh_port,
            ssh_user: ssh_user.into(),
            daemon_port,
            credentials: Credentials::new(store_path.join("id_ed25519"), password),
            store_path,
        }
    }

    /// Rebuilds the key-only credentials after a record was read back.
    pub fn restore_credentials(&mut self) {
        self.credentials = Credentials::new(self.store_path.join("id_ed25519"), None);
    }
}

/// An existing daemon, e.g. `tcp://10.0.0.9:2376`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlHost {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum Driver {
    Remote(RemoteHost),
    Url(UrlHost),
}

impl Driver {
    pub fn driver_name(&self) -> &'static str {
        match self {
            Driver::Remote(_) => REMOTE_DRIVER,
            Driver::Url(_) => URL_DRIVER,
        }
    }

    pub fn ip(&self) -> Result<String, DriverError> {
        match self {
            Driver::Remote(remote) => Ok(remote.host.clone()),
            Driver::Url(url) => host_of_url(&url.url),
        }
    }

    pub fn url(&self) -> String {
        match self {
            Driver::Remote(remote) => format!("tcp://{}:{}", remote.host, remote.daemon_port),
            Driver::Url(url) => url.url.clone(),
        }
    }

    /// TLS port of the daemon API.
    pub fn daemon_port(&self) -> Result<u16, DriverError> {
        match self {
            Driver::Remote(remote) => Ok(remote.daemon_port),
            Driver::Url(url) => port_of_url(&url.url),
        }
    }

    pub fn ssh_hostname(&self) -> Result<&str, DriverError> {
        self.remote("ssh").map(|r| r.host.as_str())
    }

    pub fn ssh_port(&self) -> Result<u16, DriverError> {
        self.remote("ssh").map(|r| r.ssh_port)
    }

    pub fn ssh_username(&self) -> Result<&str, DriverError> {
        self.remote("ssh").map(|r| r.ssh_user.as_str())
    }

    pub fn ssh_key_path(&self) -> Result<PathBuf, DriverError> {
        self.remote("ssh keys").map(|r| r.credentials.key_path().to_path_buf())
    }

    pub fn ssh_password(&self) -> Option<&str> {
        match self {
            Driver::Remote(remote) => remote.credentials.password(),
            Driver::Url(_) => None,
        }
    }

    pub fn clear_ssh_password(&mut self) {
        if let Driver::Remote(remote) = self {
            remote.credentials.clear_password();
        }
    }

    pub fn ssh_target(&self) -> Result<SshTarget, DriverError> {
        Ok(SshTarget {
            hostname: self.ssh_hostname()?.to_string(),
            port: self.ssh_port()?,
            username: self.ssh_username()?.to_string(),
        })
    }

    /// Password while one is held, the host key otherwise.
    pub fn ssh_auth(&self) -> Result<SshAuth, DriverError> {
        self.remote("ssh").map(|r| r.credentials.auth())
    }

    fn remote(&self, capability: &'static str) -> Result<&RemoteHost, DriverError> {
        match self {
            Driver::Remote(remote) => Ok(remote),
            Driver::Url(_) => Err(DriverError::Unsupported {
                driver: URL_DRIVER,
                capability,
            }),
        }
    }
}

/// `tcp://10.0.0.9:2376` -> `10.0.0.9`.
fn host_of_url(url: &str) -> Result<String, DriverError> {
    let (_, rest) = url
        .split_once("://")
        .ok_or_else(|| DriverError::InvalidUrl(url.to_string()))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = match authority.rsplit_once(':') {
        Some((host, _port)) => host,
        None => authority,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        return Err(DriverError::InvalidUrl(url.to_string()));
    }
    Ok(host.to_string())
}

fn port_of_url(url: &str) -> Result<u16, DriverError> {
    let (_, rest) = url
        .split_once("://")
        .ok_or_else(|| DriverError::InvalidUrl(url.to_string()))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    authority
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .ok_or_else(|| DriverError::InvalidUrl(url.to_string()))
}
