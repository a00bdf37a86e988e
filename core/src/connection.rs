//! Client-side view of a provisioned host: the flags a Docker client needs,
//! the shell environment that sets them and certificate refresh for hosts
//! whose server certificate no longer validates.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rackctl_common::config::Config;
use rackctl_common::host::HostRecord;
use rackctl_common::host::auth::{CLIENT_CA_FILE, CLIENT_CERT_FILE, CLIENT_KEY_FILE};
use rackctl_common::host::driver::URL_DRIVER;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pki;
use crate::provision;
use crate::ssh::RemoteExecutor;

/// Which endpoint of a host the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// The host's own daemon.
    #[default]
    Standalone,
    /// The swarm manager on a master, with client credentials.
    Swarm,
    /// The swarm manager, authenticating with the master's server pair.
    SwarmMaster,
}

/// TLS flags for a Docker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFlags {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub docker_host: String,
}

impl fmt::Display for ConnectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "--tlsverify --tlscacert={} --tlscert={} --tlskey={} -H={}",
            quoted(&self.ca),
            quoted(&self.cert),
            quoted(&self.key),
            self.docker_host
        )
    }
}

fn quoted(path: &Path) -> String {
    format!("{:?}", path.display().to_string())
}

/// Builds the client flags of `record` for `mode`.
pub fn resolve(record: &HostRecord, mode: ConnectionMode) -> Result<ConnectionFlags> {
    let dir = &record.auth.client_dir;
    let mut flags = ConnectionFlags {
        ca: dir.join(CLIENT_CA_FILE),
        cert: dir.join(CLIENT_CERT_FILE),
        key: dir.join(CLIENT_KEY_FILE),
        docker_host: record.url(),
    };

    if mode == ConnectionMode::Standalone {
        return Ok(flags);
    }

    if !record.swarm.is_master {
        return Err(Error::ConfigMismatch(format!("{} is not a swarm master", record.name)));
    }
    let port = record.swarm.listen_port().ok_or_else(|| {
        Error::ConfigMismatch(format!(
            "{} has no swarm listen port in '{}'",
            record.name, record.swarm.listen_host
        ))
    })?;
    flags.docker_host = format!("tcp://{}:{port}", record.driver.ip()?);

    if mode == ConnectionMode::SwarmMaster {
        flags.cert = record.auth.server_cert.clone();
        flags.key = record.auth.server_key.clone();
    }
    debug!("{} resolved to {}", record.name, flags.docker_host);
    Ok(flags)
}

/// Regenerates and re-pushes the server certificate when it no longer
/// validates. Only SSH-managed hosts served over TCP are checked.
///
/// Returns `true` when new material was installed.
pub async fn refresh_certificates(
    executor: &dyn RemoteExecutor,
    record: &HostRecord,
    config: &Config,
) -> Result<bool> {
    if record.driver.driver_name() == URL_DRIVER || !record.url().starts_with("tcp://") {
        return Ok(false);
    }

    let ip = record.driver.ip()?;
    let auth = &record.auth;
    if pki::validate(&ip, &auth.ca_cert, &auth.server_cert, &auth.server_key) {
        return Ok(false);
    }

    info!("Invalid certificates detected for {}, regenerating", record.name);
    provision::configure_auth(executor, record, config).await?;
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Posix,
    Fish,
}

impl Shell {
    /// Picks the shell from a `$SHELL`-style path; anything but fish is posix.
    pub fn detect(shell_path: Option<&str>) -> Self {
        let name = shell_path
            .map(|p| Path::new(p).file_name().and_then(|n| n.to_str()).unwrap_or(p))
            .unwrap_or_default();
        if name == "fish" { Shell::Fish } else { Shell::Posix }
    }

    /// Command that loads the environment of `name` into the current shell.
    pub fn activation_hint(self, program: &str, name: &str) -> String {
        match self {
            Shell::Posix => format!("eval \"$({program} env {name})\""),
            Shell::Fish => format!("{program} env {name} | source"),
        }
    }
}

impl FromStr for Shell {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fish" => Ok(Shell::Fish),
            "sh" | "bash" | "zsh" | "posix" => Ok(Shell::Posix),
            other => Err(format!("unsupported shell '{other}'")),
        }
    }
}

/// Export statements pointing a Docker client at `record`.
pub fn env_lines(record: &HostRecord, shell: Shell) -> Vec<String> {
    let vars = [
        ("DOCKER_TLS_VERIFY", String::from("1")),
        ("DOCKER_CERT_PATH", record.auth.client_dir.display().to_string()),
        ("DOCKER_HOST", record.url()),
    ];

    vars.iter()
        .map(|(key, value)| match shell {
            Shell::Posix => format!("export {key}={value:?}"),
            Shell::Fish => format!("set -x {key} {value:?};"),
        })
        .collect()
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
