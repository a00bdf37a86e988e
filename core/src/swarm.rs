//! Cluster agent bootstrap.
//!
//! Once the daemon answers on its TLS port, the agent image is pulled and
//! started in `manage` mode on masters, then in `join` mode on every
//! cluster member.

use rackctl_common::config::Config;
use rackctl_common::host::HostRecord;
use rackctl_common::host::auth::{CLIENT_CA_FILE, SERVER_CERT_FILE, SERVER_KEY_FILE};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::provision::{self, wait};
use crate::ssh::RemoteExecutor;

const MASTER_CONTAINER: &str = "swarm-agent-master";
const NODE_CONTAINER: &str = "swarm-agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Pull,
    Manage,
    Join,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLaunch {
    pub role: AgentRole,
    pub command: String,
}

/// Commands that bring up the agents of `record`, in launch order.
///
/// Empty for hosts outside the cluster. A master without a listen port is a
/// configuration error.
pub fn agent_commands(record: &HostRecord, config: &Config) -> Result<Vec<AgentLaunch>> {
    let swarm = &record.swarm;
    if !swarm.is_cluster {
        return Ok(Vec::new());
    }

    let image = &config.agent_image;
    let dir = config.runtime.options_dir.trim_end_matches('/');
    let mut launches = vec![AgentLaunch {
        role: AgentRole::Pull,
        command: format!("sudo docker pull {image}"),
    }];

    if swarm.is_master {
        let port = swarm.listen_port().ok_or_else(|| {
            Error::ConfigMismatch(format!(
                "swarm master {} needs a listen host with a port, got '{}'",
                record.name, swarm.listen_host
            ))
        })?;
        launches.push(AgentLaunch {
            role: AgentRole::Manage,
            command: format!(
                "sudo docker run -d -p {port}:{port} --restart=always --name {MASTER_CONTAINER} \
                 -v {dir}:{dir} {image} manage --tlsverify --tlscacert={dir}/{CLIENT_CA_FILE} \
                 --tlscert={dir}/{SERVER_CERT_FILE} --tlskey={dir}/{SERVER_KEY_FILE} \
                 -H {listen} {discovery}",
                listen = swarm.listen_host,
                discovery = swarm.discovery,
            ),
        });
    }

    launches.push(AgentLaunch {
        role: AgentRole::Join,
        command: format!(
            "sudo docker run -d --restart=always --name {NODE_CONTAINER} -v {dir}:{dir} {image} \
             join --addr {addr} {discovery}",
            addr = join_address(record)?,
            discovery = swarm.discovery,
        ),
    });

    Ok(launches)
}

/// Endpoint the node agent advertises: always the host's own daemon.
fn join_address(record: &HostRecord) -> Result<String> {
    Ok(format!("{}:{}", record.driver.ip()?, record.driver.daemon_port()?))
}

/// Starts the agents of a cluster member; does nothing for other hosts.
pub async fn configure(executor: &dyn RemoteExecutor, record: &HostRecord, config: &Config) -> Result<()> {
    let launches = agent_commands(record, config)?;
    if launches.is_empty() {
        debug!("{} is not a cluster member", record.name);
        return Ok(());
    }

    let ip = record.driver.ip()?;
    let port = record.driver.daemon_port()?;
    wait::await_port(&ip, port, config.ready_timeout, config.poll_interval).await?;

    for launch in launches {
        match launch.role {
            AgentRole::Pull => info!("{}: pulling {}", record.name, config.agent_image),
            AgentRole::Manage => info!("{}: launching swarm master", record.name),
            AgentRole::Join => info!("{}: launching swarm node", record.name),
        }
        provision::run(executor, record, &launch.command).await?;
    }
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
