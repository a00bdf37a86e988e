pub mod config;
pub mod create;
pub mod env;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use rackctl_common::config::FailurePolicy;
use rackctl_common::host::HostRecord;
use rackctl_common::network::range::RangeExpression;
use rackctl_core::connection::Shell;
use rackctl_core::store::{HostStore, StoreError};

#[derive(Parser)]
#[command(name = "rackctl")]
#[command(about = "Turns bare hosts into a TLS-secured container cluster.")]
#[command(version)]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Root of the local host store
    #[arg(long, short = 's', global = true, env = "RACKCTL_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision every host of an address range
    #[command(alias = "c")]
    Create(CreateArgs),
    /// Print Docker client flags for a host
    Config(ConfigArgs),
    /// Print shell exports pointing a Docker client at a host
    Env(EnvArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DriverKind {
    /// Bare host reached over SSH
    Remote,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Base name embedded in every host name
    pub base: String,

    #[arg(long, short = 'd', value_enum, default_value = "remote")]
    pub driver: DriverKind,

    /// Host addresses, e.g. 10.0.0.[1:20]
    #[arg(long)]
    pub host_range: RangeExpression,

    #[arg(long)]
    pub ssh_port: Option<u16>,

    #[arg(long)]
    pub ssh_user: Option<String>,

    /// Password shared by every host of the range
    #[arg(long, env = "RACKCTL_SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// Seconds to wait for an SSH connection
    #[arg(long)]
    pub dial_timeout: Option<u64>,

    /// Seconds to wait for the runtime after installation
    #[arg(long)]
    pub ready_timeout: Option<u64>,

    /// Organization written into the certificates
    #[arg(long)]
    pub organization: Option<String>,

    /// Certificate key size: 256 (P-256) or 384 (P-384)
    #[arg(long, value_parser = parse_key_bits)]
    pub key_bits: Option<u32>,

    /// What happens to local state when a host fails: keep or remove-local
    #[arg(long)]
    pub on_failure: Option<FailurePolicy>,

    /// Join the hosts to a swarm
    #[arg(long)]
    pub swarm: bool,

    /// Also run the swarm manager on every host
    #[arg(long)]
    pub swarm_master: bool,

    /// Discovery token or URL of the swarm
    #[arg(long, default_value = "")]
    pub swarm_discovery: String,

    /// Swarm address stored with each host; node agents always join with <host ip>:<daemon port>
    #[arg(long, default_value = "")]
    pub swarm_addr: String,

    /// Listen URL of the swarm manager
    #[arg(long, default_value = "tcp://0.0.0.0:3376")]
    pub swarm_host: String,

    /// Image of the swarm agent
    #[arg(long)]
    pub swarm_image: Option<String>,
}

#[derive(Args)]
pub struct ConfigArgs {
    pub name: String,

    /// Target the swarm manager of a master
    #[arg(long)]
    pub swarm: bool,

    /// Target the swarm manager with the master's server certificate
    #[arg(long)]
    pub swarm_master: bool,
}

#[derive(Args)]
pub struct EnvArgs {
    pub name: String,

    /// posix or fish, detected from $SHELL when omitted
    #[arg(long)]
    pub shell: Option<Shell>,
}

fn parse_key_bits(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(bits @ (256 | 384)) => Ok(bits),
        _ => Err(format!("unsupported key size '{s}', expected 256 or 384")),
    }
}

/// Loads a stored host, naming the known ones when it does not exist.
pub fn load_host(store: &HostStore, name: &str) -> anyhow::Result<HostRecord> {
    match store.load(name) {
        Err(StoreError::NotFound(_)) => {
            let known: Vec<String> = store
                .list()
                .unwrap_or_default()
                .iter()
                .map(ToString::to_string)
                .collect();
            if known.is_empty() {
                bail!("Host {name} does not exist, no hosts have been created yet");
            }
            bail!("Host {name} does not exist, known hosts: {}", known.join(", "));
        }
        loaded => loaded.with_context(|| format!("Error loading host {name}")),
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
