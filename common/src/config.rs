use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Settings of one provisioning run.
///
/// Built by the command line from flags and environment; [`Config::default`]
/// holds the values used when nothing is overridden.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the local host store (`machines/` and `certs/` live below it).
    pub storage_path: PathBuf,

    pub ssh_port: u16,
    pub ssh_user: String,
    /// Upper bound for establishing the TCP connection of an SSH session.
    pub dial_timeout: Duration,

    pub runtime: RuntimeConfig,

    /// Image of the cluster agent, run in `manage` and `join` mode.
    pub agent_image: String,

    /// How long the runtime may take to answer after installation.
    pub ready_timeout: Duration,
    /// Delay between two readiness probes.
    pub poll_interval: Duration,

    /// Organization written into the CA and client certificates.
    pub organization: String,
    /// Key size; 384 selects ECDSA P-384, anything else P-256.
    pub key_bits: u32,

    pub failure_policy: FailurePolicy,
}

/// Where the container runtime comes from and how it is laid out on a host.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Pinned binary name, fetched as `<distribution_url>/<binary>.xz`.
    pub binary: String,
    pub distribution_url: String,
    /// TLS port of the daemon API.
    pub daemon_port: u16,
    /// Remote directory receiving the daemon's TLS material.
    pub options_dir: String,
    /// Remote file holding `DOCKER_OPTS`.
    pub options_file: String,
    /// Value of the `architecture` label attached to the daemon.
    pub architecture: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(".rackctl"),
            ssh_port: 22,
            ssh_user: String::from("root"),
            dial_timeout: Duration::from_secs(10),
            runtime: RuntimeConfig::default(),
            agent_image: String::from("aiyara/swarm"),
            ready_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(3),
            organization: String::from("rackctl"),
            key_bits: 256,
            failure_policy: FailurePolicy::Keep,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: String::from("docker-1.6.0"),
            distribution_url: String::from("https://dl.dropboxusercontent.com/u/381580/docker"),
            daemon_port: 2376,
            options_dir: String::from("/etc/docker"),
            options_file: String::from("/etc/default/docker"),
            architecture: String::from("arm"),
        }
    }
}

/// What happens to local state when a batch stops on a failed host.
///
/// Remote state is never touched; the operator is always warned about it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Leave every host directory and record in place.
    #[default]
    Keep,
    /// Delete the local directories of all hosts created by the failed batch.
    RemoveLocal,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(FailurePolicy::Keep),
            "remove-local" => Ok(FailurePolicy::RemoveLocal),
            other => Err(format!(
                "invalid failure policy '{other}', expected 'keep' or 'remove-local'"
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Keep => f.write_str("keep"),
            FailurePolicy::RemoveLocal => f.write_str("remove-local"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses_case_insensitively() {
        assert_eq!("keep".parse(), Ok(FailurePolicy::Keep));
        assert_eq!("Remove-Local".parse(), Ok(FailurePolicy::RemoveLocal));
        assert!("rollback".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn defaults_match_the_pinned_runtime() {
        let cfg = Config::default();
        assert_eq!(cfg.runtime.binary, "docker-1.6.0");
        assert_eq!(cfg.runtime.daemon_port, 2376);
        assert_eq!(cfg.failure_policy, FailurePolicy::Keep);
    }
}
