use serde::{Deserialize, Serialize};

/// Cluster membership settings of a host, fixed when the host is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Host takes part in the swarm at all.
    pub is_cluster: bool,
    /// Host also runs the managing agent.
    pub is_master: bool,
    /// Discovery token or URL handed to every agent, e.g. `token://abc`.
    pub discovery: String,
    /// `--swarm-addr` as given at creation. Kept with the record only; node
    /// agents always join with `<host ip>:<daemon port>`.
    pub advertise_address: String,
    /// Listen URL of the managing agent, e.g. `tcp://0.0.0.0:3376`.
    pub listen_host: String,
}

impl SwarmConfig {
    /// Port part of [`SwarmConfig::listen_host`].
    pub fn listen_port(&self) -> Option<u16> {
        let authority = self
            .listen_host
            .split_once("://")
            .map_or(self.listen_host.as_str(), |(_, rest)| rest);
        let authority = authority.split('/').next().unwrap_or(authority);
        let (_, port) = authority.rsplit_once(':')?;
        port.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_listen_host(host: &str) -> SwarmConfig {
        SwarmConfig {
            listen_host: host.to_string(),
            ..SwarmConfig::default()
        }
    }

    #[test]
    fn listen_port_is_read_from_url() {
        assert_eq!(with_listen_host("tcp://0.0.0.0:3376").listen_port(), Some(3376));
        assert_eq!(with_listen_host("0.0.0.0:4000").listen_port(), Some(4000));
        assert_eq!(with_listen_host("tcp://[::]:3376/").listen_port(), Some(3376));
    }

    #[test]
    fn listen_port_missing_or_invalid() {
        assert_eq!(with_listen_host("").listen_port(), None);
        assert_eq!(with_listen_host("tcp://0.0.0.0").listen_port(), None);
        assert_eq!(with_listen_host("tcp://0.0.0.0:http").listen_port(), None);
    }
}
