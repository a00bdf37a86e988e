use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::auth::CertificateBundle;
use super::driver::Driver;
use super::swarm::SwarmConfig;
use crate::network::identity::HostIdentity;

/// Everything known about one host, persisted as its `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub name: HostIdentity,
    /// Local working directory of the host.
    pub dir: PathBuf,
    pub driver: Driver,
    pub auth: CertificateBundle,
    pub swarm: SwarmConfig,
}

impl HostRecord {
    pub fn url(&self) -> String {
        self.driver.url()
    }
}
