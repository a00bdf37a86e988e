//! Host models shared by the provisioning pipeline and the command line.

pub mod auth;
pub mod credentials;
pub mod driver;
pub mod record;
pub mod swarm;

pub use auth::CertificateBundle;
pub use credentials::{Credentials, SshAuth, SshTarget};
pub use driver::{Driver, DriverError, RemoteHost, UrlHost};
pub use record::HostRecord;
pub use swarm::SwarmConfig;
