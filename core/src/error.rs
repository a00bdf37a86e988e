use std::time::Duration;

use rackctl_common::host::DriverError;
use rackctl_common::network::identity::{HostIdentity, IdentityError};
use thiserror::Error;

use crate::pki::PkiError;
use crate::provision::Step;
use crate::ssh::ExecError;
use crate::store::StoreError;

/// Errors of the provisioning pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Dial, authentication or session failure on the remote channel.
    #[error("transport: {0}")]
    Transport(#[source] ExecError),

    /// A fatal remote command exited non-zero.
    #[error("remote command failed: {0}")]
    RemoteCommand(#[source] ExecError),

    #[error("certificate: {0}")]
    Certificate(#[from] PkiError),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// The host's settings contradict what was asked of it.
    #[error("{0}")]
    ConfigMismatch(String),

    #[error(transparent)]
    InvalidAddress(#[from] IdentityError),

    /// Two addresses of one batch derive the same host name.
    #[error("{first} and {second} would both be named {name}")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("ssh key: {0}")]
    Key(#[from] ssh_key::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExecError> for Error {
    fn from(err: ExecError) -> Self {
        if err.is_transport() {
            Error::Transport(err)
        } else {
            Error::RemoteCommand(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A host that stopped provisioning, and where.
///
/// `step` is `None` when every step passed but the host record could not be
/// saved.
#[derive(Debug, Error)]
#[error("{host} failed {}: {source}", stage(.step))]
pub struct StepFailure {
    pub host: HostIdentity,
    pub step: Option<Step>,
    #[source]
    pub source: Error,
}

fn stage(step: &Option<Step>) -> String {
    match step {
        Some(step) => format!("during {step}"),
        None => String::from("while saving its record"),
    }
}
