//! The remote execution channel.
//!
//! Everything the pipeline does on a host goes through [`RemoteExecutor::run`]:
//! one authenticated session, one command, complete output or a typed error.
//! Retrying is left to callers.

use async_trait::async_trait;
use rackctl_common::host::{SshAuth, SshTarget};
use thiserror::Error;

pub mod keygen;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod script;

pub use session::SshExecutor;

/// Captured output of a command that exited with status 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ExecError {
    /// The host could not be reached at all.
    #[error("cannot reach {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication rejected by {target}: {reason}")]
    Auth { target: String, reason: String },

    /// Handshake, channel or protocol failure after the dial succeeded.
    #[error("session with {target} failed: {reason}")]
    Session { target: String, reason: String },

    #[error("`{command}` exited with status {status}: {}", stderr.trim())]
    Exit {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },
}

impl ExecError {
    /// Failures of the channel itself, as opposed to the command.
    pub fn is_transport(&self) -> bool {
        !matches!(self, ExecError::Exit { .. })
    }
}

/// Runs one command on a remote host and waits for it to finish.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(
        &self,
        target: &SshTarget,
        auth: &SshAuth,
        command: &str,
    ) -> Result<CommandOutput, ExecError>;
}
