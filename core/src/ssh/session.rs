use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use rackctl_common::host::{SshAuth, SshTarget};
use ssh2::Session;
use tracing::debug;

use super::{CommandOutput, ExecError, RemoteExecutor};

/// [`RemoteExecutor`] backed by libssh2.
///
/// Sessions are blocking, so each call runs on the blocking pool and opens a
/// fresh connection; nothing is kept between commands.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    dial_timeout: Duration,
}

impl SshExecutor {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        target: &SshTarget,
        auth: &SshAuth,
        command: &str,
    ) -> Result<CommandOutput, ExecError> {
        let target = target.clone();
        let auth = auth.clone();
        let command = command.to_string();
        let dial_timeout = self.dial_timeout;
        let label = target.to_string();

        tokio::task::spawn_blocking(move || run_blocking(&target, &auth, &command, dial_timeout))
            .await
            .map_err(|e| ExecError::Session {
                target: label,
                reason: format!("worker thread failed: {e}"),
            })?
    }
}

fn run_blocking(
    target: &SshTarget,
    auth: &SshAuth,
    command: &str,
    dial_timeout: Duration,
) -> Result<CommandOutput, ExecError> {
    let label = target.to_string();
    let session_err = |reason: String| ExecError::Session {
        target: label.clone(),
        reason,
    };

    let tcp = dial(target, dial_timeout).map_err(|source| ExecError::Dial {
        target: label.clone(),
        source,
    })?;

    let mut session = Session::new().map_err(|e| session_err(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| session_err(format!("handshake: {e}")))?;

    let authenticated = match auth {
        SshAuth::Password(password) => {
            session.userauth_password(&target.username, password.as_str())
        }
        SshAuth::KeyFile(key) => session.userauth_pubkey_file(&target.username, None, key, None),
    };
    if let Err(e) = authenticated {
        return Err(ExecError::Auth {
            target: label.clone(),
            reason: e.to_string(),
        });
    }
    if !session.authenticated() {
        return Err(ExecError::Auth {
            target: label.clone(),
            reason: String::from("server did not accept the credentials"),
        });
    }

    debug!(host = %label, "exec: {command}");

    let mut channel = session
        .channel_session()
        .map_err(|e| session_err(format!("open channel: {e}")))?;
    channel
        .exec(command)
        .map_err(|e| session_err(format!("exec: {e}")))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| session_err(format!("read stdout: {e}")))?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| session_err(format!("read stderr: {e}")))?;

    channel
        .wait_close()
        .map_err(|e| session_err(format!("close channel: {e}")))?;
    let status = channel
        .exit_status()
        .map_err(|e| session_err(format!("exit status: {e}")))?;

    if status != 0 {
        return Err(ExecError::Exit {
            command: command.to_string(),
            status,
            stdout,
            stderr,
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

fn dial(target: &SshTarget, dial_timeout: Duration) -> std::io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (target.hostname.as_str(), target.port)
        .to_socket_addrs()?
        .collect();

    let mut last_err = std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} did not resolve to any address", target.hostname),
    );
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, dial_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[tokio::test]
    async fn refused_connection_is_a_dial_error() {
        // Bind then drop to get a local port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = SshTarget {
            hostname: "127.0.0.1".into(),
            port,
            username: "root".into(),
        };

        let executor = SshExecutor::new(Duration::from_millis(500));
        let err = executor
            .run(&target, &SshAuth::KeyFile("/nonexistent".into()), "true")
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Dial { .. }), "got {err:?}");
        assert!(err.is_transport());
    }
}
