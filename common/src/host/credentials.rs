//! SSH credentials of a host.
//!
//! A host is reached either with a shared password or with the key pair
//! generated for it. The password only exists until the public key has been
//! installed; [`Credentials::clear_password`] zeroes it and every later call
//! falls back to the key file.

use std::fmt;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

/// Where and as whom to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub hostname: String,
    pub port: u16,
    pub username: String,
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.hostname, self.port)
    }
}

/// Authentication used for one remote call.
#[derive(Clone)]
pub enum SshAuth {
    Password(Zeroizing<String>),
    KeyFile(PathBuf),
}

impl SshAuth {
    pub fn is_password(&self) -> bool {
        matches!(self, SshAuth::Password(_))
    }
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(<redacted>)"),
            SshAuth::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// Key path plus an optional, clearable password.
#[derive(Clone, Default)]
pub struct Credentials {
    key_path: PathBuf,
    password: Option<Zeroizing<String>>,
}

impl Credentials {
    pub fn new(key_path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            key_path: key_path.into(),
            password: password.filter(|p| !p.is_empty()).map(Zeroizing::new),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().map(String::as_str)
    }

    /// Drops the password; the backing buffer is zeroed. Idempotent.
    pub fn clear_password(&mut self) {
        self.password = None;
    }

    /// Password when one is still held, the key file otherwise.
    pub fn auth(&self) -> SshAuth {
        match &self.password {
            Some(password) => SshAuth::Password(password.clone()),
            None => SshAuth::KeyFile(self.key_path.clone()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_path", &self.key_path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_wins_while_present() {
        let creds = Credentials::new("/tmp/id_ed25519", Some("hunter2".into()));
        match creds.auth() {
            SshAuth::Password(p) => assert_eq!(p.as_str(), "hunter2"),
            other => panic!("expected password auth, got {other:?}"),
        }
    }

    #[test]
    fn clearing_falls_back_to_key_file() {
        let mut creds = Credentials::new("/tmp/id_ed25519", Some("hunter2".into()));
        creds.clear_password();
        creds.clear_password();
        assert!(creds.password().is_none());
        match creds.auth() {
            SshAuth::KeyFile(path) => assert_eq!(path, PathBuf::from("/tmp/id_ed25519")),
            other => panic!("expected key auth, got {other:?}"),
        }
    }

    #[test]
    fn empty_password_means_key_auth() {
        let creds = Credentials::new("/k", Some(String::new()));
        assert!(!creds.auth().is_password());
    }

    #[test]
    fn debug_output_redacts_password() {
        let creds = Credentials::new("/k", Some("hunter2".into()));
        assert!(!format!("{creds:?}").contains("hunter2"));
        assert!(!format!("{:?}", creds.auth()).contains("hunter2"));
    }
}
