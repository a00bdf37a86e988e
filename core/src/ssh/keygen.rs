//! Per-host SSH key pairs.

use std::fs;
use std::path::{Path, PathBuf};

use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use tracing::debug;

use crate::error::Result;

/// Makes sure an OpenSSH key pair exists at `private_path` / `<private_path>.pub`.
///
/// An existing private key is never replaced, since its public half may
/// already be authorized on the host. A missing public half is rebuilt from
/// it. Returns `true` when a new key was generated.
pub fn ensure_key_pair(private_path: &Path) -> Result<bool> {
    let public_path = public_key_path(private_path);

    if private_path.exists() {
        if !public_path.exists() {
            debug!("Restoring public key {}", public_path.display());
            let key = PrivateKey::read_openssh_file(private_path)?;
            key.public_key().write_openssh_file(&public_path)?;
        }
        debug!("Reusing key pair {}", private_path.display());
        return Ok(false);
    }

    if let Some(dir) = private_path.parent() {
        fs::create_dir_all(dir)?;
    }

    debug!("Creating key pair {}", private_path.display());
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
    key.write_openssh_file(private_path, LineEnding::LF)?;
    restrict_permissions(private_path)?;
    key.public_key().write_openssh_file(&public_path)?;

    Ok(true)
}

/// Contents of the public key, one `authorized_keys` line.
pub fn read_public_key(private_path: &Path) -> Result<String> {
    let line = fs::read_to_string(public_key_path(private_path))?;
    Ok(line.trim().to_string())
}

pub fn public_key_path(private_path: &Path) -> PathBuf {
    let mut path = private_path.as_os_str().to_owned();
    path.push(".pub");
    PathBuf::from(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_pair_once_and_reuses_it() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("host").join("id_ed25519");

        assert!(ensure_key_pair(&key).unwrap());
        let first = read_public_key(&key).unwrap();
        assert!(first.starts_with("ssh-ed25519 "));

        assert!(!ensure_key_pair(&key).unwrap());
        assert_eq!(read_public_key(&key).unwrap(), first);
    }

    #[test]
    fn rebuilds_missing_public_half() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");

        ensure_key_pair(&key).unwrap();
        let original = read_public_key(&key).unwrap();
        fs::remove_file(public_key_path(&key)).unwrap();

        assert!(!ensure_key_pair(&key).unwrap());
        assert_eq!(read_public_key(&key).unwrap(), original);
    }

    #[cfg(unix)]
    #[test]
    fn private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");
        ensure_key_pair(&key).unwrap();

        let mode = fs::metadata(&key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
