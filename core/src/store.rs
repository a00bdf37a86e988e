//! Local host store.
//!
//! ```text
//! <root>/
//!   certs/               CA and shared client material
//!   machines/<name>/     key pair, client triple, server pair, config.json
//! ```

use std::fs;
use std::path::PathBuf;

use rackctl_common::config::Config;
use rackctl_common::host::{CertificateBundle, Driver, HostRecord, RemoteHost, SwarmConfig};
use rackctl_common::network::identity::HostIdentity;
use thiserror::Error;
use tracing::debug;

const RECORD_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("host '{0}' does not exist")]
    NotFound(String),

    #[error("host '{0}' already exists")]
    AlreadyExists(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed host record {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct HostStore {
    root: PathBuf,
}

impl HostStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn machines_dir(&self) -> PathBuf {
        self.root.join("machines")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    pub fn host_dir(&self, name: &str) -> PathBuf {
        self.machines_dir().join(name)
    }

    /// Certificate paths of `name`, whether or not the files exist yet.
    pub fn bundle_for(&self, name: &str) -> CertificateBundle {
        CertificateBundle::for_host(&self.certs_dir(), &self.host_dir(name))
    }

    /// Builds the record of a bare host reached over SSH at `address`.
    ///
    /// Nothing is written; the record lives in memory until [`HostStore::save`].
    pub fn remote_record(
        &self,
        name: HostIdentity,
        address: &str,
        config: &Config,
        password: Option<String>,
        swarm: SwarmConfig,
    ) -> HostRecord {
        let dir = self.host_dir(name.as_str());
        HostRecord {
            driver: Driver::Remote(RemoteHost::new(
                address,
                config.ssh_port,
                config.ssh_user.as_str(),
                config.runtime.daemon_port,
                &dir,
                password,
            )),
            auth: self.bundle_for(name.as_str()),
            swarm,
            dir,
            name,
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    pub fn create_host_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.host_dir(name);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Writes the record next to its key pair, replacing any previous one.
    pub fn save(&self, record: &HostRecord) -> Result<()> {
        let dir = self.create_host_dir(record.name.as_str())?;
        let path = dir.join(RECORD_FILE);
        let staged = dir.join(format!("{RECORD_FILE}.tmp"));

        let json = serde_json::to_string_pretty(record).map_err(|source| StoreError::Malformed {
            path: path.clone(),
            source,
        })?;
        fs::write(&staged, json).map_err(|source| StoreError::Io {
            path: staged.clone(),
            source,
        })?;
        fs::rename(&staged, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        debug!("Saved host record {}", path.display());
        Ok(())
    }

    /// Reads a record back. Remote hosts come back with key-only credentials.
    pub fn load(&self, name: &str) -> Result<HostRecord> {
        let path = self.record_path(name);
        if !path.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let mut record: HostRecord =
            serde_json::from_str(&raw).map_err(|source| StoreError::Malformed { path, source })?;

        if let Driver::Remote(remote) = &mut record.driver {
            remote.restore_credentials();
        }
        Ok(record)
    }

    /// Names of every stored host, sorted.
    pub fn list(&self) -> Result<Vec<HostIdentity>> {
        let dir = self.machines_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut names: Vec<HostIdentity> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| self.exists(name))
            .map(HostIdentity::named)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Deletes the host directory. Missing hosts are not an error.
    pub fn remove(&self, name: &str) -> Result<()> {
        let dir = self.host_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Removed {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path: dir, source }),
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.host_dir(name).join(RECORD_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackctl_common::host::UrlHost;

    fn remote_record(store: &HostStore, name: &str) -> HostRecord {
        let config = Config {
            ssh_user: "pi".into(),
            ..Config::default()
        };
        let swarm = SwarmConfig {
            is_cluster: true,
            is_master: true,
            discovery: "token://abc".into(),
            advertise_address: String::new(),
            listen_host: "tcp://0.0.0.0:3376".into(),
        };
        store.remote_record(
            HostIdentity::named(name),
            "10.0.0.7",
            &config,
            Some("raspberry".into()),
            swarm,
        )
    }

    #[test]
    fn saved_record_loads_back_without_password() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HostStore::new(tmp.path());
        let record = remote_record(&store, "rack-0-a-7");

        store.save(&record).unwrap();
        assert!(store.exists("rack-0-a-7"));

        let raw = fs::read_to_string(store.host_dir("rack-0-a-7").join(RECORD_FILE)).unwrap();
        assert!(!raw.contains("raspberry"));

        let loaded = store.load("rack-0-a-7").unwrap();
        assert_eq!(loaded.name, record.name);
        assert_eq!(loaded.swarm, record.swarm);
        assert_eq!(loaded.auth, record.auth);
        assert_eq!(loaded.url(), "tcp://10.0.0.7:2376");
        assert_eq!(loaded.driver.ssh_password(), None);
        assert_eq!(
            loaded.driver.ssh_key_path().unwrap(),
            store.host_dir("rack-0-a-7").join("id_ed25519")
        );
    }

    #[test]
    fn url_hosts_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HostStore::new(tmp.path());
        let record = HostRecord {
            name: HostIdentity::named("existing"),
            dir: store.host_dir("existing"),
            driver: Driver::Url(UrlHost {
                url: "tcp://10.0.0.9:2376".into(),
            }),
            auth: store.bundle_for("existing"),
            swarm: SwarmConfig::default(),
        };

        store.save(&record).unwrap();
        let loaded = store.load("existing").unwrap();
        assert_eq!(loaded.driver.driver_name(), "none");
        assert_eq!(loaded.url(), "tcp://10.0.0.9:2376");
    }

    #[test]
    fn missing_host_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HostStore::new(tmp.path());
        assert!(matches!(store.load("ghost"), Err(StoreError::NotFound(_))));
        assert!(store.remove("ghost").is_ok());
    }

    #[test]
    fn list_only_reports_directories_with_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HostStore::new(tmp.path());
        assert!(store.list().unwrap().is_empty());

        store.save(&remote_record(&store, "rack-0-b-2")).unwrap();
        store.save(&remote_record(&store, "rack-0-b-1")).unwrap();
        store.create_host_dir("half-created").unwrap();

        let names: Vec<String> = store.list().unwrap().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["rack-0-b-1", "rack-0-b-2"]);

        store.remove("rack-0-b-1").unwrap();
        assert!(!store.host_dir("rack-0-b-1").exists());
    }
}
