//! Single-host provisioning.
//!
//! A host moves through a fixed sequence of [`Step`]s, from a freshly
//! generated key pair to a TLS-secured runtime that optionally runs the
//! cluster agents. The first failing step ends the sequence; nothing is
//! rolled back here.

use std::fmt;
use std::fs;

use rackctl_common::config::Config;
use rackctl_common::host::HostRecord;
use rackctl_common::host::auth::{CLIENT_CA_FILE, CLIENT_CERT_FILE, CLIENT_KEY_FILE};
use rackctl_common::network::identity::HostIdentity;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, StepFailure};
use crate::pki;
use crate::ssh::keygen;
use crate::ssh::{CommandOutput, RemoteExecutor};
use crate::swarm;

pub mod runtime;
pub mod wait;

use runtime::{PlannedCommand, shell_quote};

/// Called before each step starts.
pub type StepCallback = Box<dyn Fn(&HostIdentity, Step) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    KeyGen,
    InstallPublicKey,
    ClearCredentials,
    SetHostname,
    InstallRuntime,
    AwaitReady,
    ConfigureAuth,
    ConfigureCluster,
}

impl Step {
    pub const FIRST: Step = Step::KeyGen;

    /// Ordered transition table; `None` ends the sequence.
    const TRANSITIONS: [(Step, Option<Step>); 8] = [
        (Step::KeyGen, Some(Step::InstallPublicKey)),
        (Step::InstallPublicKey, Some(Step::ClearCredentials)),
        (Step::ClearCredentials, Some(Step::SetHostname)),
        (Step::SetHostname, Some(Step::InstallRuntime)),
        (Step::InstallRuntime, Some(Step::AwaitReady)),
        (Step::AwaitReady, Some(Step::ConfigureAuth)),
        (Step::ConfigureAuth, Some(Step::ConfigureCluster)),
        (Step::ConfigureCluster, None),
    ];

    pub fn next(self) -> Option<Step> {
        Self::TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .and_then(|(_, to)| *to)
    }

    /// Every step in execution order.
    pub fn sequence() -> impl Iterator<Item = Step> {
        std::iter::successors(Some(Self::FIRST), |step| step.next())
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::KeyGen => "KeyGen",
            Step::InstallPublicKey => "InstallPublicKey",
            Step::ClearCredentials => "ClearCredentials",
            Step::SetHostname => "SetHostname",
            Step::InstallRuntime => "InstallRuntime",
            Step::AwaitReady => "AwaitReady",
            Step::ConfigureAuth => "ConfigureAuth",
            Step::ConfigureCluster => "ConfigureCluster",
        }
    }

    /// Short operator-facing description.
    pub fn describe(self) -> &'static str {
        match self {
            Step::KeyGen => "Creating SSH key pair",
            Step::InstallPublicKey => "Installing public key",
            Step::ClearCredentials => "Dropping password",
            Step::SetHostname => "Setting hostname",
            Step::InstallRuntime => "Installing container runtime",
            Step::AwaitReady => "Waiting for runtime",
            Step::ConfigureAuth => "Configuring TLS",
            Step::ConfigureCluster => "Starting cluster agents",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Provisioner<'a> {
    executor: &'a dyn RemoteExecutor,
    config: &'a Config,
    on_step: Option<StepCallback>,
}

impl<'a> Provisioner<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, config: &'a Config) -> Self {
        Self {
            executor,
            config,
            on_step: None,
        }
    }

    pub fn with_step_callback(mut self, on_step: StepCallback) -> Self {
        self.on_step = Some(on_step);
        self
    }

    /// Runs every step against `record`, stopping at the first failure.
    pub async fn provision(&self, record: &mut HostRecord) -> std::result::Result<(), StepFailure> {
        for step in Step::sequence() {
            if let Some(cb) = &self.on_step {
                cb(&record.name, step);
            }
            info!("{}: {}", record.name, step.describe());

            if let Err(source) = self.execute(step, record).await {
                return Err(StepFailure {
                    host: record.name.clone(),
                    step: Some(step),
                    source,
                });
            }
        }
        Ok(())
    }

    async fn execute(&self, step: Step, record: &mut HostRecord) -> Result<()> {
        match step {
            Step::KeyGen => {
                let key = record.driver.ssh_key_path()?;
                keygen::ensure_key_pair(&key)?;
                Ok(())
            }
            Step::InstallPublicKey => self.install_public_key(record).await,
            Step::ClearCredentials => {
                record.driver.clear_ssh_password();
                Ok(())
            }
            Step::SetHostname => self.set_hostname(record).await,
            Step::InstallRuntime => self.install_runtime(record).await,
            Step::AwaitReady => self.await_ready(record).await,
            Step::ConfigureAuth => configure_auth(self.executor, record, self.config).await,
            Step::ConfigureCluster => swarm::configure(self.executor, record, self.config).await,
        }
    }

    async fn install_public_key(&self, record: &HostRecord) -> Result<()> {
        let key = keygen::read_public_key(&record.driver.ssh_key_path()?)?;
        let quoted = shell_quote(&key);

        run(self.executor, record, "mkdir -p ~/.ssh && chmod 700 ~/.ssh").await?;
        run(
            self.executor,
            record,
            &format!(
                "grep -qxF {quoted} ~/.ssh/authorized_keys 2>/dev/null \
                 || echo {quoted} | tee -a ~/.ssh/authorized_keys > /dev/null"
            ),
        )
        .await?;
        Ok(())
    }

    async fn set_hostname(&self, record: &HostRecord) -> Result<()> {
        let name = record.name.as_str();
        run(
            self.executor,
            record,
            &format!(
                "sudo hostname {name} && echo \"{name}\" | sudo tee /etc/hostname \
                 && echo \"127.0.0.1 {name}\" | sudo tee -a /etc/hosts"
            ),
        )
        .await?;
        Ok(())
    }

    async fn install_runtime(&self, record: &HostRecord) -> Result<()> {
        for planned in runtime::install_plan(&self.config.runtime) {
            run_planned(self.executor, record, &planned).await?;
        }
        Ok(())
    }

    async fn await_ready(&self, record: &HostRecord) -> Result<()> {
        let target = record.driver.ssh_target()?;
        let auth = record.driver.ssh_auth()?;
        let (target, auth, executor) = (&target, &auth, self.executor);

        wait::poll_until(
            "container runtime",
            self.config.ready_timeout,
            self.config.poll_interval,
            move || async move {
                match executor.run(target, auth, runtime::READY_PROBE).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("Runtime on {} not answering yet: {e}", target.hostname);
                        false
                    }
                }
            },
        )
        .await
    }
}

/// Issues or validates the server certificate, hands the client triple to
/// the host directory and switches the remote daemon to TLS.
///
/// Also used to refresh an existing host whose certificate went stale.
pub async fn configure_auth(executor: &dyn RemoteExecutor, record: &HostRecord, config: &Config) -> Result<()> {
    let ip = record.driver.ip()?;
    let bundle = &record.auth;

    pki::ensure_authority(bundle, &config.organization, config.key_bits)?;
    pki::ensure_server_cert(bundle, &ip, record.name.as_str(), config.key_bits)?;
    copy_client_triple(record)?;

    push_tls_material(executor, record, config).await?;

    let options = runtime::options_file_command(&config.runtime, record.driver.driver_name());
    run(executor, record, &options).await?;
    run(executor, record, &runtime::restart_command()).await?;
    Ok(())
}

/// Copies `ca.pem`, `cert.pem` and `key.pem` into the host directory.
fn copy_client_triple(record: &HostRecord) -> Result<()> {
    let bundle = &record.auth;
    fs::create_dir_all(&bundle.client_dir)?;

    for (source, name) in [
        (&bundle.ca_cert, CLIENT_CA_FILE),
        (&bundle.client_cert, CLIENT_CERT_FILE),
        (&bundle.client_key, CLIENT_KEY_FILE),
    ] {
        let dest = bundle.client_dir.join(name);
        debug!("Copying {} to {}", source.display(), dest.display());
        fs::copy(source, &dest)?;
    }
    Ok(())
}

/// Writes the CA and server pair into the remote options directory.
async fn push_tls_material(executor: &dyn RemoteExecutor, record: &HostRecord, config: &Config) -> Result<()> {
    let bundle = &record.auth;
    let dir = &config.runtime.options_dir;
    run(executor, record, &format!("sudo mkdir -p {dir}")).await?;

    let remote = runtime::remote_tls_paths(&config.runtime);
    let local = [&bundle.ca_cert, &bundle.server_cert, &bundle.server_key];
    for (source, dest) in local.into_iter().zip(remote.iter()) {
        let pem = fs::read_to_string(source)?;
        debug!("Pushing {} to {}:{dest}", source.display(), record.name);
        run(executor, record, &runtime::write_file_command(dest, &pem)).await?;
    }
    Ok(())
}

/// Runs one command on the host with whatever credentials it holds right now.
pub(crate) async fn run(executor: &dyn RemoteExecutor, record: &HostRecord, command: &str) -> Result<CommandOutput> {
    let target = record.driver.ssh_target()?;
    let auth = record.driver.ssh_auth()?;
    Ok(executor.run(&target, &auth, command).await?)
}

async fn run_planned(executor: &dyn RemoteExecutor, record: &HostRecord, planned: &PlannedCommand) -> Result<()> {
    match run(executor, record, &planned.command).await {
        Ok(_) => Ok(()),
        Err(Error::RemoteCommand(e)) if !planned.fatal => {
            warn!("{}: ignoring failed cleanup: {e}", record.name);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use rackctl_common::host::SwarmConfig;

    use crate::ssh::script::{Failure, ScriptedExecutor, SeenAuth};
    use crate::store::HostStore;

    fn fast_config(root: &std::path::Path) -> Config {
        Config {
            storage_path: root.to_path_buf(),
            ready_timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(5),
            ..Config::default()
        }
    }

    fn record(store: &HostStore, config: &Config) -> HostRecord {
        let name = HostIdentity::derive("t", "10.0.4.9").unwrap();
        store.remote_record(name, "10.0.4.9", config, Some("hunter2".into()), SwarmConfig::default())
    }

    #[test]
    fn transition_table_is_linear() {
        let steps: Vec<Step> = Step::sequence().collect();
        assert_eq!(
            steps,
            [
                Step::KeyGen,
                Step::InstallPublicKey,
                Step::ClearCredentials,
                Step::SetHostname,
                Step::InstallRuntime,
                Step::AwaitReady,
                Step::ConfigureAuth,
                Step::ConfigureCluster,
            ]
        );
        assert_eq!(Step::ConfigureCluster.next(), None);
        assert_eq!(Step::InstallRuntime.to_string(), "InstallRuntime");
    }

    #[tokio::test]
    async fn provisions_a_standalone_host() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fast_config(tmp.path());
        let store = HostStore::new(tmp.path());
        let mut host = record(&store, &config);
        let exec = ScriptedExecutor::new();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let provisioner = Provisioner::new(&exec, &config)
            .with_step_callback(Box::new(move |_, step| sink.lock().unwrap().push(step)));

        provisioner.provision(&mut host).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Step::sequence().collect::<Vec<_>>());
        assert_eq!(host.driver.ssh_password(), None);

        let commands = exec.commands_to("10.0.4.9");
        assert!(commands[0].starts_with("mkdir -p ~/.ssh"));
        assert!(commands[1].contains("ssh-ed25519 "));
        assert!(commands[2].starts_with("sudo hostname rack-4-t-9"));
        assert!(commands.iter().any(|c| c.contains("DOCKER_OPTS") && c.contains("/etc/default/docker")));
        assert_eq!(commands.last().unwrap(), "sudo service docker restart");
        assert!(!commands.iter().any(|c| c.contains("swarm")));

        for name in [CLIENT_CA_FILE, CLIENT_CERT_FILE, CLIENT_KEY_FILE] {
            assert!(host.dir.join(name).is_file(), "{name} not copied");
        }
        assert!(pki::validate("10.0.4.9", &host.auth.ca_cert, &host.auth.server_cert, &host.auth.server_key));
    }

    #[tokio::test]
    async fn password_is_only_used_to_install_the_key() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fast_config(tmp.path());
        let store = HostStore::new(tmp.path());
        let mut host = record(&store, &config);
        let exec = ScriptedExecutor::new();

        Provisioner::new(&exec, &config).provision(&mut host).await.unwrap();

        let calls = exec.calls();
        let (with_password, with_key) = calls.split_at(2);
        assert!(with_password
            .iter()
            .all(|c| c.auth == SeenAuth::Password("hunter2".into())));
        assert!(with_key.iter().all(|c| matches!(c.auth, SeenAuth::KeyFile(_))));
        assert!(!with_key.is_empty());
    }

    #[tokio::test]
    async fn failed_cleanup_does_not_stop_installation() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fast_config(tmp.path());
        let store = HostStore::new(tmp.path());
        let mut host = record(&store, &config);
        let exec = ScriptedExecutor::new();
        exec.fail_everywhere("service docker stop", Failure::Exit(1))
            .fail_everywhere("unlink", Failure::Exit(1));

        Provisioner::new(&exec, &config).provision(&mut host).await.unwrap();
    }

    #[tokio::test]
    async fn failed_download_is_tagged_with_install_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fast_config(tmp.path());
        let store = HostStore::new(tmp.path());
        let mut host = record(&store, &config);
        let exec = ScriptedExecutor::new();
        exec.fail_everywhere("wget", Failure::Exit(8));

        let failure = Provisioner::new(&exec, &config)
            .provision(&mut host)
            .await
            .unwrap_err();

        assert_eq!(failure.step, Some(Step::InstallRuntime));
        assert_eq!(failure.host.as_str(), "rack-4-t-9");
        assert!(matches!(failure.source, Error::RemoteCommand(_)));
        assert!(!exec.commands_to("10.0.4.9").iter().any(|c| c.contains("service docker start")));
    }

    #[tokio::test]
    async fn unresponsive_runtime_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fast_config(tmp.path());
        let store = HostStore::new(tmp.path());
        let mut host = record(&store, &config);
        let exec = ScriptedExecutor::new();
        exec.fail_everywhere(runtime::READY_PROBE, Failure::Exit(1));

        let failure = Provisioner::new(&exec, &config)
            .provision(&mut host)
            .await
            .unwrap_err();

        assert_eq!(failure.step, Some(Step::AwaitReady));
        assert!(matches!(failure.source, Error::Timeout { .. }));
        let probes = exec
            .commands_to("10.0.4.9")
            .iter()
            .filter(|c| c.as_str() == runtime::READY_PROBE)
            .count();
        assert!(probes >= 2, "polled only {probes} time(s)");
    }

    #[tokio::test]
    async fn unreachable_host_fails_at_the_first_remote_step() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fast_config(tmp.path());
        let store = HostStore::new(tmp.path());
        let mut host = record(&store, &config);
        let exec = ScriptedExecutor::new();
        exec.fail_on("10.0.4.9", "", Failure::Unreachable);

        let failure = Provisioner::new(&exec, &config)
            .provision(&mut host)
            .await
            .unwrap_err();

        assert_eq!(failure.step, Some(Step::InstallPublicKey));
        assert!(matches!(failure.source, Error::Transport(_)));
        assert!(host.dir.join("id_ed25519").is_file());
    }

    #[tokio::test]
    async fn configure_auth_reuses_a_valid_certificate() {
        let tmp = tempfile::tempdir().unwrap();
        let config = fast_config(tmp.path());
        let store = HostStore::new(tmp.path());
        let host = record(&store, &config);
        let exec = ScriptedExecutor::new();

        configure_auth(&exec, &host, &config).await.unwrap();
        let first = fs::read_to_string(&host.auth.server_cert).unwrap();
        configure_auth(&exec, &host, &config).await.unwrap();
        assert_eq!(fs::read_to_string(&host.auth.server_cert).unwrap(), first);

        let pushes = exec
            .commands_to("10.0.4.9")
            .iter()
            .filter(|c| c.contains("sudo tee /etc/docker/server.pem"))
            .count();
        assert_eq!(pushes, 2);
    }
}
