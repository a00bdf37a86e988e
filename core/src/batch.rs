//! Batch orchestration.
//!
//! A batch expands one range expression into host identities and provisions
//! them strictly one after another. The first failing host ends the batch;
//! what happens to the local state of the hosts created so far is decided by
//! the configured [`FailurePolicy`].

use std::collections::HashMap;
use std::fmt;

use rackctl_common::config::{Config, FailurePolicy};
use rackctl_common::host::SwarmConfig;
use rackctl_common::network::identity::HostIdentity;
use rackctl_common::network::range::RangeExpression;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result, StepFailure};
use crate::pki;
use crate::provision::{Provisioner, StepCallback};
use crate::ssh::RemoteExecutor;
use crate::store::{HostStore, StoreError};

/// What the operator asked for.
#[derive(Clone)]
pub struct BatchRequest {
    pub base: String,
    pub range: RangeExpression,
    /// Shared password of every host in the range.
    pub password: Option<Zeroizing<String>>,
    pub swarm: SwarmConfig,
}

impl fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRequest")
            .field("base", &self.base)
            .field("range", &self.range)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("swarm", &self.swarm)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedHost {
    pub name: HostIdentity,
    pub address: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Hosts that completed every step, in order.
    pub provisioned: Vec<HostIdentity>,
    pub failure: Option<StepFailure>,
    /// Hosts whose local state was deleted after the failure.
    pub removed: Vec<HostIdentity>,
    /// Local state that should have been deleted but could not be.
    pub cleanup_errors: Vec<StoreError>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct Batch<'a> {
    config: &'a Config,
    store: HostStore,
    provisioner: Provisioner<'a>,
}

impl<'a> Batch<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, config: &'a Config) -> Self {
        Self {
            config,
            store: HostStore::new(&config.storage_path),
            provisioner: Provisioner::new(executor, config),
        }
    }

    pub fn with_step_callback(mut self, on_step: StepCallback) -> Self {
        self.provisioner = self.provisioner.with_step_callback(on_step);
        self
    }

    pub fn store(&self) -> &HostStore {
        &self.store
    }

    /// Expands `range` and names every address.
    ///
    /// Fails before anything is touched when an address is not IPv4, two
    /// addresses map to the same name or a derived name is already in the
    /// store. Addresses are checked as they are produced, so an oversized
    /// span stops at its first bad address.
    pub fn plan(&self, base: &str, range: &RangeExpression) -> Result<Vec<PlannedHost>> {
        let mut seen: HashMap<HostIdentity, String> = HashMap::new();
        let mut plan = Vec::new();

        for address in range.addresses() {
            let name = HostIdentity::derive(base, &address)?;
            if let Some(first) = seen.get(&name) {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                    first: first.clone(),
                    second: address,
                });
            }
            if self.store.exists(name.as_str()) {
                return Err(StoreError::AlreadyExists(name.to_string()).into());
            }
            seen.insert(name.clone(), address.clone());
            plan.push(PlannedHost { name, address });
        }
        Ok(plan)
    }

    /// Provisions every planned host in order.
    ///
    /// Planning and CA errors are returned as `Err`. A failing host ends the
    /// batch and is reported in [`BatchReport::failure`].
    pub async fn run(&self, request: &BatchRequest) -> Result<BatchReport> {
        let plan = self.plan(&request.base, &request.range)?;

        if let Some(first) = plan.first() {
            let shared = self.store.bundle_for(first.name.as_str());
            pki::ensure_authority(&shared, &self.config.organization, self.config.key_bits)?;
        }

        info!("Provisioning {} host(s)", plan.len());
        let mut report = BatchReport::default();
        let mut created = Vec::new();

        for host in plan {
            info!("Creating {} at {}", host.name, host.address);
            let mut record = self.store.remote_record(
                host.name.clone(),
                &host.address,
                self.config,
                request.password.as_ref().map(|p| p.as_str().to_string()),
                request.swarm.clone(),
            );
            created.push(host.name.clone());

            let outcome = match self.provisioner.provision(&mut record).await {
                Ok(()) => self.store.save(&record).map_err(|e| StepFailure {
                    host: host.name.clone(),
                    step: None,
                    source: e.into(),
                }),
                Err(failure) => Err(failure),
            };

            match outcome {
                Ok(()) => {
                    info!("{} is ready at {}", record.name, record.url());
                    report.provisioned.push(host.name);
                }
                Err(failure) => {
                    error!("{failure}");
                    warn!(
                        "Check {} to make sure the host and its resources were properly cleaned up",
                        host.address
                    );
                    let (removed, cleanup_errors) = self.apply_failure_policy(&created);
                    report.removed = removed;
                    report.cleanup_errors = cleanup_errors;
                    report.failure = Some(failure);
                    return Ok(report);
                }
            }
        }

        Ok(report)
    }

    /// Returns the hosts whose state was removed and the removals that failed.
    fn apply_failure_policy(&self, created: &[HostIdentity]) -> (Vec<HostIdentity>, Vec<StoreError>) {
        match self.config.failure_policy {
            FailurePolicy::Keep => {
                if !created.is_empty() {
                    warn!("Keeping local state of {} host(s) from this batch", created.len());
                }
                (Vec::new(), Vec::new())
            }
            FailurePolicy::RemoveLocal => {
                let mut removed = Vec::new();
                let mut errors = Vec::new();
                for name in created {
                    info!("Removing local state of {name}");
                    match self.store.remove(name.as_str()) {
                        Ok(()) => removed.push(name.clone()),
                        Err(e) => {
                            warn!("Could not remove local state of {name}: {e}");
                            errors.push(e);
                        }
                    }
                }
                (removed, errors)
            }
        }
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
