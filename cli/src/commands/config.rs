use anyhow::Context;
use rackctl_common::config::Config;
use rackctl_core::connection::{self, ConnectionMode};
use rackctl_core::ssh::SshExecutor;
use rackctl_core::store::HostStore;

use crate::commands::{ConfigArgs, load_host};

pub async fn config(args: ConfigArgs, cfg: &Config) -> anyhow::Result<()> {
    let store = HostStore::new(&cfg.storage_path);
    let record = load_host(&store, &args.name)?;

    let mode = if args.swarm_master {
        ConnectionMode::SwarmMaster
    } else if args.swarm {
        ConnectionMode::Swarm
    } else {
        ConnectionMode::Standalone
    };
    let flags = connection::resolve(&record, mode)?;

    let executor = SshExecutor::new(cfg.dial_timeout);
    connection::refresh_certificates(&executor, &record, cfg)
        .await
        .with_context(|| format!("Error regenerating certificates for {}", record.name))?;

    print!("{flags}");
    Ok(())
}
