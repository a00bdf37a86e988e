use rackctl_common::config::Config;
use rackctl_core::connection::{self, Shell};
use rackctl_core::store::HostStore;

use crate::commands::{EnvArgs, load_host};

pub fn env(args: EnvArgs, cfg: &Config) -> anyhow::Result<()> {
    let store = HostStore::new(&cfg.storage_path);
    let record = load_host(&store, &args.name)?;

    let shell = args
        .shell
        .unwrap_or_else(|| Shell::detect(std::env::var("SHELL").ok().as_deref()));

    for line in connection::env_lines(&record, shell) {
        println!("{line}");
    }
    println!(
        "# Run this command to configure your shell: {}",
        shell.activation_hint("rackctl", record.name.as_str())
    );
    Ok(())
}
