use std::time::Duration;

use anyhow::{Context, bail};
use colored::*;
use rackctl_common::config::Config;
use rackctl_common::host::SwarmConfig;
use rackctl_core::batch::{Batch, BatchReport, BatchRequest};
use rackctl_core::connection::Shell;
use rackctl_core::ssh::SshExecutor;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::commands::CreateArgs;
use crate::terminal::{colors, print, spinner};

pub async fn create(args: CreateArgs, mut cfg: Config) -> anyhow::Result<()> {
    apply_overrides(&args, &mut cfg);

    let swarm = SwarmConfig {
        is_cluster: args.swarm || args.swarm_master,
        is_master: args.swarm_master,
        discovery: args.swarm_discovery,
        advertise_address: args.swarm_addr,
        listen_host: args.swarm_host,
    };
    if swarm.is_cluster && swarm.discovery.is_empty() {
        bail!("--swarm needs --swarm-discovery");
    }

    print::header("provisioning");
    print::set_key_width(&["Range", "Hosts", "Store", "Swarm"]);
    print::aligned_line("Range", args.host_range.to_string());
    print::aligned_line("Hosts", args.host_range.len().to_string());
    print::aligned_line("Store", cfg.storage_path.display().to_string());
    print::aligned_line("Swarm", swarm_role(&swarm));

    let executor = SshExecutor::new(cfg.dial_timeout);
    let request = BatchRequest {
        base: args.base,
        range: args.host_range,
        password: args.ssh_password.map(Zeroizing::new),
        swarm,
    };

    spinner::get_spinner();
    let batch = Batch::new(&executor, &cfg).with_step_callback(Box::new(spinner::report_step));
    let outcome = batch.run(&request).await;
    spinner::get_spinner().finish_and_clear();

    let report = outcome.context("Error creating hosts")?;
    summarize(&report, &batch);

    match report.failure {
        Some(failure) => {
            if !report.removed.is_empty() {
                warn!("Removed local state of {} host(s)", report.removed.len());
            }
            for err in &report.cleanup_errors {
                warn!("Leftover local state: {err}");
            }
            Err(anyhow::Error::new(failure).context("Error creating host"))
        }
        None => Ok(()),
    }
}

fn apply_overrides(args: &CreateArgs, cfg: &mut Config) {
    if let Some(port) = args.ssh_port {
        cfg.ssh_port = port;
    }
    if let Some(user) = &args.ssh_user {
        cfg.ssh_user = user.clone();
    }
    if let Some(secs) = args.dial_timeout {
        cfg.dial_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.ready_timeout {
        cfg.ready_timeout = Duration::from_secs(secs);
    }
    if let Some(org) = &args.organization {
        cfg.organization = org.clone();
    }
    if let Some(bits) = args.key_bits {
        cfg.key_bits = bits;
    }
    if let Some(policy) = args.on_failure {
        cfg.failure_policy = policy;
    }
    if let Some(image) = &args.swarm_image {
        cfg.agent_image = image.clone();
    }
}

fn swarm_role(swarm: &SwarmConfig) -> ColoredString {
    match (swarm.is_cluster, swarm.is_master) {
        (false, _) => "none".color(colors::SEPARATOR),
        (true, false) => "node".color(colors::SECONDARY),
        (true, true) => "master".color(colors::ACCENT),
    }
}

fn summarize(report: &BatchReport, batch: &Batch<'_>) {
    if report.provisioned.is_empty() {
        return;
    }

    print::header("ready");
    let shell = Shell::detect(std::env::var("SHELL").ok().as_deref());

    for (idx, name) in report.provisioned.iter().enumerate() {
        print::tree_head(idx, name.as_str());
        let Ok(record) = batch.store().load(name.as_str()) else {
            continue;
        };
        let ip = record.driver.ip().unwrap_or_default();
        print::as_tree_one_level(vec![
            ("IPv4".to_string(), ip.color(colors::IPV4_ADDR)),
            ("URL".to_string(), record.url().color(colors::TEXT_DEFAULT)),
            ("Swarm".to_string(), swarm_role(&record.swarm)),
            ("Env".to_string(), shell.activation_hint("rackctl", name.as_str()).normal()),
        ]);
    }

    print::end_of_program();
    info!(
        "{} host(s) ready, point your Docker client at one with the Env command above",
        report.provisioned.len()
    );
}
