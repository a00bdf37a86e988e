#![cfg(test)]
use std::fs;
use std::time::Duration;

use rackctl_common::config::Config;
use rackctl_common::host::SwarmConfig;
use rackctl_common::network::range::RangeExpression;
use rackctl_core::Error;
use rackctl_core::batch::{Batch, BatchRequest};
use rackctl_core::connection::{self, ConnectionMode, Shell};
use rackctl_core::provision::Step;
use rackctl_core::ssh::script::{Failure, ScriptedExecutor};
use tokio::net::TcpListener;
use zeroize::Zeroizing;

fn config(root: &std::path::Path, daemon_port: u16) -> Config {
    let mut cfg = Config {
        storage_path: root.to_path_buf(),
        ready_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        ..Config::default()
    };
    cfg.runtime.daemon_port = daemon_port;
    cfg
}

fn master_swarm() -> SwarmConfig {
    SwarmConfig {
        is_cluster: true,
        is_master: true,
        discovery: "token://cafe".into(),
        advertise_address: String::new(),
        listen_host: "tcp://0.0.0.0:3376".into(),
    }
}

/// A single swarm master on loopback goes through every step, and the stored
/// record yields the client flags for each connection mode.
#[tokio::test]
async fn swarm_master_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), port);
    let exec = ScriptedExecutor::new();

    let request = BatchRequest {
        base: "lab".into(),
        range: RangeExpression::parse("127.0.0.1"),
        password: Some(Zeroizing::new("raspberry".into())),
        swarm: master_swarm(),
    };
    let batch = Batch::new(&exec, &cfg);
    let report = batch.run(&request).await.unwrap();

    assert!(report.is_success(), "{:?}", report.failure);
    let names: Vec<&str> = report.provisioned.iter().map(|n| n.as_str()).collect();
    assert_eq!(names, ["rack-0-lab-1"]);

    let commands = exec.commands_to("127.0.0.1");
    let manage = commands.iter().position(|c| c.contains(" manage ")).unwrap();
    let join = commands.iter().position(|c| c.contains(" join ")).unwrap();
    assert!(manage < join);
    assert!(commands[join].contains(&format!("--addr 127.0.0.1:{port} token://cafe")));

    let record = batch.store().load("rack-0-lab-1").unwrap();
    assert_eq!(record.url(), format!("tcp://127.0.0.1:{port}"));
    assert_eq!(record.swarm, master_swarm());

    let standalone = connection::resolve(&record, ConnectionMode::Standalone).unwrap();
    assert_eq!(standalone.docker_host, format!("tcp://127.0.0.1:{port}"));
    assert!(standalone.ca.is_file());
    assert!(standalone.cert.is_file());
    assert!(standalone.key.is_file());

    let master = connection::resolve(&record, ConnectionMode::SwarmMaster).unwrap();
    assert_eq!(master.docker_host, "tcp://127.0.0.1:3376");
    assert_eq!(master.cert, record.auth.server_cert);
    assert!(master.to_string().ends_with(" -H=tcp://127.0.0.1:3376"));

    let env = connection::env_lines(&record, Shell::Posix);
    assert_eq!(env[2], format!("export DOCKER_HOST=\"tcp://127.0.0.1:{port}\""));
}

/// Losing the server certificate after provisioning is repaired by the
/// refresh that runs before client flags are printed.
#[tokio::test]
async fn missing_server_certificate_is_reissued() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), port);
    let exec = ScriptedExecutor::new();

    let request = BatchRequest {
        base: "lab".into(),
        range: RangeExpression::parse("127.0.0.1"),
        password: None,
        swarm: SwarmConfig::default(),
    };
    let batch = Batch::new(&exec, &cfg);
    assert!(batch.run(&request).await.unwrap().is_success());

    let record = batch.store().load("rack-0-lab-1").unwrap();
    assert!(!connection::refresh_certificates(&exec, &record, &cfg).await.unwrap());

    fs::remove_file(&record.auth.server_cert).unwrap();
    let before = exec.calls().len();
    assert!(connection::refresh_certificates(&exec, &record, &cfg).await.unwrap());
    assert!(record.auth.server_cert.is_file());
    assert!(exec.calls()[before..]
        .iter()
        .any(|c| c.command == "sudo service docker restart"));
}

/// A host rejecting the shared password stops the batch at key
/// installation; later hosts are never contacted.
#[tokio::test]
async fn rejected_password_stops_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), 2376);
    let exec = ScriptedExecutor::new();
    exec.fail_on("10.9.0.2", "mkdir -p ~/.ssh", Failure::AuthRejected);

    let request = BatchRequest {
        base: "edge".into(),
        range: RangeExpression::parse("10.9.0.[1:3]"),
        password: Some(Zeroizing::new("raspberry".into())),
        swarm: SwarmConfig::default(),
    };
    let batch = Batch::new(&exec, &cfg);
    let report = batch.run(&request).await.unwrap();

    let failure = report.failure.unwrap();
    assert_eq!(failure.host.as_str(), "rack-0-edge-2");
    assert_eq!(failure.step, Some(Step::InstallPublicKey));
    assert!(matches!(failure.source, Error::Transport(_)));
    assert_eq!(report.provisioned.len(), 1);
    assert!(exec.calls_to("10.9.0.3").is_empty());
}

/// The span may sit in any octet; a malformed span stays literal and then
/// fails identity derivation.
#[tokio::test]
async fn identities_follow_the_range() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), 2376);
    let exec = ScriptedExecutor::new();
    let batch = Batch::new(&exec, &cfg);

    let plan = batch
        .plan("db", &RangeExpression::parse("192.168.[10:12].5"))
        .unwrap();
    let names: Vec<String> = plan.iter().map(|h| h.name.to_string()).collect();
    assert_eq!(names, ["rack-10-db-5", "rack-11-db-5", "rack-12-db-5"]);

    let literal = batch.plan("db", &RangeExpression::parse("10.0.0.[x:y]"));
    assert!(matches!(literal, Err(Error::InvalidAddress(_))));
}
