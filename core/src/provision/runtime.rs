//! Remote layout of the container runtime and the commands that install it.

use rackctl_common::config::RuntimeConfig;
use rackctl_common::host::auth::{CLIENT_CA_FILE, SERVER_CERT_FILE, SERVER_KEY_FILE};

const SERVICE: &str = "docker";
const INSTALL_DIR: &str = "/opt/docker";
const SYMLINK: &str = "/usr/bin/docker";
const INIT_SCRIPT: &str = "/etc/init.d/docker";
const INIT_SCRIPT_NAME: &str = "initd-docker";

/// Probe used to decide that the runtime answers.
pub const READY_PROBE: &str = "sudo docker version";

/// One command of a remote plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub command: String,
    /// A failing best-effort command is logged and skipped.
    pub fatal: bool,
}

impl PlannedCommand {
    fn fatal(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fatal: true,
        }
    }

    fn best_effort(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fatal: false,
        }
    }
}

/// Replaces whatever runtime is on the host with the pinned binary.
///
/// Cleanup of a previous installation may fail on a fresh host and is best
/// effort; fetching, linking and starting are not.
pub fn install_plan(runtime: &RuntimeConfig) -> Vec<PlannedCommand> {
    let binary = &runtime.binary;
    let url = runtime.distribution_url.trim_end_matches('/');

    vec![
        PlannedCommand::best_effort(format!("sudo service {SERVICE} stop")),
        PlannedCommand::best_effort(format!("sudo kill -9 $(pidof {SERVICE})")),
        PlannedCommand::best_effort(format!("sudo rm -f {}", runtime.options_file)),
        PlannedCommand::best_effort(format!("sudo unlink {SYMLINK}")),
        PlannedCommand::best_effort(format!("sudo mkdir -p {INSTALL_DIR}")),
        PlannedCommand::best_effort(format!("sudo sh -c 'rm -f {INSTALL_DIR}/docker-*'")),
        PlannedCommand::fatal(format!(
            "sudo wget --no-check-certificate -q -O{INSTALL_DIR}/{binary}.xz {url}/{binary}.xz \
             && (cd {INSTALL_DIR} && sudo unxz -f {binary}.xz)"
        )),
        PlannedCommand::fatal(format!(
            "sudo chmod +x {INSTALL_DIR}/{binary} && sudo ln -s {INSTALL_DIR}/{binary} {SYMLINK}"
        )),
        PlannedCommand::fatal(format!(
            "sudo wget --no-check-certificate -q -O{INIT_SCRIPT} {url}/{INIT_SCRIPT_NAME} \
             && sudo chmod +x {INIT_SCRIPT}"
        )),
        PlannedCommand::fatal(format!("sudo service {SERVICE} start")),
    ]
}

pub fn restart_command() -> String {
    format!("sudo service {SERVICE} restart")
}

/// Remote paths of the CA, server certificate and server key.
pub fn remote_tls_paths(runtime: &RuntimeConfig) -> [String; 3] {
    let dir = runtime.options_dir.trim_end_matches('/');
    [
        format!("{dir}/{CLIENT_CA_FILE}"),
        format!("{dir}/{SERVER_CERT_FILE}"),
        format!("{dir}/{SERVER_KEY_FILE}"),
    ]
}

/// `DOCKER_OPTS` line of the daemon options file.
pub fn daemon_options(runtime: &RuntimeConfig, driver_name: &str) -> String {
    let [ca, cert, key] = remote_tls_paths(runtime);
    format!(
        "export DOCKER_OPTS=\"--tlsverify --tlscacert={ca} --tlscert={cert} --tlskey={key} \
         --label=provider={driver_name} --label=architecture={arch} \
         --host=unix:///var/run/docker.sock --host=tcp://0.0.0.0:{port}\"",
        arch = runtime.architecture,
        port = runtime.daemon_port,
    )
}

/// Writes `contents` verbatim to a root-owned remote file.
pub fn write_file_command(path: &str, contents: &str) -> String {
    format!("printf '%s' {} | sudo tee {path} > /dev/null", shell_quote(contents))
}

pub fn options_file_command(runtime: &RuntimeConfig, driver_name: &str) -> String {
    let line = format!("{}\n", daemon_options(runtime, driver_name));
    write_file_command(&runtime.options_file, &line)
}

/// Single-quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
