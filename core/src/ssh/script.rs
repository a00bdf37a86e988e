//! In-memory [`RemoteExecutor`] that records every call.
//!
//! Commands succeed with empty output unless a rule says otherwise. Rules
//! match on the target host and a substring of the command.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use rackctl_common::host::{SshAuth, SshTarget};

use super::{CommandOutput, ExecError, RemoteExecutor};

/// Authentication as seen by the executor, with the secret kept for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeenAuth {
    Password(String),
    KeyFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub host: String,
    pub user: String,
    pub auth: SeenAuth,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Non-zero exit with the given status.
    Exit(i32),
    Unreachable,
    AuthRejected,
}

struct Rule {
    host: Option<String>,
    needle: String,
    outcome: Result<String, Failure>,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands on `host` containing `needle` fail with `failure`.
    pub fn fail_on(&self, host: &str, needle: &str, failure: Failure) -> &Self {
        self.push(Some(host), needle, Err(failure))
    }

    /// Commands on any host containing `needle` fail with `failure`.
    pub fn fail_everywhere(&self, needle: &str, failure: Failure) -> &Self {
        self.push(None, needle, Err(failure))
    }

    /// Commands on any host containing `needle` print `stdout`.
    pub fn respond(&self, needle: &str, stdout: &str) -> &Self {
        self.push(None, needle, Ok(stdout.to_string()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, host: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.host == host).collect()
    }

    pub fn commands_to(&self, host: &str) -> Vec<String> {
        self.calls_to(host).into_iter().map(|c| c.command).collect()
    }

    fn push(&self, host: Option<&str>, needle: &str, outcome: Result<String, Failure>) -> &Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                host: host.map(str::to_string),
                needle: needle.to_string(),
                outcome,
            });
        }
        self
    }

    fn outcome_for(&self, host: &str, command: &str) -> Result<String, Failure> {
        let rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Ok(String::new()),
        };
        rules
            .iter()
            .find(|r| r.host.as_deref().is_none_or(|h| h == host) && command.contains(&r.needle))
            .map(|r| r.outcome.clone())
            .unwrap_or_else(|| Ok(String::new()))
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn run(
        &self,
        target: &SshTarget,
        auth: &SshAuth,
        command: &str,
    ) -> Result<CommandOutput, ExecError> {
        let seen = match auth {
            SshAuth::Password(p) => SeenAuth::Password(p.as_str().to_string()),
            SshAuth::KeyFile(path) => SeenAuth::KeyFile(path.clone()),
        };
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                host: target.hostname.clone(),
                user: target.username.clone(),
                auth: seen,
                command: command.to_string(),
            });
        }

        let label = target.to_string();
        match self.outcome_for(&target.hostname, command) {
            Ok(stdout) => Ok(CommandOutput {
                stdout,
                stderr: String::new(),
            }),
            Err(Failure::Exit(status)) => Err(ExecError::Exit {
                command: command.to_string(),
                status,
                stdout: String::new(),
                stderr: String::from("scripted failure"),
            }),
            Err(Failure::Unreachable) => Err(ExecError::Dial {
                target: label,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "scripted"),
            }),
            Err(Failure::AuthRejected) => Err(ExecError::Auth {
                target: label,
                reason: String::from("scripted"),
            }),
        }
    }
}
