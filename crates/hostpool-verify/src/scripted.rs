//! In-process executor with canned command output.
//!
//! Stands in for [`crate::OpenSshExecutor`] wherever real hosts are not
//! reachable, such as the pool's integration tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hostpool_core::VerifyConfig;
use hostpool_state::Host;

use crate::executor::{CommandOutput, ExecError, RemoteExecutor, RemoteSession, RemoteTarget};
use crate::probe;

#[derive(Default)]
struct Script {
    /// Command prefix to output. First match wins.
    responses: Vec<(String, CommandOutput)>,
    connect_error: Option<ExecError>,
    delay: Option<Duration>,
    commands: Vec<String>,
    opened: usize,
    closed: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<Script>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every stage so that `host` passes under `config`.
    pub fn healthy(host: &Host, config: &VerifyConfig) -> Self {
        let disks: String = host
            .disks
            .iter()
            .map(|d| {
                format!(
                    "{} {}\n",
                    probe::device_name(&d.name),
                    u64::from(d.capacity) * 1024 * 1024 * 1024
                )
            })
            .collect();
        let fstype = config
            .allowed_filesystems
            .first()
            .map(String::as_str)
            .unwrap_or("ext4");
        let mounts: String = std::iter::once("/ xfs\n".to_string())
            .chain(host.disks.iter().map(|d| format!("{} {fstype}\n", d.path)))
            .collect();
        let sysctl: String = config
            .kernel_params
            .iter()
            .map(|(name, value)| format!("{name} = {value}\n"))
            .collect();

        Self::new()
            .respond(
                probe::COMPUTE_COMMAND,
                CommandOutput::ok(format!(
                    "{}\n{}\n",
                    host.cpu_cores,
                    u64::from(host.memory) * 1024 * 1024
                )),
            )
            .respond(probe::DISK_COMMAND, CommandOutput::ok(disks))
            .respond(probe::MOUNT_COMMAND, CommandOutput::ok(mounts))
            .respond(probe::SWAP_COMMAND, CommandOutput::ok("0\n"))
            .respond("for c in", CommandOutput::ok(""))
            .respond("sysctl", CommandOutput::ok(sysctl))
    }

    /// Answer commands starting with `prefix`, replacing an earlier answer.
    pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
        {
            let mut script = self.lock();
            script.responses.retain(|(p, _)| p != prefix);
            script.responses.push((prefix.to_string(), output));
        }
        self
    }

    pub fn fail_connect(self, error: ExecError) -> Self {
        self.lock().connect_error = Some(error);
        self
    }

    /// Hold every command for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = Some(delay);
        self
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        let script = self.lock();
        script.opened - script.closed
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn connect(&self, _target: &RemoteTarget) -> Result<Box<dyn RemoteSession>, ExecError> {
        let mut script = self.lock();
        if let Some(e) = &script.connect_error {
            return Err(e.clone());
        }
        script.opened += 1;
        Ok(Box::new(ScriptedSession {
            executor: self.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    executor: ScriptedExecutor,
    closed: bool,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn run(&mut self, command: &str, _timeout: Duration) -> Result<CommandOutput, ExecError> {
        let (delay, output) = {
            let mut script = self.executor.lock();
            script.commands.push(command.to_string());
            let output = script
                .responses
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_else(|| CommandOutput {
                    exit_code: 127,
                    stdout: String::new(),
                    stderr: format!("{command}: command not found"),
                });
            (script.delay, output)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(output)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.executor.lock().closed += 1;
        }
    }
}
