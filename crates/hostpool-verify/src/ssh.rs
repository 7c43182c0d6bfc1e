//! OpenSSH CLI executor.
//!
//! A session is one `ControlMaster` connection: `connect` authenticates once
//! (through `sshpass -e` for passwords) and every later command multiplexes
//! over the control socket, so no password is ever passed again. `close`
//! stops the master with `ssh -O exit`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use hostpool_state::{Credential, new_id};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::executor::{CommandOutput, ExecError, RemoteExecutor, RemoteSession, RemoteTarget};

/// `ssh` exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILED: i32 = 255;

pub struct OpenSshExecutor {
    control_dir: PathBuf,
    /// Wrap commands in `sudo` for non-root users.
    sudo: bool,
}

impl OpenSshExecutor {
    pub fn new(sudo: bool) -> Self {
        Self {
            control_dir: std::env::temp_dir(),
            sudo,
        }
    }

    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }
}

#[async_trait]
impl RemoteExecutor for OpenSshExecutor {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>, ExecError> {
        let control_path = self.control_dir.join(format!("{}.sock", new_id("hostpool-ssh")));
        let user = target.credential.user_name().to_string();
        let destination = format!("{user}@{}", target.address);

        let mut cmd = match &target.credential {
            Credential::Password { password, .. } => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd.args(["-o", "PubkeyAuthentication=no"]);
                cmd
            }
            Credential::Key { key_path, .. } => {
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes"]);
                if let Some(key) = key_path.as_deref().map(PathBuf::from).or_else(|| target.default_key.clone()) {
                    cmd.arg("-i").arg(key);
                }
                cmd
            }
        };
        cmd.args(["-o", "ControlMaster=yes", "-o", "ControlPersist=yes"])
            .args(["-o", "StrictHostKeyChecking=no", "-o", "UserKnownHostsFile=/dev/null"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg("-p")
            .arg(target.port.to_string())
            .arg(&destination)
            .arg("true");

        // The master outlives this call, give it a little slack past ConnectTimeout.
        let output = exec(cmd, target.connect_timeout + Duration::from_secs(5))
            .await
            .map_err(|e| match e {
                ExecError::Timeout(after) => ExecError::Connect(format!("no answer within {after:?}")),
                other => other,
            })?;

        if !output.success() {
            let stderr = output.stderr.trim().to_string();
            return Err(if stderr.contains("Permission denied") || output.exit_code == 5 {
                // sshpass exits 5 on a wrong password.
                ExecError::Auth(stderr)
            } else {
                ExecError::Connect(format!("exit {}: {stderr}", output.exit_code))
            });
        }

        debug!(%destination, control_path = %control_path.display(), "ssh session opened");
        Ok(Box::new(SshSession {
            control_path,
            destination,
            port: target.port,
            sudo: self.sudo && user != "root",
        }))
    }
}

struct SshSession {
    control_path: PathBuf,
    destination: String,
    port: u16,
    sudo: bool,
}

impl SshSession {
    fn base_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-p")
            .arg(self.port.to_string());
        cmd
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecError> {
        let remote = if self.sudo {
            sudo_wrap(command)
        } else {
            command.to_string()
        };
        let mut cmd = self.base_command();
        cmd.arg(&self.destination).arg("--").arg(&remote);

        let output = exec(cmd, timeout).await?;
        if output.exit_code == SSH_CONNECTION_FAILED {
            return Err(ExecError::Connect(output.stderr.trim().to_string()));
        }
        Ok(output)
    }

    async fn close(&mut self) {
        let mut cmd = self.base_command();
        cmd.args(["-O", "exit"]).arg(&self.destination);
        match exec(cmd, Duration::from_secs(5)).await {
            Ok(out) if out.success() => debug!(destination = %self.destination, "ssh session closed"),
            Ok(out) => warn!(
                destination = %self.destination,
                stderr = %out.stderr.trim(),
                "ssh master did not exit cleanly"
            ),
            Err(e) => warn!(destination = %self.destination, error = %e, "failed to stop ssh master"),
        }
        remove_socket(&self.control_path);
    }
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), error = %e, "control socket not removed");
        }
        _ => {}
    }
}

/// Run a local process to completion, killing it on timeout.
async fn exec(mut cmd: Command, timeout: Duration) -> Result<CommandOutput, ExecError> {
    cmd.kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ExecError::Timeout(timeout))?
        .map_err(|e| ExecError::Io(e.to_string()))?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run `command` as root through `sudo`, quoted for the remote login shell.
pub fn sudo_wrap(command: &str) -> String {
    let mut escaped = String::with_capacity(command.len());
    for c in command.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("/usr/bin/sudo -H bash -c \"{escaped}\"")
}
