//! The staged verification pipeline.
//!
//! Stages run in a fixed order over a single session:
//! 1. Connect and authenticate
//! 2. CPU and memory at least as declared
//! 3. Every declared disk present with at least its declared capacity
//! 4. Every disk path mounted with an allowed filesystem
//! 5. Swap off, or within the configured bound
//! 6. Required commands installed
//! 7. Kernel parameters at their required values
//!
//! The session is closed on every exit path.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use hostpool_core::{OpContext, VerifyConfig};
use hostpool_state::Host;
use tracing::{debug, info, warn};

use crate::error::{VerifyError, VerifyResult};
use crate::executor::{ExecError, RemoteExecutor, RemoteSession, RemoteTarget};
use crate::probe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connect,
    Compute,
    Disk,
    Filesystem,
    Swap,
    Environment,
    OsEnvironment,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Connect,
        Stage::Compute,
        Stage::Disk,
        Stage::Filesystem,
        Stage::Swap,
        Stage::Environment,
        Stage::OsEnvironment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Connect => "connect",
            Stage::Compute => "cpu/memory",
            Stage::Disk => "disk",
            Stage::Filesystem => "filesystem",
            Stage::Swap => "swap",
            Stage::Environment => "environment",
            Stage::OsEnvironment => "os environment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs the pipeline against candidate hosts.
#[derive(Clone)]
pub struct Verifier {
    executor: Arc<dyn RemoteExecutor>,
    config: VerifyConfig,
}

impl Verifier {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: VerifyConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// Verify one host. Has no side effects on the inventory.
    pub async fn verify(&self, ctx: &OpContext, host: &Host) -> VerifyResult<()> {
        let started = Instant::now();
        let target = RemoteTarget {
            address: host.ip.clone(),
            port: self.config.ssh_port,
            credential: host.credential.clone(),
            default_key: self.config.key_path.clone(),
            connect_timeout: self.config.connect_timeout(),
        };

        let mut session = match ctx.run(self.executor.connect(&target)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(host_id = %host.id, ip = %host.ip, error = %e, "host unreachable");
                return Err(VerifyError::Connectivity {
                    host: host.ip.clone(),
                    stage: Stage::Connect,
                    reason: e.to_string(),
                });
            }
            Err(source) => {
                return Err(VerifyError::Interrupted {
                    host: host.ip.clone(),
                    stage: Stage::Connect,
                    source,
                });
            }
        };

        let result = self.run_stages(ctx, host, session.as_mut()).await;
        session.close().await;

        match &result {
            Ok(()) => info!(
                host_id = %host.id,
                ip = %host.ip,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "host verified"
            ),
            Err(e) => warn!(host_id = %host.id, ip = %host.ip, stage = %e.stage(), error = %e, "host failed verification"),
        }
        result
    }

    async fn run_stages(
        &self,
        ctx: &OpContext,
        host: &Host,
        session: &mut dyn RemoteSession,
    ) -> VerifyResult<()> {
        let mut stage = StageRunner {
            ctx,
            host,
            session,
            config: &self.config,
        };

        let out = stage.exec(Stage::Compute, probe::COMPUTE_COMMAND).await?;
        let (cores, memory) = probe::parse_compute(&out).map_err(|r| stage.fail(Stage::Compute, r))?;
        if cores < host.cpu_cores || memory < host.memory {
            return Err(stage.fail(
                Stage::Compute,
                format!(
                    "declared {}C/{}G, observed {cores}C/{memory}G",
                    host.cpu_cores, host.memory
                ),
            ));
        }

        let out = stage.exec(Stage::Disk, probe::DISK_COMMAND).await?;
        let devices = probe::parse_disks(&out).map_err(|r| stage.fail(Stage::Disk, r))?;
        for disk in &host.disks {
            let name = probe::device_name(&disk.name);
            match devices.get(name) {
                None => return Err(stage.fail(Stage::Disk, format!("disk {name} not found"))),
                Some(&size) if size < disk.capacity => {
                    return Err(stage.fail(
                        Stage::Disk,
                        format!("disk {name} has {size}G, declared {}G", disk.capacity),
                    ));
                }
                Some(_) => {}
            }
        }

        let out = stage.exec(Stage::Filesystem, probe::MOUNT_COMMAND).await?;
        let mounts = probe::parse_mounts(&out);
        for disk in &host.disks {
            let Some(fstype) = mounts.get(&disk.path) else {
                return Err(stage.fail(
                    Stage::Filesystem,
                    format!("{} is not a mount point", disk.path),
                ));
            };
            if !self.config.allowed_filesystems.iter().any(|fs| fs == fstype) {
                return Err(stage.fail(
                    Stage::Filesystem,
                    format!(
                        "{} is {fstype}, allowed [{}]",
                        disk.path,
                        self.config.allowed_filesystems.join(", ")
                    ),
                ));
            }
        }

        let out = stage.exec(Stage::Swap, probe::SWAP_COMMAND).await?;
        let swap = probe::parse_swap_mb(&out).map_err(|r| stage.fail(Stage::Swap, r))?;
        if swap > self.config.max_swap_mb {
            let reason = if self.config.max_swap_mb == 0 {
                format!("swap must be off, found {swap} MB")
            } else {
                format!("swap is {swap} MB, allowed {} MB", self.config.max_swap_mb)
            };
            return Err(stage.fail(Stage::Swap, reason));
        }

        if !self.config.required_commands.is_empty() {
            let script = probe::missing_commands_command(&self.config.required_commands);
            let out = stage.exec(Stage::Environment, &script).await?;
            let missing = probe::parse_missing_commands(&out);
            if !missing.is_empty() {
                return Err(stage.fail(
                    Stage::Environment,
                    format!("missing commands: {}", missing.join(", ")),
                ));
            }
        }

        if !self.config.kernel_params.is_empty() {
            let command = probe::kernel_params_command(self.config.kernel_params.keys());
            let out = stage.exec(Stage::OsEnvironment, &command).await?;
            let observed = probe::parse_sysctl(&out);
            for (name, want) in &self.config.kernel_params {
                let got = observed.get(name).map(|v| normalize(v)).unwrap_or_default();
                if got != normalize(want) {
                    return Err(stage.fail(
                        Stage::OsEnvironment,
                        format!("{name} = {got:?}, want {want:?}"),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Borrowed state shared by the stages of one run.
struct StageRunner<'a> {
    ctx: &'a OpContext,
    host: &'a Host,
    session: &'a mut dyn RemoteSession,
    config: &'a VerifyConfig,
}

impl StageRunner<'_> {
    /// Run one stage command, returning stdout of a successful exit.
    async fn exec(&mut self, stage: Stage, command: &str) -> VerifyResult<String> {
        let limit = self.config.command_timeout();
        let timeout = self.ctx.remaining().map_or(limit, |left| left.min(limit));
        debug!(host_id = %self.host.id, %stage, "running stage");

        match self.ctx.run(self.session.run(command, timeout)).await {
            Err(source) => Err(VerifyError::Interrupted {
                host: self.host.ip.clone(),
                stage,
                source,
            }),
            Ok(Err(ExecError::Timeout(after))) => {
                Err(self.fail(stage, format!("command timed out after {after:?}")))
            }
            Ok(Err(e)) => Err(VerifyError::Connectivity {
                host: self.host.ip.clone(),
                stage,
                reason: e.to_string(),
            }),
            Ok(Ok(out)) if !out.success() => Err(self.fail(
                stage,
                format!("command exited {}: {}", out.exit_code, out.stderr.trim()),
            )),
            Ok(Ok(out)) => Ok(out.stdout),
        }
    }

    fn fail(&self, stage: Stage, reason: impl Into<String>) -> VerifyError {
        VerifyError::Check {
            host: self.host.ip.clone(),
            stage,
            reason: reason.into(),
        }
    }
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;
    use crate::scripted::ScriptedExecutor;
    use hostpool_state::*;
    use std::time::Duration;

    fn make_host() -> Host {
        Host {
            id: "host-1".to_string(),
            ip: "172.16.0.10".to_string(),
            credential: Credential::Password {
                user_name: "tidb".to_string(),
                password: "pw".to_string(),
            },
            host_name: "db-10".to_string(),
            arch: Arch::X86,
            os: "CentOS".to_string(),
            kernel: "5.10".to_string(),
            spec: "16C64G".to_string(),
            cpu_cores: 16,
            memory: 64,
            free_cpu_cores: 16,
            free_memory: 64,
            nic: "10GE".to_string(),
            region: "r1".to_string(),
            zone: "z1".to_string(),
            rack: "k1".to_string(),
            cluster_type: "TiDB".to_string(),
            purpose: Purpose::Storage,
            disk_type: DiskType::NvmeSsd,
            reserved: false,
            traits: 0,
            status: HostStatus::Online,
            stat: HostStat::Loadless,
            disks: vec![Disk {
                id: "disk-1".to_string(),
                host_id: "host-1".to_string(),
                name: "/dev/nvme0n1".to_string(),
                capacity: 1800,
                path: "/data1".to_string(),
                disk_type: DiskType::NvmeSsd,
                status: DiskStatus::Available,
            }],
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            revision: 1,
        }
    }

    fn config() -> VerifyConfig {
        let mut config = VerifyConfig::default();
        config.kernel_params.insert("vm.swappiness".to_string(), "0".to_string());
        config
    }

    fn verifier(executor: &ScriptedExecutor) -> Verifier {
        Verifier::new(Arc::new(executor.clone()), config())
    }

    #[tokio::test]
    async fn healthy_host_passes_every_stage() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config());

        verifier(&executor).verify(&OpContext::background(), &host).await.unwrap();

        // Compute, disk, filesystem, swap, environment, os environment.
        assert_eq!(executor.commands().len(), 6);
        assert_eq!(executor.open_sessions(), 0);
    }

    #[tokio::test]
    async fn unreachable_host_is_connectivity_error() {
        let executor = ScriptedExecutor::new().fail_connect(ExecError::Auth("Permission denied".into()));
        let err = verifier(&executor)
            .verify(&OpContext::background(), &make_host())
            .await
            .unwrap_err();

        assert!(matches!(err, VerifyError::Connectivity { stage: Stage::Connect, .. }));
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn short_memory_fails_compute_and_stops() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config())
            .respond(probe::COMPUTE_COMMAND, CommandOutput::ok("16\n31250000\n"));

        let err = verifier(&executor)
            .verify(&OpContext::background(), &host)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Compute);
        assert!(err.to_string().contains("observed 16C/32G"), "{err}");
        assert_eq!(executor.commands().len(), 1);
        assert_eq!(executor.open_sessions(), 0);
    }

    #[tokio::test]
    async fn missing_disk_fails_disk_stage() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config())
            .respond(probe::DISK_COMMAND, CommandOutput::ok("sda 107374182400\n"));

        let err = verifier(&executor)
            .verify(&OpContext::background(), &host)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Disk);
        assert!(err.to_string().contains("nvme0n1 not found"), "{err}");
    }

    #[tokio::test]
    async fn wrong_filesystem_fails() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config())
            .respond(probe::MOUNT_COMMAND, CommandOutput::ok("/ xfs\n/data1 btrfs\n"));

        let err = verifier(&executor)
            .verify(&OpContext::background(), &host)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Filesystem);
    }

    #[tokio::test]
    async fn enabled_swap_fails() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config())
            .respond(probe::SWAP_COMMAND, CommandOutput::ok("2047\n"));

        let err = verifier(&executor)
            .verify(&OpContext::background(), &host)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Swap);
        assert!(err.to_string().contains("must be off"), "{err}");
    }

    #[tokio::test]
    async fn missing_tool_fails_environment() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config())
            .respond("for c in", CommandOutput::ok("numactl\n"));

        let err = verifier(&executor)
            .verify(&OpContext::background(), &host)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Environment);
        assert!(err.to_string().contains("numactl"));
    }

    #[tokio::test]
    async fn kernel_param_mismatch_fails_os_environment() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config())
            .respond("sysctl", CommandOutput::ok("vm.swappiness = 60\n"));

        let err = verifier(&executor)
            .verify(&OpContext::background(), &host)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::OsEnvironment);
    }

    #[tokio::test]
    async fn failing_command_is_a_check_error() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config()).respond(
            probe::DISK_COMMAND,
            CommandOutput {
                exit_code: 127,
                stdout: String::new(),
                stderr: "lsblk: command not found".to_string(),
            },
        );

        let err = verifier(&executor)
            .verify(&OpContext::background(), &host)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Check { stage: Stage::Disk, .. }));
        assert_eq!(executor.open_sessions(), 0);
    }

    #[tokio::test]
    async fn cancelled_context_interrupts_and_closes() {
        let host = make_host();
        let executor = ScriptedExecutor::healthy(&host, &config()).with_delay(Duration::from_secs(5));
        let ctx = OpContext::background().with_timeout(Duration::from_millis(50));

        let err = verifier(&executor).verify(&ctx, &host).await.unwrap_err();
        assert!(matches!(err, VerifyError::Interrupted { stage: Stage::Compute, .. }), "{err}");
        assert_eq!(executor.open_sessions(), 0);
    }
}
