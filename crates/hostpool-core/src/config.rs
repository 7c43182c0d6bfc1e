//! pool.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hostpool.redb"),
        }
    }
}

/// Host verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Run the pipeline on import. Individual calls may still skip it.
    pub enabled: bool,
    pub ssh_port: u16,
    /// Private key used for hosts imported with key authentication and no key path.
    pub key_path: Option<PathBuf>,
    /// Wrap checks in `sudo` when the login user is not root.
    pub sudo: bool,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub allowed_filesystems: Vec<String>,
    /// Upper bound on swap in MB; 0 means swap must be off.
    pub max_swap_mb: u64,
    pub required_commands: Vec<String>,
    /// sysctl name to required value.
    pub kernel_params: BTreeMap<String, String>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ssh_port: 22,
            key_path: None,
            sudo: true,
            connect_timeout_secs: 10,
            command_timeout_secs: 30,
            allowed_filesystems: vec!["ext4".to_string(), "xfs".to_string()],
            max_swap_mb: 0,
            required_commands: vec!["numactl".to_string()],
            kernel_params: BTreeMap::new(),
        }
    }
}

impl VerifyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub isolation: IsolationScope,
}

/// How far a granted host is excluded from later requirements of the same batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationScope {
    /// Within one applicant's requirement list.
    #[default]
    Request,
    /// Across the whole batch.
    Batch,
    /// Hosts may be granted again to later requirements.
    None,
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: PoolConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = PoolConfig::from_toml_str("").unwrap();
        assert_eq!(config.store.path, PathBuf::from("hostpool.redb"));
        assert!(config.verify.enabled);
        assert_eq!(config.verify.ssh_port, 22);
        assert_eq!(config.allocation.isolation, IsolationScope::Request);
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[store]
path = "/var/lib/hostpool/pool.redb"

[verify]
enabled = false
ssh_port = 2222
key_path = "/root/.ssh/id_rsa"
max_swap_mb = 1024
allowed_filesystems = ["xfs"]
required_commands = ["numactl", "irqbalance"]

[verify.kernel_params]
"vm.swappiness" = "0"

[allocation]
isolation = "batch"
"#;
        let config = PoolConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/hostpool/pool.redb"));
        assert!(!config.verify.enabled);
        assert_eq!(config.verify.ssh_port, 2222);
        assert_eq!(config.verify.allowed_filesystems, vec!["xfs"]);
        assert_eq!(config.verify.kernel_params["vm.swappiness"], "0");
        // Unset keys keep their defaults.
        assert_eq!(config.verify.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.allocation.isolation, IsolationScope::Batch);
    }

    #[test]
    fn test_round_trip() {
        let config = PoolConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("isolation = \"request\""));
        let parsed = PoolConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.verify.allowed_filesystems, config.verify.allowed_filesystems);
    }

    #[test]
    fn test_unknown_isolation_is_rejected() {
        assert!(PoolConfig::from_toml_str("[allocation]\nisolation = \"global\"").is_err());
    }
}
