// src/core/warden/config.rs

//! Typed configuration, loaded from TOML. Every field of the line-oriented grammar this
//! monitor's config file notionally exposes (`monitor`, `down-after-milliseconds`,
//! `failover-timeout`, `can-failover`, `parallel-syncs`, `notification-script`,
//! `client-reconfig-script`, `auth-pass`) has a corresponding field here; the config file
//! loader itself is treated as an external collaborator, so TOML (not the line grammar) is
//! the concrete file syntax.

use super::constants::{DEFAULT_FAILOVER_TIMEOUT, DEFAULT_PARALLEL_SYNCS, DEFAULT_PORT};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct WardenConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// The address this monitor advertises to peers; defaults to `host`/`port` if unset.
    pub announce_ip: Option<String>,
    pub announce_port: Option<u16>,

    pub masters: Vec<MonitoredMaster>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoredMaster {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub quorum: usize,

    #[serde(with = "humantime_serde")]
    pub down_after: Duration,

    #[serde(with = "humantime_serde", default = "default_failover_timeout")]
    pub failover_timeout: Duration,

    #[serde(default = "default_hello_interval", with = "humantime_serde")]
    pub hello_interval: Duration,

    #[serde(default = "default_can_failover")]
    pub can_failover: bool,

    #[serde(default = "default_parallel_syncs")]
    pub parallel_syncs: usize,

    pub notification_script: Option<PathBuf>,
    pub client_reconfig_script: Option<PathBuf>,
    pub auth_pass: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_hello_interval() -> Duration {
    super::constants::PUBLISH_PERIOD
}

fn default_can_failover() -> bool {
    true
}

fn default_parallel_syncs() -> usize {
    DEFAULT_PARALLEL_SYNCS
}

fn default_failover_timeout() -> Duration {
    DEFAULT_FAILOVER_TIMEOUT
}

impl WardenConfig {
    pub async fn from_file(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config file '{path}'"))?;
        let config: WardenConfig =
            toml::from_str(&content).with_context(|| format!("parsing config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates script paths are executable files; a failure here is a startup-time
    /// diagnostic, not a process-fatal panic.
    fn validate(&self) -> Result<()> {
        for master in &self.masters {
            if let Some(script) = &master.notification_script {
                check_executable(script)?;
            }
            if let Some(script) = &master.client_reconfig_script {
                check_executable(script)?;
            }
            if master.quorum == 0 {
                bail!("master '{}' has quorum 0, which can never be satisfied", master.name);
            }
        }
        Ok(())
    }
}

fn check_executable(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("script path '{}' does not exist", path.display()))?;
    if !meta.is_file() {
        bail!("script path '{}' is not a regular file", path.display());
    }
    if meta.permissions().mode() & 0o111 == 0 {
        bail!("script path '{}' is not executable", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_are_absent() {
        let toml_str = r#"
            [[masters]]
            name = "mymaster"
            ip = "127.0.0.1"
            port = 6379
            quorum = 2
            down_after = "30s"
        "#;
        let cfg: WardenConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        let m = &cfg.masters[0];
        assert!(m.can_failover);
        assert_eq!(m.parallel_syncs, DEFAULT_PARALLEL_SYNCS);
        assert_eq!(m.failover_timeout, DEFAULT_FAILOVER_TIMEOUT);
    }
}
