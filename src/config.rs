//! Centralized configuration for the connectivity core.
//!
//! Unlike a global `OnceLock`-based config, a `Config` value is built once at
//! startup and threaded through constructors (pool, tunnel manager, session
//! manager, ...) rather than reached for via a global getter. This keeps
//! every service's dependencies explicit and testable.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_key_directory() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetssh")
        .join("ssh-keys")
}

fn default_ssh_connect_timeout_secs() -> u64 {
    10
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    16_000
}

fn default_reconnect_factor() -> f64 {
    2.0
}

fn default_tunnel_monitor_interval_secs() -> u64 {
    10
}

fn default_tunnel_global_probe_interval_secs() -> u64 {
    60
}

fn default_tunnel_probe_timeout_secs() -> u64 {
    5
}

fn default_tunnel_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_tunnel_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_tunnel_reconnect_factor() -> f64 {
    2.0
}

fn default_terminal_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_terminal_scrollback_bytes() -> usize {
    1024 * 1024
}

fn default_allowed_shells() -> Vec<String> {
    vec!["bash".into(), "sh".into(), "zsh".into()]
}

fn default_audit_retention_days() -> u32 {
    90
}

fn default_rate_limit_connections_per_minute() -> u32 {
    20
}

fn default_ops_exec_timeout_secs() -> u64 {
    15
}

/// Reconnect backoff policy, shared shape between the Connection Pool and the
/// Tunnel Manager's per-instance monitor (each gets its own instance with
/// different defaults — see `ReconnectPolicy::pool_default` /
/// `ReconnectPolicy::tunnel_default`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl ReconnectPolicy {
    /// Delay before attempt `n` (1-indexed), before jitter is applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_terminal_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_terminal_scrollback_bytes")]
    pub scrollback_bytes: usize,
    #[serde(default = "default_allowed_shells")]
    pub allowed_shells: Vec<String>,
    #[serde(default)]
    pub recording: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_terminal_idle_timeout_secs(),
            scrollback_bytes: default_terminal_scrollback_bytes(),
            allowed_shells: default_allowed_shells(),
            recording: false,
        }
    }
}

impl TerminalConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Top-level, process-scoped configuration. Every field here corresponds to
/// an entry in spec §6's "Configuration (recognized, enumerated)" table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_key_directory")]
    pub key_directory: PathBuf,

    #[serde(default = "default_ssh_connect_timeout_secs")]
    pub ssh_connect_timeout_secs: u64,

    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_reconnect_factor")]
    pub reconnect_factor: f64,

    #[serde(default = "default_tunnel_monitor_interval_secs")]
    pub tunnel_monitor_interval_secs: u64,
    #[serde(default = "default_tunnel_global_probe_interval_secs")]
    pub tunnel_global_probe_interval_secs: u64,
    #[serde(default = "default_tunnel_probe_timeout_secs")]
    pub tunnel_probe_timeout_secs: u64,
    #[serde(default = "default_tunnel_reconnect_base_delay_ms")]
    pub tunnel_reconnect_base_delay_ms: u64,
    #[serde(default = "default_tunnel_reconnect_max_delay_ms")]
    pub tunnel_reconnect_max_delay_ms: u64,
    #[serde(default = "default_tunnel_reconnect_factor")]
    pub tunnel_reconnect_factor: f64,

    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: u32,

    #[serde(default = "default_rate_limit_connections_per_minute")]
    pub rate_limit_connections_per_minute: u32,

    /// Bound on `listDirectory`/`readFile`/`writeFile`/`createDirectory`.
    /// Not specified by name in the data model; chosen between the 10 s
    /// connect timeout and the unbounded follow-mode log tail.
    #[serde(default = "default_ops_exec_timeout_secs")]
    pub ops_exec_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_directory: default_key_directory(),
            ssh_connect_timeout_secs: default_ssh_connect_timeout_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_factor: default_reconnect_factor(),
            tunnel_monitor_interval_secs: default_tunnel_monitor_interval_secs(),
            tunnel_global_probe_interval_secs: default_tunnel_global_probe_interval_secs(),
            tunnel_probe_timeout_secs: default_tunnel_probe_timeout_secs(),
            tunnel_reconnect_base_delay_ms: default_tunnel_reconnect_base_delay_ms(),
            tunnel_reconnect_max_delay_ms: default_tunnel_reconnect_max_delay_ms(),
            tunnel_reconnect_factor: default_tunnel_reconnect_factor(),
            terminal: TerminalConfig::default(),
            audit_retention_days: default_audit_retention_days(),
            rate_limit_connections_per_minute: default_rate_limit_connections_per_minute(),
            ops_exec_timeout_secs: default_ops_exec_timeout_secs(),
        }
    }
}

impl Config {
    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_max_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            factor: self.reconnect_factor,
        }
    }

    pub fn tunnel_reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_millis(self.tunnel_reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.tunnel_reconnect_max_delay_ms),
            factor: self.tunnel_reconnect_factor,
        }
    }

    pub fn tunnel_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.tunnel_monitor_interval_secs)
    }

    pub fn tunnel_global_probe_interval(&self) -> Duration {
        Duration::from_secs(self.tunnel_global_probe_interval_secs)
    }

    pub fn tunnel_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_probe_timeout_secs)
    }

    pub fn ops_exec_timeout(&self) -> Duration {
        Duration::from_secs(self.ops_exec_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.ssh_connect_timeout_secs, 10);
        assert_eq!(cfg.keepalive_interval_secs, 30);
        assert_eq!(cfg.reconnect_max_attempts, 10);
        assert_eq!(cfg.reconnect_max_delay_ms, 16_000);
        assert_eq!(cfg.tunnel_monitor_interval_secs, 10);
        assert_eq!(cfg.tunnel_global_probe_interval_secs, 60);
        assert_eq!(cfg.terminal.idle_timeout_secs, 1800);
        assert_eq!(cfg.terminal.scrollback_bytes, 1024 * 1024);
        assert_eq!(cfg.audit_retention_days, 90);
        assert_eq!(cfg.rate_limit_connections_per_minute, 20);
    }

    #[test]
    fn reconnect_delay_caps_at_max() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            factor: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(16));
    }
}
