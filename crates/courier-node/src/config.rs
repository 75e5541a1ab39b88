//! Process configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use courier_core::RetrySettings;
use courier_engine::{ElectionConfig, ManagerConfig};

/// Courier node: idempotent, leader-elected message submission.
#[derive(Parser, Debug, Clone)]
#[command(name = "courier-node")]
#[command(author, version, about, long_about = None)]
pub struct NodeConfig {
    /// Address the HTTP API listens on
    #[arg(long, env = "COURIER_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// SQLite database file shared by all nodes
    #[arg(long, env = "COURIER_DATABASE", default_value = "courier.db")]
    pub database: PathBuf,

    /// Target registry (TOML)
    #[arg(long, env = "COURIER_TARGETS", default_value = "targets.toml")]
    pub targets: PathBuf,

    /// Lease holder id of this node; a random UUID if unset
    #[arg(long, env = "COURIER_HOLDER_ID")]
    pub holder_id: Option<String>,

    #[arg(long, env = "COURIER_LEASE_NAME", default_value = "courier-leader")]
    pub lease_name: String,

    #[arg(long, env = "COURIER_LEASE_DURATION_MS", default_value_t = 15_000)]
    pub lease_duration_ms: u64,

    /// Must be shorter than the lease duration
    #[arg(long, env = "COURIER_RENEW_INTERVAL_MS", default_value_t = 5_000)]
    pub renew_interval_ms: u64,

    /// Period of the incremental schedule refresh on the leader
    #[arg(long, env = "COURIER_REFRESH_INTERVAL_MS", default_value_t = 1_000)]
    pub refresh_interval_ms: u64,

    #[arg(long, env = "COURIER_ACQUIRE_RETRY_MS", default_value_t = 2_000)]
    pub acquire_retry_ms: u64,

    /// Delay between a finished attempt and the next one
    #[arg(long, env = "COURIER_RETRY_DELAY_MS", default_value_t = 5_000)]
    pub retry_delay_ms: u64,

    #[arg(long, env = "COURIER_WAIT_POLL_MS", default_value_t = 100)]
    pub wait_poll_ms: u64,

    /// Upper bound for `waitSeconds`
    #[arg(long, env = "COURIER_MAX_WAIT_SECONDS", default_value_t = 30)]
    pub max_wait_seconds: u64,

    #[arg(long, env = "COURIER_GATEWAY_TIMEOUT_MS", default_value_t = 10_000)]
    pub gateway_timeout_ms: u64,

    #[arg(long, env = "COURIER_WEBHOOK_TIMEOUT_MS", default_value_t = 10_000)]
    pub webhook_timeout_ms: u64,
}

/// Longest retry delay the node accepts (one day).
const MAX_RETRY_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

impl NodeConfig {
    /// The configured holder id, or a fresh one.
    pub fn resolve_holder_id(&self) -> String {
        self.holder_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn election_config(&self, holder_id: String) -> ElectionConfig {
        let mut config = ElectionConfig::new(self.lease_name.clone(), holder_id);
        config.lease_duration = Duration::from_millis(self.lease_duration_ms);
        config.renew_interval = Duration::from_millis(self.renew_interval_ms);
        config.refresh_interval = Duration::from_millis(self.refresh_interval_ms);
        config.acquire_retry_interval = Duration::from_millis(self.acquire_retry_ms);
        config
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            retry: RetrySettings {
                retry_delay: chrono::Duration::milliseconds(
                    self.retry_delay_ms.min(MAX_RETRY_DELAY_MS) as i64,
                ),
            },
            wait_poll_interval: Duration::from_millis(self.wait_poll_ms),
            max_wait: Duration::from_secs(self.max_wait_seconds),
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.election_config("validate".to_string()).validate()?;
        if self.retry_delay_ms == 0 || self.retry_delay_ms > MAX_RETRY_DELAY_MS {
            anyhow::bail!(
                "retry delay must be between 1 and {} milliseconds",
                MAX_RETRY_DELAY_MS
            );
        }
        if self.wait_poll_ms == 0 {
            anyhow::bail!("wait poll interval must be non-zero");
        }
        if self.gateway_timeout_ms == 0 || self.webhook_timeout_ms == 0 {
            anyhow::bail!("gateway and webhook timeouts must be non-zero");
        }
        Ok(())
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }
}
