//! Lease-based leader election.
//!
//! One [`LeaderElector`] per process contends for a named lease row. While it
//! holds the lease it runs three activities under one cancellation scope: the
//! scheduler, lease renewal and incremental schedule refresh. The first of
//! them to stop ends the term for all three.

use std::sync::Arc;
use std::time::Duration;

use courier_core::{Clock, CourierError, LeaseConfig, LeaseRecord};
use courier_store::Store;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::leadership::{LeadershipEnd, LeaseLost};
use crate::manager::Manager;

#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub lease_name: String,
    pub holder_id: String,
    pub lease_duration: Duration,
    /// Must be shorter than `lease_duration`.
    pub renew_interval: Duration,
    pub refresh_interval: Duration,
    /// Wait between failed acquisitions.
    pub acquire_retry_interval: Duration,
    /// Pause after losing leadership before contending again.
    pub demote_backoff: Duration,
}

impl ElectionConfig {
    pub fn new(lease_name: impl Into<String>, holder_id: impl Into<String>) -> Self {
        let lease_duration = Duration::from_secs(15);
        Self {
            lease_name: lease_name.into(),
            holder_id: holder_id.into(),
            lease_duration,
            renew_interval: lease_duration / 3,
            refresh_interval: Duration::from_secs(1),
            acquire_retry_interval: Duration::from_secs(2),
            demote_backoff: Duration::from_secs(1),
        }
    }

    pub fn validate(&self) -> courier_core::Result<()> {
        let zero = [
            ("lease_duration", self.lease_duration),
            ("renew_interval", self.renew_interval),
            ("refresh_interval", self.refresh_interval),
            ("acquire_retry_interval", self.acquire_retry_interval),
        ]
        .into_iter()
        .find(|(_, value)| value.is_zero());
        if let Some((name, _)) = zero {
            return Err(CourierError::Internal(format!("{} must be non-zero", name)));
        }
        if self.renew_interval >= self.lease_duration {
            return Err(CourierError::Internal(
                "renew_interval must be shorter than lease_duration".to_string(),
            ));
        }
        Ok(())
    }

    fn lease_config(&self) -> LeaseConfig {
        LeaseConfig::new(
            self.lease_name.clone(),
            self.holder_id.clone(),
            chrono::Duration::from_std(self.lease_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(15)),
        )
    }
}

pub struct LeaderElector {
    store: Arc<dyn Store>,
    manager: Arc<Manager>,
    clock: Arc<dyn Clock>,
    config: ElectionConfig,
}

impl LeaderElector {
    pub fn new(
        store: Arc<dyn Store>,
        manager: Arc<Manager>,
        clock: Arc<dyn Clock>,
        config: ElectionConfig,
    ) -> Self {
        Self {
            store,
            manager,
            clock,
            config,
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.config.holder_id
    }

    /// Contend for the lease until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let lease_config = self.config.lease_config();
        info!(
            lease = %lease_config.lease_name,
            holder = %lease_config.holder_id,
            "starting leader election"
        );

        while !cancel.is_cancelled() {
            let pause = match self.store.acquire_lease(&lease_config).await {
                Ok(Some(lease)) => {
                    let reason = self.lead(lease, &lease_config, &cancel).await;
                    info!(reason = %reason, "leadership ended");
                    self.config.demote_backoff
                }
                Ok(None) => {
                    debug!(lease = %lease_config.lease_name, "lease held elsewhere");
                    self.config.acquire_retry_interval
                }
                Err(err) => {
                    warn!(error = %err, "lease acquisition failed");
                    self.config.acquire_retry_interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(pause) => {}
            }
        }
        info!("leader election stopped");
    }

    /// One leadership term. Returns why it ended; the manager is a follower
    /// again when this returns.
    async fn lead(
        &self,
        lease: LeaseRecord,
        lease_config: &LeaseConfig,
        cancel: &CancellationToken,
    ) -> LeadershipEnd {
        let fence = lease.fence();
        info!(fence = %fence, expires_at = %lease.expires_at, "leadership acquired");

        let cursor = match self.manager.become_leader(fence.clone()).await {
            Ok(cursor) => cursor,
            Err(lost) => {
                self.manager.demote(lost.reason);
                self.release(cancel, &fence).await;
                return lost.reason;
            }
        };

        let scope = cancel.child_token();
        let mut tasks: JoinSet<Result<(), LeaseLost>> = JoinSet::new();

        {
            let manager = self.manager.clone();
            let scope = scope.clone();
            tasks.spawn(async move { manager.scheduler().run(scope, manager.as_ref()).await });
        }
        {
            let store = self.store.clone();
            let clock = self.clock.clone();
            let scope = scope.clone();
            let lease_config = lease_config.clone();
            let interval = self.config.renew_interval;
            let epoch = lease.lease_epoch;
            tasks.spawn(async move {
                renew_loop(store, clock, scope, lease_config, epoch, interval).await
            });
        }
        {
            let manager = self.manager.clone();
            let clock = self.clock.clone();
            let scope = scope.clone();
            let interval = self.config.refresh_interval;
            tasks.spawn(async move {
                let mut cursor = cursor;
                loop {
                    tokio::select! {
                        _ = scope.cancelled() => return Ok(()),
                        _ = clock.sleep(interval) => {}
                    }
                    manager.refresh_schedule(&mut cursor).await?;
                }
            });
        }

        let first = tasks.join_next().await;
        scope.cancel();
        while tasks.join_next().await.is_some() {}

        let reason = match first {
            Some(Ok(Err(lost))) => lost.reason,
            Some(Ok(Ok(()))) | None => LeadershipEnd::Cancelled,
            Some(Err(join_err)) => {
                error!(error = %join_err, "leadership task panicked");
                LeadershipEnd::StoreUnavailable
            }
        };
        self.manager.demote(reason);
        self.release(cancel, &fence).await;
        reason
    }

    /// Give the lease up early on shutdown so a follower need not wait for
    /// expiry.
    async fn release(&self, cancel: &CancellationToken, fence: &courier_core::LeaseFence) {
        if !cancel.is_cancelled() {
            return;
        }
        match self.store.release_lease(fence).await {
            Ok(true) => info!(fence = %fence, "lease released"),
            Ok(false) => debug!(fence = %fence, "lease already moved on"),
            Err(err) => warn!(fence = %fence, error = %err, "lease release failed"),
        }
    }
}

async fn renew_loop(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    scope: CancellationToken,
    lease_config: LeaseConfig,
    epoch: u64,
    interval: Duration,
) -> Result<(), LeaseLost> {
    loop {
        tokio::select! {
            _ = scope.cancelled() => return Ok(()),
            _ = clock.sleep(interval) => {}
        }
        match store.renew_lease(&lease_config, epoch).await {
            Ok(Some(lease)) => {
                debug!(epoch, expires_at = %lease.expires_at, "lease renewed");
            }
            Ok(None) => {
                warn!(epoch, "lease renewal rejected");
                return Err(LeaseLost::new(LeadershipEnd::RenewalRejected));
            }
            Err(err) => {
                error!(epoch, error = %err, "lease renewal failed");
                return Err(LeaseLost::new(LeadershipEnd::RenewalFailed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_renewal_inside_the_lease() {
        let mut config = ElectionConfig::new("courier-leader", "node-a");
        assert!(config.validate().is_ok());

        config.renew_interval = config.lease_duration;
        assert!(config.validate().is_err());

        config.renew_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
