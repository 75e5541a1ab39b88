//! Fakes and a harness shared by the engine tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use courier_core::{
    Clock, CourierError, GatewayOutcome, LeaseConfig, LeaseFence, MonotonicClock, Result,
    TargetRegistry,
};
use courier_store::{SqliteStore, Store};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::executor::{AttemptExecutor, ExecRequest};
use crate::leadership::LeaseLost;
use crate::manager::{Manager, ManagerConfig};
use crate::webhook::{WebhookDelivery, WebhookSender};

pub const LEASE: &str = "courier-leader";

pub const REGISTRY: &str = r#"
[targets."sms.realtime"]
gateway_type = "twilio"
gateway_url = "http://gateway.local/sms"
policy = "max_attempts"
max_attempts = 3
terminal_outcomes = ["invalid_number"]
known_outcomes = ["throttled"]

[targets."sms.deadline"]
gateway_type = "twilio"
gateway_url = "http://gateway.local/sms"
policy = "deadline"
max_acceptance_seconds = 2

[targets."push.once"]
gateway_type = "fcm"
gateway_url = "http://gateway.local/push"
policy = "one_shot"

[targets."sms.hooked"]
gateway_type = "twilio"
gateway_url = "http://gateway.local/sms"
policy = "max_attempts"
max_attempts = 2

[targets."sms.hooked".webhook]
url = "http://hooks.local/done"
"#;

pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Gateway fake: plays scripted responses, then repeats the fallback.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<std::result::Result<GatewayOutcome, String>>>,
    fallback: std::result::Result<GatewayOutcome, String>,
    delay: Duration,
    calls: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn always(outcome: GatewayOutcome) -> Self {
        Self::scripted(Vec::new(), Ok(outcome))
    }

    pub fn scripted(
        script: Vec<std::result::Result<GatewayOutcome, String>>,
        fallback: std::result::Result<GatewayOutcome, String>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call takes `delay` of (virtual) time.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<ExecRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttemptExecutor for ScriptedExecutor {
    async fn exec(&self, request: ExecRequest) -> Result<GatewayOutcome> {
        self.calls.lock().unwrap().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
            .map_err(|message| CourierError::Gateway { message })
    }
}

#[derive(Default)]
pub struct RecordingWebhooks {
    pub fail: bool,
    sent: Mutex<Vec<WebhookDelivery>>,
}

impl RecordingWebhooks {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<WebhookDelivery> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhooks {
    async fn send(&self, delivery: &WebhookDelivery) -> Result<()> {
        self.sent.lock().unwrap().push(delivery.clone());
        if self.fail {
            return Err(CourierError::Webhook {
                message: "hook endpoint returned 503".to_string(),
            });
        }
        Ok(())
    }
}

/// One process: a manager over a (possibly shared) store, on virtual time.
pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub clock: Arc<dyn Clock>,
    pub executor: Arc<ScriptedExecutor>,
    pub webhooks: Arc<RecordingWebhooks>,
    pub manager: Arc<Manager>,
}

impl Harness {
    /// Must be called inside a paused tokio runtime.
    pub fn new(executor: ScriptedExecutor) -> Self {
        Self::with_webhooks(executor, RecordingWebhooks::default())
    }

    pub fn with_webhooks(executor: ScriptedExecutor, webhooks: RecordingWebhooks) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::starting_at(epoch()));
        let store = Arc::new(
            SqliteStore::open_in_memory()
                .unwrap()
                .with_clock(clock.clone()),
        );
        Self::build(store, clock, executor, webhooks)
    }

    /// A second process over the same store and clock.
    pub fn peer(&self, executor: ScriptedExecutor) -> Self {
        Self::build(
            self.store.clone(),
            self.clock.clone(),
            executor,
            RecordingWebhooks::default(),
        )
    }

    fn build(
        store: Arc<SqliteStore>,
        clock: Arc<dyn Clock>,
        executor: ScriptedExecutor,
        webhooks: RecordingWebhooks,
    ) -> Self {
        let executor = Arc::new(executor);
        let webhooks = Arc::new(webhooks);
        let registry = Arc::new(TargetRegistry::from_toml_str(REGISTRY).unwrap());
        let manager = Arc::new(Manager::new(
            store.clone(),
            registry,
            executor.clone(),
            webhooks.clone(),
            clock.clone(),
            ManagerConfig::default(),
        ));
        Self {
            store,
            clock,
            executor,
            webhooks,
            manager,
        }
    }

    /// Take the lease as `holder` without touching the manager.
    pub async fn acquire(&self, holder: &str) -> LeaseFence {
        let config = LeaseConfig::new(LEASE, holder, chrono::Duration::seconds(15));
        self.store
            .acquire_lease(&config)
            .await
            .unwrap()
            .expect("lease should be free")
            .fence()
    }

    /// Take the lease as `holder` and make the manager leader.
    pub async fn lead(&self, holder: &str) -> LeaseFence {
        let fence = self.acquire(holder).await;
        self.manager.become_leader(fence.clone()).await.unwrap();
        fence
    }

    /// Run the scheduler loop in the background.
    pub fn run_scheduler(
        &self,
    ) -> (CancellationToken, JoinHandle<std::result::Result<(), LeaseLost>>) {
        let cancel = CancellationToken::new();
        let manager = self.manager.clone();
        let scope = cancel.clone();
        let handle =
            tokio::spawn(async move { manager.scheduler().run(scope, manager.as_ref()).await });
        (cancel, handle)
    }
}
