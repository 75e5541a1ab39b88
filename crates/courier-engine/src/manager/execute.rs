//! Attempt execution and webhook dispatch on the leader.

use courier_core::policy::{self, Decision};
use courier_core::{Attempt, ExhaustedReason, IntentRecord, LeaseFence, Policy, WebhookStatus};
use courier_store::{AttemptWrite, WriteOutcome};
use tracing::{debug, info, warn};

use super::{store_unavailable, Manager};
use crate::executor::ExecRequest;
use crate::leadership::{LeadershipEnd, LeaseLost};
use crate::metrics;
use crate::webhook::WebhookDelivery;

type Leading<T> = std::result::Result<T, LeaseLost>;

impl Manager {
    /// Run one attempt of `intent_id` if it is still pending and due.
    ///
    /// Gateway errors are recorded on the attempt and never returned. An
    /// `Err` means this process must stop leading.
    pub async fn execute_attempt(&self, intent_id: &str) -> Leading<()> {
        let Some(fence) = self.current_fence() else {
            debug!(intent_id = %intent_id, "not leading; skipping attempt");
            return Ok(());
        };

        let now = self
            .store
            .now()
            .await
            .map_err(|err| store_unavailable("read store clock", err))?;
        let candidate = self
            .store
            .load_intent_for_execution(intent_id, now)
            .await
            .map_err(|err| store_unavailable("load intent for execution", err))?;
        let Some(candidate) = candidate else {
            debug!(intent_id = %intent_id, "intent no longer due");
            return Ok(());
        };
        let number = candidate.next_attempt_number();
        let intent = candidate.intent;
        let contract = &intent.contract;

        if contract.policy == Policy::Deadline
            && policy::deadline_passed(contract, intent.created_at, now)
        {
            info!(intent_id = %intent_id, "deadline passed before dispatch");
            let outcome = self
                .store
                .mark_exhausted(&fence, intent_id, ExhaustedReason::DeadlineExceeded, now)
                .await
                .map_err(|err| store_unavailable("mark exhausted", err))?;
            if self.check_write(outcome, intent_id, "mark_exhausted")? {
                metrics::attempt("exhausted", &contract.gateway_type);
                self.dispatch_webhook(&fence, intent_id).await?;
            }
            return Ok(());
        }

        let request = ExecRequest::new(intent_id, number, contract, &intent.payload);
        let started = tokio::time::Instant::now();
        let result = self.executor.exec(request).await;
        metrics::gateway_latency(started.elapsed());

        let finished_at = self
            .store
            .now()
            .await
            .map_err(|err| store_unavailable("read store clock", err))?;
        let (gateway_outcome, error) = match result {
            Ok(outcome) => (Some(outcome), None),
            Err(err) => {
                warn!(intent_id = %intent_id, attempt = number, error = %err, "gateway call failed");
                (None, Some(err.to_string()))
            }
        };
        let mut attempt = Attempt {
            number,
            started_at: now,
            finished_at,
            gateway_outcome,
            error,
        };
        let decision =
            policy::evaluate_attempt(contract, intent.created_at, &mut attempt, &self.config.retry);
        self.note_unknown_rejection(&intent, &attempt, &decision);

        info!(
            intent_id = %intent_id,
            attempt = number,
            decision = decision.label(),
            next_attempt_at = ?decision.next_attempt_at(),
            "attempt finished"
        );

        let write = AttemptWrite {
            intent_id: intent_id.to_string(),
            status: decision.status(),
            final_outcome: decision.final_outcome().cloned(),
            exhausted_reason: decision.exhausted_reason(),
            next_attempt_at: decision.next_attempt_at(),
            attempt,
        };
        let outcome = self
            .store
            .record_attempt(&fence, &write, finished_at)
            .await
            .map_err(|err| store_unavailable("record attempt", err))?;
        if !self.check_write(outcome, intent_id, "record_attempt")? {
            return Ok(());
        }
        metrics::attempt(decision.label(), &contract.gateway_type);

        match decision {
            Decision::Retry { at } => {
                self.scheduler.enqueue(intent_id, at);
            }
            _ => self.dispatch_webhook(&fence, intent_id).await?,
        }
        Ok(())
    }

    /// Deliver the terminal webhook for `intent_id` if one is owed, and record
    /// the result under `fence`.
    pub(crate) async fn dispatch_webhook(
        &self,
        fence: &LeaseFence,
        intent_id: &str,
    ) -> Leading<()> {
        let intent = self
            .store
            .load_intent_row(intent_id)
            .await
            .map_err(|err| store_unavailable("load intent for webhook", err))?;
        let Some(intent) = intent else {
            return Ok(());
        };
        let delivery = match WebhookDelivery::for_intent(&intent) {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return Ok(()),
            Err(err) => {
                warn!(intent_id = %intent_id, error = %err, "could not build webhook");
                return Ok(());
            }
        };

        let result = self.webhooks.send(&delivery).await;
        let attempted_at = self
            .store
            .now()
            .await
            .map_err(|err| store_unavailable("read store clock", err))?;
        let (status, error) = match &result {
            Ok(()) => (WebhookStatus::Delivered, None),
            Err(err) => {
                warn!(intent_id = %intent_id, url = %delivery.url, error = %err, "webhook delivery failed");
                (WebhookStatus::Failed, Some(err.to_string()))
            }
        };
        let outcome = self
            .store
            .record_webhook_attempt(fence, intent_id, status, attempted_at, error.as_deref())
            .await
            .map_err(|err| store_unavailable("record webhook attempt", err))?;
        if self.check_write(outcome, intent_id, "record_webhook_attempt")? {
            metrics::webhook(status.as_str());
            debug!(intent_id = %intent_id, status = %status, "webhook recorded");
        }
        Ok(())
    }

    /// Deliver webhooks left pending by a crash or failover between the
    /// terminal write and delivery.
    pub(crate) async fn recover_webhooks(&self) -> Leading<()> {
        let Some(fence) = self.current_fence() else {
            return Ok(());
        };
        let pending = self
            .store
            .load_pending_webhooks()
            .await
            .map_err(|err| store_unavailable("load pending webhooks", err))?;
        if !pending.is_empty() {
            info!(count = pending.len(), "re-dispatching pending webhooks");
        }
        for intent_id in pending {
            self.dispatch_webhook(&fence, &intent_id).await?;
        }
        Ok(())
    }

    /// `Ok(true)` if applied, `Ok(false)` if the intent had moved on, and
    /// lease loss (after demoting) if the fence was rejected.
    fn check_write(
        &self,
        outcome: WriteOutcome,
        intent_id: &str,
        operation: &'static str,
    ) -> Leading<bool> {
        match outcome {
            WriteOutcome::Applied => Ok(true),
            WriteOutcome::NotPending => {
                debug!(intent_id = %intent_id, operation, "write skipped; intent no longer pending");
                Ok(false)
            }
            WriteOutcome::Fenced => {
                warn!(intent_id = %intent_id, operation, "write fenced off; another process leads");
                metrics::fenced_write(operation);
                self.demote(LeadershipEnd::Fenced);
                Err(LeaseLost::new(LeadershipEnd::Fenced))
            }
        }
    }

    fn note_unknown_rejection(
        &self,
        intent: &IntentRecord,
        attempt: &Attempt,
        decision: &Decision,
    ) {
        let Some(outcome) = &attempt.gateway_outcome else {
            return;
        };
        if attempt.error.is_some()
            || outcome.status != courier_core::intent::OUTCOME_REJECTED
            || !matches!(decision, Decision::Retry { .. } | Decision::Exhaust(_))
        {
            return;
        }
        let contract = &intent.contract;
        if contract.known_outcomes.is_empty() || contract.is_known_outcome(&outcome.reason) {
            return;
        }
        warn!(
            intent_id = %intent.intent_id,
            reason = %outcome.reason,
            target = %intent.submission_target,
            "gateway rejected with an unlisted reason; treating as retryable"
        );
        metrics::unknown_rejection(&contract.gateway_type);
    }
}
