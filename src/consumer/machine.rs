//! Idempotent per-delivery processing with bounded internal retry.
//!
//! State per `(id, aggregate_type)` key:
//!
//! ```text
//! UNSEEN → IN_PROGRESS{PROCESSING} → IN_PROGRESS{RETRYING}* → COMPLETED{SUCCEEDED|FAILED}
//! ```
//!
//! Every bookkeeping write runs under its own fresh transaction, so the
//! attempt log survives even when a handler's own transaction rolls back.

use crate::broker::Envelope;
use crate::context::MessageContext;
use crate::inbox::{DeliveryKey, InboxStore, NewInboxRecord};
use crate::retry::{CancelToken, RetryPolicy};

use super::error::{ConsumeError, HandlerError};
use super::headers::MessageHeaders;

/// Business logic invoked per delivered message. Returning
/// [`HandlerError::Timeout`] requests an internal retry; any other error
/// requests permanent give-up; `Ok` requests success.
pub type HandlerFn =
    Box<dyn Fn(&MessageContext, &[u8]) -> Result<(), HandlerError> + Send + Sync>;

/// How a delivery reached its terminal bookkeeping. All three outcomes are
/// acked by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The handler ran and succeeded.
    Handled,
    /// A prior attempt row exists; the handler was not invoked.
    Duplicate,
    /// The delivery was permanently given up on.
    GivenUp,
}

pub(crate) struct Machine {
    inbox: InboxStore,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl Machine {
    pub(crate) fn new(inbox: InboxStore, retry: RetryPolicy, cancel: CancelToken) -> Self {
        Machine { inbox, retry, cancel }
    }

    /// Run one delivered envelope through the state machine.
    ///
    /// `Ok` means the delivery reached terminal bookkeeping (or deduped) and
    /// must be acked. `Err` means no terminal row could be guaranteed: the
    /// caller must not ack, leaving redelivery to the broker.
    pub(crate) fn process(
        &self,
        topic: &str,
        handler: &HandlerFn,
        envelope: &Envelope,
    ) -> Result<ProcessOutcome, ConsumeError> {
        let headers = MessageHeaders::from_envelope(envelope)?;
        let ctx = MessageContext::from_headers(&headers);
        let key = DeliveryKey {
            id: headers.id.to_string(),
            aggregate_id: headers.correlation_id.to_string(),
            aggregate_type: topic.to_string(),
            correlation_id: headers.correlation_id.to_string(),
            trace_id: headers.trace_id.to_string(),
        };

        // Redelivery guard: any prior attempt row means this key was already
        // picked up, whether it completed or not.
        if let Some(prior) = self.inbox.find_latest(&key.id, topic)? {
            if !prior.id.is_empty() {
                log::info!(
                    "skipping already recorded delivery {} on {} (state {}, status {})",
                    key.id,
                    topic,
                    prior.state.as_str(),
                    prior.status.as_str()
                );
                return Ok(ProcessOutcome::Duplicate);
            }
        }

        self.inbox
            .create(NewInboxRecord::processing(&key, envelope.payload.clone()))?;
        log::debug!("delivery {} on {} picked up", key.id, topic);

        let mut attempt: u32 = 1;
        loop {
            match handler(&ctx, &envelope.payload) {
                Ok(()) => break,
                // Only the sentinel is retryable, and the first attempt does
                // not count against the budget.
                Err(err) if err.is_timeout() && attempt <= self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt - 1);
                    self.inbox
                        .create(NewInboxRecord::retrying(&key, attempt, &err, delay))?;
                    log::debug!(
                        "delivery {} on {} attempt {} backing off {:?}",
                        key.id,
                        topic,
                        attempt,
                        delay
                    );
                    if self.cancel.wait_timeout(delay) {
                        return Err(ConsumeError::Cancelled);
                    }
                }
                Err(err) => {
                    self.inbox
                        .create(NewInboxRecord::failed(&key, attempt, &err))?;
                    log::warn!(
                        "giving up on delivery {} on {} after {} attempt(s): {}",
                        key.id,
                        topic,
                        attempt,
                        err
                    );
                    return Ok(ProcessOutcome::GivenUp);
                }
            }
        }

        self.inbox.create(NewInboxRecord::succeeded(&key, attempt))?;
        log::debug!("delivery {} on {} succeeded on attempt {}", key.id, topic, attempt);
        Ok(ProcessOutcome::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::{InboxState, InboxStatus};
    use crate::store::Store;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            scale_factor: 1,
            max_delay: Duration::from_millis(5),
        }
    }

    fn machine(policy: RetryPolicy) -> (Machine, InboxStore) {
        let inbox = InboxStore::new(Store::in_memory().unwrap());
        inbox.checkup().unwrap();
        let machine = Machine::new(inbox.clone(), policy, CancelToken::new());
        (machine, inbox)
    }

    fn envelope(id: Uuid) -> Envelope {
        Envelope::with_string_payload(r#"{"id":"p-1"}"#)
            .with_header("id", id.to_string())
            .with_header("tid", Uuid::new_v4().to_string())
            .with_header("cid", Uuid::new_v4().to_string())
            .with_header("type", "event")
            .with_header("name", "PollCreated")
            .with_header("ts", "1722860000")
    }

    fn counting_handler(
        calls: Arc<AtomicUsize>,
        result: impl Fn() -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> HandlerFn {
        Box::new(move |_ctx, _payload| {
            calls.fetch_add(1, Ordering::SeqCst);
            result()
        })
    }

    #[test]
    fn success_writes_processing_then_succeeded() {
        let (machine, inbox) = machine(fast_policy());
        let id = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&calls), || Ok(()));

        let outcome = machine.process("polls", &handler, &envelope(id)).unwrap();

        assert_eq!(outcome, ProcessOutcome::Handled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let history = inbox.history(&id.to_string(), "polls").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, InboxStatus::Processing);
        assert_eq!(history[0].payload.as_deref(), Some(br#"{"id":"p-1"}"#.as_ref()));
        assert_eq!(history[1].status, InboxStatus::Succeeded);
        assert_eq!(history[1].state, InboxState::Completed);
        assert_eq!(history[1].retry_count, 1);
    }

    #[test]
    fn duplicate_delivery_skips_the_handler() {
        let (machine, _inbox) = machine(fast_policy());
        let id = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&calls), || Ok(()));

        let first = machine.process("polls", &handler, &envelope(id)).unwrap();
        let second = machine.process("polls", &handler, &envelope(id)).unwrap();

        assert_eq!(first, ProcessOutcome::Handled);
        assert_eq!(second, ProcessOutcome::Duplicate);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn in_progress_row_also_dedups() {
        // A delivery that died after its first row (e.g. process crash mid
        // backoff) must not re-run the handler when redelivered.
        let (machine, inbox) = machine(fast_policy());
        let id = Uuid::new_v4();

        let key = DeliveryKey {
            id: id.to_string(),
            aggregate_id: "a-1".into(),
            aggregate_type: "polls".into(),
            correlation_id: "c-1".into(),
            trace_id: "t-1".into(),
        };
        inbox
            .create(NewInboxRecord::processing(&key, b"{}".to_vec()))
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&calls), || Ok(()));

        let outcome = machine.process("polls", &handler, &envelope(id)).unwrap();
        assert_eq!(outcome, ProcessOutcome::Duplicate);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sentinel_is_retried_to_exhaustion() {
        let (machine, inbox) = machine(fast_policy());
        let id = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&calls), || Err(HandlerError::Timeout));

        let outcome = machine.process("polls", &handler, &envelope(id)).unwrap();

        assert_eq!(outcome, ProcessOutcome::GivenUp);
        // max_retries = 2 → invoked max_retries + 1 times.
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let history = inbox.history(&id.to_string(), "polls").unwrap();
        let statuses: Vec<InboxStatus> = history.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                InboxStatus::Processing,
                InboxStatus::Retrying,
                InboxStatus::Retrying,
                InboxStatus::Failed,
            ]
        );
        assert_eq!(history[3].retry_count, 3);
        assert!(history[3].metadata.as_deref().unwrap().contains("timeout"));
        assert!(history[1].wait_duration.is_some());
    }

    #[test]
    fn non_sentinel_error_short_circuits_on_first_attempt() {
        let (machine, inbox) = machine(fast_policy());
        let id = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&calls), || {
            Err(HandlerError::Rejected("poll is closed".into()))
        });

        let outcome = machine.process("polls", &handler, &envelope(id)).unwrap();

        assert_eq!(outcome, ProcessOutcome::GivenUp);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let history = inbox.history(&id.to_string(), "polls").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, InboxStatus::Failed);
        assert_eq!(history[1].retry_count, 1);
        assert!(history[1].metadata.as_deref().unwrap().contains("poll is closed"));
    }

    #[test]
    fn header_violation_writes_no_rows_and_never_invokes_the_handler() {
        let (machine, inbox) = machine(fast_policy());
        let id = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&calls), || Ok(()));

        let mut bad = envelope(id);
        bad.headers.remove("ts");

        let err = machine.process("polls", &handler, &bad).unwrap_err();
        assert!(matches!(err, ConsumeError::Header(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(inbox.history(&id.to_string(), "polls").unwrap().is_empty());
    }

    #[test]
    fn cancellation_interrupts_the_backoff() {
        let inbox = InboxStore::new(Store::in_memory().unwrap());
        inbox.checkup().unwrap();
        let cancel = CancelToken::new();
        let slow = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(10),
            scale_factor: 1,
            max_delay: Duration::from_secs(10),
        };
        let machine = Machine::new(inbox, slow, cancel.clone());

        let handler: HandlerFn = Box::new(|_, _| Err(HandlerError::Timeout));
        cancel.cancel();

        let err = machine
            .process("polls", &handler, &envelope(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, ConsumeError::Cancelled));
    }
}
