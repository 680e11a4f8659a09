//! Handler registration and per-partition worker threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::broker::PartitionedSubscriber;
use crate::inbox::InboxStore;
use crate::retry::{CancelToken, RetryPolicy};
use crate::store::Store;

use super::error::{ConsumeError, HandlerError};
use super::machine::{HandlerFn, Machine, ProcessOutcome};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Statistics from one partition worker.
#[derive(Debug, Default, Clone)]
pub struct WorkerStats {
    pub topic: String,
    pub partition: usize,
    /// Deliveries handled to success.
    pub handled: usize,
    /// Redeliveries skipped by the inbox guard.
    pub duplicates: usize,
    /// Deliveries permanently given up on.
    pub given_up: usize,
    /// Envelopes dropped for violating the header contract.
    pub rejected: usize,
    /// Deliveries left unacked because bookkeeping failed.
    pub infra_failures: usize,
    /// Empty poll cycles.
    pub polls: usize,
}

/// Aggregated statistics from all workers of a stopped consumer.
#[derive(Debug, Default, Clone)]
pub struct ConsumerStats {
    pub workers: Vec<WorkerStats>,
}

impl ConsumerStats {
    pub fn handled(&self) -> usize {
        self.workers.iter().map(|w| w.handled).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.workers.iter().map(|w| w.duplicates).sum()
    }

    pub fn given_up(&self) -> usize {
        self.workers.iter().map(|w| w.given_up).sum()
    }

    pub fn rejected(&self) -> usize {
        self.workers.iter().map(|w| w.rejected).sum()
    }
}

struct Registration {
    name: String,
    topic: String,
    handler: Arc<HandlerFn>,
}

/// The idempotent consumer: registered handlers plus the worker scheduling
/// that drives the retry state machine.
///
/// One worker thread per (topic, partition) processes messages sequentially
/// for that partition. There is no intra-partition parallelism, which is
/// what makes the per-key dedup check race-free within a consumer instance.
///
/// ## Example
///
/// ```ignore
/// let consumer = Consumer::new(broker.clone(), store.clone(), "poll-service")
///     .with_retry_policy(RetryPolicy::default())
///     .add_handler("on_vote", "votes", |ctx, payload| {
///         let vote: VoteCast = serde_json::from_slice(payload)?;
///         // ... business logic ...
///         Ok(())
///     });
///
/// let handle = consumer.start();
/// // ...
/// let stats = handle.stop();
/// ```
pub struct Consumer<S> {
    subscriber: S,
    inbox: InboxStore,
    retry: RetryPolicy,
    group: String,
    poll_interval: Duration,
    registrations: Vec<Registration>,
}

impl<S> Consumer<S>
where
    S: PartitionedSubscriber + Clone + 'static,
{
    /// Construct a consumer for the given broker subscription and store,
    /// running the inbox schema checkup.
    ///
    /// # Panics
    ///
    /// Panics when the checkup fails: the messaging core refuses to start
    /// against an incompatible store.
    pub fn new(subscriber: S, store: Store, group: impl Into<String>) -> Self {
        let inbox = InboxStore::new(store);
        if let Err(err) = inbox.checkup() {
            panic!("inbox schema checkup failed: {err}");
        }
        Consumer {
            subscriber,
            inbox,
            retry: RetryPolicy::default(),
            group: group.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            registrations: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Register a handler for a topic. One handler per topic; `name` labels
    /// the registration in logs.
    pub fn add_handler<F>(mut self, name: &str, topic: &str, handler: F) -> Self
    where
        F: Fn(&crate::context::MessageContext, &[u8]) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.registrations.push(Registration {
            name: name.to_string(),
            topic: topic.to_string(),
            handler: Arc::new(Box::new(handler)),
        });
        self
    }

    /// Spawn one worker per (topic, partition) and return a handle for
    /// stopping them.
    pub fn start(self) -> ConsumerHandle {
        let cancel = CancelToken::new();
        let mut workers = Vec::new();

        for registration in &self.registrations {
            let partitions = self.subscriber.partition_count(&registration.topic);
            for partition in 0..partitions {
                let worker = Worker {
                    subscriber: self.subscriber.clone(),
                    machine: Machine::new(self.inbox.clone(), self.retry, cancel.clone()),
                    name: registration.name.clone(),
                    topic: registration.topic.clone(),
                    handler: Arc::clone(&registration.handler),
                    group: self.group.clone(),
                    partition,
                    poll_interval: self.poll_interval,
                    cancel: cancel.clone(),
                };
                workers.push(thread::spawn(move || worker.run()));
            }
        }

        ConsumerHandle { cancel, workers }
    }
}

struct Worker<S> {
    subscriber: S,
    machine: Machine,
    name: String,
    topic: String,
    handler: Arc<HandlerFn>,
    group: String,
    partition: usize,
    poll_interval: Duration,
    cancel: CancelToken,
}

impl<S: PartitionedSubscriber> Worker<S> {
    fn run(self) -> WorkerStats {
        log::debug!(
            "handler {} listening on {}[{}]",
            self.name,
            self.topic,
            self.partition
        );
        let mut stats = WorkerStats {
            topic: self.topic.clone(),
            partition: self.partition,
            ..WorkerStats::default()
        };
        let poll_ms = self.poll_interval.as_millis() as u64;

        while !self.cancel.is_cancelled() {
            match self
                .subscriber
                .poll(&self.topic, self.partition, &self.group, poll_ms)
            {
                Ok(Some(envelope)) => {
                    match self.machine.process(&self.topic, &self.handler, &envelope) {
                        Ok(outcome) => {
                            self.ack();
                            match outcome {
                                ProcessOutcome::Handled => stats.handled += 1,
                                ProcessOutcome::Duplicate => stats.duplicates += 1,
                                ProcessOutcome::GivenUp => stats.given_up += 1,
                            }
                        }
                        Err(ConsumeError::Header(err)) => {
                            // Unprocessable: a malformed envelope can never
                            // succeed, so ack it away instead of stalling
                            // the partition.
                            log::error!(
                                "dropping unprocessable envelope on {}[{}]: {}",
                                self.topic,
                                self.partition,
                                err
                            );
                            self.ack();
                            stats.rejected += 1;
                        }
                        Err(ConsumeError::Cancelled) => break,
                        Err(err) => {
                            // Bookkeeping could not be guaranteed: no ack,
                            // let the broker redeliver.
                            log::error!(
                                "leaving delivery unacked on {}[{}]: {}",
                                self.topic,
                                self.partition,
                                err
                            );
                            let _ = self.subscriber.nack(
                                &self.topic,
                                self.partition,
                                &self.group,
                                &err.to_string(),
                            );
                            stats.infra_failures += 1;
                            if self.cancel.wait_timeout(self.poll_interval) {
                                break;
                            }
                        }
                    }
                }
                Ok(None) => stats.polls += 1,
                Err(err) => {
                    log::warn!("poll failed on {}[{}]: {}", self.topic, self.partition, err);
                    if self.cancel.wait_timeout(self.poll_interval) {
                        break;
                    }
                }
            }
        }

        stats
    }

    fn ack(&self) {
        if let Err(err) = self.subscriber.ack(&self.topic, self.partition, &self.group) {
            log::warn!("ack failed on {}[{}]: {}", self.topic, self.partition, err);
        }
    }
}

/// Handle to a running consumer's workers.
pub struct ConsumerHandle {
    cancel: CancelToken,
    workers: Vec<JoinHandle<WorkerStats>>,
}

impl ConsumerHandle {
    /// Cancel all workers, interrupting any mid-backoff wait, and collect
    /// their statistics.
    pub fn stop(self) -> ConsumerStats {
        self.cancel.cancel();
        let workers = self
            .workers
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect();
        ConsumerStats { workers }
    }

    /// Signal all workers to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
