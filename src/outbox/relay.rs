//! Background worker that tails the outbox table and publishes to a broker.
//!
//! The relay is the only bridge between the store and the broker: the writer
//! never publishes, and the relay never writes. A failed publish leaves the
//! cursor in place so the record is retried on the next cycle, giving
//! at-least-once publication.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, UNIX_EPOCH};

use crate::broker::{BrokerPublisher, Envelope};
use crate::store::Store;

use super::record::OutboxRecord;
use super::store::OutboxStore;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_BATCH_SIZE: usize = 32;

/// Statistics from a relay worker.
#[derive(Debug, Default, Clone)]
pub struct RelayStats {
    pub published: usize,
    pub errors: usize,
    pub polls: usize,
}

/// Tails `outbox_messages` by rowid and publishes each record as an
/// [`Envelope`] to `topic = aggregate_type`, partition-keyed by aggregate id.
pub struct OutboxRelay<P> {
    outbox: OutboxStore,
    publisher: P,
    poll_interval: Duration,
    batch_size: usize,
}

impl<P: BrokerPublisher + 'static> OutboxRelay<P> {
    /// Construct the relay and run the outbox schema checkup.
    ///
    /// # Panics
    ///
    /// Panics when the checkup fails; the relay refuses to start against an
    /// incompatible store.
    pub fn new(store: Store, publisher: P) -> Self {
        let outbox = OutboxStore::new(store);
        if let Err(err) = outbox.checkup() {
            panic!("outbox schema checkup failed: {err}");
        }
        OutboxRelay {
            outbox,
            publisher,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set how long the relay sleeps between scans.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maximum number of records fetched per scan.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Spawn the relay thread.
    pub fn spawn(self) -> RelayHandle {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = RelayStats::default();
            let mut cursor = 0i64;

            loop {
                match stop_rx.recv_timeout(self.poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }

                stats.polls += 1;

                let batch = match self.outbox.fetch_after(cursor, self.batch_size) {
                    Ok(batch) => batch,
                    Err(err) => {
                        log::warn!("outbox scan failed: {}", err);
                        stats.errors += 1;
                        continue;
                    }
                };

                for (rowid, record) in batch {
                    let envelope = envelope_for(&record);
                    match self.publisher.publish(
                        &record.aggregate_type,
                        &record.aggregate_id,
                        envelope,
                    ) {
                        Ok(()) => {
                            cursor = rowid;
                            stats.published += 1;
                        }
                        Err(err) => {
                            log::warn!(
                                "publish of outbox record {} failed, will retry: {}",
                                record.id,
                                err
                            );
                            stats.errors += 1;
                            break;
                        }
                    }
                }
            }

            stats
        });

        RelayHandle {
            stop_tx,
            handle: Some(handle),
        }
    }
}

fn envelope_for(record: &OutboxRecord) -> Envelope {
    let ts = record
        .created_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Envelope::new(record.payload.clone().into_bytes())
        .with_header("id", &record.id)
        .with_header("tid", &record.trace_id)
        .with_header("cid", &record.aggregate_id)
        .with_header("type", record.event_type.as_str())
        .with_header("name", &record.name)
        .with_header("ts", ts.to_string())
}

/// Handle to a running relay thread.
pub struct RelayHandle {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<RelayStats>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to finish.
    pub fn stop(mut self) -> RelayStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            RelayStats::default()
        }
    }

    /// Signal the relay to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
