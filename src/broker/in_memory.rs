//! In-memory partitioned broker for testing and single-process deployments.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::{BrokerPublisher, Envelope, PartitionedSubscriber, PublishError};

/// Thread-safe in-memory broker with partitioned topics, per-group cursors,
/// and at-least-once semantics.
///
/// Topics are created on first publish. Each partition is an append-only
/// log; each consumer group tracks one cursor per partition. An envelope
/// polled but not acked is delivered again on the next poll.
///
/// ## Example
///
/// ```
/// use outboxed_rust::broker::{BrokerPublisher, Envelope, InMemoryBroker, PartitionedSubscriber};
///
/// let broker = InMemoryBroker::new(4);
/// broker.publish("polls", "p-1", Envelope::with_string_payload("{}")).unwrap();
///
/// for partition in 0..broker.partition_count("polls") {
///     if let Some(envelope) = broker.poll("polls", partition, "workers", 10).unwrap() {
///         assert_eq!(envelope.payload_str(), Some("{}"));
///         broker.ack("polls", partition, "workers").unwrap();
///     }
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    topics: Arc<RwLock<HashMap<String, Topic>>>,
    partitions: usize,
}

struct Topic {
    partitions: Vec<Arc<Partition>>,
}

impl Topic {
    fn new(count: usize) -> Self {
        Topic {
            partitions: (0..count).map(|_| Arc::new(Partition::default())).collect(),
        }
    }
}

#[derive(Default)]
struct Partition {
    log: RwLock<Vec<Envelope>>,
    cursors: Mutex<HashMap<String, Cursor>>,
}

#[derive(Default, Clone, Copy)]
struct Cursor {
    next: usize,
    inflight: bool,
}

impl InMemoryBroker {
    /// Create a broker with the given number of partitions per topic.
    pub fn new(partitions: usize) -> Self {
        InMemoryBroker {
            topics: Arc::new(RwLock::new(HashMap::new())),
            partitions: partitions.max(1),
        }
    }

    fn partition(&self, topic: &str, partition: usize) -> Option<Arc<Partition>> {
        let topics = self.topics.read().unwrap();
        topics
            .get(topic)
            .and_then(|t| t.partitions.get(partition))
            .cloned()
    }

    /// Total number of envelopes published to a topic across partitions.
    pub fn topic_len(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap();
        topics
            .get(topic)
            .map(|t| {
                t.partitions
                    .iter()
                    .map(|p| p.log.read().unwrap().len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// All envelopes published to one partition, in order.
    pub fn partition_log(&self, topic: &str, partition: usize) -> Vec<Envelope> {
        self.partition(topic, partition)
            .map(|p| p.log.read().unwrap().clone())
            .unwrap_or_default()
    }

    /// Committed cursor of a group on one partition: the number of envelopes
    /// it has acked.
    pub fn group_position(&self, topic: &str, partition: usize, group: &str) -> usize {
        self.partition(topic, partition)
            .map(|p| {
                p.cursors
                    .lock()
                    .unwrap()
                    .get(group)
                    .map(|cursor| cursor.next)
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

fn partition_for(key: &str, count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % count as u64) as usize
}

impl BrokerPublisher for InMemoryBroker {
    fn publish(&self, topic: &str, key: &str, envelope: Envelope) -> Result<(), PublishError> {
        let partition = {
            let mut topics = self.topics.write().unwrap();
            let topic_state = topics
                .entry(topic.to_string())
                .or_insert_with(|| Topic::new(self.partitions));
            Arc::clone(&topic_state.partitions[partition_for(key, self.partitions)])
        };

        partition.log.write().unwrap().push(envelope);
        Ok(())
    }
}

impl PartitionedSubscriber for InMemoryBroker {
    fn partition_count(&self, _topic: &str) -> usize {
        self.partitions
    }

    fn poll(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
        timeout_ms: u64,
    ) -> Result<Option<Envelope>, PublishError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            if let Some(state) = self.partition(topic, partition) {
                let log = state.log.read().unwrap();
                let mut cursors = state.cursors.lock().unwrap();
                let cursor = cursors.entry(group.to_string()).or_default();

                if cursor.next < log.len() {
                    cursor.inflight = true;
                    return Ok(Some(log[cursor.next].clone()));
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&self, topic: &str, partition: usize, group: &str) -> Result<(), PublishError> {
        if let Some(state) = self.partition(topic, partition) {
            let mut cursors = state.cursors.lock().unwrap();
            let cursor = cursors.entry(group.to_string()).or_default();
            if cursor.inflight {
                cursor.next += 1;
                cursor.inflight = false;
            }
        }
        Ok(())
    }

    fn nack(
        &self,
        topic: &str,
        partition: usize,
        group: &str,
        reason: &str,
    ) -> Result<(), PublishError> {
        log::debug!("nack on {}[{}] for group {}: {}", topic, partition, group, reason);
        if let Some(state) = self.partition(topic, partition) {
            let mut cursors = state.cursors.lock().unwrap();
            let cursor = cursors.entry(group.to_string()).or_default();
            cursor.inflight = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(broker: &InMemoryBroker, topic: &str, group: &str) -> Vec<Envelope> {
        let mut collected = Vec::new();
        for partition in 0..broker.partition_count(topic) {
            while let Some(envelope) = broker.poll(topic, partition, group, 5).unwrap() {
                broker.ack(topic, partition, group).unwrap();
                collected.push(envelope);
            }
        }
        collected
    }

    #[test]
    fn publish_and_poll() {
        let broker = InMemoryBroker::new(2);
        broker
            .publish("polls", "p-1", Envelope::with_string_payload("{}"))
            .unwrap();

        let collected = drain(&broker, "polls", "g");
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn poll_timeout_when_empty() {
        let broker = InMemoryBroker::new(1);
        assert!(broker.poll("polls", 0, "g", 5).unwrap().is_none());
    }

    #[test]
    fn same_key_lands_on_one_partition_in_order() {
        let broker = InMemoryBroker::new(8);
        for n in 0..10 {
            broker
                .publish("polls", "p-1", Envelope::with_string_payload(n.to_string()))
                .unwrap();
        }

        let occupied: Vec<usize> = (0..8)
            .filter(|&p| !broker.partition_log("polls", p).is_empty())
            .collect();
        assert_eq!(occupied.len(), 1);

        let log = broker.partition_log("polls", occupied[0]);
        let payloads: Vec<&str> = log.iter().filter_map(Envelope::payload_str).collect();
        assert_eq!(payloads, vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
    }

    #[test]
    fn unacked_envelope_is_redelivered() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish("polls", "p-1", Envelope::with_string_payload("once"))
            .unwrap();

        let first = broker.poll("polls", 0, "g", 5).unwrap().unwrap();
        // No ack: the broker must hand the same envelope out again.
        let second = broker.poll("polls", 0, "g", 5).unwrap().unwrap();
        assert_eq!(first.payload_str(), second.payload_str());

        broker.ack("polls", 0, "g").unwrap();
        assert!(broker.poll("polls", 0, "g", 5).unwrap().is_none());
    }

    #[test]
    fn nack_leaves_envelope_for_redelivery() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish("polls", "p-1", Envelope::with_string_payload("again"))
            .unwrap();

        broker.poll("polls", 0, "g", 5).unwrap().unwrap();
        broker.nack("polls", 0, "g", "bookkeeping failed").unwrap();

        let redelivered = broker.poll("polls", 0, "g", 5).unwrap().unwrap();
        assert_eq!(redelivered.payload_str(), Some("again"));
    }

    #[test]
    fn groups_track_independent_cursors() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish("polls", "p-1", Envelope::with_string_payload("{}"))
            .unwrap();

        assert_eq!(drain(&broker, "polls", "g1").len(), 1);
        assert_eq!(drain(&broker, "polls", "g2").len(), 1);
        assert_eq!(drain(&broker, "polls", "g1").len(), 0);
    }
}
