use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::topology::BusTopology;
use crate::{Delivery, DeliveryStream, MessageBus};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>;

struct Queue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: SharedReceiver,
}

/// In-process [`MessageBus`] for tests and single-process development mode.
///
/// Each queue is an unbounded channel; multiple consumers of the same queue
/// share one receiver, so a message is delivered to exactly one of them.
/// Acknowledgement is a no-op (nothing is redelivered).
pub struct MemoryBus {
    topology: BusTopology,
    queues: Mutex<HashMap<String, Queue>>,
}

impl MemoryBus {
    /// Create a bus with both topology queues pre-declared.
    #[must_use]
    pub fn new(topology: BusTopology) -> Self {
        let mut queues = HashMap::new();
        for name in [&topology.input_queue, &topology.output_queue] {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.insert(
                name.clone(),
                Queue {
                    tx,
                    rx: Arc::new(tokio::sync::Mutex::new(rx)),
                },
            );
        }
        Self {
            topology,
            queues: Mutex::new(queues),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(BusTopology::default())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), BusError> {
        let queue_name = self
            .topology
            .queue_for(routing_key)
            .ok_or_else(|| BusError::UnknownQueue(routing_key.to_owned()))?
            .to_owned();

        let queues = self
            .queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let queue = queues
            .get(&queue_name)
            .ok_or_else(|| BusError::UnknownQueue(queue_name.clone()))?;
        queue
            .tx
            .send(payload.to_vec())
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BusError> {
        let rx = {
            let queues = self
                .queues
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            queues
                .get(queue)
                .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?
                .rx
                .clone()
        };

        let stream = futures::stream::unfold(rx, |rx| async move {
            let payload = rx.lock().await.recv().await?;
            Some((Delivery::ephemeral(payload), rx))
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_consume_roundtrip() {
        let bus = MemoryBus::default();
        bus.publish("reminders.ingest", b"one").await.unwrap();
        bus.publish("reminders.ingest", b"two").await.unwrap();

        let mut stream = bus.consume("reminders.ingest").await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.payload(), b"one");
        first.ack().await.unwrap();

        let second = stream.next().await.unwrap();
        assert_eq!(second.payload(), b"two");
        second.reject(true).await.unwrap();
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let bus = MemoryBus::default();
        bus.publish("reminders.dispatch", b"out").await.unwrap();

        let mut output = bus.consume("reminders.dispatch").await.unwrap();
        assert_eq!(output.next().await.unwrap().payload(), b"out");
    }

    #[tokio::test]
    async fn unknown_routing_key_is_rejected() {
        let bus = MemoryBus::default();
        let err = bus.publish("nope", b"x").await.unwrap_err();
        assert!(matches!(err, BusError::UnknownQueue(_)));
    }

    #[tokio::test]
    async fn competing_consumers_share_the_queue() {
        let bus = MemoryBus::default();
        bus.publish("reminders.ingest", b"only").await.unwrap();

        let mut a = bus.consume("reminders.ingest").await.unwrap();
        let _b = bus.consume("reminders.ingest").await.unwrap();

        // The single message goes to whichever consumer polls first.
        let got = a.next().await.unwrap();
        assert_eq!(got.payload(), b"only");
    }
}
