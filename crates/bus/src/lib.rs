//! Message bus transports for the reminders service.
//!
//! [`MessageBus`] abstracts the durable work queues between the API, the
//! scheduler, and the workers: creation events flow through the input
//! queue, dispatch events through the output queue. The RabbitMQ transport
//! ([`RabbitBus`]) is the production backend; [`MemoryBus`] backs tests and
//! single-process development mode.
//!
//! Delivery is at-least-once: consumers acknowledge only after their work
//! is safely persisted ([`Delivery::ack`]), and redelivery is made safe by
//! `external_id` deduplication downstream.

pub mod error;
pub mod memory;
pub mod rabbit;
pub mod topology;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use error::BusError;
pub use memory::MemoryBus;
pub use rabbit::RabbitBus;
pub use topology::BusTopology;

/// A stream of in-flight deliveries from one queue.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Publish/consume interface over the broker.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload with the given routing key, durably.
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Consume a queue. Each [`Delivery`] must be explicitly acknowledged
    /// (late-ack) or rejected for redelivery.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BusError>;
}

enum DeliveryAcker {
    /// In-process delivery; acknowledgement is a no-op.
    Noop,
    Amqp(lapin::acker::Acker),
}

/// One message pulled from a queue, holding its acknowledgement handle.
pub struct Delivery {
    payload: Vec<u8>,
    acker: DeliveryAcker,
}

impl Delivery {
    /// An in-process delivery with no-op acknowledgement.
    #[must_use]
    pub fn ephemeral(payload: Vec<u8>) -> Self {
        Self {
            payload,
            acker: DeliveryAcker::Noop,
        }
    }

    pub(crate) fn amqp(payload: Vec<u8>, acker: lapin::acker::Acker) -> Self {
        Self {
            payload,
            acker: DeliveryAcker::Amqp(acker),
        }
    }

    /// The raw message bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the message. Call only after the work it triggered is
    /// safely persisted.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Consume`] if the broker rejects the ack.
    pub async fn ack(self) -> Result<(), BusError> {
        match self.acker {
            DeliveryAcker::Noop => Ok(()),
            DeliveryAcker::Amqp(acker) => acker
                .ack(lapin::options::BasicAckOptions::default())
                .await
                .map_err(|e| BusError::Consume(e.to_string())),
        }
    }

    /// Reject the message, optionally requeueing it for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Consume`] if the broker rejects the nack.
    pub async fn reject(self, requeue: bool) -> Result<(), BusError> {
        match self.acker {
            DeliveryAcker::Noop => Ok(()),
            DeliveryAcker::Amqp(acker) => acker
                .nack(lapin::options::BasicNackOptions {
                    requeue,
                    ..Default::default()
                })
                .await
                .map_err(|e| BusError::Consume(e.to_string())),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}
