use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{info, warn};

use crate::error::BusError;
use crate::topology::BusTopology;
use crate::{Delivery, DeliveryStream, MessageBus};

/// Persistent delivery mode per the AMQP spec.
const PERSISTENT: u8 = 2;

/// RabbitMQ-backed [`MessageBus`].
///
/// Declares the durable direct exchange, both durable queues, and their
/// bindings at connect time, so workers and the API can start in any
/// order. Publishes are persistent; consumers use manual acknowledgement
/// with the configured prefetch.
pub struct RabbitBus {
    channel: Channel,
    topology: BusTopology,
}

impl RabbitBus {
    /// Connect to the broker and declare the topology.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connection`] if the connection or any
    /// declaration fails.
    pub async fn connect(url: &str, topology: BusTopology) -> Result<Self, BusError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        for (queue, routing_key) in [
            (&topology.input_queue, &topology.input_routing_key),
            (&topology.output_queue, &topology.output_routing_key),
        ] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Connection(e.to_string()))?;
            channel
                .queue_bind(
                    queue,
                    &topology.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Connection(e.to_string()))?;
        }

        channel
            .basic_qos(topology.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(
            exchange = %topology.exchange,
            input_queue = %topology.input_queue,
            output_queue = %topology.output_queue,
            "broker topology declared"
        );

        Ok(Self { channel, topology })
    }
}

#[async_trait]
impl MessageBus for RabbitBus {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), BusError> {
        self.channel
            .basic_publish(
                &self.topology.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BusError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(e.to_string()))?;

        let stream = consumer.filter_map(|delivery| async move {
            match delivery {
                Ok(delivery) => Some(Delivery::amqp(delivery.data, delivery.acker)),
                Err(e) => {
                    warn!(error = %e, "dropping broken delivery");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
