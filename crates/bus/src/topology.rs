/// Broker topology: one durable direct exchange, an input queue for
/// creation events, and an output queue for dispatch events.
#[derive(Debug, Clone)]
pub struct BusTopology {
    /// Direct exchange name.
    pub exchange: String,
    /// Queue for reminder-creation events.
    pub input_queue: String,
    /// Queue for dispatch events.
    pub output_queue: String,
    /// Routing key bound to the input queue.
    pub input_routing_key: String,
    /// Routing key bound to the output queue.
    pub output_routing_key: String,
    /// Per-consumer prefetch (parallel in-flight deliveries).
    pub prefetch: u16,
}

impl Default for BusTopology {
    fn default() -> Self {
        Self {
            exchange: "reminders".into(),
            input_queue: "reminders.ingest".into(),
            output_queue: "reminders.dispatch".into(),
            input_routing_key: "reminders.ingest".into(),
            output_routing_key: "reminders.dispatch".into(),
            prefetch: 4,
        }
    }
}

impl BusTopology {
    /// The queue a routing key delivers to, or `None` for unbound keys.
    #[must_use]
    pub fn queue_for(&self, routing_key: &str) -> Option<&str> {
        if routing_key == self.input_routing_key {
            Some(&self.input_queue)
        } else if routing_key == self.output_routing_key {
            Some(&self.output_queue)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topology_routes_both_queues() {
        let topology = BusTopology::default();
        assert_eq!(
            topology.queue_for("reminders.ingest"),
            Some("reminders.ingest")
        );
        assert_eq!(
            topology.queue_for("reminders.dispatch"),
            Some("reminders.dispatch")
        );
        assert_eq!(topology.queue_for("unbound"), None);
    }
}
