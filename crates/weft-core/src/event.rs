use crate::types::WorkflowEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events. Push-only: late subscribers do not
/// see events emitted before they attached.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionId;

    #[tokio::test]
    async fn test_publish_subscribe_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(WorkflowEvent::RunStarted {
            execution_id: ExecutionId::new(),
        });
        bus.publish(WorkflowEvent::NodeStarted {
            node_id: "parse".into(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkflowEvent::RunStarted { .. }
        ));
        match rx.recv().await.unwrap() {
            WorkflowEvent::NodeStarted { node_id } => assert_eq!(node_id, "parse"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::default();
        bus.publish(WorkflowEvent::NodeStarted {
            node_id: "early".into(),
        });

        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::NodeStarted {
            node_id: "late".into(),
        });

        match rx.recv().await.unwrap() {
            WorkflowEvent::NodeStarted { node_id } => assert_eq!(node_id, "late"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
