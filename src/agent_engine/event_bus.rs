use tokio::sync::broadcast;

use crate::agent_engine::state::AgentEvent;

/// Fan-out of run progress to any number of observers. Publishing never
/// blocks and succeeds with no subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
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

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        bus.publish(AgentEvent::RunStarted { run_id: "lost".into(), task: "t".into() });

        let mut rx = bus.subscribe();
        bus.publish(AgentEvent::IterationStarted { run_id: "r".into(), iteration: 1 });
        match rx.recv().await.unwrap() {
            AgentEvent::IterationStarted { iteration, .. } => assert_eq!(iteration, 1),
            other => panic!("unexpected {other:?}"),
        }
    }
}
