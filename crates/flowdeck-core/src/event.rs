use crate::types::EditorEvent;

/// Event bus using tokio broadcast channel.
/// Every subscriber sees every editor event published after it subscribed.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EditorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EditorEvent) {
        // Nobody rendering is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EditorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
