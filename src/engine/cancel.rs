use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Cancellation fan-out for in-flight generations, keyed by generation id.
///
/// Dropping a stream already releases its connection; the registry exists for
/// the explicit paths — aborting from the UI, or a new generation replacing
/// the one still running.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    senders: Arc<Mutex<HashMap<String, broadcast::Sender<()>>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a generation and returns the receiver its stream selects
    /// on. Re-registering an id cancels the previous holder.
    pub fn register(&self, id: &str) -> broadcast::Receiver<()> {
        let (tx, rx) = broadcast::channel(1);
        if let Some(prev) = self.senders.lock().unwrap().insert(id.to_string(), tx) {
            let _ = prev.send(());
        }
        rx
    }

    pub fn cancel(&self, id: &str) -> bool {
        if let Some(tx) = self.senders.lock().unwrap().remove(id) {
            let _ = tx.send(());
            return true;
        }
        false
    }

    pub fn remove(&self, id: &str) {
        self.senders.lock().unwrap().remove(id);
    }
}
