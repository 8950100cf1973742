use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{EventId, Record};

const CHANNEL_CAPACITY: usize = 256;

/// Per-event broadcast of committed ledger changes. Seat pickers subscribe to
/// refresh as seats are taken and released.
pub struct NotifyHub {
    channels: DashMap<EventId, broadcast::Sender<Record>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to an event's changes. Creates the channel if needed.
    pub fn subscribe(&self, event_id: &str) -> broadcast::Receiver<Record> {
        let sender = self
            .channels
            .entry(event_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, event_id: &str, record: &Record) {
        if let Some(sender) = self.channels.get(event_id) {
            let _ = sender.send(record.clone());
        }
    }

    /// Drop the channel, e.g. when the event is withdrawn. Subscribers see the
    /// stream close.
    pub fn remove(&self, event_id: &str) {
        self.channels.remove(event_id);
    }
}
