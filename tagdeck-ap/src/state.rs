//! Shared notification fan-out
//!
//! The player never talks to the websocket hub or the bus client directly.
//! It emits [`Notice`]s on a broadcast channel; each egress subscribes and
//! renders what concerns it.

use crate::bridge::bus::StateTopic;
use tagdeck_common::StateCategory;
use tokio::sync::broadcast;

/// Websocket client identifier; [`ALL_CLIENTS`] addresses everyone
pub type ClientId = u32;

pub const ALL_CLIENTS: ClientId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Render `category` and push it to real-time clients
    Client { target: ClientId, category: StateCategory },
    /// Publish `payload` on a message-bus state topic
    Bus { topic: StateTopic, payload: String },
}

/// State shared by every component
pub struct SharedState {
    notice_tx: broadcast::Sender<Notice>,
}

impl SharedState {
    pub fn new() -> Self {
        let (notice_tx, _) = broadcast::channel(256);
        Self { notice_tx }
    }

    /// Emit a notice; having no listener is fine
    pub fn notify(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }

    pub fn notify_clients(&self, target: ClientId, category: StateCategory) {
        self.notify(Notice::Client { target, category });
    }

    pub fn publish(&self, topic: StateTopic, payload: impl Into<String>) {
        self.notify(Notice::Bus {
            topic,
            payload: payload.into(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Payloads published on `topic` so far
#[cfg(test)]
pub(crate) fn bus_payloads(rx: &mut broadcast::Receiver<Notice>, topic: StateTopic) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        if let Notice::Bus { topic: t, payload } = notice {
            if t == topic {
                payloads.push(payload);
            }
        }
    }
    payloads
}
