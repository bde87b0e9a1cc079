//! Real-time websocket clients
//!
//! [`ClientHub`] keeps one bounded outgoing queue per connected socket. State
//! notices are rendered once and pushed to the addressed clients; a full queue
//! drops the message instead of closing the connection.

use super::remote::RemoteInterpreter;
use super::render::{encode, render, RenderError, RenderInput};
use crate::peripherals::NetworkInfo;
use crate::playback::player::PlayerHandle;
use crate::settings::SettingsStore;
use crate::state::{ClientId, Notice, ALL_CLIENTS};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tagdeck_common::StateCategory;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Outgoing messages buffered per client
pub const CLIENT_QUEUE_DEPTH: usize = 16;

/// Interval of the closed-client sweep
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub struct ClientHub {
    clients: Mutex<HashMap<ClientId, mpsc::Sender<String>>>,
    next_id: AtomicU32,
    player: PlayerHandle,
    settings: SettingsStore,
    network: Arc<dyn NetworkInfo>,
}

impl ClientHub {
    pub fn new(player: PlayerHandle, settings: SettingsStore, network: Arc<dyn NetworkInfo>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            player,
            settings,
            network,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, mpsc::Sender<String>>> {
        // A poisoned map is still a usable map
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a client; the receiver yields everything addressed to it
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        self.lock().insert(id, tx);
        debug!("ws[{}] connect", id);
        (id, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        if self.lock().remove(&id).is_some() {
            debug!("ws[{}] disconnect", id);
        }
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Drop clients whose socket task has gone away
    pub fn sweep(&self) -> usize {
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|_, tx| !tx.is_closed());
        let removed = before - clients.len();
        if removed > 0 {
            debug!("Swept {} closed websocket clients", removed);
        }
        removed
    }

    /// Queue `text` for `target` ([`ALL_CLIENTS`] for everyone)
    pub fn send_text(&self, target: ClientId, text: &str) {
        let mut clients = self.lock();
        let mut closed = Vec::new();
        for (id, tx) in clients.iter() {
            if target != ALL_CLIENTS && *id != target {
                continue;
            }
            match tx.try_send(text.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("ws[{}] queue full, message dropped", id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            clients.remove(&id);
        }
    }

    /// Rendered text for `category`
    pub async fn render_state(&self, category: StateCategory) -> Result<String, RenderError> {
        let snapshot = self.player.snapshot();
        let settings = match category {
            StateCategory::Settings => self.settings.to_json(None, &snapshot).await,
            StateCategory::Ssids => self.settings.to_json(Some("ssids"), &snapshot).await,
            _ => Ok(serde_json::Value::Null),
        };
        let settings = match settings {
            Ok(serde_json::Value::Null) => None,
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!("Settings unavailable for rendering: {}", e);
                None
            }
        };
        let input = RenderInput {
            snapshot: &snapshot,
            rssi: self.network.rssi(),
            settings,
        };
        encode(&render(category, &input))
    }

    /// Render `category` and push it to `target`
    pub async fn send_state(&self, target: ClientId, category: StateCategory) {
        if self.count() == 0 {
            return;
        }
        match self.render_state(category).await {
            Ok(text) => self.send_text(target, &text),
            Err(e) => error!("Not sending {:?}: {}", category, e),
        }
    }

    /// Forward client notices until the notice channel closes
    pub async fn run_notices(self: Arc<Self>, mut notices: broadcast::Receiver<Notice>) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                notice = notices.recv() => match notice {
                    Ok(Notice::Client { target, category }) => self.send_state(target, category).await,
                    Ok(Notice::Bus { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Websocket hub lagged, {} notices skipped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = sweep.tick() => {
                    self.sweep();
                }
            }
        }
        info!("Websocket notice forwarding stopped");
    }
}

/// Serve one upgraded websocket until either side closes it
pub async fn serve_socket(socket: WebSocket, hub: Arc<ClientHub>, interpreter: Arc<RemoteInterpreter>) {
    let (id, outgoing) = hub.register();
    let (mut sink, mut incoming) = socket.split();

    let mut writer = tokio::spawn(async move {
        let mut frames =
            ReceiverStream::new(outgoing).map(|text| Ok::<_, axum::Error>(Message::Text(text)));
        if let Err(e) = sink.send_all(&mut frames).await {
            debug!("ws[{}] send failed: {}", id, e);
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if interpreter.process(&text).await {
                        hub.send_state(id, StateCategory::Ok).await;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("ws[{}] ignoring {} byte binary frame", id, data.len());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("ws[{}] error: {}", id, e);
                    break;
                }
            }
        }
    }

    hub.unregister(id);
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::action::PlayerSettings;
    use crate::peripherals::{HostPeripherals, Peripherals};
    use crate::playback::engine::SimulatedEngine;
    use crate::playback::player::Player;
    use crate::playback::playlist::PlaylistBuilder;
    use crate::state::SharedState;
    use crate::tags::TagStore;
    use tagdeck_common::db::init_memory_database;

    async fn hub() -> Arc<ClientHub> {
        let pool = init_memory_database().await.unwrap();
        let host = Arc::new(HostPeripherals::default());
        let (_player, handle) = Player::new(
            Box::new(SimulatedEngine::new("/tmp")),
            PlaylistBuilder::new("/tmp"),
            TagStore::new(pool.clone(), "/tmp/tagdeck-ws-backup.txt"),
            Peripherals::host(host.clone()),
            Arc::new(SharedState::new()),
            PlayerSettings::default(),
            Duration::from_millis(100),
        );
        Arc::new(ClientHub::new(handle, SettingsStore::new(pool, host.clone()), host))
    }

    #[tokio::test]
    async fn test_targeted_and_broadcast_delivery() {
        let hub = hub().await;
        let (a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        hub.send_state(a, StateCategory::Ok).await;
        hub.send_state(ALL_CLIENTS, StateCategory::Volume).await;

        assert_eq!(rx_a.recv().await.unwrap(), r#"{"status":"ok"}"#);
        assert_eq!(rx_a.recv().await.unwrap(), r#"{"volume":3}"#);
        assert_eq!(rx_b.recv().await.unwrap(), r#"{"volume":3}"#);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_disconnect() {
        let hub = hub().await;
        let (id, mut rx) = hub.register();
        for _ in 0..CLIENT_QUEUE_DEPTH + 5 {
            hub.send_text(id, "x");
        }
        assert_eq!(hub.count(), 1);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, CLIENT_QUEUE_DEPTH);
    }

    #[tokio::test]
    async fn test_sweep_removes_closed_clients() {
        let hub = hub().await;
        let (_a, rx_a) = hub.register();
        let (_b, _rx_b) = hub.register();
        drop(rx_a);
        assert_eq!(hub.sweep(), 1);
        assert_eq!(hub.count(), 1);
    }

    #[tokio::test]
    async fn test_settings_rendering() {
        let hub = hub().await;
        let text = hub.render_state(StateCategory::Ssids).await.unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(doc["settings"]["ssids"]["savedSSIDs"].is_array());
    }
}
