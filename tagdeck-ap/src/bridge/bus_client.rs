//! Message-bus client
//!
//! Drives the broker connection through a [`BusTransport`], decodes incoming
//! command messages into actions for the player and forwards state notices
//! as publishes.
//!
//! Connection states: `Disconnected -> Connecting` on a rate-limited retry,
//! `Connecting -> Connected` when the broker acknowledges (resubscribe and
//! publish the full state), back to `Disconnected` on any error. Publishing is
//! a no-op unless connected.

use super::bus::{decode_message, CommandTopic, StateTopic, Topics};
use crate::config::BusConfig;
use crate::peripherals::{Indication, Peripherals};
use crate::playback::player::PlayerHandle;
use crate::state::{Notice, SharedState};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Spacing of signal-strength publishes
pub const RSSI_INTERVAL: Duration = Duration::from_secs(60);

/// Housekeeping period of the client loop
const TICK: Duration = Duration::from_secs(1);

/// Broker address and credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEndpoint {
    pub client_id: String,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl From<&BusConfig> for BusEndpoint {
    fn from(config: &BusConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            server: config.server.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

impl BusEndpoint {
    pub fn uri(&self) -> String {
        format!("mqtt://{}:{}", self.server, self.port)
    }
}

/// What the transport reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

/// Broker client seam
///
/// Calls never block: a connection attempt reports its outcome later as a
/// [`TransportEvent`].
pub trait BusTransport: Send + 'static {
    /// Start connecting; false when the attempt could not even be started
    fn connect(&mut self, endpoint: &BusEndpoint) -> bool;
    fn subscribe(&mut self, topic: &str) -> bool;
    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> bool;
    fn disconnect(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct BusClient<T: BusTransport> {
    transport: T,
    events: mpsc::Receiver<TransportEvent>,
    topics: Topics,
    endpoint: BusEndpoint,
    retry_interval: Duration,
    state: ConnectionState,
    last_attempt: Option<Instant>,
    last_rssi: Option<Instant>,
    player: PlayerHandle,
    peripherals: Peripherals,
    notices: broadcast::Receiver<Notice>,
}

impl<T: BusTransport> BusClient<T> {
    pub fn new(
        transport: T,
        events: mpsc::Receiver<TransportEvent>,
        config: &BusConfig,
        player: PlayerHandle,
        peripherals: Peripherals,
        shared: &SharedState,
    ) -> Self {
        Self {
            transport,
            events,
            topics: Topics::new(config.topic_prefix.clone()),
            endpoint: BusEndpoint::from(config),
            retry_interval: Duration::from_secs(config.retry_interval_secs),
            state: ConnectionState::Disconnected,
            last_attempt: None,
            last_rssi: None,
            player,
            peripherals,
            notices: shared.subscribe(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publish if connected; returns whether the transport accepted it
    pub fn publish(&mut self, topic: StateTopic, payload: &str) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        let full = self.topics.state(topic);
        let sent = self.transport.publish(&full, payload, false);
        if !sent {
            debug!("Publish to {} failed", full);
        }
        sent
    }

    /// Connect when disconnected and the retry interval has passed
    pub fn reconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.retry_interval {
                return;
            }
        }
        self.last_attempt = Some(Instant::now());

        info!("Connecting to message bus at {}", self.endpoint.uri());
        if self.transport.connect(&self.endpoint) {
            self.state = ConnectionState::Connecting;
        } else {
            error!("Connection attempt to {} failed", self.endpoint.uri());
        }
    }

    fn publish_rssi(&mut self) {
        let due = self
            .last_rssi
            .map(|t| t.elapsed() >= RSSI_INTERVAL)
            .unwrap_or(true);
        if due && self.state == ConnectionState::Connected {
            self.last_rssi = Some(Instant::now());
            let rssi = self.peripherals.network.rssi().to_string();
            self.publish(StateTopic::WifiRssi, &rssi);
        }
    }

    /// Periodic work: reconnect and signal strength
    pub fn tick(&mut self) {
        self.reconnect();
        self.publish_rssi();
    }

    fn on_connected(&mut self) {
        info!("Message bus connected");
        self.state = ConnectionState::Connected;
        for topic in CommandTopic::ALL {
            let full = self.topics.command(topic);
            if !self.transport.subscribe(&full) {
                warn!("Subscribing to {} failed", full);
            }
        }
        self.publish_full_state();
    }

    /// Everything a fresh subscriber needs to know
    pub fn publish_full_state(&mut self) {
        let snapshot = self.player.snapshot();
        let indicator = self.peripherals.indicator.clone();
        let network = self.peripherals.network.clone();

        let locked = if snapshot.controls_locked { "ON" } else { "OFF" };
        let messages = [
            (StateTopic::State, "Online".to_string()),
            (StateTopic::Track, snapshot.title.clone()),
            (StateTopic::CoverChanged, String::new()),
            (StateTopic::Loudness, snapshot.volume.to_string()),
            (StateTopic::SleepTimer, snapshot.sleep_timer_minutes.to_string()),
            (StateTopic::LockControls, locked.to_string()),
            (StateTopic::Playmode, snapshot.play_mode.code().to_string()),
            (StateTopic::LedBrightness, indicator.brightness().to_string()),
            (StateTopic::IPv4, network.ip_address()),
            (StateTopic::RepeatMode, snapshot.repeat_mode.to_string()),
            (
                StateTopic::SoftwareRevision,
                env!("CARGO_PKG_VERSION").to_string(),
            ),
        ];
        for (topic, payload) in messages {
            self.publish(topic, &payload);
        }
    }

    /// Decode and forward one incoming message
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) {
        // Some brokers send empty retained messages; never act on them
        if payload.is_empty() {
            return;
        }
        let payload = String::from_utf8_lossy(payload);
        info!("Bus message on {} ({} bytes): {}", topic, payload.len(), payload);

        match decode_message(&self.topics, topic, &payload) {
            Ok(Some(action)) => {
                if let Err(e) = self.player.send(action) {
                    error!("Could not forward bus command: {}", e);
                }
            }
            Ok(None) => debug!("Payload '{}' on {} ignored", payload, topic),
            Err(e) => {
                error!("{}", e);
                self.peripherals.indicator.indicate(Indication::Error);
            }
        }
    }

    pub fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected => {
                if self.state != ConnectionState::Disconnected {
                    warn!("Message bus disconnected");
                }
                self.state = ConnectionState::Disconnected;
            }
            TransportEvent::Message { topic, payload } => {
                if self.state == ConnectionState::Connected {
                    self.on_message(&topic, &payload);
                }
            }
        }
    }

    /// Say goodbye and drop the connection
    pub fn shutdown(&mut self) {
        info!("Shutting down message bus client");
        self.publish(StateTopic::State, "Offline");
        self.publish(StateTopic::Track, "---");
        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
    }

    /// Run until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                Some(event) = self.events.recv() => self.on_event(event),
                notice = self.notices.recv() => match notice {
                    Ok(Notice::Bus { topic, payload }) => {
                        self.publish(topic, &payload);
                    }
                    Ok(Notice::Client { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Bus client lagged, {} notices lost", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown();
    }
}

/// Messages seen by a [`LoopbackTransport`]
#[derive(Debug, Default)]
struct LoopbackLog {
    subscriptions: Vec<String>,
    published: Vec<(String, String)>,
    accept: bool,
}

/// In-process transport: no broker, everything stays in memory
///
/// The paired [`LoopbackBroker`] plays the broker's side.
pub struct LoopbackTransport {
    events: mpsc::Sender<TransportEvent>,
    log: Arc<Mutex<LoopbackLog>>,
}

/// Broker side of a [`LoopbackTransport`]
#[derive(Clone)]
pub struct LoopbackBroker {
    events: mpsc::Sender<TransportEvent>,
    log: Arc<Mutex<LoopbackLog>>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, LoopbackBroker, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let log = Arc::new(Mutex::new(LoopbackLog {
            accept: true,
            ..LoopbackLog::default()
        }));
        let transport = Self {
            events: tx.clone(),
            log: log.clone(),
        };
        (transport, LoopbackBroker { events: tx, log }, rx)
    }
}

impl BusTransport for LoopbackTransport {
    fn connect(&mut self, endpoint: &BusEndpoint) -> bool {
        let accept = self.log.lock().map(|l| l.accept).unwrap_or(false);
        debug!("Loopback connect as {}", endpoint.client_id);
        let event = if accept {
            TransportEvent::Connected
        } else {
            TransportEvent::Disconnected
        };
        self.events.try_send(event).is_ok()
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        match self.log.lock() {
            Ok(mut log) => {
                log.subscriptions.push(topic.to_string());
                true
            }
            Err(_) => false,
        }
    }

    fn publish(&mut self, topic: &str, payload: &str, _retained: bool) -> bool {
        match self.log.lock() {
            Ok(mut log) => {
                log.published.push((topic.to_string(), payload.to_string()));
                true
            }
            Err(_) => false,
        }
    }

    fn disconnect(&mut self) {
        let _ = self.events.try_send(TransportEvent::Disconnected);
    }
}

impl LoopbackBroker {
    /// Whether connection attempts succeed
    pub fn set_accept(&self, accept: bool) {
        if let Ok(mut log) = self.log.lock() {
            log.accept = accept;
        }
    }

    /// Deliver a message as if another client published it
    pub fn inject(&self, topic: &str, payload: &str) -> bool {
        self.events
            .try_send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.as_bytes().to_vec(),
            })
            .is_ok()
    }

    /// Drop the connection from the broker side
    pub fn drop_connection(&self) -> bool {
        self.events.try_send(TransportEvent::Disconnected).is_ok()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|l| l.subscriptions.clone())
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.log
            .lock()
            .map(|l| l.published.clone())
            .unwrap_or_default()
    }

    /// Payloads published on `topic`
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p)
            .collect()
    }
}
