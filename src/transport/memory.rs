//! In-process broker and match server.
//!
//! [`MemoryBroker`] fans published messages out to every client subscribed
//! to the exact topic, in publish order. It can refuse connects and sever
//! clients to exercise the failure paths. [`MemoryMatchServer`] plays the
//! server side of the start and join commands on top of a broker.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Delivery, MatchServer, PubSub};
use crate::error::{ServerError, TransportError};
use crate::state::lobby::{JoinCommand, Lobby, StartCommand};
use crate::state::message::StartBroadcast;
use crate::state::topic::Topic;

/// Broker-assigned client id.
pub type ClientId = u64;

#[derive(Debug)]
struct ClientEntry {
    tx: mpsc::UnboundedSender<Delivery>,
    topics: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_client: ClientId,
    clients: HashMap<ClientId, ClientEntry>,
    refuse_connects: usize,
    fail_subscribes: usize,
    log: Vec<Delivery>,
}

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an unconnected client transport.
    pub fn client(&self) -> MemoryTransport {
        let id = {
            let mut state = self.lock();
            state.next_client += 1;
            state.next_client
        };
        MemoryTransport {
            id,
            broker: self.clone(),
            rx: None,
        }
    }

    /// Publish from outside any client (server side).
    pub fn publish(&self, topic: &Topic, body: impl Into<String>) -> usize {
        self.publish_raw(&topic.to_string(), body.into())
    }

    /// Publish on an arbitrary topic string.
    pub fn publish_raw(&self, topic: &str, body: String) -> usize {
        let mut state = self.lock();
        let delivery = Delivery::new(topic, body);
        let mut delivered = 0;
        for entry in state.clients.values() {
            if entry.topics.contains(topic) && entry.tx.send(delivery.clone()).is_ok() {
                delivered += 1;
            }
        }
        state.log.push(delivery);
        debug!(topic, delivered, "broker publish");
        delivered
    }

    /// Refuse the next `count` connect attempts.
    pub fn refuse_connects(&self, count: usize) {
        self.lock().refuse_connects = count;
    }

    /// Fail the next `count` subscribe calls from any client.
    pub fn fail_subscribes(&self, count: usize) {
        self.lock().fail_subscribes = count;
    }

    /// Drop a client's connection as if the network failed.
    pub fn sever(&self, client: ClientId) -> bool {
        self.lock().clients.remove(&client).is_some()
    }

    /// Number of connected clients subscribed to a topic.
    pub fn subscribers(&self, topic: &Topic) -> usize {
        let key = topic.to_string();
        self.lock()
            .clients
            .values()
            .filter(|c| c.topics.contains(&key))
            .count()
    }

    pub fn connected_clients(&self) -> usize {
        self.lock().clients.len()
    }

    /// Every message published so far, in order.
    pub fn published(&self) -> Vec<Delivery> {
        self.lock().log.clone()
    }

    /// Messages published on one topic, in order.
    pub fn published_on(&self, topic: &Topic) -> Vec<Delivery> {
        let key = topic.to_string();
        self.lock()
            .log
            .iter()
            .filter(|d| d.topic == key)
            .cloned()
            .collect()
    }
}

/// Client side of the in-memory broker.
#[derive(Debug)]
pub struct MemoryTransport {
    id: ClientId,
    broker: MemoryBroker,
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl MemoryTransport {
    pub fn id(&self) -> ClientId {
        self.id
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.rx.is_some() && self.broker.lock().clients.contains_key(&self.id) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl PubSub for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(TransportError::Connect("broker refused connection".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.clients.insert(
            self.id,
            ClientEntry {
                tx,
                topics: BTreeSet::new(),
            },
        );
        drop(state);
        self.rx = Some(rx);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &Topic) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        if state.fail_subscribes > 0 {
            state.fail_subscribes -= 1;
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "broker rejected subscription".into(),
            });
        }
        match state.clients.get_mut(&self.id) {
            Some(entry) if self.rx.is_some() => {
                entry.topics.insert(topic.to_string());
                Ok(())
            }
            _ => Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "not connected".into(),
            }),
        }
    }

    async fn unsubscribe(&mut self, topic: &Topic) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        let entry = state
            .clients
            .get_mut(&self.id)
            .ok_or(TransportError::NotConnected)?;
        entry.topics.remove(&topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &Topic, body: String) -> Result<(), TransportError> {
        self.ensure_connected().map_err(|e| TransportError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        self.broker.publish(topic, body);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Delivery, TransportError>> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await.map(Ok),
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.rx = None;
        self.broker.sever(self.id);
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.broker.sever(self.id);
    }
}

#[derive(Debug, Default)]
struct ServerState {
    lobbies: HashMap<String, Lobby>,
    users: HashMap<String, String>,
    failures: VecDeque<ServerError>,
    start_calls: usize,
}

/// In-memory match server publishing through a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryMatchServer {
    broker: MemoryBroker,
    inner: Arc<Mutex<ServerState>>,
}

impl MemoryMatchServer {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            inner: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a lobby (normally done by the lobby service).
    pub fn register_lobby(&self, lobby: Lobby) {
        let mut state = self.lock();
        state
            .users
            .insert(lobby.host_id.clone(), lobby.host_name.clone());
        if let (Some(id), Some(name)) = (&lobby.joiner_id, &lobby.joiner_name) {
            state.users.insert(id.clone(), name.clone());
        }
        state.lobbies.insert(lobby.lobby_code.clone(), lobby);
    }

    /// Register a user's display name so they can join.
    pub fn register_user(&self, id: impl Into<String>, name: impl Into<String>) {
        self.lock().users.insert(id.into(), name.into());
    }

    pub fn lobby(&self, lobby_code: &str) -> Option<Lobby> {
        self.lock().lobbies.get(lobby_code).cloned()
    }

    /// Fail the next start or join command with `error`.
    pub fn fail_next(&self, error: ServerError) {
        self.lock().failures.push_back(error);
    }

    pub fn start_calls(&self) -> usize {
        self.lock().start_calls
    }
}

#[async_trait]
impl MatchServer for MemoryMatchServer {
    async fn start_match(&self, command: StartCommand) -> Result<(), ServerError> {
        let broadcast = {
            let mut state = self.lock();
            state.start_calls += 1;
            if let Some(error) = state.failures.pop_front() {
                return Err(error);
            }

            let lobby = state
                .lobbies
                .get(&command.lobby_code)
                .ok_or_else(|| ServerError::Rejected(format!("unknown lobby {}", command.lobby_code)))?;
            if !lobby.is_host(&command.host_id) {
                return Err(ServerError::Rejected("only the host may start".into()));
            }
            let (Some(joiner_id), Some(joiner_name)) = (&lobby.joiner_id, &lobby.joiner_name) else {
                return Err(ServerError::Rejected("lobby has no joiner".into()));
            };

            StartBroadcast {
                player1_id: lobby.host_id.clone(),
                player1_name: lobby.host_name.clone(),
                player2_id: joiner_id.clone(),
                player2_name: joiner_name.clone(),
            }
        };

        let body = serde_json::to_string(&broadcast).map_err(|e| ServerError::Unavailable(e.to_string()))?;
        self.broker.publish(&Topic::start(&command.lobby_code), body);
        Ok(())
    }

    async fn join_lobby(&self, command: JoinCommand) -> Result<(), ServerError> {
        let mut state = self.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        let name = state
            .users
            .get(&command.joiner_id)
            .cloned()
            .ok_or_else(|| ServerError::Rejected(format!("unknown user {}", command.joiner_id)))?;
        let lobby = state
            .lobbies
            .get_mut(&command.lobby_code)
            .ok_or_else(|| ServerError::Rejected(format!("unknown lobby {}", command.lobby_code)))?;

        if lobby.is_host(&command.joiner_id) {
            return Err(ServerError::Rejected("host cannot join own lobby".into()));
        }
        let taken = matches!(&lobby.joiner_id, Some(existing) if *existing != command.joiner_id);
        if taken {
            return Err(ServerError::Rejected("lobby is full".into()));
        }

        lobby.joiner_id = Some(command.joiner_id);
        lobby.joiner_name = Some(name);
        Ok(())
    }
}
