//! Connection state.
//!
//! Tracks the publish/subscribe connection a session exclusively owns and
//! the set of topics it is subscribed to. Releasing the connection hands
//! back every topic so the runtime can unsubscribe them before dropping the
//! transport.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use super::topic::Topic;

/// Transport connection status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Not yet connected
    #[default]
    Disconnected,

    /// Connected and able to publish
    Connected,

    /// A connect attempt failed; may be retried
    Failed { reason: String },

    /// An established connection dropped
    Lost { reason: String },

    /// Torn down by the session; never reused
    Released,
}

impl ConnectionStatus {
    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connect attempt is allowed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed { .. })
    }

    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }
}

/// Connection owned by one session.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    /// Current status
    pub status: ConnectionStatus,

    /// Topics currently subscribed
    subscriptions: BTreeSet<Topic>,

    /// When the current connection was established
    connected_at: Option<Instant>,

    /// Last inbound delivery or outbound publish
    last_activity: Option<Instant>,

    /// Messages published over this connection
    pub published: u64,

    /// Connect attempts, including the first
    pub attempts: u32,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connect attempt.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Mark as connected.
    pub fn connected(&mut self) {
        let now = Instant::now();
        self.status = ConnectionStatus::Connected;
        self.connected_at = Some(now);
        self.last_activity = Some(now);
    }

    /// Mark a connect attempt as failed. Subscriptions are not kept.
    pub fn connect_failed(&mut self, reason: impl Into<String>) {
        self.status = ConnectionStatus::Failed {
            reason: reason.into(),
        };
        self.subscriptions.clear();
    }

    /// Mark an established connection as dropped.
    pub fn lost(&mut self, reason: impl Into<String>) {
        self.status = ConnectionStatus::Lost {
            reason: reason.into(),
        };
        self.subscriptions.clear();
    }

    /// Record a subscription. Returns false if already subscribed.
    pub fn track(&mut self, topic: Topic) -> bool {
        self.subscriptions.insert(topic)
    }

    /// Forget a subscription. Returns false if it was not tracked.
    pub fn untrack(&mut self, topic: &Topic) -> bool {
        self.subscriptions.remove(topic)
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.subscriptions.contains(topic)
    }

    /// Subscribed topics in stable order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Topic> {
        self.subscriptions.iter()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Topics in `required` that are not yet subscribed.
    pub fn missing<'a>(&self, required: &'a [Topic]) -> Vec<&'a Topic> {
        required
            .iter()
            .filter(|t| !self.subscriptions.contains(*t))
            .collect()
    }

    /// Record activity (delivery or publish).
    pub fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
    }

    /// Record a publish.
    pub fn record_publish(&mut self) {
        self.published += 1;
        self.touch();
    }

    /// Time since the last delivery or publish.
    pub fn idle_time(&self) -> Option<Duration> {
        self.last_activity.map(|t| t.elapsed())
    }

    /// Time since the connection was established.
    pub fn uptime(&self) -> Option<Duration> {
        match self.status {
            ConnectionStatus::Connected => self.connected_at.map(|t| t.elapsed()),
            _ => None,
        }
    }

    /// Release the connection, returning every topic to unsubscribe.
    ///
    /// Idempotent: a second call returns nothing.
    pub fn release_all(&mut self) -> Vec<Topic> {
        self.status = ConnectionStatus::Released;
        self.connected_at = None;
        std::mem::take(&mut self.subscriptions).into_iter().collect()
    }
}
