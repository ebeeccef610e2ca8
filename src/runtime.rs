//! Session runtime.
//!
//! One spawned task owns the [`MatchSession`], its transport and its
//! [`Connection`]. Inbound deliveries and presentation intents are both
//! funnelled through that task, so every session mutation happens on a
//! single logical sequence. The presentation layer holds a [`SessionHandle`]
//! and a bounded receiver of [`SessionNotice`]s.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, SessionError, TransportError};
use crate::state::board::{Orientation, ShipId};
use crate::state::connection::Connection;
use crate::state::lifecycle::MatchPhase;
use crate::state::message::{Inbound, Outbound};
use crate::state::session::{MatchSession, SessionAction, SessionNotice, SessionSnapshot};
use crate::state::topic::Topic;
use crate::transport::{Delivery, MatchServer, PubSub};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Intents from the presentation layer.
enum Command {
    RequestStart(Reply<()>),
    SelectShip { ship_id: ShipId, reply: Reply<()> },
    ToggleOrientation(Reply<Orientation>),
    PlaceShip { row: usize, col: usize, reply: Reply<ShipId> },
    MarkReady(Reply<()>),
    Reconnect(Reply<()>),
    Exit(Reply<()>),
}

type StartOutcome = (Result<(), ServerError>, Reply<()>);

/// Spawns session actors.
pub struct SessionRuntime;

impl SessionRuntime {
    /// Spawn the actor for `session` and connect its transport.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use = "the notice receiver must be used to observe the session"]
    pub fn spawn<T, S>(
        session: MatchSession,
        transport: T,
        server: Arc<S>,
    ) -> (SessionHandle, mpsc::Receiver<SessionNotice>)
    where
        T: PubSub,
        S: MatchServer,
    {
        let config = session.config().clone();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::channel(config.notice_channel_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let actor = Actor {
            session,
            transport,
            server,
            connection: Connection::new(),
            snapshot_tx,
            notice_tx,
            starts: JoinSet::new(),
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        let handle = SessionHandle {
            cmd_tx,
            snapshot_rx,
            task: Some(task),
            shutdown_timeout: config.shutdown_timeout,
        };
        (handle, notice_rx)
    }
}

/// Handle to a running session.
///
/// Dropping the handle without calling [`exit`](Self::exit) aborts the actor
/// without announcing the departure.
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl SessionHandle {
    /// Issue the start command (host only). Resolves once the server answers.
    pub async fn request_start(&self) -> Result<(), SessionError> {
        self.call(Command::RequestStart).await
    }

    pub async fn select_ship(&self, ship_id: ShipId) -> Result<(), SessionError> {
        self.call(|reply| Command::SelectShip { ship_id, reply }).await
    }

    pub async fn toggle_orientation(&self) -> Result<Orientation, SessionError> {
        self.call(Command::ToggleOrientation).await
    }

    pub async fn place_ship(&self, row: usize, col: usize) -> Result<ShipId, SessionError> {
        self.call(|reply| Command::PlaceShip { row, col, reply }).await
    }

    /// Commit the local board and publish it to the opponent.
    pub async fn mark_ready(&self) -> Result<(), SessionError> {
        self.call(Command::MarkReady).await
    }

    /// Retry a failed connect, or re-subscribe missing topics.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.call(Command::Reconnect).await
    }

    /// Wait until both boards are exchanged.
    ///
    /// Resolves to [`SessionError::Aborted`] if the session aborts first.
    pub async fn wait_for_game(&self) -> Result<SessionSnapshot, SessionError> {
        let mut rx = self.snapshot_rx.clone();
        let snapshot = rx
            .wait_for(|s| s.phase == MatchPhase::InGame || s.phase.is_terminal())
            .await
            .map_err(|_| SessionError::Closed)?
            .clone();

        if snapshot.phase.is_terminal() {
            Err(SessionError::Aborted)
        } else {
            Ok(snapshot)
        }
    }

    /// Latest observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Leave the match: publish `leave`, release the transport, stop the actor.
    ///
    /// Waits up to the configured shutdown timeout, then aborts the task.
    pub async fn exit(&mut self) {
        debug!("session exit requested");

        let (reply, _ack) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Exit(reply));

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session task did not exit within timeout; aborting");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session task aborted: {join_err}");
                    }
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| SessionError::Cancelled)?
    }

    fn closed_error(&self) -> SessionError {
        if self.snapshot_rx.borrow().phase.is_terminal() {
            SessionError::Aborted
        } else {
            SessionError::Closed
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot_rx.borrow();
        f.debug_struct("SessionHandle")
            .field("lobby_code", &snapshot.lobby_code)
            .field("phase", &snapshot.phase)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        // No executor here to publish `leave`; the transport is dropped with
        // the task.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Actor<T, S> {
    session: MatchSession,
    transport: T,
    server: Arc<S>,
    connection: Connection,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notice_tx: mpsc::Sender<SessionNotice>,
    starts: JoinSet<StartOutcome>,
}

impl<T, S> Actor<T, S>
where
    T: PubSub,
    S: MatchServer,
{
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        debug!(lobby = %self.session.lobby_code(), "session task started");

        if let Err(err) = self.connect().await {
            debug!(lobby = %self.session.lobby_code(), error = %err, "initial connect failed");
        }

        loop {
            let connected = self.connection.status.is_connected();
            let has_starts = !self.starts.is_empty();

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => {
                        debug!(lobby = %self.session.lobby_code(), "handle dropped");
                        self.exit().await;
                        break;
                    }
                },

                Some(joined) = self.starts.join_next(), if has_starts => {
                    self.finish_start(joined);
                }

                incoming = self.transport.recv(), if connected => match incoming {
                    Some(Ok(delivery)) => self.deliver(delivery).await,
                    Some(Err(err)) => self.lost(err.to_string()).await,
                    None => self.lost(TransportError::Closed.to_string()).await,
                },
            }
        }

        debug!(lobby = %self.session.lobby_code(), "session task exited");
    }

    /// Returns true once the actor should stop.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::RequestStart(reply) => self.request_start(reply),
            Command::SelectShip { ship_id, reply } => {
                let _ = reply.send(self.session.select_ship(ship_id));
            }
            Command::ToggleOrientation(reply) => {
                let _ = reply.send(self.session.toggle_orientation());
            }
            Command::PlaceShip { row, col, reply } => {
                let _ = reply.send(self.session.place_ship(row, col));
            }
            Command::MarkReady(reply) => {
                let result = self.mark_ready().await;
                let _ = reply.send(result);
            }
            Command::Reconnect(reply) => {
                let result = self.reconnect().await;
                let _ = reply.send(result);
            }
            Command::Exit(reply) => {
                self.exit().await;
                let _ = reply.send(Ok(()));
                return true;
            }
        }
        self.publish_snapshot();
        false
    }

    fn request_start(&mut self, reply: Reply<()>) {
        let command = match self.session.start_command() {
            Ok(command) => command,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };

        info!(lobby = %command.lobby_code, "sending start command");
        let server = Arc::clone(&self.server);
        self.starts.spawn(async move {
            let result = server.start_match(command).await;
            (result, reply)
        });
    }

    fn finish_start(&mut self, joined: Result<StartOutcome, JoinError>) {
        match joined {
            Ok((Ok(()), reply)) => {
                debug!(lobby = %self.session.lobby_code(), "start command accepted");
                let _ = reply.send(Ok(()));
            }
            Ok((Err(err), reply)) => {
                warn!(lobby = %self.session.lobby_code(), error = %err, "start command failed");
                self.notify(SessionNotice::StartFailed {
                    reason: err.to_string(),
                    retryable: err.is_retryable(),
                });
                let _ = reply.send(Err(SessionError::StartFailed(err)));
            }
            Err(join_err) => {
                debug!(lobby = %self.session.lobby_code(), "start command task ended: {join_err}");
            }
        }
    }

    async fn mark_ready(&mut self) -> Result<(), SessionError> {
        if self.session.is_terminal() {
            return Err(SessionError::Aborted);
        }
        if !self.connection.status.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let actions = self.session.mark_ready()?;
        self.execute(actions).await;
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        self.connection.begin_attempt();
        match self.transport.connect().await {
            Ok(()) => {
                info!(
                    lobby = %self.session.lobby_code(),
                    attempt = self.connection.attempts,
                    "transport connected"
                );
                self.connection.connected();
                let actions = self.session.connect();
                self.execute(actions).await;
                Ok(())
            }
            Err(err) => {
                warn!(lobby = %self.session.lobby_code(), error = %err, "transport connect failed");
                self.connection.connect_failed(err.to_string());
                self.notify(SessionNotice::TransportError {
                    reason: err.to_string(),
                });
                self.publish_snapshot();
                Err(err.into())
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), SessionError> {
        if self.session.is_terminal() {
            return Err(SessionError::Aborted);
        }

        if self.connection.status.is_connected() {
            let required = self.session.subscriptions();
            let missing: Vec<Topic> = self.connection.missing(&required).into_iter().cloned().collect();
            for topic in missing {
                self.subscribe(topic).await;
            }
            return Ok(());
        }

        if !self.connection.status.is_retryable() {
            return Err(TransportError::Closed.into());
        }
        self.connect().await
    }

    async fn deliver(&mut self, delivery: Delivery) {
        self.connection.touch();

        let inbound = match Inbound::decode(&delivery.topic, &delivery.body) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(
                    lobby = %self.session.lobby_code(),
                    topic = %delivery.topic,
                    error = %err,
                    "dropping undecodable delivery"
                );
                return;
            }
        };

        let actions = self.session.apply(inbound);
        self.execute(actions).await;
    }

    async fn lost(&mut self, reason: String) {
        error!(lobby = %self.session.lobby_code(), %reason, "transport lost");
        self.connection.lost(reason.clone());
        self.notify(SessionNotice::TransportError { reason });
        let actions = self.session.transport_lost();
        self.execute(actions).await;
    }

    async fn exit(&mut self) {
        let actions = self.session.exit();
        self.execute(actions).await;
        if !self.connection.status.is_released() {
            self.release().await;
        }
        self.publish_snapshot();
    }

    /// Run actions in order. Observers never see a notice before the
    /// snapshot that explains it.
    async fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Subscribe(topic) => self.subscribe(topic).await,
                SessionAction::Publish { topic, message } => self.publish(&topic, &message).await,
                SessionAction::ReleaseAll => self.release().await,
                SessionAction::Notify(notice) => {
                    self.publish_snapshot();
                    self.notify(notice);
                }
            }
        }
        self.publish_snapshot();
    }

    async fn subscribe(&mut self, topic: Topic) {
        if !self.connection.status.is_connected() {
            debug!(lobby = %self.session.lobby_code(), %topic, "subscription deferred until connected");
            return;
        }
        if self.connection.is_subscribed(&topic) {
            return;
        }

        match self.transport.subscribe(&topic).await {
            Ok(()) => {
                debug!(lobby = %self.session.lobby_code(), %topic, "subscribed");
                self.connection.track(topic);
            }
            Err(err) => {
                warn!(lobby = %self.session.lobby_code(), %topic, error = %err, "subscribe failed");
                self.notify(SessionNotice::TransportError {
                    reason: err.to_string(),
                });
            }
        }
    }

    async fn publish(&mut self, topic: &Topic, message: &Outbound) {
        let body = match message.encode() {
            Ok(body) => body,
            Err(err) => {
                error!(%topic, error = %err, "failed to encode outbound message");
                return;
            }
        };

        match self.transport.publish(topic, body).await {
            Ok(()) => {
                debug!(lobby = %self.session.lobby_code(), %topic, "published");
                self.connection.record_publish();
            }
            Err(err) => {
                warn!(lobby = %self.session.lobby_code(), %topic, error = %err, "publish failed");
                self.notify(SessionNotice::TransportError {
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Unsubscribe everything, drop the connection and cancel pending waits.
    async fn release(&mut self) {
        self.starts.abort_all();

        for topic in self.connection.release_all() {
            if let Err(err) = self.transport.unsubscribe(&topic).await {
                debug!(%topic, error = %err, "unsubscribe failed during release");
            }
        }
        if let Err(err) = self.transport.disconnect().await {
            debug!(error = %err, "disconnect failed during release");
        }
        info!(
            lobby = %self.session.lobby_code(),
            published = self.connection.published,
            "transport released"
        );
    }

    /// Never blocks the actor. A notice that finds the channel full is
    /// dropped; the snapshot published before it carries the same state.
    fn notify(&mut self, notice: SessionNotice) {
        match self.notice_tx.try_send(notice) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("notice channel full, dropping {:?}", dropped);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("notice receiver dropped");
            }
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = self.session.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
