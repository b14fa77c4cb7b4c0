//! The task that owns all session state.
//!
//! ```text
//!   handles ──Command──►┐
//!                       │     ┌──────────────┐
//!   transport ─(epoch,  ├────►│ SessionActor │──► transport writes
//!     TransportEvent)──►┤     └──────────────┘
//!                       │        │        │
//!   timers ────────────►┘   status (watch)  listeners
//! ```
//!
//! Timers are plain deadlines polled by the same `select!`, so a timer
//! firing, a command and a socket event can never interleave mid-transition.

use std::sync::Arc;
use std::time::Duration;

use homelink_shared::{classify, stamp_id, ClientMessage, Inbound, MessageId, ResultMessage};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use url::Url;

use super::Command;
use crate::config::SessionConfig;
use crate::credentials::Credentials;
use crate::error::{Result, SessionError};
use crate::ws::connection::{AuthState, ConnectionState, SessionStatus};
use crate::ws::correlation::{CorrelationTable, PendingRequest, Responder};
use crate::ws::listeners::ListenerRegistry;
use crate::ws::outbound::{OutboundQueue, QueuedFrame};
use crate::ws::transport::{DisconnectReason, Epoch, Transport, TransportEvent, TransportSink};

pub(super) struct SessionActor<T: Transport> {
    transport: T,
    credentials: Credentials,
    url: Url,
    config: SessionConfig,

    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    listeners: Arc<ListenerRegistry>,

    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: TransportSink,
    events_rx: mpsc::UnboundedReceiver<(Epoch, TransportEvent)>,

    pending: CorrelationTable,
    outbound: OutboundQueue,
    last_id: MessageId,
    /// Bumped on every connect and every teardown; events carrying an older
    /// epoch belong to a socket we already gave up on.
    epoch: Epoch,

    should_reconnect: bool,
    is_attempting_reconnect: bool,
    idle_disconnected: bool,
    /// The hub rejected the token. Survives teardown; only an explicit
    /// `connect()` clears it.
    auth_rejected: bool,
    subscription: Option<MessageId>,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,

    reconnect_at: Option<Instant>,
    next_ping_at: Option<Instant>,
    pong_deadline: Option<Instant>,
    idle_deadline: Option<Instant>,
}

impl<T: Transport> SessionActor<T> {
    pub(super) fn new(
        transport: T,
        credentials: Credentials,
        url: Url,
        config: SessionConfig,
        status_tx: watch::Sender<SessionStatus>,
        listeners: Arc<ListenerRegistry>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outbound = OutboundQueue::new(config.outbound_queue_capacity);
        Self {
            transport,
            credentials,
            url,
            config,
            status: SessionStatus::default(),
            status_tx,
            listeners,
            commands,
            events_tx,
            events_rx,
            pending: CorrelationTable::default(),
            outbound,
            last_id: 0,
            epoch: 0,
            should_reconnect: false,
            is_attempting_reconnect: false,
            idle_disconnected: false,
            auth_rejected: false,
            subscription: None,
            connect_waiters: Vec::new(),
            reconnect_at: None,
            next_ping_at: None,
            pong_deadline: None,
            idle_deadline: None,
        }
    }

    pub(super) async fn run(mut self) {
        tracing::debug!("Session task started for {}", self.url);
        loop {
            let request_deadline = self.pending.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        // Every handle is gone.
                        self.shutdown();
                        break;
                    }
                },
                Some((epoch, event)) = self.events_rx.recv() => self.handle_transport_event(epoch, event),
                _ = sleep_until(self.reconnect_at) => self.fire_reconnect(),
                _ = sleep_until(self.next_ping_at) => self.send_heartbeat(),
                _ = sleep_until(self.pong_deadline) => self.heartbeat_expired(),
                _ = sleep_until(self.idle_deadline) => self.idle_expired(),
                _ = sleep_until(request_deadline) => self.expire_requests(),
            }
        }
        tracing::debug!("Session task stopped");
    }

    /// Returns `false` once the task should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { done } => self.connect(done),
            Command::Disconnect { done } => {
                self.disconnect();
                let _ = done.send(());
            }
            Command::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
                return false;
            }
            Command::Send { frame, ack } => {
                let _ = ack.send(self.send(frame));
            }
            Command::Request {
                frame,
                timeout,
                reply,
            } => self.request(frame, timeout, reply),
        }
        true
    }

    // ----- lifecycle -----

    fn connect(&mut self, done: oneshot::Sender<Result<()>>) {
        match self.status.connection {
            ConnectionState::Connected if self.status.auth == AuthState::Authenticated => {
                let _ = done.send(Ok(()));
            }
            ConnectionState::Connected if self.auth_rejected => {
                let _ = done.send(Err(self.auth_error()));
            }
            ConnectionState::Connected | ConnectionState::Connecting => {
                self.connect_waiters.push(done);
            }
            ConnectionState::Disconnected if self.is_attempting_reconnect => {
                // Join the scheduled attempt; backoff and ceiling still apply.
                self.connect_waiters.push(done);
            }
            ConnectionState::Disconnected => {
                self.connect_waiters.push(done);
                self.should_reconnect = true;
                self.auth_rejected = false;
                self.idle_disconnected = false;
                self.cancel_reconnect();
                self.status.reconnect_attempt = 0;
                self.status.unreachable = false;
                self.start_connect();
            }
        }
    }

    fn start_connect(&mut self) {
        self.epoch += 1;
        self.status.connection = ConnectionState::Connecting;
        self.status.auth = AuthState::NotAuthenticated;
        self.publish();

        tracing::info!("Connecting to {} (epoch {})", self.url, self.epoch);
        self.transport
            .connect(&self.url, self.epoch, self.events_tx.clone());
    }

    fn disconnect(&mut self) {
        tracing::info!("Disconnect requested");
        self.should_reconnect = false;
        self.idle_disconnected = false;
        self.cancel_reconnect();
        if self.status.connection != ConnectionState::Disconnected {
            self.transport.disconnect();
        }
        self.teardown(Some(SessionError::ConnectionLost));
        self.fail_connect_waiters(SessionError::ConnectionLost);
    }

    fn shutdown(&mut self) {
        tracing::info!("Session shutting down");
        self.should_reconnect = false;
        self.cancel_reconnect();
        if self.status.connection != ConnectionState::Disconnected {
            self.transport.disconnect();
        }
        self.teardown(Some(SessionError::Closed));
        self.fail_connect_waiters(SessionError::Closed);
    }

    /// Forget the current socket. In-flight requests fail with
    /// `ConnectionLost`; queued ones survive unless `queued_error` is given.
    fn teardown(&mut self, queued_error: Option<SessionError>) {
        self.epoch += 1;
        self.status.connection = ConnectionState::Disconnected;
        self.status.auth = AuthState::NotAuthenticated;
        self.subscription = None;
        self.next_ping_at = None;
        self.pong_deadline = None;
        self.idle_deadline = None;

        let lost = self.pending.drain_sent();
        if !lost.is_empty() {
            tracing::warn!("Failing {} in-flight requests: connection lost", lost.len());
        }
        for request in lost {
            request.complete(Err(SessionError::ConnectionLost));
        }

        if let Some(error) = queued_error {
            self.outbound.clear();
            for request in self.pending.drain_all() {
                request.complete(Err(error.clone()));
            }
        }
        self.publish();
    }

    // ----- transport events -----

    fn handle_transport_event(&mut self, epoch: Epoch, event: TransportEvent) {
        if epoch != self.epoch {
            tracing::trace!("Ignoring {:?} from stale connection {}", event, epoch);
            return;
        }

        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected(reason) => self.on_disconnected(reason),
            TransportEvent::Text(text) => {
                self.note_traffic();
                self.handle_text(&text);
            }
            TransportEvent::Binary(data) => {
                self.note_traffic();
                tracing::debug!("Ignoring {} byte binary frame", data.len());
            }
            TransportEvent::Ping => self.note_traffic(),
            TransportEvent::Pong => {
                tracing::trace!("Pong received");
                self.note_traffic();
            }
            TransportEvent::Error(message) => tracing::warn!("WebSocket error: {}", message),
        }
    }

    fn on_connected(&mut self) {
        if !self.status.connection.is_connecting() {
            tracing::warn!(
                "Unexpected connected event while {:?}",
                self.status.connection
            );
            return;
        }

        tracing::info!("WebSocket connected to {}, waiting for auth_required", self.url);
        self.status.connection = ConnectionState::Connected;
        self.status.auth = AuthState::NotAuthenticated;
        self.schedule_ping();
        self.publish();
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        if self.status.connection == ConnectionState::Disconnected {
            tracing::debug!("Ignoring duplicate disconnect: {}", reason);
            return;
        }

        tracing::info!("WebSocket disconnected: {}", reason);
        self.teardown(None);
        if self.should_reconnect {
            self.schedule_reconnect();
        } else if self.auth_rejected {
            let error = self.auth_error();
            self.fail_connect_waiters(error);
        } else {
            self.fail_connect_waiters(SessionError::ConnectionLost);
        }
    }

    fn handle_text(&mut self, text: &str) {
        let inbound = match classify(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                return;
            }
        };

        match inbound {
            Inbound::AuthRequired { ha_version } => self.on_auth_required(ha_version),
            Inbound::AuthOk { ha_version } => self.on_auth_ok(ha_version),
            Inbound::AuthInvalid { message } => self.on_auth_invalid(message),
            Inbound::Result(result) => self.on_result(result),
            Inbound::Event { id, event } => {
                let delivered = self.listeners.dispatch(&event);
                tracing::trace!(
                    "Event {} (subscription {}) delivered to {} listeners",
                    event.event_type,
                    id,
                    delivered
                );
            }
            Inbound::Unrecognized(kind) => tracing::debug!("Ignoring {} frame", kind),
        }
    }

    // ----- handshake -----

    fn on_auth_required(&mut self, ha_version: Option<String>) {
        if self.auth_rejected {
            tracing::warn!("Server asked for auth again after rejecting the token; not retrying");
            return;
        }
        if self.status.auth != AuthState::NotAuthenticated {
            tracing::debug!("Ignoring auth_required while {:?}", self.status.auth);
            return;
        }
        if let Some(version) = ha_version {
            tracing::info!("Hub version {}", version);
        }

        let frame = match ClientMessage::auth(self.credentials.access_token()).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Cannot encode auth message: {}", e);
                return;
            }
        };
        match self.transport.send_text(frame) {
            Ok(()) => {
                tracing::debug!("Sent auth message");
                self.status.auth = AuthState::Authenticating;
                self.publish();
            }
            Err(e) => tracing::warn!("Failed to send auth message: {}", e),
        }
    }

    fn on_auth_ok(&mut self, ha_version: Option<String>) {
        if self.status.auth != AuthState::Authenticating {
            tracing::warn!("Ignoring auth_ok while {:?}", self.status.auth);
            return;
        }

        match ha_version {
            Some(version) => tracing::info!("Authenticated (hub {})", version),
            None => tracing::info!("Authenticated"),
        }
        self.status.auth = AuthState::Authenticated;
        self.status.reconnect_attempt = 0;
        self.status.unreachable = false;
        self.status.last_error = None;
        self.publish();

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        self.touch_activity();
        self.flush_outbound();
        self.subscribe_events();
    }

    fn on_auth_invalid(&mut self, message: Option<String>) {
        let message = message.unwrap_or_else(|| "access token rejected".to_string());
        tracing::error!("Authentication failed: {}", message);

        // The socket stays up; the server closes it when it wants to, and
        // the same token is not retried until the next explicit connect.
        self.status.auth = AuthState::NotAuthenticated;
        self.status.last_error = Some(message.clone());
        self.auth_rejected = true;
        self.should_reconnect = false;
        self.cancel_reconnect();
        self.publish();
        self.fail_connect_waiters(SessionError::AuthenticationFailed(message));
    }

    fn auth_error(&self) -> SessionError {
        SessionError::AuthenticationFailed(
            self.status
                .last_error
                .clone()
                .unwrap_or_else(|| "access token rejected".to_string()),
        )
    }

    fn subscribe_events(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        let Some(event_type) = self.config.auto_subscribe.clone() else {
            return;
        };

        let id = self.next_id();
        let message = ClientMessage::SubscribeEvents {
            id,
            event_type: Some(event_type.clone()),
        };
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Cannot encode event subscription: {}", e);
                return;
            }
        };

        match self.transport.send_text(frame) {
            Ok(()) => {
                let mut request = PendingRequest::new(id, None, Responder::Subscription);
                request.sent = true;
                self.pending.register(request);
                self.subscription = Some(id);
                tracing::debug!("Subscribing to {} events (id {})", event_type, id);
            }
            Err(e) => tracing::warn!("Failed to send event subscription: {}", e),
        }
    }

    fn on_result(&mut self, result: ResultMessage) {
        let id = result.id;
        let Some(request) = self.pending.take(id) else {
            tracing::debug!("Discarding result for unknown or settled request {}", id);
            return;
        };

        match request.responder {
            Responder::Caller(reply) => {
                let _ = reply.send(result.into_result().map_err(SessionError::from));
            }
            Responder::Subscription => match result.into_result() {
                Ok(_) => tracing::info!("Event subscription {} active", id),
                Err(e) => {
                    tracing::warn!("Event subscription {} rejected: {}", id, e);
                    self.subscription = None;
                }
            },
        }
    }

    // ----- outbound -----

    fn send(&mut self, mut frame: Map<String, Value>) -> Result<MessageId> {
        let id = self.next_id();
        stamp_id(&mut frame, id);
        let text = serde_json::to_string(&frame).map_err(|e| SessionError::Encoding(e.to_string()))?;
        self.dispatch(QueuedFrame {
            id,
            correlated: false,
            text,
        })?;
        Ok(id)
    }

    fn request(
        &mut self,
        mut frame: Map<String, Value>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Value>>,
    ) {
        let id = self.next_id();
        stamp_id(&mut frame, id);
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                let _ = reply.send(Err(SessionError::Encoding(e.to_string())));
                return;
            }
        };

        self.pending
            .register(PendingRequest::new(id, timeout, Responder::Caller(reply)));
        let dispatched = self.dispatch(QueuedFrame {
            id,
            correlated: true,
            text,
        });
        if let Err(error) = dispatched {
            if let Some(request) = self.pending.take(id) {
                request.complete(Err(error));
            }
        }
    }

    /// Write now if the session is ready and nothing is waiting ahead of
    /// this frame; queue it otherwise.
    fn dispatch(&mut self, frame: QueuedFrame) -> Result<()> {
        self.wake_if_idle();
        self.touch_activity();

        if self.status.is_ready() && self.outbound.is_empty() {
            self.write(frame);
            return Ok(());
        }
        tracing::debug!("Queueing message {} until the session is ready", frame.id);
        self.outbound.push(frame)
    }

    /// A failed write goes back to the head of the queue; the transport
    /// reports the broken socket separately.
    fn write(&mut self, frame: QueuedFrame) -> bool {
        match self.transport.send_text(frame.text.clone()) {
            Ok(()) => {
                if frame.correlated {
                    self.pending.mark_sent(frame.id);
                }
                true
            }
            Err(e) => {
                tracing::warn!("Write of message {} failed ({}); keeping it queued", frame.id, e);
                self.outbound.push_front(frame);
                false
            }
        }
    }

    fn flush_outbound(&mut self) {
        if !self.outbound.is_empty() {
            tracing::info!("Flushing {} queued messages", self.outbound.len());
        }
        while self.status.is_ready() {
            let Some(frame) = self.outbound.pop() else {
                break;
            };
            if frame.correlated && !self.pending.contains(frame.id) {
                tracing::debug!("Skipping message {}: request already settled", frame.id);
                continue;
            }
            if !self.write(frame) {
                break;
            }
        }
    }

    fn next_id(&mut self) -> MessageId {
        self.last_id += 1;
        self.last_id
    }

    // ----- timers -----

    fn schedule_reconnect(&mut self) {
        if self.is_attempting_reconnect {
            tracing::debug!("Reconnect already scheduled");
            return;
        }

        let attempt = self.status.reconnect_attempt;
        if self.config.reconnect.exhausted(attempt) {
            self.give_up();
            return;
        }

        let delay = self.config.reconnect.jittered_delay(attempt);
        self.status.reconnect_attempt = attempt + 1;
        self.is_attempting_reconnect = true;
        self.reconnect_at = Some(Instant::now() + delay);
        tracing::info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            self.status.reconnect_attempt
        );
        self.publish();
    }

    fn fire_reconnect(&mut self) {
        self.reconnect_at = None;
        self.is_attempting_reconnect = false;
        if !self.should_reconnect || self.status.connection != ConnectionState::Disconnected {
            return;
        }
        self.start_connect();
    }

    fn cancel_reconnect(&mut self) {
        self.reconnect_at = None;
        self.is_attempting_reconnect = false;
    }

    fn give_up(&mut self) {
        let attempts = self.status.reconnect_attempt;
        tracing::error!("Giving up after {} reconnection attempts", attempts);

        self.should_reconnect = false;
        self.status.unreachable = true;
        self.status.last_error = Some(format!(
            "server unreachable after {} reconnection attempts",
            attempts
        ));

        let error = SessionError::Unreachable { attempts };
        self.outbound.clear();
        for request in self.pending.drain_all() {
            request.complete(Err(error.clone()));
        }
        self.fail_connect_waiters(error);
        self.publish();
    }

    fn schedule_ping(&mut self) {
        if self.config.heartbeat.enabled {
            self.next_ping_at = Some(Instant::now() + self.config.heartbeat.interval);
        }
    }

    fn send_heartbeat(&mut self) {
        self.next_ping_at = None;
        if self.status.connection != ConnectionState::Connected {
            return;
        }
        self.schedule_ping();
        match self.transport.send_ping() {
            Ok(()) => {
                if self.pong_deadline.is_none() {
                    self.pong_deadline = Some(Instant::now() + self.config.heartbeat.timeout);
                }
            }
            Err(e) => tracing::warn!("Failed to send ping: {}", e),
        }
    }

    fn note_traffic(&mut self) {
        self.pong_deadline = None;
    }

    fn heartbeat_expired(&mut self) {
        self.pong_deadline = None;
        if self.status.connection != ConnectionState::Connected {
            return;
        }
        tracing::warn!(
            "No traffic within {:?} of a ping; dropping the connection",
            self.config.heartbeat.timeout
        );
        self.transport.disconnect();
        self.on_disconnected(DisconnectReason::new("heartbeat timeout"));
    }

    fn touch_activity(&mut self) {
        if let Some(idle) = self.config.idle_timeout {
            if self.status.is_ready() {
                self.idle_deadline = Some(Instant::now() + idle);
            }
        }
    }

    fn idle_expired(&mut self) {
        self.idle_deadline = None;
        if !self.status.is_ready() {
            return;
        }
        tracing::info!("Closing idle connection");
        self.should_reconnect = false;
        self.idle_disconnected = true;
        self.cancel_reconnect();
        self.transport.disconnect();
        self.teardown(None);
    }

    /// Traffic after an idle disconnect brings the connection back.
    fn wake_if_idle(&mut self) {
        if self.idle_disconnected && self.status.connection == ConnectionState::Disconnected {
            tracing::info!("Reconnecting after idle disconnect");
            self.idle_disconnected = false;
            self.should_reconnect = true;
            self.status.reconnect_attempt = 0;
            self.start_connect();
        }
    }

    fn expire_requests(&mut self) {
        for request in self.pending.expire(Instant::now()) {
            let waited = request.timeout.unwrap_or_default();
            tracing::warn!("Request {} timed out after {:?}", request.id, waited);
            self.outbound.remove(request.id);
            request.complete(Err(SessionError::Timeout(waited)));
        }
    }

    // ----- helpers -----

    fn fail_connect_waiters(&mut self, error: SessionError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    fn publish(&self) {
        let status = self.status.clone();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
