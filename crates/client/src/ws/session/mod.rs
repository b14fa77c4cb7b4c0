//! The persistent hub session.
//!
//! [`Session`] is a cheap, cloneable handle. All mutable session state lives
//! in one background task (the actor in `actor.rs`); the handle only sends it
//! commands and reads the published [`SessionStatus`].
//!
//! Every call returns a future *after* its command is already enqueued, so
//! the order of calls is the order frames reach the wire even if the futures
//! are awaited in a different order, or never.

mod actor;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use homelink_shared::{to_object, ClientMessage, EntityState, Event, MessageId};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};

use self::actor::SessionActor;
use super::connection::SessionStatus;
use super::listeners::{EventListener, ListenerId, ListenerRegistry};
use super::transport::{Transport, TungsteniteTransport};
use crate::config::SessionConfig;
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{Result, SessionError};

/// Commands from handles to the session task.
pub(crate) enum Command {
    Connect {
        done: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
    Send {
        frame: Map<String, Value>,
        ack: oneshot::Sender<Result<MessageId>>,
    },
    Request {
        frame: Map<String, Value>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Value>>,
    },
}

/// A listener that forwards events into a channel.
pub struct EventSubscription {
    /// Pass to [`Session::remove_listener`] to stop the forwarding.
    pub id: ListenerId,
    pub events: mpsc::UnboundedReceiver<Event>,
}

/// Handle to the single session with the hub.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    listeners: Arc<ListenerRegistry>,
    default_timeout: Option<Duration>,
}

impl Session {
    /// Build a session over `transport` and spawn its task on the current
    /// tokio runtime. Credentials are resolved here; a missing URL or token
    /// fails immediately with [`SessionError::Configuration`].
    ///
    /// The session starts disconnected; call [`Session::connect`].
    pub fn new<T: Transport>(
        provider: &dyn CredentialProvider,
        transport: T,
        config: SessionConfig,
    ) -> Result<Self> {
        let credentials = Credentials::load(provider)?;
        let url = credentials.websocket_url()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SessionStatus::default());
        let listeners = Arc::new(ListenerRegistry::new());
        let default_timeout = config.request_timeout;

        let actor = SessionActor::new(
            transport,
            credentials,
            url,
            config,
            status_tx,
            listeners.clone(),
            command_rx,
        );
        tokio::spawn(actor.run());

        Ok(Self {
            commands,
            status,
            listeners,
            default_timeout,
        })
    }

    /// Session over a real WebSocket.
    pub fn with_websocket(provider: &dyn CredentialProvider, config: SessionConfig) -> Result<Self> {
        let transport = TungsteniteTransport::new(config.connect_timeout);
        Self::new(provider, transport, config)
    }

    /// Start connecting if disconnected, and enable automatic reconnection.
    ///
    /// Resolves once the session is authenticated, or with the reason it
    /// cannot be: [`SessionError::AuthenticationFailed`],
    /// [`SessionError::Unreachable`], or [`SessionError::ConnectionLost`] if
    /// `disconnect` is called first. Calling it while already connecting or
    /// connected starts nothing new.
    pub fn connect(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let (done, rx) = oneshot::channel();
        let submitted = self.submit(Command::Connect { done });
        async move {
            submitted?;
            rx.await.map_err(|_| SessionError::Closed)?
        }
    }

    /// Close the connection and stop reconnecting. Everything pending fails
    /// with [`SessionError::ConnectionLost`].
    pub fn disconnect(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done, rx) = oneshot::channel();
        let submitted = self.submit(Command::Disconnect { done });
        async move {
            if submitted.is_ok() {
                let _ = rx.await;
            }
        }
    }

    /// Stop the session task. Every handle fails with [`SessionError::Closed`] afterwards.
    pub fn shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
        let (done, rx) = oneshot::channel();
        let submitted = self.submit(Command::Shutdown { done });
        async move {
            if submitted.is_ok() {
                let _ = rx.await;
            }
        }
    }

    /// Fire-and-forget: the frame gets an id but nobody waits for its result.
    /// Resolves with the id once the frame is written or queued.
    pub fn send<P: Serialize + ?Sized>(
        &self,
        payload: &P,
    ) -> impl Future<Output = Result<MessageId>> + Send + 'static {
        let (ack, rx) = oneshot::channel();
        let submitted = to_object(payload)
            .map_err(SessionError::from)
            .and_then(|frame| self.submit(Command::Send { frame, ack }));
        async move {
            submitted?;
            rx.await.map_err(|_| SessionError::Closed)?
        }
    }

    /// Correlated request using the configured default timeout.
    pub fn request<P: Serialize + ?Sized>(
        &self,
        payload: &P,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.request_with_timeout(payload, self.default_timeout)
    }

    /// Correlated request. `payload` must serialize to a JSON object; its
    /// `id` is assigned by the session. Resolves exactly once: with the
    /// result payload, a server error, or a local failure.
    pub fn request_with_timeout<P: Serialize + ?Sized>(
        &self,
        payload: &P,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let submitted = to_object(payload)
            .map_err(SessionError::from)
            .and_then(|frame| {
                self.submit(Command::Request {
                    frame,
                    timeout,
                    reply,
                })
            });
        async move {
            submitted?;
            rx.await.map_err(|_| SessionError::Closed)?
        }
    }

    /// Correlated request decoding the result into `R`.
    pub fn request_as<P: Serialize + ?Sized, R: DeserializeOwned + 'static>(
        &self,
        payload: &P,
    ) -> impl Future<Output = Result<R>> + Send + 'static {
        let response = self.request(payload);
        async move {
            let value = response.await?;
            serde_json::from_value(value).map_err(|e| SessionError::Decoding(e.to_string()))
        }
    }

    pub fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Option<Value>,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.request(&ClientMessage::CallService {
            id: 0,
            domain: domain.to_string(),
            service: service.to_string(),
            service_data,
            target: None,
        })
    }

    pub fn get_states(&self) -> impl Future<Output = Result<Vec<EntityState>>> + Send + 'static {
        self.request_as(&ClientMessage::GetStates { id: 0 })
    }

    pub fn get_config(&self) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.request(&ClientMessage::GetConfig { id: 0 })
    }

    pub fn get_services(&self) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.request(&ClientMessage::GetServices { id: 0 })
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn add_listener(&self, listener: impl EventListener + 'static) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Every event from now on, as a channel. The forwarding listener stays
    /// registered until removed with its id.
    pub fn subscribe_events(&self) -> EventSubscription {
        let (tx, events) = mpsc::unbounded_channel();
        let id = self.listeners.add(move |event: &Event| {
            let _ = tx.send(event.clone());
        });
        EventSubscription { id, events }
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Closed)
    }
}
