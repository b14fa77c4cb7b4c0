//! Raw WebSocket transport under the session.
//!
//! A [`Transport`] owns at most one socket. It never interprets frames; it
//! reports everything that happens on the socket as [`TransportEvent`]s,
//! tagged with the epoch the session handed to [`Transport::connect`], so the
//! session can discard events from a connection it already gave up on.

use std::fmt;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message},
};
use url::Url;

use crate::error::{Result, SessionError};

/// Identifies one connect attempt.
pub type Epoch = u64;

/// Where a transport reports socket activity.
pub type TransportSink = mpsc::UnboundedSender<(Epoch, TransportEvent)>;

/// Reason for a disconnect event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// One thing that happened on the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    /// The socket is gone, or never came up. Always the last event of an epoch.
    Disconnected(DisconnectReason),
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    /// Non-fatal on its own; a fatal error is followed by `Disconnected`.
    Error(String),
}

/// Socket adapter driven by the session.
///
/// Methods must not block: `connect` starts the handshake in the background
/// and reports the outcome through `events`.
pub trait Transport: Send + 'static {
    fn connect(&mut self, url: &Url, epoch: Epoch, events: TransportSink);
    fn disconnect(&mut self);
    fn send_text(&mut self, text: String) -> Result<()>;
    fn send_ping(&mut self) -> Result<()>;
}

/// [`Transport`] over `tokio-tungstenite`.
pub struct TungsteniteTransport {
    connect_timeout: Duration,
    sender: Option<UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

/// How long a closing socket may take to finish the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

impl TungsteniteTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            sender: None,
            task: None,
        }
    }

    fn queue(&mut self, message: Message) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(SessionError::ConnectionLost)?;
        sender
            .unbounded_send(message)
            .map_err(|_| SessionError::ConnectionLost)
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Transport for TungsteniteTransport {
    fn connect(&mut self, url: &Url, epoch: Epoch, events: TransportSink) {
        self.disconnect();

        let (sender, receiver) = unbounded();
        self.sender = Some(sender);
        self.task = Some(tokio::spawn(run_connection(
            url.to_string(),
            epoch,
            events,
            receiver,
            self.connect_timeout,
        )));
    }

    fn disconnect(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.unbounded_send(Message::Close(None));
            sender.close_channel();
        }
        if let Some(task) = self.task.take() {
            // Give the close handshake a moment, then make sure the task is gone.
            tokio::spawn(async move {
                tokio::time::sleep(CLOSE_GRACE).await;
                task.abort();
            });
        }
    }

    fn send_text(&mut self, text: String) -> Result<()> {
        self.queue(Message::text(text))
    }

    fn send_ping(&mut self) -> Result<()> {
        self.queue(Message::Ping(Default::default()))
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn close_reason(frame: Option<CloseFrame>) -> DisconnectReason {
    match frame {
        Some(frame) => {
            let reason = frame.reason.as_str();
            let message = if reason.is_empty() {
                "closed by server".to_string()
            } else {
                reason.to_string()
            };
            DisconnectReason::with_code(message, u16::from(frame.code))
        }
        None => DisconnectReason::new("closed by server"),
    }
}

/// Connect, then pump frames both ways until either side closes.
async fn run_connection(
    url: String,
    epoch: Epoch,
    events: TransportSink,
    mut outgoing: UnboundedReceiver<Message>,
    connect_timeout: Duration,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send((epoch, event));
    };

    tracing::debug!("Opening WebSocket to {} (epoch {})", url, epoch);
    let ws_stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await
    {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            emit(TransportEvent::Error(format!("Connection failed: {}", e)));
            emit(TransportEvent::Disconnected(DisconnectReason::new(format!(
                "connection failed: {}",
                e
            ))));
            return;
        }
        Err(_) => {
            emit(TransportEvent::Error(format!(
                "Connection timeout ({:?})",
                connect_timeout
            )));
            emit(TransportEvent::Disconnected(DisconnectReason::new(
                "connection timeout",
            )));
            return;
        }
    };

    emit(TransportEvent::Connected);
    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            message = outgoing.next() => match message {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        emit(TransportEvent::Error(format!("Send failed: {}", e)));
                        break DisconnectReason::new(format!("send failed: {}", e));
                    }
                }
                None => {
                    let _ = write.close().await;
                    break DisconnectReason::with_code("closed by client", 1000);
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(TransportEvent::Text(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => emit(TransportEvent::Binary(data.to_vec())),
                // tungstenite answers pings on its own
                Some(Ok(Message::Ping(_))) => emit(TransportEvent::Ping),
                Some(Ok(Message::Pong(_))) => emit(TransportEvent::Pong),
                Some(Ok(Message::Close(frame))) => break close_reason(frame),
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    emit(TransportEvent::Error(format!("Read failed: {}", e)));
                    break DisconnectReason::new(format!("read failed: {}", e));
                }
                None => break DisconnectReason::new("stream ended"),
            },
        }
    };

    tracing::debug!("WebSocket to {} closed: {}", url, reason);
    emit(TransportEvent::Disconnected(reason));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::new("gone").to_string(), "gone");
        assert_eq!(
            DisconnectReason::with_code("bye", 1001).to_string(),
            "bye (code: 1001)"
        );
    }

    #[tokio::test]
    async fn test_send_without_socket_is_connection_lost() {
        let mut transport = TungsteniteTransport::default();
        assert_eq!(
            transport.send_text("{}".to_string()),
            Err(SessionError::ConnectionLost)
        );
        assert_eq!(transport.send_ping(), Err(SessionError::ConnectionLost));
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_disconnect() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut transport = TungsteniteTransport::new(Duration::from_secs(2));
        // Port 9 on localhost: nothing listens there in a test environment.
        transport.connect(&Url::parse("ws://127.0.0.1:9/api/websocket").unwrap(), 3, events);

        let mut saw_disconnect = false;
        while let Some((epoch, event)) = rx.recv().await {
            assert_eq!(epoch, 3);
            if let TransportEvent::Disconnected(_) = event {
                saw_disconnect = true;
                break;
            }
            assert!(matches!(event, TransportEvent::Error(_)));
        }
        assert!(saw_disconnect);
    }
}
