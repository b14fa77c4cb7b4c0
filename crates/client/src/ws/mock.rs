//! Scripted transport for session tests.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use url::Url;

use super::transport::{DisconnectReason, Epoch, Transport, TransportEvent, TransportSink};
use crate::error::{Result, SessionError};

#[derive(Default)]
struct MockState {
    sink: Option<TransportSink>,
    epoch: Epoch,
    connects: Vec<String>,
    disconnects: usize,
    sent: Vec<String>,
    pings: usize,
    fail_sends: bool,
}

/// Records what the session asks of the socket and lets a test play the
/// server side. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event tagged with the epoch of the latest `connect`.
    pub fn emit(&self, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        if let Some(sink) = &state.sink {
            let _ = sink.send((state.epoch, event));
        }
    }

    pub fn emit_with_epoch(&self, epoch: Epoch, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        if let Some(sink) = &state.sink {
            let _ = sink.send((epoch, event));
        }
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Connected);
    }

    pub fn server_sends(&self, frame: Value) {
        self.emit(TransportEvent::Text(frame.to_string()));
    }

    pub fn drop_connection(&self, reason: &str) {
        self.emit(TransportEvent::Disconnected(DisconnectReason::new(reason)));
    }

    pub fn epoch(&self) -> Epoch {
        self.state.lock().unwrap().epoch
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects.len()
    }

    pub fn connected_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn ping_count(&self) -> usize {
        self.state.lock().unwrap().pings
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Every text frame written so far, parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// Frames written so far, cleared afterwards.
    pub fn take_sent(&self) -> Vec<Value> {
        let sent = self.sent();
        self.state.lock().unwrap().sent.clear();
        sent
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, url: &Url, epoch: Epoch, events: TransportSink) {
        let mut state = self.state.lock().unwrap();
        state.connects.push(url.to_string());
        state.epoch = epoch;
        state.sink = Some(events);
    }

    fn disconnect(&mut self) {
        self.state.lock().unwrap().disconnects += 1;
    }

    fn send_text(&mut self, text: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(SessionError::ConnectionLost);
        }
        state.sent.push(text);
        Ok(())
    }

    fn send_ping(&mut self) -> Result<()> {
        self.state.lock().unwrap().pings += 1;
        Ok(())
    }
}
