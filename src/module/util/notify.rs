//! UI notification bridge.
//!
//! Worker threads and the protocol loop never touch the UI. They post
//! `UiEvent`s through a `Notifier`; the thread owning the UI drains the
//! receiving end and applies them.

use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Connection state shown for the motion controller and the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        write!(f, "{}", s)
    }
}

/// Which link a connection state refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Controller,
    Camera,
}

/// Events marshaled onto the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Message(String),
    ConnectionState(Link, ConnectionState),
    Telemetry(String),
    CycleComplete,
}

/// Sending half of the UI bridge.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<UiEvent>,
}

/// Create a bridge. The receiver belongs to the UI thread.
pub fn bridge() -> (Notifier, Receiver<UiEvent>) {
    let (tx, rx) = channel();
    (Notifier { tx }, rx)
}

impl Notifier {
    pub fn show_message(&self, text: impl Into<String>) {
        self.post(UiEvent::Message(text.into()));
    }

    pub fn set_connection_state(&self, link: Link, state: ConnectionState) {
        self.post(UiEvent::ConnectionState(link, state));
    }

    pub fn telemetry_update(&self, text: impl Into<String>) {
        self.post(UiEvent::Telemetry(text.into()));
    }

    /// Scan-repeat controllers listen for this.
    pub fn cycle_complete(&self) {
        self.post(UiEvent::CycleComplete);
    }

    fn post(&self, event: UiEvent) {
        // The UI may already be gone during shutdown.
        if self.tx.send(event).is_err() {
            log::debug!("UI bridge closed, event dropped");
        }
    }
}
