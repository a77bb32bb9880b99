//! Motion Controller Protocol
//!
//! Commands go out as `{"cmd": <text>}`. Every command is answered by two
//! replies, in order: a device-level ack from the controller's network
//! bridge, then the controller-level ack, which is either an echo
//! `{"uno_ack": ...}` or a five-field status report. Nothing else is sent
//! until both replies are in.

pub mod channel;
pub mod queue;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module::define;

/// Transport-level failures of the controller channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Text message channel to the motion controller.
pub trait ControllerChannel {
    fn send_text(&mut self, text: &str) -> Result<(), ChannelError>;
    /// Blocks for the next text message; `Ok(None)` once the peer has closed.
    fn recv_text(&mut self) -> Result<Option<String>, ChannelError>;
    /// Returns promptly. True once the peer has closed while nothing was pending.
    fn poll_closed(&mut self) -> Result<bool, ChannelError>;
}

/// Opaque command token, e.g. `start_scan` or `speed@0.05`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn start_scan() -> Self {
        Self::new(define::command::START_SCAN)
    }

    pub fn stop_scan() -> Self {
        Self::new(define::command::STOP_SCAN)
    }

    pub fn information() -> Self {
        Self::new(define::command::INFORMATION)
    }

    /// `length@<fraction>`, fraction in 0..=1.
    pub fn length(fraction: f64) -> Result<Self, String> {
        Self::parameterized(define::command::LENGTH, fraction, define::command::LENGTH_RANGE)
    }

    /// `speed@<m/s>`, in 0.010..=0.200.
    pub fn speed(speed: f64) -> Result<Self, String> {
        Self::parameterized(define::command::SPEED, speed, define::command::SPEED_RANGE)
    }

    fn parameterized(verb: &str, value: f64, (lo, hi): (f64, f64)) -> Result<Self, String> {
        if !(lo..=hi).contains(&value) {
            return Err(format!("{} must be between {} and {}", verb, lo, hi));
        }
        Ok(Self(format!("{}@{}", verb, value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wire form of the command.
    pub fn to_wire(&self) -> Result<String, ChannelError> {
        #[derive(Serialize)]
        struct Wire<'a> {
            cmd: &'a str,
        }
        Ok(serde_json::to_string(&Wire { cmd: &self.0 })?)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status report sent by the motion controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub temperature1: f64,
    pub temperature2: f64,
    pub status: String,
    pub length: f64,
    pub speed: f64,
}

impl StatusReport {
    /// Human-readable telemetry line.
    pub fn summary(&self) -> String {
        format!(
            "Temp1: {:.1} C | Temp2: {:.1} C | Status: {} | Length: {:.3} | Speed: {:.3}",
            self.temperature1, self.temperature2, self.status, self.length, self.speed
        )
    }
}

/// Controller-level acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum Acknowledgement {
    Status(StatusReport),
    Echo(String),
    /// Payload that is not one of the known shapes, kept verbatim.
    Malformed(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AckWire {
    Status(StatusReport),
    Echo { uno_ack: serde_json::Value },
}

impl Acknowledgement {
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<AckWire>(text) {
            Ok(AckWire::Status(report)) => Acknowledgement::Status(report),
            Ok(AckWire::Echo { uno_ack }) => Acknowledgement::Echo(match uno_ack {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            Err(e) => {
                log::debug!("Undecodable controller ack ({}): {}", e, text);
                Acknowledgement::Malformed(text.to_string())
            }
        }
    }
}

/// Progress of one command's acknowledgement exchange.
#[derive(Debug, Clone, PartialEq)]
enum AckStep {
    AwaitDevice,
    AwaitController { device: String },
}

/// Both replies to one command.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub device_ack: String,
    pub controller_ack: Acknowledgement,
}

/// Result of sending one command.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    Complete(Exchange),
    /// The peer closed before both replies arrived.
    Closed,
}

/// Send one command and wait for its two acknowledgements.
pub fn exchange(
    channel: &mut dyn ControllerChannel,
    command: &Command,
) -> Result<ExchangeOutcome, ChannelError> {
    channel.send_text(&command.to_wire()?)?;
    log::info!("Command sent: {}", command);

    let mut step = AckStep::AwaitDevice;
    loop {
        let text = match channel.recv_text()? {
            Some(text) => text,
            None => return Ok(ExchangeOutcome::Closed),
        };
        step = match step {
            AckStep::AwaitDevice => {
                log::debug!("Device ack for {}: {}", command, text);
                AckStep::AwaitController { device: text }
            }
            AckStep::AwaitController { device } => {
                log::debug!("Controller ack for {}: {}", command, text);
                return Ok(ExchangeOutcome::Complete(Exchange {
                    device_ack: device,
                    controller_ack: Acknowledgement::decode(&text),
                }));
            }
        };
    }
}
