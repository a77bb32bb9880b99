//! WebSocket transport to the motion controller.
//!
//! The controller's network bridge dials in; this side accepts one
//! connection at a time.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tungstenite::{Error as WsError, Message, WebSocket};

use super::{ChannelError, ControllerChannel};

// Read timeout used while checking an idle connection
const POLL_TIMEOUT: Duration = Duration::from_millis(2);

/// Accepted controller connection.
pub struct WsChannel {
    ws: WebSocket<TcpStream>,
    stop: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl WsChannel {
    /// Complete the WebSocket handshake on an accepted stream.
    ///
    /// Reads time out after `read_timeout` so a pending receive notices `stop`.
    pub fn accept(
        stream: TcpStream,
        read_timeout: Duration,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, ChannelError> {
        stream
            .set_nonblocking(false)
            .map_err(|e| ChannelError::Receive(e.to_string()))?;
        let ws = tungstenite::accept(stream).map_err(|e| ChannelError::Receive(e.to_string()))?;
        let mut channel = Self {
            ws,
            stop,
            read_timeout,
        };
        channel.set_read_timeout(read_timeout)?;
        Ok(channel)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        self.ws
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(|e| ChannelError::Receive(e.to_string()))
    }

    pub fn close(mut self) {
        let _ = self.ws.close(None);
        let _ = self.ws.flush();
    }
}

impl ControllerChannel for WsChannel {
    fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        self.ws
            .send(Message::Text(text.to_string()))
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    fn recv_text(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            match self.ws.read() {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Binary(bytes)) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => {}
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return Ok(None),
                Err(WsError::Io(e))
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    if self.stop.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(ChannelError::Receive(e.to_string())),
            }
        }
    }

    fn poll_closed(&mut self) -> Result<bool, ChannelError> {
        self.set_read_timeout(POLL_TIMEOUT)?;
        let res = self.ws.read();
        self.set_read_timeout(self.read_timeout)?;
        match res {
            Ok(Message::Close(_)) => Ok(true),
            Ok(msg) => {
                log::warn!("Unsolicited controller message dropped: {:?}", msg);
                Ok(false)
            }
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(true),
            Err(WsError::Io(e))
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(ChannelError::Receive(e.to_string())),
        }
    }
}

/// Non-blocking listener polled by the protocol thread.
pub fn listen(bind: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(bind)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}
