//! Provide Loop for the Motion Controller Protocol.
//!
//! One thread owns the listener, the command queue consumer and the motion
//! phase state. It serves one controller connection at a time.

use std::io::ErrorKind;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::{thread, time};

use crate::module::com::channel::{self, WsChannel};
use crate::module::com::queue::CommandQueue;
use crate::module::com::{
    self as com, Acknowledgement, ChannelError, ControllerChannel, ExchangeOutcome,
};
use crate::module::error::HyscanResult;
use crate::module::pilot::scan::ScanPipeline;
use crate::module::pilot::{self, MotionPhaseState, ScanActions};
use crate::module::state::SharedState;
use crate::module::util::init::ScanProperty;
use crate::module::util::notify::{ConnectionState, Link, Notifier};
use crate::module::vision::classifier::PixelClassifier;

/// Protocol side of one controller session.
pub struct Protocol {
    queue: CommandQueue,
    shared: Arc<SharedState>,
    notifier: Notifier,
    phase: MotionPhaseState,
    idle: time::Duration,
}

impl Protocol {
    pub fn new(
        queue: CommandQueue,
        shared: Arc<SharedState>,
        notifier: Notifier,
        idle: time::Duration,
    ) -> Self {
        Self {
            queue,
            shared,
            notifier,
            phase: MotionPhaseState::new(),
            idle,
        }
    }

    pub fn phase(&self) -> &MotionPhaseState {
        &self.phase
    }

    /// New controller: forget commands meant for the previous one.
    pub fn connected(&mut self) {
        self.queue.drain();
        self.set_state(ConnectionState::Connected);
    }

    pub fn disconnected(&mut self) {
        log::debug!("Last motion phase: {:?}", self.phase().current);
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        log::info!("Controller {}", state);
        self.shared.set_controller_state(state);
        self.notifier.set_connection_state(Link::Controller, state);
    }

    /// Send queued commands one at a time until the peer closes or a stop
    /// is requested.
    pub fn pump(
        &mut self,
        channel: &mut dyn ControllerChannel,
        actions: &mut dyn ScanActions,
    ) -> Result<(), ChannelError> {
        while !self.shared.stopping() {
            let command = match self.queue.try_dequeue() {
                Some(command) => command,
                None => {
                    if channel.poll_closed()? {
                        log::info!("Controller closed while idle");
                        return Ok(());
                    }
                    thread::sleep(self.idle);
                    continue;
                }
            };
            match com::exchange(channel, &command)? {
                ExchangeOutcome::Complete(exchange) => {
                    self.handle_ack(exchange.controller_ack, actions)
                }
                ExchangeOutcome::Closed => {
                    log::info!("Controller closed during {}", command);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn handle_ack(&mut self, ack: Acknowledgement, actions: &mut dyn ScanActions) {
        match ack {
            Acknowledgement::Status(report) => {
                self.shared.set_last_status(report.clone());
                let todo = self.phase.apply(&report, self.shared.visualize());
                pilot::dispatch(todo, actions);
            }
            Acknowledgement::Echo(text) => log::info!("Controller ack: {}", text),
            Acknowledgement::Malformed(raw) => {
                log::warn!("Malformed controller ack: {}", raw);
                self.notifier.show_message(raw);
            }
        }
    }

    /// Full session: drain, pump, mark disconnected.
    pub fn serve(
        &mut self,
        channel: &mut dyn ControllerChannel,
        actions: &mut dyn ScanActions,
    ) -> Result<(), ChannelError> {
        self.connected();
        let res = self.pump(channel, actions);
        if let Err(e) = &res {
            log::error!("Controller channel failed: {}", e);
            self.notifier.show_message(format!("Controller connection lost: {}", e));
        }
        self.disconnected();
        res
    }
}

/// Bind the configured endpoint and start the protocol thread.
pub fn run(
    property: ScanProperty,
    shared: Arc<SharedState>,
    queue: CommandQueue,
    notifier: Notifier,
    classifier: Option<Arc<PixelClassifier>>,
) -> HyscanResult<JoinHandle<()>> {
    let listener = channel::listen(&property.conf.controller.bind)?;
    log::info!("Waiting for motion controller on {}", property.conf.controller.bind);
    Ok(spawn(listener, property, shared, queue, notifier, classifier))
}

/// Start the protocol thread on an already bound listener.
pub fn spawn(
    listener: TcpListener,
    property: ScanProperty,
    shared: Arc<SharedState>,
    queue: CommandQueue,
    notifier: Notifier,
    classifier: Option<Arc<PixelClassifier>>,
) -> JoinHandle<()> {
    let conf = property.conf.controller.clone();
    let idle = time::Duration::from_millis(conf.idle_poll_ms);
    let read_timeout = time::Duration::from_millis(conf.read_timeout_ms);
    let mut pipeline = ScanPipeline::new(
        Arc::clone(&shared),
        property,
        classifier,
        notifier.clone(),
    );
    let mut protocol = Protocol::new(queue, Arc::clone(&shared), notifier.clone(), idle);

    thread::spawn(move || {
        while !shared.stopping() {
            let stream = match listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("Controller connecting from {}", addr);
                    stream
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(idle);
                    continue;
                }
                Err(e) => {
                    log::error!("Accept failed: {}", e);
                    thread::sleep(idle);
                    continue;
                }
            };
            shared.set_controller_state(ConnectionState::Connecting);
            notifier.set_connection_state(Link::Controller, ConnectionState::Connecting);
            match WsChannel::accept(stream, read_timeout, shared.stop_flag()) {
                Ok(mut ws) => {
                    let _ = protocol.serve(&mut ws, &mut pipeline);
                    ws.close();
                }
                Err(e) => {
                    log::warn!("Controller handshake failed: {}", e);
                    protocol.disconnected();
                }
            }
        }
        log::info!("Protocol loop stopped");
        pipeline.wait();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::com::queue::{command_queue, CommandSender};
    use crate::module::com::testing::{ScriptedChannel, Wire};
    use crate::module::com::Command;
    use crate::module::pilot::testing::Recorder;
    use crate::module::pilot::MotionStatus;
    use crate::module::util::notify::{bridge, UiEvent};
    use std::sync::mpsc::Receiver;

    const STATUS: &str = r#"{"temperature1": 20.0, "temperature2": 21.0, "status": "Homing", "length": 0.0, "speed": 0.05}"#;

    fn sent(cmd: &str) -> Wire {
        Wire::Sent(format!(r#"{{"cmd":"{}"}}"#, cmd))
    }

    fn received(text: &str) -> Wire {
        Wire::Received(text.to_string())
    }

    fn protocol(visualize: bool) -> (CommandSender, Protocol, Receiver<UiEvent>, Arc<SharedState>) {
        let (tx, queue) = command_queue();
        let (notifier, rx) = bridge();
        let shared = Arc::new(SharedState::new(visualize));
        let p = Protocol::new(queue, Arc::clone(&shared), notifier, time::Duration::from_millis(1));
        (tx, p, rx, shared)
    }

    #[test]
    fn reconnect_drains_before_first_send() {
        let (tx, mut p, _rx, shared) = protocol(false);
        tx.enqueue(Command::new("stale_1"));
        tx.enqueue(Command::new("stale_2"));
        p.connected();
        assert_eq!(shared.controller_state(), ConnectionState::Connected);
        tx.enqueue(Command::information());
        tx.enqueue(Command::stop_scan());

        let mut channel = ScriptedChannel::new(&["ok", STATUS]);
        let log = Arc::clone(&channel.log);
        p.pump(&mut channel, &mut Recorder::default()).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                sent("information"),
                received("ok"),
                received(STATUS),
                sent("stop_scan")
            ]
        );
        assert_eq!(shared.last_status().map(|s| s.status), Some("Homing".to_string()));
    }

    #[test]
    fn every_command_waits_for_both_acks() {
        let (tx, mut p, _rx, _) = protocol(false);
        p.connected();
        for c in ["a", "b", "c"] {
            tx.enqueue(Command::new(c));
        }
        let mut channel = ScriptedChannel::new(&[
            "ok",
            r#"{"uno_ack": "a"}"#,
            "ok",
            r#"{"uno_ack": "b"}"#,
            "ok",
            r#"{"uno_ack": "c"}"#,
        ]);
        let log = Arc::clone(&channel.log);
        // A fourth command finds the script exhausted and ends the session
        tx.enqueue(Command::new("d"));
        p.pump(&mut channel, &mut Recorder::default()).unwrap();
        let log = log.lock().unwrap();
        let kinds: Vec<char> = log
            .iter()
            .map(|w| match w {
                Wire::Sent(_) => 'S',
                Wire::Received(_) => 'R',
            })
            .collect();
        assert_eq!(kinds, "SRRSRRSRRS".chars().collect::<Vec<_>>());
        assert_eq!(log[3], sent("b"));
    }

    #[test]
    fn malformed_ack_is_shown_verbatim() {
        let (tx, mut p, rx, _) = protocol(false);
        p.connected();
        tx.enqueue(Command::information());
        tx.enqueue(Command::stop_scan());
        let mut channel = ScriptedChannel::new(&["ok", "not json"]);
        p.pump(&mut channel, &mut Recorder::default()).unwrap();
        assert!(rx
            .try_iter()
            .any(|e| e == UiEvent::Message("not json".to_string())));
    }

    #[test]
    fn status_reports_feed_state_machine() {
        let (tx, mut p, _rx, _) = protocol(true);
        p.connected();
        let mut replies = vec![];
        for status in ["Homing", "Accelerating", "Accelerating", "Scanning", "Waiting"] {
            tx.enqueue(Command::information());
            replies.push("ok".to_string());
            replies.push(STATUS.replace("Homing", status));
        }
        // Unanswered last command ends the session
        tx.enqueue(Command::information());
        let refs: Vec<&str> = replies.iter().map(|s| s.as_str()).collect();
        let mut channel = ScriptedChannel::new(&refs);
        let mut rec = Recorder::default();
        p.pump(&mut channel, &mut rec).unwrap();
        assert_eq!(rec.calls, vec!["white", "start", "cycle", "extract"]);
        assert_eq!(p.phase().current, Some(MotionStatus::Waiting));
    }

    #[test]
    fn idle_session_ends_when_peer_closes() {
        let (_tx, mut p, rx, shared) = protocol(false);
        let mut channel = ScriptedChannel::new(&[]);
        p.serve(&mut channel, &mut Recorder::default()).unwrap();
        assert_eq!(shared.controller_state(), ConnectionState::Disconnected);
        assert_eq!(
            rx.try_iter().last(),
            Some(UiEvent::ConnectionState(
                Link::Controller,
                ConnectionState::Disconnected
            ))
        );
    }

    #[test]
    fn controller_reconnects_after_idle_disconnect() {
        let tmp = tempfile::tempdir().unwrap();
        let property = crate::module::util::init::testing::property(tmp.path());
        let listener = channel::listen("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, queue) = command_queue();
        let (notifier, rx) = bridge();
        let shared = Arc::new(SharedState::new(false));
        let handle = spawn(listener, property, Arc::clone(&shared), queue, notifier, None);

        let wait_for = |want: &dyn Fn(&UiEvent) -> bool| loop {
            let e = rx.recv_timeout(time::Duration::from_secs(5)).unwrap();
            if want(&e) {
                break e;
            }
        };
        let state_is = |state: ConnectionState| {
            move |e: &UiEvent| *e == UiEvent::ConnectionState(Link::Controller, state)
        };

        // First controller leaves with nothing queued
        let (mut first, _) = tungstenite::connect(format!("ws://{}", addr)).unwrap();
        wait_for(&state_is(ConnectionState::Connected));
        let _ = first.close(None);
        while first.read().is_ok() {}
        wait_for(&state_is(ConnectionState::Disconnected));
        assert_eq!(shared.controller_state(), ConnectionState::Disconnected);

        let second = thread::spawn(move || {
            let (mut ws, _) = tungstenite::connect(format!("ws://{}", addr)).unwrap();
            let mut seen = vec![];
            while let Ok(msg) = ws.read() {
                if msg.is_text() {
                    seen.push(msg.into_text().unwrap());
                    ws.send(tungstenite::Message::Text("ok".to_string())).unwrap();
                    ws.send(tungstenite::Message::Text(STATUS.to_string())).unwrap();
                }
            }
            seen
        });
        wait_for(&state_is(ConnectionState::Connected));
        tx.enqueue(Command::information());
        wait_for(&|e: &UiEvent| matches!(e, UiEvent::Telemetry(_)));

        shared.request_stop();
        handle.join().unwrap();
        assert_eq!(second.join().unwrap(), vec![r#"{"cmd":"information"}"#.to_string()]);
    }

    #[test]
    fn serves_controller_over_websocket() {
        let tmp = tempfile::tempdir().unwrap();
        let property = crate::module::util::init::testing::property(tmp.path());
        let listener = channel::listen("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, queue) = command_queue();
        let (notifier, rx) = bridge();
        let shared = Arc::new(SharedState::new(false));
        let handle = spawn(listener, property, Arc::clone(&shared), queue, notifier, None);

        let client = thread::spawn(move || {
            let (mut ws, _) = tungstenite::connect(format!("ws://{}", addr)).unwrap();
            while let Ok(msg) = ws.read() {
                if msg.is_text() {
                    ws.send(tungstenite::Message::Text("ok".to_string())).unwrap();
                    ws.send(tungstenite::Message::Text(STATUS.to_string())).unwrap();
                }
            }
        });

        let wait_for = |want: &dyn Fn(&UiEvent) -> bool| loop {
            let e = rx.recv_timeout(time::Duration::from_secs(5)).unwrap();
            if want(&e) {
                break e;
            }
        };
        wait_for(&|e: &UiEvent| {
            *e == UiEvent::ConnectionState(Link::Controller, ConnectionState::Connected)
        });
        tx.enqueue(Command::information());
        let telemetry = wait_for(&|e: &UiEvent| matches!(e, UiEvent::Telemetry(_)));
        assert!(matches!(telemetry, UiEvent::Telemetry(t) if t.contains("Homing")));

        shared.request_stop();
        handle.join().unwrap();
        client.join().unwrap();
        assert_eq!(shared.controller_state(), ConnectionState::Disconnected);
    }
}
