//! Command Queue
//!
//! Unbounded FIFO between the UI (any number of `CommandSender` clones) and
//! the protocol thread (the single `CommandQueue`).

use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

use super::Command;

/// Producer side, cloned into every UI action that issues commands.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

/// Consumer side, owned by the protocol thread.
#[derive(Debug)]
pub struct CommandQueue {
    rx: Receiver<Command>,
}

/// Create a connected sender/queue pair.
pub fn command_queue() -> (CommandSender, CommandQueue) {
    let (tx, rx) = channel();
    (CommandSender { tx }, CommandQueue { rx })
}

impl CommandSender {
    /// Enqueue a command. Returns false once the protocol thread is gone.
    pub fn enqueue(&self, command: Command) -> bool {
        log::debug!("Command enqueued: {}", command);
        self.tx.send(command).is_ok()
    }
}

impl CommandQueue {
    /// Next pending command without blocking.
    pub fn try_dequeue(&self) -> Option<Command> {
        match self.rx.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Discard everything pending. Returns how many commands were dropped.
    pub fn drain(&self) -> usize {
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            log::info!("Drained {} stale commands", dropped);
        }
        dropped
    }
}
