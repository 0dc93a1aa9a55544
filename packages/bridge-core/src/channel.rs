//! Bounded message channel between listeners and the dispatcher
//!
//! A thin wrapper over a tokio mpsc channel. Senders block while the channel
//! is full, which stalls the producing listener; both halves stop waiting as
//! soon as shutdown is requested.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::shutdown::Shutdown;
use crate::types::RelayMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message channel closed")]
    Closed,

    #[error("shutdown requested")]
    Shutdown,
}

/// Create a channel holding at most `capacity` undelivered messages
pub fn message_channel(capacity: usize) -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MessageSender { tx }, MessageReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<RelayMessage>,
}

impl MessageSender {
    /// Enqueue a message, waiting for space. Returns `Shutdown` if the wait
    /// was interrupted; the message is then not delivered.
    pub async fn send(
        &self,
        message: RelayMessage,
        shutdown: &mut Shutdown,
    ) -> Result<(), SendError> {
        match shutdown.run_until(self.tx.send(message)).await {
            None => Err(SendError::Shutdown),
            Some(Ok(())) => Ok(()),
            Some(Err(_)) => Err(SendError::Closed),
        }
    }

    /// Messages currently waiting in the channel
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Depth gauge that does not keep the channel open
    pub fn depth_probe(&self) -> DepthProbe {
        DepthProbe {
            tx: self.tx.downgrade(),
        }
    }
}

/// Reads the channel depth without counting as a sender
#[derive(Debug, Clone)]
pub struct DepthProbe {
    tx: mpsc::WeakSender<RelayMessage>,
}

impl DepthProbe {
    /// Messages currently waiting; zero once every sender is gone
    pub fn depth(&self) -> usize {
        self.tx
            .upgrade()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct MessageReceiver {
    rx: mpsc::Receiver<RelayMessage>,
}

impl MessageReceiver {
    /// Next message in FIFO order; `None` once every sender is gone or
    /// shutdown is requested
    pub async fn recv(&mut self, shutdown: &mut Shutdown) -> Option<RelayMessage> {
        shutdown.run_until(self.rx.recv()).await.flatten()
    }

    pub fn depth(&self) -> usize {
        self.rx.len()
    }
}
