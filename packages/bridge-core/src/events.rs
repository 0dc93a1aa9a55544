//! Relay event bus
//!
//! Listeners and the dispatcher publish what they did here; the relayer's
//! observer turns the stream into logs, metrics and status counters.

use tokio::sync::broadcast;

use crate::codec::DecodeError;
use crate::types::{AccountId32, Amount, AppId, Asset, BlockNumber, EvmAddress, MessageKind};
use alloy::primitives::U256;

/// Why the dispatcher discarded a message without applying it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No route points at the message's application
    UnknownApp,
    /// Payload did not match the application's schema
    Malformed(DecodeError),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::UnknownApp => f.write_str("unknown application"),
            DropReason::Malformed(e) => write!(f, "malformed payload: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    BlockProcessed {
        chain: String,
        block: BlockNumber,
        events: usize,
    },
    MessageEmitted {
        chain: String,
        block: BlockNumber,
        app_id: AppId,
        kind: MessageKind,
    },
    Locked {
        app_id: AppId,
        asset: Asset,
        caller: EvmAddress,
        recipient: AccountId32,
        amount: Amount,
        nonce: U256,
    },
    Unlocked {
        app_id: AppId,
        asset: Asset,
        recipient: EvmAddress,
        amount: Amount,
        tx_hash: [u8; 32],
    },
    Rejected {
        app_id: AppId,
        kind: MessageKind,
        reason: String,
    },
    TransferFailed {
        app_id: AppId,
        asset: Asset,
        recipient: EvmAddress,
        amount: Amount,
        reason: String,
    },
    Dropped {
        app_id: AppId,
        reason: DropReason,
    },
}

impl BridgeEvent {
    /// Short label used for log lines and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            BridgeEvent::BlockProcessed { .. } => "block_processed",
            BridgeEvent::MessageEmitted { .. } => "message_emitted",
            BridgeEvent::Locked { .. } => "locked",
            BridgeEvent::Unlocked { .. } => "unlocked",
            BridgeEvent::Rejected { .. } => "rejected",
            BridgeEvent::TransferFailed { .. } => "transfer_failed",
            BridgeEvent::Dropped { .. } => "dropped",
        }
    }
}

/// Broadcast handle shared by every publisher and subscriber
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Subscribers that fall more than `capacity` events behind lose the
    /// oldest ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; returns how many received it
    pub fn publish(&self, event: BridgeEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        let delivered = bus.publish(BridgeEvent::BlockProcessed {
            chain: "substrate".into(),
            block: 1,
            events: 0,
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let publisher = bus.clone();

        for block in 1..=3 {
            publisher.publish(BridgeEvent::BlockProcessed {
                chain: "substrate".into(),
                block,
                events: 0,
            });
        }

        for expected in 1..=3 {
            match rx.recv().await.unwrap() {
                BridgeEvent::BlockProcessed { block, .. } => assert_eq!(block, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_drop_reason_display() {
        let reason = DropReason::Malformed(DecodeError::Length {
            schema: crate::codec::Schema::Unlock,
            expected: 84,
            actual: 90,
        });
        assert!(reason.to_string().contains("exactly 84 bytes, got 90"));
        assert_eq!(DropReason::UnknownApp.to_string(), "unknown application");
    }
}
