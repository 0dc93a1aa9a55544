//! Finality-aware chain listener
//!
//! Walks a source chain one finalized block at a time. Each block goes
//! through `AwaitingFinality -> Fetching -> Decoding -> Emitting`. Any chain
//! error repeats the current state after the retry interval. Only a payload
//! that was fetched but cannot be decoded stops the listener.
//!
//! The cursor is held in memory only. It never moves backwards and advances
//! by exactly one per processed block.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainError, EventDecodeError, SourceChain};
use crate::channel::{MessageSender, SendError};
use crate::codec;
use crate::events::{BridgeEvent, EventBus};
use crate::routing::AppRoutes;
use crate::shutdown::Shutdown;
use crate::types::{AssetClass, BlockHash, BlockNumber, RawEvent, RelayMessage};

/// Conditions that stop a listener for good
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("failed to decode events of block {block}: {source}")]
    Decode {
        block: BlockNumber,
        source: EventDecodeError,
    },

    #[error("no application configured for asset class {0}")]
    NoRoute(AssetClass),

    #[error("message channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Cursor is ahead of the last known finalized head
    AwaitingFinality,
    /// Retrieving hash and event payload of the cursor block
    Fetching,
    /// Turning the payload into events
    Decoding,
    /// Handing encoded messages to the channel
    Emitting,
}

/// One finalized block and its bridge events in chain order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedBlock {
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub events: Vec<RawEvent>,
}

/// Where to start when no block is configured: the current finalized head.
/// Errors are retried until shutdown, which yields `None`.
pub async fn resolve_start_block<S>(
    source: &S,
    configured: Option<BlockNumber>,
    retry_interval: Duration,
    shutdown: &mut Shutdown,
) -> Option<BlockNumber>
where
    S: SourceChain + ?Sized,
{
    if let Some(block) = configured {
        return Some(block);
    }
    loop {
        match shutdown.run_until(source.finalized_head()).await? {
            Ok(head) => return Some(head),
            Err(e) => {
                log_chain_error(source.name(), None, &e, "Failed to fetch finalized head");
                if !shutdown.sleep(retry_interval).await {
                    return None;
                }
            }
        }
    }
}

fn log_chain_error(chain: &str, block: Option<BlockNumber>, e: &ChainError, what: &str) {
    if e.is_transient() {
        warn!(chain, block, error = %e, "{}, retrying", what);
    } else {
        error!(chain, block, error = %e, "{}, retrying", what);
    }
}

pub struct ChainListener<S: SourceChain> {
    source: Arc<S>,
    cursor: BlockNumber,
    finalized_head: Option<BlockNumber>,
    state: ListenerState,
    retry_interval: Duration,
    shutdown: Shutdown,
}

impl<S: SourceChain> ChainListener<S> {
    pub fn new(
        source: Arc<S>,
        start_block: BlockNumber,
        retry_interval: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            cursor: start_block,
            finalized_head: None,
            state: ListenerState::AwaitingFinality,
            retry_interval,
            shutdown,
        }
    }

    /// Next block to process
    pub fn cursor(&self) -> BlockNumber {
        self.cursor
    }

    pub fn finalized_head(&self) -> Option<BlockNumber> {
        self.finalized_head
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Wait for the cursor block to be final, fetch and decode it, and
    /// advance the cursor. Returns `Ok(None)` on shutdown.
    pub async fn next_block(&mut self) -> Result<Option<FinalizedBlock>, ListenerError> {
        let block = self.cursor;
        self.state = ListenerState::AwaitingFinality;

        loop {
            match self.state {
                ListenerState::AwaitingFinality => {
                    if self.finalized_head.is_some_and(|head| block <= head) {
                        self.state = ListenerState::Fetching;
                        continue;
                    }
                    let result = match self.shutdown.run_until(self.source.finalized_head()).await
                    {
                        Some(result) => result,
                        None => return Ok(None),
                    };
                    match result {
                        Ok(head) => {
                            // Finality never regresses; ignore a lagging node
                            let known = self.finalized_head.unwrap_or(0);
                            self.finalized_head = Some(head.max(known));
                            if block <= head {
                                self.state = ListenerState::Fetching;
                                continue;
                            }
                            debug!(
                                chain = self.source.name(),
                                block,
                                finalized = head,
                                "Block not yet finalized"
                            );
                        }
                        Err(e) => log_chain_error(
                            self.source.name(),
                            Some(block),
                            &e,
                            "Failed to fetch finalized head",
                        ),
                    }
                    if !self.shutdown.sleep(self.retry_interval).await {
                        return Ok(None);
                    }
                }
                ListenerState::Fetching => {
                    let fetch = Self::fetch(&self.source, block);
                    let fetched = match self.shutdown.run_until(fetch).await {
                        Some(fetched) => fetched,
                        None => return Ok(None),
                    };
                    match fetched {
                        Ok((hash, payload)) => {
                            self.state = ListenerState::Decoding;
                            let events = self.source.decode_events(payload).map_err(|source| {
                                error!(
                                    chain = self.source.name(),
                                    block,
                                    error = %source,
                                    "Failed to decode events for block"
                                );
                                ListenerError::Decode { block, source }
                            })?;
                            self.cursor = block + 1;
                            return Ok(Some(FinalizedBlock {
                                number: block,
                                hash,
                                events,
                            }));
                        }
                        Err(e) => {
                            let chain = self.source.name();
                            log_chain_error(chain, Some(block), &e, "Failed to fetch block");
                            if !self.shutdown.sleep(self.retry_interval).await {
                                return Ok(None);
                            }
                        }
                    }
                }
                ListenerState::Decoding | ListenerState::Emitting => {
                    self.state = ListenerState::AwaitingFinality;
                }
            }
        }
    }

    async fn fetch(source: &S, block: BlockNumber) -> Result<(BlockHash, S::Payload), ChainError> {
        let hash = source.block_hash(block).await?;
        let payload = source.fetch_events(&hash).await?;
        Ok((hash, payload))
    }

    /// Process blocks until shutdown or a fatal error, forwarding every
    /// event as an encoded message tagged with its application
    pub async fn run(
        &mut self,
        routes: &AppRoutes,
        sender: &MessageSender,
        bus: &EventBus,
    ) -> Result<(), ListenerError> {
        info!(
            chain = self.source.name(),
            start_block = self.cursor,
            "Listener started"
        );

        while let Some(block) = self.next_block().await? {
            self.state = ListenerState::Emitting;
            let count = block.events.len();

            for event in &block.events {
                let class = event.asset_class();
                let app_id = routes.app_for(class).ok_or(ListenerError::NoRoute(class))?;
                let message = RelayMessage {
                    app_id,
                    kind: event.kind(),
                    origin_block: block.number,
                    payload: codec::encode(event, block.number),
                };

                match sender.send(message, &mut self.shutdown).await {
                    Ok(()) => {}
                    Err(SendError::Shutdown) => {
                        info!(chain = self.source.name(), block = block.number, "Listener stopped");
                        return Ok(());
                    }
                    Err(SendError::Closed) => return Err(ListenerError::ChannelClosed),
                }

                info!(
                    chain = self.source.name(),
                    block = block.number,
                    app = %app_id,
                    kind = %event.kind(),
                    amount = %event.amount(),
                    "Forwarded bridge event"
                );
                bus.publish(BridgeEvent::MessageEmitted {
                    chain: self.source.name().to_string(),
                    block: block.number,
                    app_id,
                    kind: event.kind(),
                });
            }

            debug!(
                chain = self.source.name(),
                block = block.number,
                hash = %block.hash,
                events = count,
                "Processed block"
            );
            bus.publish(BridgeEvent::BlockProcessed {
                chain: self.source.name().to_string(),
                block: block.number,
                events: count,
            });
        }

        info!(chain = self.source.name(), cursor = self.cursor, "Listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::message_channel;
    use crate::shutdown;
    use crate::testing::{eth_transfer, routes, MockSource};
    use alloy::primitives::U256;

    const RETRY: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn test_cursor_is_monotonic_without_gaps() {
        let source = Arc::new(MockSource::new("substrate").with_head(5));
        let (_trigger, stop) = shutdown::channel();
        let mut listener = ChainListener::new(source.clone(), 1, RETRY, stop);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let block = listener.next_block().await.unwrap().unwrap();
            seen.push(block.number);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(listener.cursor(), 6);
        assert_eq!(source.fetched_blocks(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_waits_for_finality() {
        let source = Arc::new(MockSource::new("substrate").with_heads([2, 2, 3, 3, 4]));
        let (_trigger, stop) = shutdown::channel();
        let mut listener = ChainListener::new(source.clone(), 2, RETRY, stop);

        for expected in 2..=4 {
            let block = listener.next_block().await.unwrap().unwrap();
            assert_eq!(block.number, expected);
        }
        for (block, head) in source.fetch_log() {
            assert!(block <= head, "block {} fetched with head {}", block, head);
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let source = Arc::new(
            MockSource::new("substrate")
                .with_head(3)
                .fail_head_times(2)
                .fail_fetch(3, 2),
        );
        let (_trigger, stop) = shutdown::channel();
        let mut listener = ChainListener::new(source.clone(), 3, RETRY, stop);

        let block = listener.next_block().await.unwrap().unwrap();
        assert_eq!(block.number, 3);
        assert_eq!(listener.cursor(), 4);
    }

    #[tokio::test]
    async fn test_decode_failure_is_fatal() {
        let source = Arc::new(MockSource::new("substrate").with_head(2).corrupt_block(2));
        let (_trigger, stop) = shutdown::channel();
        let mut listener = ChainListener::new(source, 1, RETRY, stop);

        assert!(listener.next_block().await.unwrap().is_some());
        let err = listener.next_block().await.unwrap_err();
        assert!(matches!(err, ListenerError::Decode { block: 2, .. }));
        assert_eq!(listener.cursor(), 2);
    }

    #[tokio::test]
    async fn test_malformed_fetch_is_retried() {
        let source = Arc::new(
            MockSource::new("substrate")
                .with_head(1)
                .with_events(1, vec![eth_transfer(7)])
                .fail_fetch_with(1, ChainError::Malformed("502 html body".into()))
                .fail_fetch_with(1, ChainError::Transaction("unexpected".into())),
        );
        let (_trigger, stop) = shutdown::channel();
        let mut listener = ChainListener::new(source.clone(), 1, RETRY, stop);

        let block = listener.next_block().await.unwrap().unwrap();
        assert_eq!(block.number, 1);
        assert_eq!(block.events, vec![eth_transfer(7)]);
        assert_eq!(listener.cursor(), 2);
        assert_eq!(source.fetched_blocks(), vec![1]);
    }

    #[tokio::test]
    async fn test_null_finalized_head_is_retried() {
        let source = Arc::new(
            MockSource::new("substrate")
                .with_head(4)
                .fail_head_with(ChainError::Malformed("null finalized head".into())),
        );
        let (_trigger, mut stop) = shutdown::channel();

        let start = resolve_start_block(&*source, None, RETRY, &mut stop).await;
        assert_eq!(start, Some(4));
        assert_eq!(source.head_queries(), 2);

        let source = Arc::new(
            MockSource::new("substrate")
                .with_head(4)
                .fail_head_with(ChainError::Malformed("null header".into())),
        );
        let mut listener = ChainListener::new(source, 4, RETRY, stop);
        assert_eq!(listener.next_block().await.unwrap().unwrap().number, 4);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_finality_wait() {
        let source = Arc::new(MockSource::new("substrate").with_head(0));
        let (trigger, stop) = shutdown::channel();
        let mut listener = ChainListener::new(source, 10, Duration::from_secs(60), stop);

        let handle = tokio::spawn(async move { listener.next_block().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener must stop promptly")
            .unwrap();
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_run_emits_tagged_messages_in_order() {
        let source = Arc::new(
            MockSource::new("substrate")
                .with_head(2)
                .with_events(1, vec![eth_transfer(10), eth_transfer(11)])
                .with_events(2, vec![eth_transfer(12)]),
        );
        let (trigger, mut stop) = shutdown::channel();
        let (tx, mut rx) = message_channel(8);
        let bus = EventBus::new(16);
        let routes = routes();
        let mut listener = ChainListener::new(source, 1, RETRY, stop.clone());

        let handle = tokio::spawn(async move { listener.run(&routes, &tx, &bus).await });

        let eth_app = crate::testing::routes().app_for(AssetClass::Eth).unwrap();
        for (amount, block) in [(10u64, 1u64), (11, 1), (12, 2)] {
            let message = rx.recv(&mut stop).await.unwrap();
            assert_eq!(message.app_id, eth_app);
            assert_eq!(message.origin_block, block);
            assert_eq!(message.payload.len(), codec::UNLOCK_MESSAGE_LEN);
            let decoded = codec::decode(&message.payload).unwrap();
            assert_eq!(decoded.amount, U256::from(amount));
        }

        trigger.trigger();
        assert_eq!(handle.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_start_block_defaults_to_finalized_head() {
        let source = MockSource::new("substrate").with_head(42);
        let (_trigger, mut stop) = shutdown::channel();

        let configured = resolve_start_block(&source, Some(7), RETRY, &mut stop).await;
        assert_eq!(configured, Some(7));
        let resolved = resolve_start_block(&source, None, RETRY, &mut stop).await;
        assert_eq!(resolved, Some(42));
    }
}
