//! Mock Chains
//!
//! `MockSource` plays back a scripted finality schedule, per-block events
//! and injected failures, and records every block it was asked for together
//! with the finalized head at that moment. `MockDestination` records every
//! release and can be switched to fail or to never answer.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::chain::{ChainError, DestinationChain, EventDecodeError, SourceChain, TxReceipt};
use crate::types::{Amount, Asset, BlockHash, BlockNumber, EvmAddress, RawEvent};

/// Payload handed from `fetch_events` to `decode_events`
#[derive(Debug, Clone)]
pub enum MockPayload {
    Events(Vec<RawEvent>),
    Corrupt(BlockNumber),
}

#[derive(Debug, Default)]
struct SourceState {
    /// Heads still to be reported, in order
    heads: VecDeque<BlockNumber>,
    /// Head reported once the script runs out
    head: BlockNumber,
    head_failures: VecDeque<ChainError>,
    head_queries: u32,
    fetch_failures: HashMap<BlockNumber, VecDeque<ChainError>>,
    events: HashMap<BlockNumber, Vec<RawEvent>>,
    corrupt: HashSet<BlockNumber>,
    /// (block, finalized head when the block was requested)
    fetch_log: Vec<(BlockNumber, BlockNumber)>,
}

/// Block hashes encode the block number so `fetch_events` can map back
pub fn mock_block_hash(number: BlockNumber) -> BlockHash {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&number.to_be_bytes());
    hash[31] = 0xbb;
    BlockHash(hash)
}

fn block_of(hash: &BlockHash) -> BlockNumber {
    let mut number = [0u8; 8];
    number.copy_from_slice(&hash.0[..8]);
    u64::from_be_bytes(number)
}

#[derive(Debug)]
pub struct MockSource {
    name: String,
    state: Mutex<SourceState>,
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SourceState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report `head` as finalized from now on
    pub fn with_head(self, head: BlockNumber) -> Self {
        self.set_head(head);
        self
    }

    /// Report these heads one per query, then keep the last
    pub fn with_heads(self, heads: impl IntoIterator<Item = BlockNumber>) -> Self {
        {
            let mut state = self.state();
            state.heads.extend(heads);
        }
        self
    }

    pub fn with_events(self, block: BlockNumber, events: Vec<RawEvent>) -> Self {
        self.state().events.insert(block, events);
        self
    }

    /// Make the next `times` head queries time out
    pub fn fail_head_times(self, times: u32) -> Self {
        {
            let mut state = self.state();
            for _ in 0..times {
                state.head_failures.push_back(ChainError::Timeout);
            }
        }
        self
    }

    /// Make the next head query fail with `error`
    pub fn fail_head_with(self, error: ChainError) -> Self {
        self.state().head_failures.push_back(error);
        self
    }

    /// Make the next `times` fetches of `block` fail with an RPC error
    pub fn fail_fetch(self, block: BlockNumber, times: u32) -> Self {
        {
            let mut state = self.state();
            let queue = state.fetch_failures.entry(block).or_default();
            for _ in 0..times {
                queue.push_back(ChainError::Rpc("connection reset".into()));
            }
        }
        self
    }

    /// Make the next fetch of `block` fail with `error`
    pub fn fail_fetch_with(self, block: BlockNumber, error: ChainError) -> Self {
        self.state()
            .fetch_failures
            .entry(block)
            .or_default()
            .push_back(error);
        self
    }

    /// Make the payload of `block` undecodable
    pub fn corrupt_block(self, block: BlockNumber) -> Self {
        self.state().corrupt.insert(block);
        self
    }

    /// Move finality forward while a listener is running
    pub fn set_head(&self, head: BlockNumber) {
        let mut state = self.state();
        state.heads.clear();
        state.head = head;
    }

    /// Blocks requested so far, in request order (retries included once
    /// per successful hash lookup)
    pub fn fetched_blocks(&self) -> Vec<BlockNumber> {
        self.state().fetch_log.iter().map(|(block, _)| *block).collect()
    }

    pub fn fetch_log(&self) -> Vec<(BlockNumber, BlockNumber)> {
        self.state().fetch_log.clone()
    }

    pub fn head_queries(&self) -> u32 {
        self.state().head_queries
    }
}

#[async_trait]
impl SourceChain for MockSource {
    type Payload = MockPayload;

    fn name(&self) -> &str {
        &self.name
    }

    async fn finalized_head(&self) -> Result<BlockNumber, ChainError> {
        let mut state = self.state();
        state.head_queries += 1;
        if let Some(error) = state.head_failures.pop_front() {
            return Err(error);
        }
        if let Some(head) = state.heads.pop_front() {
            state.head = head;
        }
        Ok(state.head)
    }

    async fn block_hash(&self, number: BlockNumber) -> Result<BlockHash, ChainError> {
        let mut state = self.state();
        if let Some(error) = state
            .fetch_failures
            .get_mut(&number)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if number > state.head {
            return Err(ChainError::BlockNotFound(number));
        }
        let head = state.head;
        state.fetch_log.push((number, head));
        Ok(mock_block_hash(number))
    }

    async fn fetch_events(&self, hash: &BlockHash) -> Result<MockPayload, ChainError> {
        let number = block_of(hash);
        let state = self.state();
        if state.corrupt.contains(&number) {
            return Ok(MockPayload::Corrupt(number));
        }
        Ok(MockPayload::Events(
            state.events.get(&number).cloned().unwrap_or_default(),
        ))
    }

    fn decode_events(&self, payload: MockPayload) -> Result<Vec<RawEvent>, EventDecodeError> {
        match payload {
            MockPayload::Events(events) => Ok(events),
            MockPayload::Corrupt(number) => Err(EventDecodeError::InvalidPayload(format!(
                "corrupt event record in block {}",
                number
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct DestinationState {
    releases: Vec<(Asset, EvmAddress, Amount)>,
    failing: bool,
    hanging: bool,
    attempts: u32,
}

#[derive(Debug, Default)]
pub struct MockDestination {
    state: Mutex<DestinationState>,
}

impl MockDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every release fails with a transaction error
    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Every release stays pending forever, like a transaction that never
    /// leaves the mempool
    pub fn hanging(self) -> Self {
        self.state().hanging = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Release calls so far, successful or not
    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    /// Successful releases in submission order
    pub fn releases(&self) -> Vec<(Asset, EvmAddress, Amount)> {
        self.state().releases.clone()
    }
}

#[async_trait]
impl DestinationChain for MockDestination {
    fn name(&self) -> &str {
        "mock-destination"
    }

    async fn release(
        &self,
        asset: Asset,
        recipient: EvmAddress,
        amount: Amount,
    ) -> Result<TxReceipt, ChainError> {
        let hanging = {
            let mut state = self.state();
            state.attempts += 1;
            state.hanging
        };
        if hanging {
            return std::future::pending().await;
        }
        let mut state = self.state();
        if state.failing {
            return Err(ChainError::Transaction("execution reverted".into()));
        }
        state.releases.push((asset, recipient, amount));
        let mut tx_hash = [0u8; 32];
        tx_hash[24..].copy_from_slice(&(state.releases.len() as u64).to_be_bytes());
        Ok(TxReceipt { tx_hash })
    }
}
