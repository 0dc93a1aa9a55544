//! Chain interfaces
//!
//! The listener only needs finality, block hashes and an event payload per
//! block from a source chain; the ledger only needs a way to release value on
//! the destination chain. Concrete RPC clients live in the relayer binary.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Amount, Asset, BlockHash, BlockNumber, EvmAddress, RawEvent};

/// Errors returned by chain clients
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("request timed out")]
    Timeout,

    #[error("block {0} not available")]
    BlockNotFound(BlockNumber),

    /// The node answered, but with data that cannot be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Abandoned because shutdown was requested while waiting
    #[error("cancelled by shutdown")]
    Cancelled,
}

/// How likely a chain error is to clear up on its own. Source fetches are
/// retried either way; the class only sets how loudly a failure is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network hiccup or a node that is behind
    Transient,
    /// Node answered with something unusable, likely to repeat until an
    /// operator looks at it
    Persistent,
}

impl ChainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::Rpc(_) | ChainError::Timeout | ChainError::BlockNotFound(_) => {
                ErrorClass::Transient
            }
            ChainError::Malformed(_) | ChainError::Transaction(_) | ChainError::Cancelled => {
                ErrorClass::Persistent
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Failure to turn a block's event payload into events
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventDecodeError {
    #[error("scale decode failed: {0}")]
    Scale(String),

    #[error("abi decode failed: {0}")]
    Abi(String),

    #[error("unknown event tag {0}")]
    UnknownTag(String),

    #[error("{0} trailing bytes after event records")]
    TrailingBytes(usize),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Receipt of a destination-chain release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: [u8; 32],
}

impl TxReceipt {
    pub fn as_hex(&self) -> String {
        format!("0x{}", hex::encode(self.tx_hash))
    }
}

/// A chain the relayer reads finalized events from
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Raw per-block event data as returned by the node
    type Payload: Send;

    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Highest block number considered final
    async fn finalized_head(&self) -> Result<BlockNumber, ChainError>;

    /// Canonical hash of a block at or below the finalized head
    async fn block_hash(&self, number: BlockNumber) -> Result<BlockHash, ChainError>;

    /// Event payload of a block
    async fn fetch_events(&self, hash: &BlockHash) -> Result<Self::Payload, ChainError>;

    /// Bridge-relevant events of a payload in chain order. Events unrelated
    /// to the bridge are skipped; undecodable data is an error.
    fn decode_events(&self, payload: Self::Payload) -> Result<Vec<RawEvent>, EventDecodeError>;
}

/// A chain the ledger releases value on
#[async_trait]
pub trait DestinationChain: Send + Sync {
    fn name(&self) -> &str;

    /// Transfer `amount` of `asset` to `recipient`
    async fn release(
        &self,
        asset: Asset,
        recipient: EvmAddress,
        amount: Amount,
    ) -> Result<TxReceipt, ChainError>;
}
