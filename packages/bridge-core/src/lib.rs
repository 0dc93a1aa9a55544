//! Bridge Core: Cross-Chain Relay Pipeline
//!
//! This crate holds the relay between a Substrate chain and an EVM chain,
//! independent of any RPC client or process setup:
//!
//! - **Types** - Chain identifiers, asset classes, tagged source events
//! - **Codec** - Fixed-width canonical message encoding and strict decoding
//! - **Event decoders** - SCALE `System.Events` records and Ethereum `AppEvent` logs
//! - **Listener** - Finality-aware block polling with retry classification
//! - **Channel** - Bounded FIFO hand-off with backpressure
//! - **Ledger** - Locked-balance accounting guarding releases
//! - **Dispatcher** - Routes, decodes and applies messages per application
//! - **Events** - Broadcast bus reporting what the pipeline did
//!
//! ## Data flow
//!
//! ```text
//! SourceChain -> ChainListener -> codec::encode -> MessageChannel
//!     -> Dispatcher -> codec::decode_as -> LedgerGuard -> DestinationChain
//! ```
//!
//! ## Feature Flags
//!
//! - `testing` - Mock chains and fixtures for integration tests

pub mod chain;
pub mod channel;
pub mod codec;
pub mod dispatcher;
pub mod ethereum;
pub mod events;
pub mod ledger;
pub mod listener;
pub mod routing;
pub mod shutdown;
pub mod substrate;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chain::{ChainError, DestinationChain, ErrorClass, EventDecodeError, SourceChain, TxReceipt};
pub use channel::{message_channel, DepthProbe, MessageReceiver, MessageSender, SendError};
pub use codec::{decode, decode_as, encode, CanonicalMessage, DecodeError, Decoded, Schema};
pub use dispatcher::{Dispatcher, LedgerSnapshot, Outcome};
pub use events::{BridgeEvent, DropReason, EventBus};
pub use ledger::{LedgerError, LedgerGuard, LedgerState};
pub use listener::{resolve_start_block, ChainListener, FinalizedBlock, ListenerError, ListenerState};
pub use routing::{AppRoutes, RoutingError};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use types::{
    AccountId32, Amount, AppId, Asset, AssetClass, BlockHash, BlockNumber, EvmAddress,
    MessageKind, ParseError, RawEvent, RelayMessage,
};
