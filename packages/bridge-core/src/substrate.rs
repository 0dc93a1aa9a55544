//! Substrate event records
//!
//! SCALE layout of the bridge runtime's `System.Events` storage value and
//! its conversion into bridge events. Every record must decode: a pallet or
//! variant index not listed here means the runtime changed under us, which
//! is reported as an error rather than skipped.

use alloy::primitives::U256;
use parity_scale_codec::{Decode, Encode};

use crate::chain::EventDecodeError;
use crate::types::{AccountId32, EvmAddress, RawEvent};

/// Storage key of `System.Events`: twox128("System") ++ twox128("Events")
pub const SYSTEM_EVENTS_KEY: &str =
    "0x26aa394eea5630e07c48ae0c9558cef780d41e5e16056765bc8461851072c9d7";

pub type AccountId = [u8; 32];
pub type H160 = [u8; 20];
/// SCALE encodes 256-bit integers as 32 little-endian bytes
pub type ScaleU256 = [u8; 32];
pub type Balance = u128;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Phase {
    ApplyExtrinsic(u32),
    Finalization,
    Initialization,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct EventRecord {
    pub phase: Phase,
    pub event: RuntimeEvent,
    pub topics: Vec<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum RuntimeEvent {
    #[codec(index = 0)]
    System(SystemEvent),
    #[codec(index = 4)]
    Balances(BalancesEvent),
    #[codec(index = 8)]
    Eth(EthEvent),
    #[codec(index = 9)]
    Erc20(Erc20Event),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum DispatchClass {
    Normal,
    Operational,
    Mandatory,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct DispatchInfo {
    pub weight: u64,
    pub class: DispatchClass,
    pub pays_fee: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum DispatchError {
    Other,
    CannotLookup,
    BadOrigin,
    Module { index: u8, error: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum SystemEvent {
    ExtrinsicSuccess(DispatchInfo),
    ExtrinsicFailed(DispatchError, DispatchInfo),
    CodeUpdated,
    NewAccount(AccountId),
    KilledAccount(AccountId),
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum BalancesEvent {
    Endowed(AccountId, Balance),
    DustLost(AccountId, Balance),
    Transfer(AccountId, AccountId, Balance),
    BalanceSet(AccountId, Balance, Balance),
    Deposit(AccountId, Balance),
}

/// Wrapped ether burned for an Ethereum recipient
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum EthEvent {
    Transfer(AccountId, H160, ScaleU256),
}

/// Wrapped tokens burned for an Ethereum recipient
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Erc20Event {
    Transfer(AccountId, H160, H160, ScaleU256),
}

impl RuntimeEvent {
    /// Bridge event carried by this record, if any
    pub fn into_bridge_event(self) -> Option<RawEvent> {
        match self {
            RuntimeEvent::Eth(EthEvent::Transfer(sender, recipient, amount)) => {
                Some(RawEvent::EthTransfer {
                    sender: AccountId32(sender),
                    recipient: EvmAddress(recipient),
                    amount: U256::from_le_bytes(amount),
                })
            }
            RuntimeEvent::Erc20(Erc20Event::Transfer(sender, recipient, token, amount)) => {
                Some(RawEvent::Erc20Transfer {
                    sender: AccountId32(sender),
                    recipient: EvmAddress(recipient),
                    token: EvmAddress(token),
                    amount: U256::from_le_bytes(amount),
                })
            }
            RuntimeEvent::System(_) | RuntimeEvent::Balances(_) => None,
        }
    }
}

/// Decode a raw `System.Events` value into bridge events in record order
pub fn decode_event_records(raw: &[u8]) -> Result<Vec<RawEvent>, EventDecodeError> {
    let mut input = raw;
    let records = Vec::<EventRecord>::decode(&mut input)
        .map_err(|e| EventDecodeError::Scale(e.to_string()))?;
    if !input.is_empty() {
        return Err(EventDecodeError::TrailingBytes(input.len()));
    }

    Ok(records
        .into_iter()
        .filter_map(|record| record.event.into_bridge_event())
        .collect())
}

/// Encode `amount` the way the runtime stores it
pub fn scale_u256(amount: U256) -> ScaleU256 {
    amount.to_le_bytes::<32>()
}
