//! Ethereum application events
//!
//! The ETH and ERC20 application contracts report deposits as
//! `AppEvent(uint256 tag, bytes payload)`, where the payload is the ABI
//! encoding of `(address sender, bytes32 recipient, address token,
//! uint256 amount, uint256 nonce)`. Tag 0 is an ether deposit and tag 1 a
//! token deposit.

use alloy::primitives::{LogData, U256};
use alloy::sol;
use alloy::sol_types::{SolEvent, SolType};

use crate::chain::EventDecodeError;
use crate::types::{AccountId32, EvmAddress, RawEvent};

sol! {
    /// Event emitted by the application contracts
    event AppEvent(uint256 tag, bytes payload);

    /// ABI layout of `AppEvent.payload`
    struct AppPayload {
        address sender;
        bytes32 recipient;
        address token;
        uint256 amount;
        uint256 nonce;
    }
}

pub const TAG_SEND_ETH: u64 = 0;
pub const TAG_SEND_ERC20: u64 = 1;

/// Decode one `AppEvent` log
///
/// A nonce above `u64::MAX` is rejected with `InvalidPayload` rather than
/// truncated to its low 64 bits.
pub fn decode_app_event(log: &LogData) -> Result<RawEvent, EventDecodeError> {
    let event = AppEvent::decode_log_data(log, true)
        .map_err(|e| EventDecodeError::Abi(e.to_string()))?;
    let payload = <AppPayload as SolType>::abi_decode(&event.payload, true)
        .map_err(|e| EventDecodeError::Abi(e.to_string()))?;

    let nonce: u64 = payload.nonce.try_into().map_err(|_| {
        EventDecodeError::InvalidPayload(format!("nonce {} exceeds u64", payload.nonce))
    })?;
    let sender = EvmAddress::from(payload.sender);
    let recipient = AccountId32(payload.recipient.0);

    if event.tag == U256::from(TAG_SEND_ETH) {
        Ok(RawEvent::SendEth {
            sender,
            recipient,
            amount: payload.amount,
            nonce,
        })
    } else if event.tag == U256::from(TAG_SEND_ERC20) {
        Ok(RawEvent::SendErc20 {
            sender,
            recipient,
            token: EvmAddress::from(payload.token),
            amount: payload.amount,
            nonce,
        })
    } else {
        Err(EventDecodeError::UnknownTag(event.tag.to_string()))
    }
}

/// Decode every `AppEvent` among `logs`, keeping log order. Logs with a
/// different signature are ignored.
pub fn decode_app_logs<'a>(
    logs: impl IntoIterator<Item = &'a LogData>,
) -> Result<Vec<RawEvent>, EventDecodeError> {
    logs.into_iter()
        .filter(|log| log.topics().first() == Some(&AppEvent::SIGNATURE_HASH))
        .map(decode_app_event)
        .collect()
}

/// Build the log an application contract would emit for `event`
pub fn encode_app_event(event: &RawEvent) -> Option<LogData> {
    let (tag, sender, recipient, token, amount, nonce) = match event {
        RawEvent::SendEth {
            sender,
            recipient,
            amount,
            nonce,
        } => (
            TAG_SEND_ETH,
            sender,
            recipient,
            EvmAddress::default(),
            amount,
            nonce,
        ),
        RawEvent::SendErc20 {
            sender,
            recipient,
            token,
            amount,
            nonce,
        } => (TAG_SEND_ERC20, sender, recipient, *token, amount, nonce),
        RawEvent::EthTransfer { .. } | RawEvent::Erc20Transfer { .. } => return None,
    };

    let payload = AppPayload {
        sender: (*sender).into(),
        recipient: recipient.0.into(),
        token: token.into(),
        amount: *amount,
        nonce: U256::from(*nonce),
    };
    let event = AppEvent {
        tag: U256::from(tag),
        payload: <AppPayload as SolType>::abi_encode(&payload).into(),
    };
    Some(event.encode_log_data())
}
