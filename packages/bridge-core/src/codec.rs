//! Canonical message codec
//!
//! Converts source events into fixed-width binary messages and back. All
//! integers are big-endian and every schema has exactly one valid length:
//! inputs are never truncated or zero-padded.
//!
//! ```text
//! Unlock          [0,32) sender  [32,52) recipient  [52,84) amount
//! TokenTransfer   sender 32 | recipient 20 | token 20 | amount 32 | block 8
//! NativeDeposit   sender 20 | recipient 32 | amount 32 | nonce 8 | block 8
//! TokenDeposit    sender 20 | recipient 32 | token 20 | amount 32 | nonce 8 | block 8
//! ```
//!
//! Ether unlocks travel as the bare `Unlock` message. Their origin block
//! rides on the `RelayMessage` envelope instead of the payload.

use alloy::primitives::U256;
use std::fmt;
use thiserror::Error;

use crate::types::{
    AccountId32, Amount, AssetClass, BlockNumber, EvmAddress, MessageKind, RawEvent,
};

/// Length of the single-asset unlock message
pub const UNLOCK_MESSAGE_LEN: usize = 84;

const SENDER_OFFSET: usize = 0;
const RECIPIENT_OFFSET: usize = 32;
const AMOUNT_OFFSET: usize = 52;

/// Fixed layout of an encoded message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    Unlock,
    TokenTransfer,
    NativeDeposit,
    TokenDeposit,
}

impl Schema {
    pub fn expected_len(&self) -> usize {
        match self {
            Schema::Unlock => UNLOCK_MESSAGE_LEN,
            Schema::TokenTransfer => 32 + 20 + 20 + 32 + 8,
            Schema::NativeDeposit => 20 + 32 + 32 + 8 + 8,
            Schema::TokenDeposit => 20 + 32 + 20 + 32 + 8 + 8,
        }
    }

    /// Schema the destination application expects for a message
    pub fn for_message(kind: MessageKind, class: AssetClass) -> Self {
        match (kind, class) {
            (MessageKind::Unlock, AssetClass::Eth) => Schema::Unlock,
            (MessageKind::Unlock, AssetClass::Erc20) => Schema::TokenTransfer,
            (MessageKind::Lock, AssetClass::Eth) => Schema::NativeDeposit,
            (MessageKind::Lock, AssetClass::Erc20) => Schema::TokenDeposit,
        }
    }

    /// Schema produced by `encode` for an event
    pub fn for_event(event: &RawEvent) -> Self {
        Self::for_message(event.kind(), event.asset_class())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Schema::Unlock => "unlock",
            Schema::TokenTransfer => "token-transfer",
            Schema::NativeDeposit => "native-deposit",
            Schema::TokenDeposit => "token-deposit",
        };
        f.write_str(name)
    }
}

/// Message-level decode failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{schema} message must be exactly {expected} bytes, got {actual}")]
    Length {
        schema: Schema,
        expected: usize,
        actual: usize,
    },
}

/// Decoded unlock-direction message (Substrate sender, Ethereum recipient)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalMessage {
    pub sender: AccountId32,
    pub recipient: EvmAddress,
    pub amount: Amount,
    pub token: Option<EvmAddress>,
    pub origin_block: Option<BlockNumber>,
}

/// Decoded lock-direction message (Ethereum sender, Substrate recipient)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositMessage {
    pub sender: EvmAddress,
    pub recipient: AccountId32,
    pub amount: Amount,
    pub token: Option<EvmAddress>,
    pub nonce: u64,
    pub origin_block: BlockNumber,
}

/// Result of decoding any schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Transfer(CanonicalMessage),
    Deposit(DepositMessage),
}

impl Decoded {
    /// Rebuild the source event; `None` when the message carries no
    /// origin block (bare unlock messages)
    pub fn into_event(self) -> (RawEvent, Option<BlockNumber>) {
        match self {
            Decoded::Transfer(msg) => {
                let event = match msg.token {
                    None => RawEvent::EthTransfer {
                        sender: msg.sender,
                        recipient: msg.recipient,
                        amount: msg.amount,
                    },
                    Some(token) => RawEvent::Erc20Transfer {
                        sender: msg.sender,
                        recipient: msg.recipient,
                        token,
                        amount: msg.amount,
                    },
                };
                (event, msg.origin_block)
            }
            Decoded::Deposit(msg) => {
                let event = match msg.token {
                    None => RawEvent::SendEth {
                        sender: msg.sender,
                        recipient: msg.recipient,
                        amount: msg.amount,
                        nonce: msg.nonce,
                    },
                    Some(token) => RawEvent::SendErc20 {
                        sender: msg.sender,
                        recipient: msg.recipient,
                        token,
                        amount: msg.amount,
                        nonce: msg.nonce,
                    },
                };
                (event, Some(msg.origin_block))
            }
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Serialize an event in the schema its destination expects. The origin
/// block is appended for every schema except `Unlock`. Purely structural:
/// amounts are not validated here.
pub fn encode(event: &RawEvent, origin_block: BlockNumber) -> Vec<u8> {
    let mut out = Vec::with_capacity(Schema::for_event(event).expected_len());
    match event {
        RawEvent::EthTransfer {
            sender,
            recipient,
            amount,
        } => return encode_unlock(sender, recipient, amount),
        RawEvent::Erc20Transfer {
            sender,
            recipient,
            token,
            amount,
        } => {
            out.extend_from_slice(&sender.0);
            out.extend_from_slice(&recipient.0);
            out.extend_from_slice(&token.0);
            out.extend_from_slice(&amount.to_be_bytes::<32>());
        }
        RawEvent::SendEth {
            sender,
            recipient,
            amount,
            nonce,
        } => {
            out.extend_from_slice(&sender.0);
            out.extend_from_slice(&recipient.0);
            out.extend_from_slice(&amount.to_be_bytes::<32>());
            out.extend_from_slice(&nonce.to_be_bytes());
        }
        RawEvent::SendErc20 {
            sender,
            recipient,
            token,
            amount,
            nonce,
        } => {
            out.extend_from_slice(&sender.0);
            out.extend_from_slice(&recipient.0);
            out.extend_from_slice(&token.0);
            out.extend_from_slice(&amount.to_be_bytes::<32>());
            out.extend_from_slice(&nonce.to_be_bytes());
        }
    }
    out.extend_from_slice(&origin_block.to_be_bytes());
    out
}

/// Encode the bare 84-byte single-asset unlock message
pub fn encode_unlock(sender: &AccountId32, recipient: &EvmAddress, amount: &Amount) -> Vec<u8> {
    let mut out = Vec::with_capacity(UNLOCK_MESSAGE_LEN);
    out.extend_from_slice(&sender.0);
    out.extend_from_slice(&recipient.0);
    out.extend_from_slice(&amount.to_be_bytes::<32>());
    out
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode the 84-byte single-asset unlock message
pub fn decode(bytes: &[u8]) -> Result<CanonicalMessage, DecodeError> {
    check_len(Schema::Unlock, bytes)?;
    Ok(CanonicalMessage {
        sender: AccountId32(fixed(bytes, SENDER_OFFSET)),
        recipient: EvmAddress(fixed(bytes, RECIPIENT_OFFSET)),
        amount: amount_at(bytes, AMOUNT_OFFSET),
        token: None,
        origin_block: None,
    })
}

/// Decode a message of the given schema
pub fn decode_as(schema: Schema, bytes: &[u8]) -> Result<Decoded, DecodeError> {
    check_len(schema, bytes)?;
    let decoded = match schema {
        Schema::Unlock => Decoded::Transfer(decode(bytes)?),
        Schema::TokenTransfer => Decoded::Transfer(CanonicalMessage {
            sender: AccountId32(fixed(bytes, 0)),
            recipient: EvmAddress(fixed(bytes, 32)),
            token: Some(EvmAddress(fixed(bytes, 52))),
            amount: amount_at(bytes, 72),
            origin_block: Some(u64_at(bytes, 104)),
        }),
        Schema::NativeDeposit => Decoded::Deposit(DepositMessage {
            sender: EvmAddress(fixed(bytes, 0)),
            recipient: AccountId32(fixed(bytes, 20)),
            token: None,
            amount: amount_at(bytes, 52),
            nonce: u64_at(bytes, 84),
            origin_block: u64_at(bytes, 92),
        }),
        Schema::TokenDeposit => Decoded::Deposit(DepositMessage {
            sender: EvmAddress(fixed(bytes, 0)),
            recipient: AccountId32(fixed(bytes, 20)),
            token: Some(EvmAddress(fixed(bytes, 52))),
            amount: amount_at(bytes, 72),
            nonce: u64_at(bytes, 104),
            origin_block: u64_at(bytes, 112),
        }),
    };
    Ok(decoded)
}

fn check_len(schema: Schema, bytes: &[u8]) -> Result<(), DecodeError> {
    let expected = schema.expected_len();
    if bytes.len() != expected {
        return Err(DecodeError::Length {
            schema,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

// Callers have already checked the length, so the slices are in bounds.
fn fixed<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

fn amount_at(bytes: &[u8], offset: usize) -> Amount {
    U256::from_be_bytes(fixed::<32>(bytes, offset))
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes(fixed::<8>(bytes, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_transfer(amount: u64) -> RawEvent {
        RawEvent::EthTransfer {
            sender: AccountId32([0x11; 32]),
            recipient: EvmAddress([0x22; 20]),
            amount: U256::from(amount),
        }
    }

    #[test]
    fn test_decode_fixed_offsets() {
        let mut bytes = vec![0u8; 84];
        bytes[..32].fill(0xaa);
        bytes[32..52].fill(0xbb);
        bytes[83] = 0x0a;

        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.sender, AccountId32([0xaa; 32]));
        assert_eq!(msg.recipient, EvmAddress([0xbb; 20]));
        assert_eq!(msg.amount, U256::from(10u64));
        assert_eq!(msg.token, None);
        assert_eq!(msg.origin_block, None);
    }

    #[test]
    fn test_amount_is_big_endian_unsigned() {
        let mut bytes = vec![0u8; 84];
        bytes[52] = 0x80;
        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.amount, U256::from(1u8) << 255);
    }

    #[test]
    fn test_decode_rejects_every_other_length() {
        for len in [0usize, 1, 52, 83, 85, 90, 92] {
            let err = decode(&vec![0u8; len]).unwrap_err();
            assert_eq!(
                err,
                DecodeError::Length {
                    schema: Schema::Unlock,
                    expected: 84,
                    actual: len
                }
            );
        }
    }

    #[test]
    fn test_ninety_byte_message_is_length_error() {
        assert!(matches!(
            decode(&[7u8; 90]),
            Err(DecodeError::Length { actual: 90, .. })
        ));
    }

    #[test]
    fn test_zero_amount_decodes() {
        let bytes = encode_unlock(&AccountId32([1; 32]), &EvmAddress([2; 20]), &U256::ZERO);
        assert_eq!(bytes.len(), 84);
        assert_eq!(decode(&bytes).unwrap().amount, U256::ZERO);
    }

    #[test]
    fn test_ether_transfer_encodes_bare_unlock() {
        let bytes = encode(&eth_transfer(99), 7);
        assert_eq!(bytes.len(), UNLOCK_MESSAGE_LEN);
        assert_eq!(
            bytes,
            encode_unlock(&AccountId32([0x11; 32]), &EvmAddress([0x22; 20]), &U256::from(99u64))
        );

        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.amount, U256::from(99u64));
        assert_eq!(msg.origin_block, None);
    }

    #[test]
    fn test_roundtrip_all_event_kinds() {
        let events = vec![
            eth_transfer(1),
            RawEvent::Erc20Transfer {
                sender: AccountId32([3; 32]),
                recipient: EvmAddress([4; 20]),
                token: EvmAddress([5; 20]),
                amount: U256::MAX,
            },
            RawEvent::SendEth {
                sender: EvmAddress([6; 20]),
                recipient: AccountId32([7; 32]),
                amount: U256::from(10u64),
                nonce: 7,
            },
            RawEvent::SendErc20 {
                sender: EvmAddress([8; 20]),
                recipient: AccountId32([9; 32]),
                token: EvmAddress([10; 20]),
                amount: U256::from(u128::MAX),
                nonce: u64::MAX,
            },
        ];

        for (block, event) in events.into_iter().enumerate() {
            let block = block as u64 + 1_000;
            let schema = Schema::for_event(&event);
            let bytes = encode(&event, block);
            assert_eq!(bytes.len(), schema.expected_len(), "{}", schema);

            let (decoded, origin) = decode_as(schema, &bytes).unwrap().into_event();
            assert_eq!(decoded, event);
            let expected = (schema != Schema::Unlock).then_some(block);
            assert_eq!(origin, expected, "{}", schema);
        }
    }

    #[test]
    fn test_decode_as_rejects_wrong_schema_length() {
        let bytes = encode(&eth_transfer(5), 1);
        let err = decode_as(Schema::TokenTransfer, &bytes).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Length {
                schema: Schema::TokenTransfer,
                expected: 112,
                actual: 84
            }
        );
    }

    #[test]
    fn test_schema_selection() {
        assert_eq!(
            Schema::for_message(MessageKind::Unlock, AssetClass::Eth),
            Schema::Unlock
        );
        assert_eq!(
            Schema::for_message(MessageKind::Lock, AssetClass::Erc20),
            Schema::TokenDeposit
        );
        assert_eq!(Schema::NativeDeposit.expected_len(), 100);
        assert_eq!(Schema::TokenDeposit.expected_len(), 120);
    }
}
