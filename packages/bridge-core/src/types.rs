//! Common types for cross-chain relaying
//!
//! Identifiers of both chains, the tagged source events and the envelope
//! that travels through the message channel.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Source-chain block number
pub type BlockNumber = u64;

/// Token amounts are unsigned 256-bit integers on both chains
pub type Amount = U256;

/// Errors raised while parsing identifiers from text
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("unknown asset class: {0}")]
    UnknownAssetClass(String),
}

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != N {
        return Err(ParseError::Length {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

// ============================================================================
// Chain identifiers
// ============================================================================

/// Substrate account id (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccountId32(pub [u8; 32]);

impl AccountId32 {
    /// Create from hex string (with or without 0x prefix)
    pub fn from_hex(hex: &str) -> Result<Self, ParseError> {
        parse_fixed::<32>(hex).map(AccountId32)
    }

    /// Convert to hex string with 0x prefix
    pub fn as_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AccountId32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// EVM address (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    /// Create from hex string (with or without 0x prefix)
    pub fn from_hex(hex: &str) -> Result<Self, ParseError> {
        parse_fixed::<20>(hex).map(EvmAddress)
    }

    /// Convert to hex string with 0x prefix
    pub fn as_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl From<alloy::primitives::Address> for EvmAddress {
    fn from(address: alloy::primitives::Address) -> Self {
        EvmAddress(address.0 .0)
    }
}

impl From<EvmAddress> for alloy::primitives::Address {
    fn from(address: EvmAddress) -> Self {
        alloy::primitives::Address::from(address.0)
    }
}

/// Block hash (32 bytes) on either chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn from_hex(hex: &str) -> Result<Self, ParseError> {
        parse_fixed::<32>(hex).map(BlockHash)
    }

    pub fn as_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// Routing id of a destination application (the app contract's address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(pub EvmAddress);

impl AppId {
    pub fn from_hex(hex: &str) -> Result<Self, ParseError> {
        EvmAddress::from_hex(hex).map(AppId)
    }

    pub fn address(&self) -> EvmAddress {
        self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Assets
// ============================================================================

/// Abstract asset class; each class is served by one destination application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetClass {
    /// Native ether
    Eth,
    /// ERC20 tokens
    Erc20,
}

impl AssetClass {
    pub const ALL: [AssetClass; 2] = [AssetClass::Eth, AssetClass::Erc20];

    pub fn tag(&self) -> &'static str {
        match self {
            AssetClass::Eth => "eth",
            AssetClass::Erc20 => "erc20",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AssetClass {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eth" => Ok(AssetClass::Eth),
            "erc20" => Ok(AssetClass::Erc20),
            other => Err(ParseError::UnknownAssetClass(other.to_string())),
        }
    }
}

/// Concrete asset held by a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Native,
    Token(EvmAddress),
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => f.write_str("native"),
            Asset::Token(token) => write!(f, "token:{}", token),
        }
    }
}

// ============================================================================
// Source events and channel envelope
// ============================================================================

/// Chain-native bridge event, one variant per event kind per source chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Substrate ETH pallet burned wrapped ether for an Ethereum recipient
    EthTransfer {
        sender: AccountId32,
        recipient: EvmAddress,
        amount: Amount,
    },
    /// Substrate ERC20 pallet burned wrapped tokens for an Ethereum recipient
    Erc20Transfer {
        sender: AccountId32,
        recipient: EvmAddress,
        token: EvmAddress,
        amount: Amount,
    },
    /// Ethereum ETH app accepted a deposit for a Substrate recipient
    SendEth {
        sender: EvmAddress,
        recipient: AccountId32,
        amount: Amount,
        nonce: u64,
    },
    /// Ethereum ERC20 app accepted a token deposit for a Substrate recipient
    SendErc20 {
        sender: EvmAddress,
        recipient: AccountId32,
        token: EvmAddress,
        amount: Amount,
        nonce: u64,
    },
}

impl RawEvent {
    pub fn asset_class(&self) -> AssetClass {
        match self {
            RawEvent::EthTransfer { .. } | RawEvent::SendEth { .. } => AssetClass::Eth,
            RawEvent::Erc20Transfer { .. } | RawEvent::SendErc20 { .. } => AssetClass::Erc20,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            RawEvent::EthTransfer { .. } | RawEvent::Erc20Transfer { .. } => MessageKind::Unlock,
            RawEvent::SendEth { .. } | RawEvent::SendErc20 { .. } => MessageKind::Lock,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            RawEvent::EthTransfer { amount, .. }
            | RawEvent::Erc20Transfer { amount, .. }
            | RawEvent::SendEth { amount, .. }
            | RawEvent::SendErc20 { amount, .. } => *amount,
        }
    }
}

/// What the destination application does with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Record a deposit accepted by the application
    Lock,
    /// Release previously locked value to a recipient
    Unlock,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Lock => "lock",
            MessageKind::Unlock => "unlock",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope carried by the message channel; the payload is opaque until
/// the dispatcher decodes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub app_id: AppId,
    pub kind: MessageKind,
    /// Source block the event was finalized in
    pub origin_block: BlockNumber,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evm_address_from_hex() {
        let addr = EvmAddress::from_hex("0xdead000000000000000000000000000000000000").unwrap();
        assert_eq!(addr.0[0], 0xde);
        assert_eq!(addr.0[1], 0xad);
        assert_eq!(addr.as_hex(), "0xdead000000000000000000000000000000000000");
    }

    #[test]
    fn test_evm_address_rejects_wrong_length() {
        let err = EvmAddress::from_hex("0xdead").unwrap_err();
        assert_eq!(
            err,
            ParseError::Length {
                expected: 20,
                actual: 2
            }
        );
    }

    #[test]
    fn test_account_id_without_prefix() {
        let hex = "8eaf04151687736326c9fea17e25fc5287613693c912909cb226aa4794f26a48";
        let account = AccountId32::from_hex(hex).unwrap();
        assert_eq!(account.as_hex(), format!("0x{}", hex));
    }

    #[test]
    fn test_asset_class_tags() {
        assert_eq!("eth".parse::<AssetClass>().unwrap(), AssetClass::Eth);
        assert_eq!(" ERC20 ".parse::<AssetClass>().unwrap(), AssetClass::Erc20);
        assert!("dot".parse::<AssetClass>().is_err());
        assert_eq!(AssetClass::Erc20.to_string(), "erc20");
    }

    #[test]
    fn test_event_classification() {
        let event = RawEvent::SendErc20 {
            sender: EvmAddress([1; 20]),
            recipient: AccountId32([2; 32]),
            token: EvmAddress([3; 20]),
            amount: U256::from(5u64),
            nonce: 1,
        };
        assert_eq!(event.asset_class(), AssetClass::Erc20);
        assert_eq!(event.kind(), MessageKind::Lock);
        assert_eq!(event.amount(), U256::from(5u64));
    }

    #[test]
    fn test_address_conversion_roundtrip() {
        let addr = EvmAddress([7; 20]);
        let alloy_addr: alloy::primitives::Address = addr.into();
        assert_eq!(EvmAddress::from(alloy_addr), addr);
    }
}
