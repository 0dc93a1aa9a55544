//! Sample events and routes

use alloy::primitives::U256;

use crate::routing::AppRoutes;
use crate::types::{AccountId32, AppId, AssetClass, EvmAddress, RawEvent};

pub const ETH_APP: AppId = AppId(EvmAddress([0xe1; 20]));
pub const ERC20_APP: AppId = AppId(EvmAddress([0xe2; 20]));

/// Routing table with one app per asset class
pub fn routes() -> AppRoutes {
    // Both classes are present and the apps differ, so construction succeeds
    match AppRoutes::new([(AssetClass::Eth, ETH_APP), (AssetClass::Erc20, ERC20_APP)]) {
        Ok(routes) => routes,
        Err(e) => panic!("fixture routes are invalid: {}", e),
    }
}

/// Substrate-side ether burn of `amount`
pub fn eth_transfer(amount: u64) -> RawEvent {
    RawEvent::EthTransfer {
        sender: AccountId32([0x5a; 32]),
        recipient: EvmAddress([0xbe; 20]),
        amount: U256::from(amount),
    }
}

/// Substrate-side token burn of `amount`
pub fn erc20_transfer(token: EvmAddress, amount: u64) -> RawEvent {
    RawEvent::Erc20Transfer {
        sender: AccountId32([0x5b; 32]),
        recipient: EvmAddress([0xbf; 20]),
        token,
        amount: U256::from(amount),
    }
}

/// Ethereum-side ether deposit
pub fn eth_deposit(amount: u64, nonce: u64) -> RawEvent {
    RawEvent::SendEth {
        sender: EvmAddress([0xd1; 20]),
        recipient: AccountId32([0x5c; 32]),
        amount: U256::from(amount),
        nonce,
    }
}
