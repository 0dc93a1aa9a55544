//! EVM source
//!
//! A block is final once it is `finality_blocks` below the chain head. Logs
//! are fetched by block hash so that a reorg between the hash lookup and the
//! log query cannot mix two forks.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use alloy::transports::TransportError;
use async_trait::async_trait;
use bridge_core::ethereum::{decode_app_logs, AppEvent};
use bridge_core::{
    AppRoutes, BlockHash, BlockNumber, ChainError, EventDecodeError, RawEvent, SourceChain,
};
use eyre::{Result, WrapErr};

pub struct EvmSource {
    name: String,
    provider: RootProvider<Http<Client>>,
    apps: Vec<Address>,
    finality_blocks: u64,
}

impl EvmSource {
    pub fn new(rpc_url: &str, routes: &AppRoutes, finality_blocks: u64) -> Result<Self> {
        let url = rpc_url.parse().wrap_err("Failed to parse RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            name: "ethereum".to_string(),
            provider,
            apps: routes.iter().map(|(_, app)| app.address().into()).collect(),
            finality_blocks,
        })
    }

    fn app_filter(&self, hash: &BlockHash) -> Filter {
        Filter::new()
            .address(self.apps.clone())
            .event_signature(AppEvent::SIGNATURE_HASH)
            .at_block_hash(B256::from(hash.0))
    }
}

fn map_transport_error(e: TransportError) -> ChainError {
    let message = e.to_string();
    if message.to_lowercase().contains("timed out") {
        ChainError::Timeout
    } else {
        ChainError::Rpc(message)
    }
}

/// Highest block considered final given the current head
pub fn finalized_below(head: BlockNumber, finality_blocks: u64) -> BlockNumber {
    head.saturating_sub(finality_blocks)
}

#[async_trait]
impl SourceChain for EvmSource {
    type Payload = Vec<Log>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn finalized_head(&self) -> Result<BlockNumber, ChainError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(map_transport_error)?;
        Ok(finalized_below(head, self.finality_blocks))
    }

    async fn block_hash(&self, number: BlockNumber) -> Result<BlockHash, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number), BlockTransactionsKind::Hashes)
            .await
            .map_err(map_transport_error)?
            .ok_or(ChainError::BlockNotFound(number))?;
        Ok(BlockHash(block.header.hash.0))
    }

    async fn fetch_events(&self, hash: &BlockHash) -> Result<Self::Payload, ChainError> {
        self.provider
            .get_logs(&self.app_filter(hash))
            .await
            .map_err(map_transport_error)
    }

    fn decode_events(&self, payload: Self::Payload) -> Result<Vec<RawEvent>, EventDecodeError> {
        // The node filtered by address already; keep only what the apps emitted
        decode_app_logs(
            payload
                .iter()
                .filter(|log| self.apps.contains(&log.address()))
                .map(|log| log.data()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use bridge_core::ethereum::encode_app_event;
    use bridge_core::testing::{eth_deposit, routes, ETH_APP};

    fn source() -> EvmSource {
        EvmSource::new("http://localhost:8545", &routes(), 12).unwrap()
    }

    fn rpc_log(address: Address, data: alloy::primitives::LogData) -> Log {
        Log {
            inner: alloy::primitives::Log { address, data },
            ..Default::default()
        }
    }

    #[test]
    fn test_finalized_below_saturates() {
        assert_eq!(finalized_below(100, 12), 88);
        assert_eq!(finalized_below(5, 12), 0);
        assert_eq!(finalized_below(12, 0), 12);
    }

    #[test]
    fn test_decodes_logs_of_configured_apps_only() {
        let source = source();
        let deposit = eth_deposit(100, 0);
        let data = encode_app_event(&deposit).unwrap();

        let logs = vec![
            rpc_log(Address::repeat_byte(0x99), data.clone()),
            rpc_log(ETH_APP.address().into(), data),
        ];
        let events = source.decode_events(logs).unwrap();
        assert_eq!(events, vec![deposit]);
        assert_eq!(events[0].amount(), U256::from(100u64));
    }

    #[test]
    fn test_filter_targets_block_hash() {
        let source = source();
        let filter = source.app_filter(&BlockHash([0x42; 32]));
        assert_eq!(filter.get_block_hash(), Some(B256::repeat_byte(0x42)));
    }
}
