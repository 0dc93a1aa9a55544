//! Substrate JSON-RPC source
//!
//! Reads finality from `chain_getFinalizedHead`, resolves block hashes with
//! `chain_getBlockHash` and fetches the raw `System.Events` storage value of
//! each block. Decoding is left to `bridge_core::substrate`.

use std::time::Duration;

use async_trait::async_trait;
use bridge_core::substrate::{decode_event_records, SYSTEM_EVENTS_KEY};
use bridge_core::{BlockHash, BlockNumber, ChainError, EventDecodeError, RawEvent, SourceChain};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Header {
    number: String,
}

pub struct SubstrateSource {
    name: String,
    rpc_url: String,
    client: Client,
}

impl SubstrateSource {
    pub fn new(rpc_url: &str) -> eyre::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            name: "substrate".to_string(),
            rpc_url: rpc_url.to_string(),
            client,
        })
    }

    /// Call `method`; `Ok(None)` when the node answers with a null result
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        trace!(method, "Substrate RPC call");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?
            .json::<RpcResponse<T>>()
            .await
            .map_err(map_reqwest_error)?;

        if let Some(error) = response.error {
            return Err(ChainError::Rpc(format!(
                "{} failed: {} - {}",
                method, error.code, error.message
            )));
        }

        Ok(response.result)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ChainError {
    if e.is_timeout() {
        ChainError::Timeout
    } else if e.is_decode() {
        ChainError::Malformed(e.to_string())
    } else {
        ChainError::Rpc(e.to_string())
    }
}

/// Parse a `0x`-prefixed hex quantity such as a header number
pub fn parse_block_number(hex: &str) -> Result<BlockNumber, ChainError> {
    let digits = hex.trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Malformed(format!("block number {}: {}", hex, e)))
}

pub fn parse_block_hash(hex: &str) -> Result<BlockHash, ChainError> {
    BlockHash::from_hex(hex).map_err(|e| ChainError::Malformed(format!("block hash {}: {}", hex, e)))
}

/// Decode a storage value; an absent value is an empty payload
pub fn parse_storage(value: Option<String>) -> Result<Option<Vec<u8>>, ChainError> {
    value
        .map(|hex_value| {
            hex::decode(hex_value.trim_start_matches("0x"))
                .map_err(|e| ChainError::Malformed(format!("storage value: {}", e)))
        })
        .transpose()
}

#[async_trait]
impl SourceChain for SubstrateSource {
    /// Raw `System.Events` value, `None` when the block has no events entry
    type Payload = Option<Vec<u8>>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn finalized_head(&self) -> Result<BlockNumber, ChainError> {
        let hash: String = self
            .call("chain_getFinalizedHead", json!([]))
            .await?
            .ok_or_else(|| ChainError::Malformed("null finalized head".to_string()))?;
        let header: Header = self
            .call("chain_getHeader", json!([hash]))
            .await?
            .ok_or_else(|| ChainError::Malformed(format!("no header for {}", hash)))?;
        parse_block_number(&header.number)
    }

    async fn block_hash(&self, number: BlockNumber) -> Result<BlockHash, ChainError> {
        let hash: Option<String> = self.call("chain_getBlockHash", json!([number])).await?;
        match hash {
            Some(hash) => parse_block_hash(&hash),
            None => Err(ChainError::BlockNotFound(number)),
        }
    }

    async fn fetch_events(&self, hash: &BlockHash) -> Result<Self::Payload, ChainError> {
        let value: Option<String> = self
            .call("state_getStorage", json!([SYSTEM_EVENTS_KEY, hash.as_hex()]))
            .await?;
        parse_storage(value)
    }

    fn decode_events(&self, payload: Self::Payload) -> Result<Vec<RawEvent>, EventDecodeError> {
        match payload {
            Some(raw) => decode_event_records(&raw),
            None => Ok(Vec::new()),
        }
    }
}
