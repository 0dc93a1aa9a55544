//! EVM destination
//!
//! Releases unlocked value from the relayer's account: ether as a plain
//! value transfer, tokens through the token's `transfer`. Each release
//! waits for its receipt, but no longer than the configured receipt timeout;
//! a transaction still pending by then is reported as `ChainError::Timeout`.
//!
//! Uses Alloy's `with_recommended_fillers()` so nonce, gas limit and fees
//! are filled in by the provider.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use bridge_core::{Amount, Asset, ChainError, DestinationChain, EvmAddress, TxReceipt};
use eyre::{Result, WrapErr};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

sol! {
    /// Minimal ERC20 interface used for token releases
    #[sol(rpc)]
    contract IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

pub struct EvmDestination {
    name: String,
    rpc_url: Url,
    signer: PrivateKeySigner,
    receipt_timeout: Duration,
}

impl EvmDestination {
    pub fn new(rpc_url: &str, private_key: &str, receipt_timeout: Duration) -> Result<Self> {
        let rpc_url: Url = rpc_url.parse().wrap_err("Invalid RPC URL")?;
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;

        debug!("EVM destination initialized");

        Ok(Self {
            name: "ethereum".to_string(),
            rpc_url,
            signer,
            receipt_timeout,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

fn rpc_error(context: &str, e: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(format!("{}: {}", context, e))
}

/// Wait for a receipt for at most `timeout`
async fn wait_receipt<F, R, E>(receipt: F, timeout: Duration) -> Result<R, ChainError>
where
    F: Future<Output = Result<R, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, receipt).await {
        Ok(result) => result.map_err(|e| rpc_error("Failed to get receipt", e)),
        Err(_) => Err(ChainError::Timeout),
    }
}

#[async_trait]
impl DestinationChain for EvmDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn release(
        &self,
        asset: Asset,
        recipient: EvmAddress,
        amount: Amount,
    ) -> Result<TxReceipt, ChainError> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());

        let to = Address::from(recipient);
        debug!(asset = %asset, recipient = %to, amount = %amount, "Submitting release");

        let pending_tx = match asset {
            Asset::Native => {
                let tx = TransactionRequest::default().with_to(to).with_value(amount);
                provider
                    .send_transaction(tx)
                    .await
                    .map_err(|e| rpc_error("Failed to send transfer", e))?
            }
            Asset::Token(token) => {
                let contract = IERC20::new(Address::from(token), &provider);
                contract
                    .transfer(to, amount)
                    .send()
                    .await
                    .map_err(|e| rpc_error("Failed to send token transfer", e))?
            }
        };

        let tx_hash = *pending_tx.tx_hash();
        info!(tx_hash = %tx_hash, "Release transaction sent");

        let receipt = wait_receipt(pending_tx.get_receipt(), self.receipt_timeout)
            .await
            .inspect_err(|e| {
                if *e == ChainError::Timeout {
                    warn!(
                        tx_hash = %tx_hash,
                        timeout_ms = self.receipt_timeout.as_millis() as u64,
                        "No receipt before timeout"
                    );
                }
            })?;

        if !receipt.status() {
            return Err(ChainError::Transaction(format!(
                "release {:#x} reverted",
                tx_hash
            )));
        }

        Ok(TxReceipt { tx_hash: tx_hash.0 })
    }
}
