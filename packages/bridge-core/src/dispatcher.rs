//! Message dispatcher
//!
//! Single consumer of the message channel. Each message is routed to its
//! application, decoded with the application's schema and applied to the
//! ledger guard of the message's asset. Bad messages are dropped and
//! business-rule violations rejected; neither stops the dispatcher.
//!
//! Ledger guards are owned here and created on first use with a zero
//! balance. Readers get copies through `ledger_watch`.
//!
//! While `run` is active a pending release gives up as soon as shutdown is
//! requested. The debit stays and the message is reported as
//! `TransferFailed`, the same as any other failed release.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chain::{ChainError, DestinationChain, TxReceipt};
use crate::channel::MessageReceiver;
use crate::codec::{self, Decoded, Schema};
use crate::events::{BridgeEvent, DropReason, EventBus};
use crate::ledger::{LedgerError, LedgerGuard, LedgerState, Locked, Unlocked};
use crate::routing::AppRoutes;
use crate::shutdown::Shutdown;
use crate::types::{Amount, AppId, Asset, EvmAddress, RelayMessage};

/// Destination wrapper whose releases end with `ChainError::Cancelled`
/// once shutdown is requested
struct Cancellable<D: ?Sized> {
    inner: Arc<D>,
    shutdown: Option<Shutdown>,
}

#[async_trait]
impl<D: DestinationChain + ?Sized> DestinationChain for Cancellable<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn release(
        &self,
        asset: Asset,
        recipient: EvmAddress,
        amount: Amount,
    ) -> Result<TxReceipt, ChainError> {
        let release = self.inner.release(asset, recipient, amount);
        match self.shutdown.clone() {
            Some(mut shutdown) => shutdown
                .run_until(release)
                .await
                .unwrap_or(Err(ChainError::Cancelled)),
            None => release.await,
        }
    }
}

/// What happened to one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Locked { asset: Asset, locked: Locked },
    Unlocked { asset: Asset, unlocked: Unlocked },
    /// Terminal business-rule rejection
    Rejected(LedgerError),
    /// Balance was debited but the release did not go through
    TransferFailed {
        asset: Asset,
        recipient: EvmAddress,
        amount: Amount,
        error: LedgerError,
    },
    Dropped(DropReason),
}

/// Copy of one ledger's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub app_id: AppId,
    pub asset: Asset,
    pub state: LedgerState,
}

// Orderable key so snapshots come out in a stable order
type LedgerKey = ([u8; 20], Option<[u8; 20]>);

fn ledger_key(app_id: AppId, asset: Asset) -> LedgerKey {
    let asset = match asset {
        Asset::Native => None,
        Asset::Token(token) => Some(token.0),
    };
    (app_id.0 .0, asset)
}

pub struct Dispatcher<D: DestinationChain + ?Sized> {
    routes: AppRoutes,
    destination: Arc<D>,
    ledgers: BTreeMap<LedgerKey, LedgerGuard>,
    bus: EventBus,
    snapshots: watch::Sender<Vec<LedgerSnapshot>>,
    /// Set while `run` is active
    shutdown: Option<Shutdown>,
}

impl<D: DestinationChain + ?Sized> Dispatcher<D> {
    pub fn new(routes: AppRoutes, destination: Arc<D>, bus: EventBus) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            routes,
            destination,
            ledgers: BTreeMap::new(),
            bus,
            snapshots,
            shutdown: None,
        }
    }

    /// Start a ledger from a known state instead of zero
    pub fn with_ledger(mut self, app_id: AppId, asset: Asset, state: LedgerState) -> Self {
        self.ledgers.insert(
            ledger_key(app_id, asset),
            LedgerGuard::with_state(app_id, asset, state),
        );
        self.publish_snapshots();
        self
    }

    pub fn ledger(&self, app_id: AppId, asset: Asset) -> Option<LedgerState> {
        self.ledgers
            .get(&ledger_key(app_id, asset))
            .map(LedgerGuard::state)
    }

    pub fn snapshots(&self) -> Vec<LedgerSnapshot> {
        self.ledgers
            .values()
            .map(|guard| LedgerSnapshot {
                app_id: guard.app_id(),
                asset: guard.asset(),
                state: guard.state(),
            })
            .collect()
    }

    /// Receiver that always holds the latest ledger snapshots
    pub fn ledger_watch(&self) -> watch::Receiver<Vec<LedgerSnapshot>> {
        self.snapshots.subscribe()
    }

    fn publish_snapshots(&self) {
        self.snapshots.send_replace(self.snapshots());
    }

    /// Consume messages in arrival order until the channel closes or
    /// shutdown is requested. Shutdown also cuts short a release that is
    /// still pending. Returns the number of messages handled.
    pub async fn run(&mut self, receiver: &mut MessageReceiver, shutdown: &mut Shutdown) -> u64 {
        info!(destination = self.destination.name(), "Dispatcher started");
        self.shutdown = Some(shutdown.clone());
        let mut handled = 0u64;
        while let Some(message) = receiver.recv(shutdown).await {
            self.apply(message).await;
            handled += 1;
        }
        self.shutdown = None;
        info!(handled, "Dispatcher stopped");
        handled
    }

    /// Apply one message and publish the outcome
    pub async fn apply(&mut self, message: RelayMessage) -> Outcome {
        let app_id = message.app_id;
        let kind = message.kind;
        let origin_block = message.origin_block;
        let outcome = self.process(message).await;

        let event = match &outcome {
            Outcome::Locked { asset, locked } => {
                info!(
                    app = %app_id,
                    asset = %asset,
                    caller = %locked.caller,
                    recipient = %locked.recipient,
                    amount = %locked.amount,
                    nonce = %locked.nonce,
                    origin_block,
                    "Lock applied"
                );
                BridgeEvent::Locked {
                    app_id,
                    asset: *asset,
                    caller: locked.caller,
                    recipient: locked.recipient,
                    amount: locked.amount,
                    nonce: locked.nonce,
                }
            }
            Outcome::Unlocked { asset, unlocked } => {
                info!(
                    app = %app_id,
                    asset = %asset,
                    recipient = %unlocked.recipient,
                    amount = %unlocked.amount,
                    tx_hash = %unlocked.receipt.as_hex(),
                    origin_block,
                    "Unlock applied"
                );
                BridgeEvent::Unlocked {
                    app_id,
                    asset: *asset,
                    recipient: unlocked.recipient,
                    amount: unlocked.amount,
                    tx_hash: unlocked.receipt.tx_hash,
                }
            }
            Outcome::Rejected(reason) => {
                warn!(app = %app_id, kind = %kind, origin_block, reason = %reason, "Message rejected");
                BridgeEvent::Rejected {
                    app_id,
                    kind,
                    reason: reason.to_string(),
                }
            }
            Outcome::TransferFailed {
                asset,
                recipient,
                amount,
                error: reason,
            } => {
                error!(
                    app = %app_id,
                    asset = %asset,
                    recipient = %recipient,
                    amount = %amount,
                    reason = %reason,
                    origin_block,
                    "Release failed, ledger left debited"
                );
                BridgeEvent::TransferFailed {
                    app_id,
                    asset: *asset,
                    recipient: *recipient,
                    amount: *amount,
                    reason: reason.to_string(),
                }
            }
            Outcome::Dropped(reason) => {
                warn!(app = %app_id, kind = %kind, origin_block, reason = %reason, "Message dropped");
                BridgeEvent::Dropped {
                    app_id,
                    reason: reason.clone(),
                }
            }
        };

        self.bus.publish(event);
        self.publish_snapshots();
        outcome
    }

    async fn process(&mut self, message: RelayMessage) -> Outcome {
        let Some(class) = self.routes.class_for(&message.app_id) else {
            return Outcome::Dropped(DropReason::UnknownApp);
        };

        let schema = Schema::for_message(message.kind, class);
        let decoded = match codec::decode_as(schema, &message.payload) {
            Ok(decoded) => decoded,
            Err(e) => return Outcome::Dropped(DropReason::Malformed(e)),
        };

        match decoded {
            Decoded::Deposit(deposit) => {
                let asset = asset_of(deposit.token);
                let guard = self.guard(message.app_id, asset);
                match guard.lock(deposit.sender, deposit.recipient, deposit.amount) {
                    Ok(locked) => Outcome::Locked { asset, locked },
                    Err(e) => Outcome::Rejected(e),
                }
            }
            Decoded::Transfer(transfer) => {
                let asset = asset_of(transfer.token);
                let destination = Cancellable {
                    inner: Arc::clone(&self.destination),
                    shutdown: self.shutdown.clone(),
                };
                let guard = self.guard(message.app_id, asset);
                match guard
                    .unlock(&destination, transfer.recipient, transfer.amount)
                    .await
                {
                    Ok(unlocked) => Outcome::Unlocked { asset, unlocked },
                    Err(e) if e.is_rejection() => Outcome::Rejected(e),
                    Err(e) => Outcome::TransferFailed {
                        asset,
                        recipient: transfer.recipient,
                        amount: transfer.amount,
                        error: e,
                    },
                }
            }
        }
    }

    fn guard(&mut self, app_id: AppId, asset: Asset) -> &mut LedgerGuard {
        self.ledgers
            .entry(ledger_key(app_id, asset))
            .or_insert_with(|| LedgerGuard::new(app_id, asset))
    }
}

fn asset_of(token: Option<EvmAddress>) -> Asset {
    token.map(Asset::Token).unwrap_or(Asset::Native)
}
