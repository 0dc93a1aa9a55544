//! Event bus observer
//!
//! Turns the pipeline's broadcast events into log lines, Prometheus metrics
//! and the counters served on /status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{BridgeEvent, DepthProbe, LedgerSnapshot, Shutdown};
use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::metrics;

/// Relay statistics shared between the observer and the HTTP server
#[derive(Debug, Default, Clone, Serialize)]
pub struct RelayStats {
    /// Last finalized block processed, per source chain
    pub last_block: BTreeMap<String, u64>,
    pub messages_emitted: u64,
    pub locked: u64,
    pub unlocked: u64,
    pub rejected: u64,
    pub transfer_failed: u64,
    pub dropped: u64,
    /// Bus events this observer missed because it fell behind
    pub missed_events: u64,
    pub channel_depth: usize,
}

pub type SharedStats = Arc<RwLock<RelayStats>>;

pub struct Observer {
    events: broadcast::Receiver<BridgeEvent>,
    ledgers: watch::Receiver<Vec<LedgerSnapshot>>,
    depth: DepthProbe,
    stats: SharedStats,
    sample_interval: Duration,
}

impl Observer {
    pub fn new(
        events: broadcast::Receiver<BridgeEvent>,
        ledgers: watch::Receiver<Vec<LedgerSnapshot>>,
        depth: DepthProbe,
        stats: SharedStats,
    ) -> Self {
        Self {
            events,
            ledgers,
            depth,
            stats,
            sample_interval: Duration::from_secs(5),
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Run until shutdown or until every publisher is gone
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.sample_interval);
        let mut ledgers_open = true;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                received = self.events.recv() => match received {
                    Ok(event) => self.record(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Observer fell behind the event bus");
                        metrics::record_error("observer", "lagged");
                        self.stats.write().await.missed_events += missed;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = self.ledgers.changed(), if ledgers_open => {
                    if changed.is_err() {
                        ledgers_open = false;
                        continue;
                    }
                    let snapshots = self.ledgers.borrow_and_update().clone();
                    for snapshot in snapshots {
                        metrics::set_ledger_locked(
                            &snapshot.app_id.to_string(),
                            &snapshot.asset.to_string(),
                            snapshot.state.total_locked,
                        );
                    }
                }
                _ = ticker.tick() => {
                    let depth = self.depth.depth();
                    metrics::set_channel_depth(depth);
                    self.stats.write().await.channel_depth = depth;
                }
            }
        }

        debug!("Observer stopped");
    }

    async fn record(&self, event: BridgeEvent) {
        let mut stats = self.stats.write().await;
        match &event {
            BridgeEvent::BlockProcessed {
                chain,
                block,
                events,
            } => {
                debug!(chain = %chain, block, events, "Block processed");
                metrics::record_block_processed(chain, *block);
                stats.last_block.insert(chain.clone(), *block);
            }
            BridgeEvent::MessageEmitted {
                chain,
                block,
                app_id,
                kind,
            } => {
                debug!(chain = %chain, block, app_id = %app_id, kind = %kind, "Message emitted");
                metrics::record_message_emitted(chain, kind.as_str());
                stats.messages_emitted += 1;
            }
            BridgeEvent::Locked {
                app_id,
                asset,
                amount,
                nonce,
                ..
            } => {
                info!(app_id = %app_id, asset = %asset, amount = %amount, nonce = %nonce, "Deposit locked");
                metrics::record_outcome(&app_id.to_string(), event.label());
                stats.locked += 1;
            }
            BridgeEvent::Unlocked {
                app_id,
                asset,
                recipient,
                amount,
                tx_hash,
            } => {
                info!(
                    app_id = %app_id,
                    asset = %asset,
                    recipient = %recipient,
                    amount = %amount,
                    tx_hash = %hex::encode(tx_hash),
                    "Release confirmed"
                );
                metrics::record_outcome(&app_id.to_string(), event.label());
                stats.unlocked += 1;
            }
            BridgeEvent::Rejected { app_id, kind, reason } => {
                warn!(app_id = %app_id, kind = %kind, reason = %reason, "Message rejected");
                metrics::record_outcome(&app_id.to_string(), event.label());
                stats.rejected += 1;
            }
            BridgeEvent::TransferFailed {
                app_id,
                asset,
                recipient,
                amount,
                reason,
            } => {
                error!(
                    app_id = %app_id,
                    asset = %asset,
                    recipient = %recipient,
                    amount = %amount,
                    reason = %reason,
                    "Release failed after debit"
                );
                metrics::record_outcome(&app_id.to_string(), event.label());
                metrics::record_error("dispatcher", "transfer_failed");
                stats.transfer_failed += 1;
            }
            BridgeEvent::Dropped { app_id, reason } => {
                warn!(app_id = %app_id, reason = %reason, "Message dropped");
                metrics::record_outcome(&app_id.to_string(), event.label());
                stats.dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use bridge_core::testing::ETH_APP;
    use bridge_core::{
        message_channel, shutdown, AccountId32, Asset, DropReason, EventBus, EvmAddress,
        MessageKind,
    };

    async fn wait_for(stats: &SharedStats, condition: impl Fn(&RelayStats) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition(&*stats.read().await) {
            assert!(tokio::time::Instant::now() < deadline, "stats not updated");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_counts_events_by_kind() {
        let bus = EventBus::new(16);
        let (_ledgers_tx, ledgers) = watch::channel(Vec::new());
        let (tx, _rx) = message_channel(4);
        let stats = SharedStats::default();
        let (trigger, stop) = shutdown::channel();

        let observer = Observer::new(bus.subscribe(), ledgers, tx.depth_probe(), stats.clone());
        let task = tokio::spawn(observer.run(stop));

        bus.publish(BridgeEvent::BlockProcessed {
            chain: "substrate".into(),
            block: 7,
            events: 1,
        });
        bus.publish(BridgeEvent::Locked {
            app_id: ETH_APP,
            asset: Asset::Native,
            caller: EvmAddress([1; 20]),
            recipient: AccountId32([2; 32]),
            amount: U256::from(5u8),
            nonce: U256::ZERO,
        });
        bus.publish(BridgeEvent::Rejected {
            app_id: ETH_APP,
            kind: MessageKind::Unlock,
            reason: "insufficient".into(),
        });
        bus.publish(BridgeEvent::Dropped {
            app_id: ETH_APP,
            reason: DropReason::UnknownApp,
        });

        wait_for(&stats, |s| s.dropped == 1).await;
        let snapshot = stats.read().await.clone();
        assert_eq!(snapshot.last_block.get("substrate"), Some(&7));
        assert_eq!((snapshot.locked, snapshot.rejected), (1, 1));
        assert_eq!(snapshot.unlocked, 0);

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_samples_channel_depth() {
        let bus = EventBus::new(4);
        let (_ledgers_tx, ledgers) = watch::channel(Vec::new());
        let (tx, _rx) = message_channel(4);
        let stats = SharedStats::default();
        let (trigger, mut stop) = shutdown::channel();

        tx.send(
            bridge_core::RelayMessage {
                app_id: ETH_APP,
                kind: MessageKind::Lock,
                origin_block: 1,
                payload: vec![],
            },
            &mut stop,
        )
        .await
        .unwrap();

        let observer = Observer::new(bus.subscribe(), ledgers, tx.depth_probe(), stats.clone())
            .with_sample_interval(Duration::from_millis(5));
        let task = tokio::spawn(observer.run(stop.clone()));

        wait_for(&stats, |s| s.channel_depth == 1).await;
        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_bus_closes() {
        let bus = EventBus::new(4);
        let (_ledgers_tx, ledgers) = watch::channel(Vec::new());
        let (tx, _rx) = message_channel(4);
        let (_trigger, stop) = shutdown::channel();

        let observer = Observer::new(
            bus.subscribe(),
            ledgers,
            tx.depth_probe(),
            SharedStats::default(),
        );
        drop(bus);

        tokio::time::timeout(Duration::from_secs(2), observer.run(stop))
            .await
            .expect("observer must stop once the bus is gone");
    }
}
