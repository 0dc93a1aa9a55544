//! Destination-side ledger guard
//!
//! Locked-balance accounting for one destination application and one asset.
//! `LedgerState` transitions are pure; `LedgerGuard` wraps them with the
//! release call on the destination chain.
//!
//! Two behaviors are kept as deployed contracts have them:
//! - an unlock must leave a non-zero balance (`locked > amount`), so the pool
//!   can never be fully drained
//! - the balance is debited before the release is attempted and is not
//!   restored when the release fails

use alloy::primitives::U256;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chain::{DestinationChain, TxReceipt};
use crate::types::{AccountId32, Amount, AppId, Asset, EvmAddress};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("insufficient locked balance: requested {requested}, locked {locked}")]
    InsufficientBalance { requested: Amount, locked: Amount },

    #[error("locked balance overflow")]
    Overflow,

    #[error("release failed after debit: {reason}")]
    TransferFailed { reason: String },
}

impl LedgerError {
    /// Business-rule rejections; never worth retrying
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount | LedgerError::InsufficientBalance { .. }
        )
    }
}

/// Counters held per application instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerState {
    pub total_locked: U256,
    /// Count of accepted locks, for audit only
    pub nonce: U256,
}

impl LedgerState {
    pub fn new(total_locked: U256) -> Self {
        Self {
            total_locked,
            nonce: U256::ZERO,
        }
    }

    pub fn apply_lock(&self, amount: Amount) -> Result<LedgerState, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let total_locked = self
            .total_locked
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let nonce = self.nonce.checked_add(U256::from(1u8)).ok_or(LedgerError::Overflow)?;
        Ok(LedgerState {
            total_locked,
            nonce,
        })
    }

    /// Debit `amount`. The remaining balance must stay above zero, so an
    /// unlock of the whole locked amount is refused.
    pub fn apply_unlock(&self, amount: Amount) -> Result<LedgerState, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        if self.total_locked <= amount {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                locked: self.total_locked,
            });
        }
        Ok(LedgerState {
            total_locked: self.total_locked - amount,
            nonce: self.nonce,
        })
    }
}

/// Accepted deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locked {
    pub caller: EvmAddress,
    pub recipient: AccountId32,
    pub amount: Amount,
    pub nonce: U256,
}

/// Completed release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlocked {
    pub recipient: EvmAddress,
    pub amount: Amount,
    pub receipt: TxReceipt,
}

/// Sole owner of one application's ledger for one asset
#[derive(Debug)]
pub struct LedgerGuard {
    app_id: AppId,
    asset: Asset,
    state: LedgerState,
}

impl LedgerGuard {
    pub fn new(app_id: AppId, asset: Asset) -> Self {
        Self::with_state(app_id, asset, LedgerState::default())
    }

    pub fn with_state(app_id: AppId, asset: Asset, state: LedgerState) -> Self {
        Self {
            app_id,
            asset,
            state,
        }
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn state(&self) -> LedgerState {
        self.state
    }

    pub fn lock(
        &mut self,
        caller: EvmAddress,
        recipient: AccountId32,
        amount: Amount,
    ) -> Result<Locked, LedgerError> {
        self.state = self.state.apply_lock(amount)?;
        debug!(
            app = %self.app_id,
            asset = %self.asset,
            amount = %amount,
            total_locked = %self.state.total_locked,
            "Locked"
        );
        Ok(Locked {
            caller,
            recipient,
            amount,
            nonce: self.state.nonce,
        })
    }

    pub async fn unlock<D>(
        &mut self,
        destination: &D,
        recipient: EvmAddress,
        amount: Amount,
    ) -> Result<Unlocked, LedgerError>
    where
        D: DestinationChain + ?Sized,
    {
        self.state = self.state.apply_unlock(amount)?;

        match destination.release(self.asset, recipient, amount).await {
            Ok(receipt) => {
                debug!(
                    app = %self.app_id,
                    asset = %self.asset,
                    recipient = %recipient,
                    amount = %amount,
                    tx_hash = %receipt.as_hex(),
                    "Released"
                );
                Ok(Unlocked {
                    recipient,
                    amount,
                    receipt,
                })
            }
            Err(e) => {
                warn!(
                    app = %self.app_id,
                    asset = %self.asset,
                    recipient = %recipient,
                    amount = %amount,
                    total_locked = %self.state.total_locked,
                    error = %e,
                    "Release failed after debit, balance not restored"
                );
                Err(LedgerError::TransferFailed {
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        fail: bool,
        released: Mutex<Vec<(Asset, EvmAddress, Amount)>>,
    }

    #[async_trait]
    impl DestinationChain for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn release(
            &self,
            asset: Asset,
            recipient: EvmAddress,
            amount: Amount,
        ) -> Result<TxReceipt, ChainError> {
            if self.fail {
                return Err(ChainError::Transaction("out of gas".into()));
            }
            self.released.lock().unwrap().push((asset, recipient, amount));
            Ok(TxReceipt { tx_hash: [1; 32] })
        }
    }

    fn guard(locked: u64) -> LedgerGuard {
        LedgerGuard::with_state(
            AppId(EvmAddress([9; 20])),
            Asset::Native,
            LedgerState::new(U256::from(locked)),
        )
    }

    #[test]
    fn test_lock_increments_balance_and_nonce() {
        let mut g = guard(0);
        let locked = g
            .lock(EvmAddress([1; 20]), AccountId32([2; 32]), U256::from(40u64))
            .unwrap();
        assert_eq!(locked.nonce, U256::from(1u8));
        g.lock(EvmAddress([1; 20]), AccountId32([2; 32]), U256::from(2u64))
            .unwrap();
        assert_eq!(g.state().total_locked, U256::from(42u64));
        assert_eq!(g.state().nonce, U256::from(2u8));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let state = LedgerState::new(U256::from(10u64));
        assert_eq!(state.apply_lock(U256::ZERO), Err(LedgerError::InvalidAmount));
        assert_eq!(
            state.apply_unlock(U256::ZERO),
            Err(LedgerError::InvalidAmount)
        );
    }

    #[test]
    fn test_lock_overflow() {
        let state = LedgerState::new(U256::MAX);
        assert_eq!(
            state.apply_lock(U256::from(1u8)),
            Err(LedgerError::Overflow)
        );
    }

    #[test]
    fn test_unlock_requires_strictly_greater_balance() {
        let state = LedgerState::new(U256::from(100u64));
        assert_eq!(
            state.apply_unlock(U256::from(100u64)),
            Err(LedgerError::InsufficientBalance {
                requested: U256::from(100u64),
                locked: U256::from(100u64),
            })
        );
        let next = state.apply_unlock(U256::from(99u64)).unwrap();
        assert_eq!(next.total_locked, U256::from(1u8));
    }

    #[test]
    fn test_balance_matches_lock_minus_unlock_sums() {
        let ops: [(bool, u64); 8] = [
            (true, 50),
            (false, 20),
            (true, 5),
            (false, 35),
            (false, 0),
            (true, 10),
            (false, 100),
            (false, 9),
        ];
        let mut state = LedgerState::default();
        let (mut locked, mut unlocked) = (0u64, 0u64);
        for (is_lock, amount) in ops {
            let result = if is_lock {
                state.apply_lock(U256::from(amount))
            } else {
                state.apply_unlock(U256::from(amount))
            };
            if let Ok(next) = result {
                state = next;
                if is_lock {
                    locked += amount;
                } else {
                    unlocked += amount;
                }
            }
        }
        assert_eq!(state.total_locked, U256::from(locked - unlocked));
        assert_eq!(state.total_locked, U256::from(36u64));
    }

    #[tokio::test]
    async fn test_unlock_releases_to_recipient() {
        let dest = Recorder::default();
        let mut g = guard(100);

        let err = g
            .unlock(&dest, EvmAddress([5; 20]), U256::from(100u64))
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(g.state().total_locked, U256::from(100u64));

        let unlocked = g
            .unlock(&dest, EvmAddress([5; 20]), U256::from(99u64))
            .await
            .unwrap();
        assert_eq!(unlocked.amount, U256::from(99u64));
        assert_eq!(g.state().total_locked, U256::from(1u8));
        assert_eq!(
            dest.released.lock().unwrap().as_slice(),
            &[(Asset::Native, EvmAddress([5; 20]), U256::from(99u64))]
        );
    }

    #[tokio::test]
    async fn test_failed_release_keeps_debit() {
        let dest = Recorder {
            fail: true,
            ..Default::default()
        };
        let mut g = guard(100);

        let err = g
            .unlock(&dest, EvmAddress([5; 20]), U256::from(30u64))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransferFailed { .. }));
        assert!(!err.is_rejection());
        assert_eq!(g.state().total_locked, U256::from(70u64));
    }
}
