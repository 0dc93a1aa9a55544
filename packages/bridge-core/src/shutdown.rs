//! Cooperative shutdown signal
//!
//! One `ShutdownTrigger` fans out to any number of `Shutdown` handles. Every
//! blocking point in the relay (waiting for finality, retry sleeps, channel
//! send and receive) goes through a handle so a stop request interrupts it.
//! Dropping the trigger counts as a stop request.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Sending half, owned by whoever decides when to stop
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, cloned into every task
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger and handle
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    /// Request shutdown; idempotent
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&mut self) {
        // An error means the trigger was dropped
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration`; returns false if shutdown interrupted the sleep
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }

    /// Run `fut` to completion unless shutdown comes first
    pub async fn run_until<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.is_triggered() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.wait() => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_trigger() {
        let (_trigger, mut shutdown) = channel();
        assert!(shutdown.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_trigger_interrupts_sleep() {
        let (trigger, mut shutdown) = channel();
        let handle = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.trigger();
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);
        assert!(shutdown.is_triggered());
        assert_eq!(shutdown.run_until(async { 1 }).await, None);
    }

    #[tokio::test]
    async fn test_run_until_returns_output() {
        let (trigger, mut shutdown) = channel();
        assert_eq!(shutdown.run_until(async { 7 }).await, Some(7));

        let mut other = trigger.subscribe();
        trigger.trigger();
        assert!(other.is_triggered());
        other.wait().await;
    }
}
