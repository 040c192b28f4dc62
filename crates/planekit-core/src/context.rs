//! Run-scoped cancellation and deadline propagation
//!
//! A single [`RunContext`] is cloned into every in-flight poller and API
//! call; one cancel signal reaches all of them.

use crate::error::{ProvisionError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cancellation and deadline context for a run. Clones observe the same
/// cancel signal.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel_rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Handle used to cancel a run. Dropping it without calling
/// [`cancel`](CancelHandle::cancel) leaves the run uncancelable but running.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl RunContext {
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel_rx: rx,
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    /// Context that can never be canceled and has no deadline.
    pub fn background() -> Self {
        Self::new().0
    }

    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn is_canceled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Error if the context is already canceled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(ProvisionError::Canceled("run context canceled".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ProvisionError::Timeout("run deadline exceeded".to_string()));
            }
        }
        Ok(())
    }

    /// Suspend for `duration`, waking early on cancellation or deadline
    /// expiry (both reported as errors). Never busy-waits.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let wait = match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ProvisionError::Timeout("run deadline exceeded".to_string()));
                }
                duration.min(remaining)
            }
            None => duration,
        };

        let mut rx = self.cancel_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = canceled(&mut rx) => {
                return Err(ProvisionError::Canceled("run context canceled".to_string()));
            }
        }
        self.check()
    }

    /// Run `fut` to completion unless cancellation or the deadline arrives
    /// first. The losing side is dropped, so an in-flight request is
    /// abandoned the moment the run is canceled.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;
        let mut rx = self.cancel_rx.clone();
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            out = fut => Ok(out),
            _ = canceled(&mut rx) => {
                Err(ProvisionError::Canceled("run context canceled".to_string()))
            }
            _ = expired => Err(ProvisionError::Timeout("run deadline exceeded".to_string())),
        }
    }
}

async fn canceled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Cancel handle dropped; cancellation can no longer happen.
            std::future::pending::<()>().await;
        }
    }
}
