//! Single-flight session refresh

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use querious_core::{Error, Result};

#[derive(Debug)]
struct RefreshState {
    epoch: u64,
    last_ok: bool,
}

/// Coordinates refresh-on-401 so that at most one refresh is in flight
///
/// Callers read [`RefreshGate::epoch`] before sending a request. When the
/// request comes back unauthorized they call [`RefreshGate::refresh`] with
/// that epoch. The first caller performs the refresh while holding the lock;
/// callers queued behind it see the epoch has moved on and reuse its outcome
/// instead of refreshing again.
#[derive(Debug)]
pub struct RefreshGate {
    state: Mutex<RefreshState>,
    epoch: AtomicU64,
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState {
                epoch: 0,
                last_ok: true,
            }),
            epoch: AtomicU64::new(0),
        }
    }

    /// Number of refreshes completed so far
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Refresh unless someone already did since `seen_epoch`
    pub async fn refresh<F, Fut>(&self, seen_epoch: u64, refresh: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;

        if state.epoch != seen_epoch {
            debug!(epoch = state.epoch, "reusing completed session refresh");
            return if state.last_ok {
                Ok(())
            } else {
                Err(Error::SessionExpired)
            };
        }

        let outcome = refresh().await;
        state.epoch += 1;
        state.last_ok = outcome.is_ok();
        self.epoch.store(state.epoch, Ordering::Release);
        outcome
    }
}
