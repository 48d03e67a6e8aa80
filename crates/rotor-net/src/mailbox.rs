use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use crate::supervisor::{InboundHandler, SessionId};

/// Single-slot hand-off between session read loops and the consensus loop.
///
/// Writers overwrite any payload that has not been consumed yet. Readers take
/// the payload out of the slot under the same lock, so a consumed payload can
/// never be observed again.
#[derive(Default)]
pub struct Mailbox {
    slot: Mutex<Option<Vec<String>>>,
    notify: Notify,
    overwritten: AtomicU64,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Vec<String>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a payload, returning true if it replaced an unconsumed one
    pub fn put(&self, lines: Vec<String>) -> bool {
        let replaced = self.slot().replace(lines).is_some();
        if replaced {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        replaced
    }

    /// Take the pending payload without waiting
    pub fn try_take(&self) -> Option<Vec<String>> {
        self.slot().take()
    }

    /// Wait until a payload is available and take it
    pub async fn take(&self) -> Vec<String> {
        loop {
            let notified = self.notify.notified();
            if let Some(lines) = self.try_take() {
                return lines;
            }
            notified.await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot().is_none()
    }

    /// Number of payloads dropped because a newer one arrived first
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl InboundHandler for Mailbox {
    fn on_payload(&self, session: SessionId, lines: Vec<String>) {
        if self.put(lines) {
            debug!("{} overwrote an unconsumed payload", session);
        }
    }
}
