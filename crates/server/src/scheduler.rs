use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use leadbot_core::SessionKey;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

struct TimerSlot {
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

/// Per-session debounce timer: "fire only after N seconds of silence".
///
/// Every inbound message cancels the pending timer for its session before
/// scheduling a new one. A fire that races a cancel checks its epoch against
/// the slot under the lock, so a stale fire can never act on fresher state.
#[derive(Clone, Default)]
pub struct InactivityScheduler {
    slots: Arc<Mutex<HashMap<SessionKey, TimerSlot>>>,
}

impl InactivityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending timer for `key` with a fresh one.
    ///
    /// `on_fire` is not polled until the quiet period elapses and the timer
    /// is confirmed current; it runs outside the scheduler lock.
    pub async fn schedule<F>(&self, key: SessionKey, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.clone()).or_insert(TimerSlot { epoch: 0, handle: None });
        slot.epoch += 1;
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }

        let epoch = slot.epoch;
        let shared = Arc::clone(&self.slots);
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slots = shared.lock().await;
                match slots.get(&key) {
                    Some(current) if current.epoch == epoch => {
                        slots.remove(&key);
                    }
                    // A message or cancel got here first.
                    _ => {
                        debug!(session = %key, "stale timer fire ignored");
                        return;
                    }
                }
            }
            on_fire.await;
        }));
    }

    /// Safe to call with no timer pending.
    pub async fn cancel(&self, key: &SessionKey) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            // The slot is kept so the epoch sequence never restarts for a
            // session with a task still in flight.
            slot.epoch += 1;
            if let Some(previous) = slot.handle.take() {
                previous.abort();
            }
        }
    }
}
