//! Keyed debouncing on tokio timers.
//!
//! `queue` replaces any pending operation with the same id; only the last one
//! runs once its delay elapses. Operations that already started are left alone.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::debug;

pub const SEARCH_ID: &str = "search";
pub const FILTER_ID: &str = "filter";

struct Slot {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    pending: FxHashMap<String, Slot>,
}

#[derive(Clone, Default)]
pub struct Debouncer {
    slots: Arc<Mutex<Slots>>,
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> { slots.lock().unwrap_or_else(PoisonError::into_inner) }

impl Debouncer {
    pub fn new() -> Self { Self::default() }

    /// Run `op` after `delay` unless another call for `id` arrives first.
    pub fn queue<F, Fut>(&self, id: &str, delay: Duration, op: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut s = lock(&self.slots);
        s.next_generation += 1;
        let generation = s.next_generation;
        let slots = Arc::clone(&self.slots);
        let key = id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut s = lock(&slots);
                match s.pending.get(&key) {
                    Some(slot) if slot.generation == generation => {
                        s.pending.remove(&key);
                    }
                    _ => return,
                }
            }
            debug!(id = %key, "debounced operation firing");
            op().await;
        });
        if let Some(prev) = s.pending.insert(id.to_string(), Slot { generation, handle }) {
            prev.handle.abort();
            metrics::counter!("debounce_coalesced_total", 1u64, "id" => id.to_string());
        }
    }

    /// Drop any pending call for `id` and run `op` immediately.
    pub async fn execute_now<F, Fut>(&self, id: &str, op: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.cancel(id);
        op().await;
    }

    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.slots).pending.remove(id) {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut s = lock(&self.slots);
        for (_, slot) in s.pending.drain() {
            slot.handle.abort();
        }
    }

    pub fn is_pending(&self, id: &str) -> bool { lock(&self.slots).pending.contains_key(id) }

    pub fn pending_count(&self) -> usize { lock(&self.slots).pending.len() }
}
