//! In-flight request registry.
//!
//! Each slot names a logical resource (an intent's progress stream, a token
//! list fetch, ...) and holds at most one outstanding request, identified by
//! a key. Beginning a request whose key matches the outstanding one is
//! suppressed; beginning one with a different key aborts the previous holder.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::debug;

struct InFlight {
    key: String,
    ticket_id: u64,
    abort: AbortHandle,
}

#[derive(Clone, Default)]
pub struct RequestGuard {
    slots: Arc<DashMap<String, InFlight>>,
    next_id: Arc<AtomicU64>,
}

pub enum Admission {
    /// The same key is already in flight for this slot.
    Suppressed,
    /// The caller now owns the slot.
    Started(RequestTicket),
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, slot: impl Into<String>, key: impl Into<String>) -> Admission {
        let slot = slot.into();
        let key = key.into();
        let ticket_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let abort = AbortHandle::new();
        let signal = abort.signal();
        let fresh = InFlight {
            key: key.clone(),
            ticket_id,
            abort,
        };

        match self.slots.entry(slot.clone()) {
            Entry::Occupied(mut current) => {
                if current.get().key == key {
                    debug!(slot = %slot, key = %key, "request already in flight; suppressed");
                    return Admission::Suppressed;
                }
                let previous = current.insert(fresh);
                debug!(slot = %slot, previous = %previous.key, key = %key, "aborting previous request");
                previous.abort.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }

        Admission::Started(RequestTicket {
            slots: self.slots.clone(),
            slot,
            key,
            ticket_id,
            signal,
        })
    }

    /// Key currently in flight for `slot`.
    pub fn in_flight(&self, slot: &str) -> Option<String> {
        self.slots.get(slot).map(|entry| entry.key.clone())
    }

    /// Aborts and forgets whatever holds `slot`.
    pub fn abort(&self, slot: &str) {
        if let Some((_, previous)) = self.slots.remove(slot) {
            previous.abort.abort();
        }
    }
}

/// Ownership of a slot. Releases the slot when finished or dropped, unless a
/// newer request has taken it over.
pub struct RequestTicket {
    slots: Arc<DashMap<String, InFlight>>,
    slot: String,
    key: String,
    ticket_id: u64,
    signal: AbortSignal,
}

impl RequestTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    pub fn finish(self) {}
}

impl Drop for RequestTicket {
    fn drop(&mut self) {
        self.slots
            .remove_if(&self.slot, |_, current| current.ticket_id == self.ticket_id);
    }
}

/// Sending side of an abort request. Cloning shares the same request.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of an abort request.
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the request is aborted. Never resolves if the request
    /// finishes normally.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
