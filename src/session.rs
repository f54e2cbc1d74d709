// session.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generation counter for one search surface (one map, one result list).
///
/// Every new search takes a ticket; taking a ticket makes all earlier
/// tickets stale, and work holding a stale ticket must drop its results.
#[derive(Debug, Clone, Default)]
pub struct SearchGenerations {
    current: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
pub struct SearchTicket {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl SearchGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> SearchTicket {
        let generation = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        SearchTicket {
            generation,
            current: Arc::clone(&self.current),
        }
    }

    /// True when `ticket` came from this counter and no newer search has
    /// started since.
    pub fn issued(&self, ticket: &SearchTicket) -> bool {
        Arc::ptr_eq(&self.current, &ticket.current) && ticket.is_current()
    }
}

impl SearchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }
}
