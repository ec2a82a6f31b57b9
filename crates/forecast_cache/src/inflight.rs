//! In-flight registry: at most one outstanding upstream call per key.
//!
//! Each flight is a spawned task wrapped in a `Shared` future, so every
//! waiter observes the same outcome and the call runs to completion even
//! if all waiters go away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{CacheKey, FetchFailure, WeatherPayload};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};

/// What every waiter on a flight receives.
pub type FetchOutcome = Result<Arc<WeatherPayload>, FetchFailure>;

/// Multi-waiter handle on a single upstream call.
pub type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Clone)]
struct Flight {
    id: u64,
    outcome: SharedFetch,
}

/// How a caller got its handle.
pub enum Admission {
    /// A new flight was registered with this id; the caller owns cleanup.
    Started(u64, SharedFetch),
    /// An existing flight was joined.
    Joined(SharedFetch),
}

impl Admission {
    pub fn into_fetch(self) -> SharedFetch {
        match self {
            Admission::Started(_, fetch) | Admission::Joined(fetch) => fetch,
        }
    }
}

#[derive(Default)]
pub struct InFlightRegistry {
    flights: DashMap<CacheKey, Flight>,
    next_id: AtomicU64,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight registered for `key`, or register the one built by
    /// `start`. `start` runs under the key's slot lock and must not block.
    pub fn join_or_start<F>(&self, key: &CacheKey, start: F) -> Admission
    where
        F: FnOnce(u64) -> SharedFetch,
    {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(occupied) => Admission::Joined(occupied.get().outcome.clone()),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let outcome = start(id);
                vacant.insert(Flight {
                    id,
                    outcome: outcome.clone(),
                });
                Admission::Started(id, outcome)
            }
        }
    }

    /// Deregister flight `id` for `key`. Returns false if it was already gone.
    pub fn complete(&self, key: &CacheKey, id: u64) -> bool {
        self.flights
            .remove_if(key, |_, flight| flight.id == id)
            .is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.flights.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}
