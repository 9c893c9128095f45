//! Request coalescing
//!
//! Concurrent requests for the same identifier share one pending result.
//! The registry entry is removed when that result settles, whichever way it
//! settles, so the next request after completion starts a fresh call.
//!
//! Each request runs on its own task. Waiters going away does not stop it,
//! so its side effects (store writes) land regardless.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use roster_model::EntityId;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinError;

/// A result every waiter for one identifier can await
pub type Pending<T> = Shared<BoxFuture<'static, T>>;

type Registry<T> = DashMap<EntityId, (u64, Pending<T>)>;

/// At most one outstanding request per identifier
///
/// Requests are spawned onto the tokio runtime, so [`RequestCoalescer::coalesce`]
/// must be called from within one.
pub struct RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    in_flight: Arc<Registry<T>>,
    next_ticket: AtomicU64,
    on_abort: fn(JoinError) -> T,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create empty coalescer
    ///
    /// `on_abort` turns a request task that panicked or was cancelled into
    /// the value its waiters receive.
    #[inline]
    #[must_use]
    pub fn new(on_abort: fn(JoinError) -> T) -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(0),
            on_abort,
        }
    }

    /// Join the pending result for `id`, or start one with `factory`
    ///
    /// `factory` is only invoked when nothing is in flight for `id`.
    pub fn coalesce<F, Fut>(&self, id: &EntityId, factory: F) -> Pending<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(%id, "joining in-flight request");
                entry.get().1.clone()
            }
            Entry::Vacant(entry) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let guard = RegistryGuard {
                    registry: Arc::clone(&self.in_flight),
                    id: id.clone(),
                    ticket,
                };
                let request = factory();
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    request.await
                });
                let on_abort = self.on_abort;
                let pending = task
                    .map(move |joined| {
                        joined.unwrap_or_else(|err| {
                            tracing::warn!(error = %err, "coalesced request task aborted");
                            on_abort(err)
                        })
                    })
                    .boxed()
                    .shared();

                entry.insert((ticket, pending.clone()));
                pending
            }
        }
    }

    /// Pending result for `id`, if a request is in flight
    #[must_use]
    pub fn in_flight(&self, id: &EntityId) -> Option<Pending<T>> {
        self.in_flight.get(id).map(|entry| entry.value().1.clone())
    }

    /// Whether a request for `id` is in flight
    #[inline]
    #[must_use]
    pub fn is_in_flight(&self, id: &EntityId) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Number of identifiers with a request in flight
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing is in flight
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

impl<T> Default for RequestCoalescer<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    /// Aborted requests resolve to `T::default()`
    fn default() -> Self {
        Self::new(|_| T::default())
    }
}

impl<T> std::fmt::Debug for RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// Removes its registry entry when the request task finishes or is dropped
///
/// The ticket check keeps a late drop from evicting a newer request for the
/// same identifier.
struct RegistryGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    registry: Arc<Registry<T>>,
    id: EntityId,
    ticket: u64,
}

impl<T> Drop for RegistryGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.registry
            .remove_if(&self.id, |_, (ticket, _)| *ticket == self.ticket);
    }
}
