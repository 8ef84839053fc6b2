//! Single-flight guards
//!
//! Two flavours of "only one operation of kind X in flight":
//!
//! - [`SingleFlight`] shares one pending computation between concurrent
//!   callers. Everyone awaiting during the flight gets the same result; the
//!   slot is emptied when the computation finishes, so the next caller starts
//!   a fresh flight.
//! - [`InFlight`] rejects concurrent callers outright. The check-and-set is
//!   synchronous, so it happens before the caller's first suspension point.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Slot<T> = Option<(u64, Shared<BoxFuture<'static, T>>)>;

/// Memoized pending operation shared by concurrent callers
///
/// The flight is driven on its own task, so a caller that gives up (for
/// example through `tokio::time::timeout`) abandons its wait without
/// cancelling the work.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    slot: Arc<Mutex<Slot<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Join the pending flight, or start one with `make` if none is pending
    ///
    /// `make` is only called when a new flight starts.
    pub async fn run<F, Fut>(&self, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut slot = lock(&self.slot);
            match slot.as_ref() {
                Some((_, pending)) => pending.clone(),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let owner = Arc::clone(&self.slot);
                    let work = make();

                    let flight = async move {
                        let output = work.await;
                        let mut slot = lock(&owner);
                        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
                            *slot = None;
                        }
                        output
                    }
                    .boxed()
                    .shared();

                    *slot = Some((id, flight.clone()));
                    tokio::spawn(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Whether a flight is currently pending
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Forget the pending flight without cancelling it
    ///
    /// Callers already waiting still receive its result; new callers start a
    /// fresh flight.
    pub fn forget(&self) {
        *lock(&self.slot) = None;
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reject-if-busy flag
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag; `None` if another holder is active
    pub fn try_acquire(&self) -> Option<InFlightPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightPermit { flag: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the [`InFlight`] flag when dropped
#[derive(Debug)]
pub struct InFlightPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
