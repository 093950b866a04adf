//! Resource pool
//!
//! A fixed set of opaque tokens (typically one per GPU). A run in
//! resource-constrained mode holds exactly one token for its whole lifetime;
//! the token comes back to the pool when its [`ResourceLease`] is dropped,
//! whichever way the run ends.

use evo_core::{ResourceExhausted, TokenId};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Gauge tracking leased tokens
pub const TOKENS_IN_USE_GAUGE: &str = "evo_resource_tokens_in_use";

#[derive(Debug)]
struct Shared {
    free: Mutex<VecDeque<TokenId>>,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl Shared {
    fn checkout(&self) -> Option<TokenId> {
        let token = self.free.lock().pop_front()?;
        let now = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(TOKENS_IN_USE_GAUGE).set(now as f64);
        Some(token)
    }

    fn checkin(&self, token: TokenId) {
        self.free.lock().push_back(token);
        let now = self.in_use.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(TOKENS_IN_USE_GAUGE).set(now as f64);
    }
}

/// Pool of resource tokens.
///
/// The semaphore carries one permit per free token, so a permit holder is
/// always able to check out a token.
#[derive(Debug)]
pub struct ResourcePool {
    semaphore: Arc<Semaphore>,
    shared: Arc<Shared>,
    capacity: usize,
}

impl ResourcePool {
    /// Pool over `tokens`. A repeated id is kept once, so no two leases
    /// ever carry the same token.
    #[must_use]
    pub fn new<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TokenId>,
    {
        let mut seen = HashSet::new();
        let free: VecDeque<TokenId> = tokens
            .into_iter()
            .map(Into::into)
            .filter(|token: &TokenId| {
                let fresh = seen.insert(token.as_str().to_string());
                if !fresh {
                    tracing::warn!(token = %token, "duplicate resource token ignored");
                }
                fresh
            })
            .collect();
        let capacity = free.len();
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            shared: Arc::new(Shared {
                free: Mutex::new(free),
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            capacity,
        }
    }

    /// Wait for a token.
    ///
    /// Returns `None` once the pool has been closed.
    pub async fn acquire(&self) -> Option<ResourceLease> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        self.lease(permit)
    }

    /// Take a token without waiting.
    ///
    /// # Errors
    ///
    /// [`ResourceExhausted`] when every token is leased or the pool is closed.
    pub fn try_acquire(&self) -> Result<ResourceLease, ResourceExhausted> {
        let exhausted = ResourceExhausted {
            capacity: self.capacity,
        };
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => self.lease(permit).ok_or(exhausted),
            Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => Err(exhausted),
        }
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> Option<ResourceLease> {
        let token = self.shared.checkout()?;
        tracing::debug!(token = %token, "resource token leased");
        Some(ResourceLease {
            token,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Wake every waiter with `None`; leases already out stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.free.lock().len()
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of tokens ever leased at the same time
    #[must_use]
    pub fn peak(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }
}

/// A leased token. Dropping it returns the token exactly once.
#[derive(Debug)]
pub struct ResourceLease {
    token: TokenId,
    shared: Arc<Shared>,
    // Declared last: the token is back in the free list before the permit
    // wakes the next waiter.
    _permit: OwnedSemaphorePermit,
}

impl ResourceLease {
    #[must_use]
    pub fn token(&self) -> &TokenId {
        &self.token
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        let token = std::mem::replace(&mut self.token, TokenId::new(""));
        tracing::debug!(token = %token, "resource token released");
        self.shared.checkin(token);
    }
}
