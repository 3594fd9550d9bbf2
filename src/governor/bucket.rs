//! Single per-group token bucket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A token bucket metering bytes for one group.
///
/// Balance is tracked as a plain atomic rather than behind a `Mutex`: the
/// only operations are "subtract up to N, return what was taken" and "add
/// up to capacity", both of which are naturally expressed as a
/// compare-exchange loop. Waiters block on a [`Notify`] that every refill
/// and every `return_bytes` call wakes.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_amount: u64,
    balance: AtomicU64,
    notify: Notify,
}

impl TokenBucket {
    /// Creates a bucket starting at full capacity.
    ///
    /// `refill_amount` is added every 100 ms by the governor's refill loop.
    #[must_use]
    pub fn new(capacity: u64, refill_amount: u64) -> Self {
        Self {
            capacity,
            refill_amount,
            balance: AtomicU64::new(capacity),
            notify: Notify::new(),
        }
    }

    /// Creates a bucket for the given rate in bytes/second, per §4.2:
    /// capacity = rate / 10 (100 ms of headroom), refilled by that same
    /// amount every 100 ms.
    #[must_use]
    pub fn for_rate_bytes_per_sec(rate: u64) -> Self {
        let amount = rate / 10;
        Self::new(amount, amount)
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[must_use]
    pub fn balance(&self) -> u64 {
        self.balance.load(Ordering::SeqCst)
    }

    /// Adds `self.refill_amount` bytes, capped at capacity, and wakes
    /// waiters.
    pub fn refill(&self) {
        self.credit(self.refill_amount);
    }

    /// Adds `amount` bytes, capped at capacity, and wakes waiters. Used by
    /// both the periodic refill and [`TokenBucket::return_bytes`].
    fn credit(&self, amount: u64) {
        if amount == 0 {
            return;
        }
        self.balance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |balance| {
                Some(balance.saturating_add(amount).min(self.capacity))
            })
            .ok();
        self.notify.notify_waiters();
    }

    /// Obtains a grant of up to `requested` bytes, blocking while the
    /// balance is zero. Returns `None` if `ct` fires before any bytes are
    /// available; never consumes tokens in that case.
    pub async fn acquire(&self, requested: u64, ct: &CancellationToken) -> Option<u64> {
        if requested == 0 {
            return Some(0);
        }
        loop {
            let taken = self
                .balance
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |balance| {
                    if balance == 0 {
                        None
                    } else {
                        Some(balance - balance.min(requested))
                    }
                })
                .map(|before| before.min(requested));

            if let Ok(before) = taken {
                return Some(before.min(requested));
            }

            tokio::select! {
                () = self.notify.notified() => {}
                () = ct.cancelled() => return None,
            }
        }
    }

    /// Credits back `waste = max(0, granted - actual)` bytes, capped at
    /// capacity. Over-credit beyond capacity is silently discarded.
    pub fn return_bytes(&self, granted: u64, actual: u64) {
        let waste = granted.saturating_sub(actual);
        self.credit(waste);
    }
}

/// Reference-counted handle, the shape every group's entry in the
/// governor's bucket map takes.
pub type SharedBucket = Arc<TokenBucket>;
