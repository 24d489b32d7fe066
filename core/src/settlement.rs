//! Single-assignment settlement of a raced outcome.
//!
//! Several event sources (stdout lines, stderr lines, process exit, a timer)
//! compete to decide one launch. Wrapping a oneshot sender behind a mutex makes
//! the exactly-once rule structural: the first `settle` takes the sender, every
//! later call finds it gone and is counted as discarded.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::oneshot;

pub struct Settlement<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
    discarded: AtomicU64,
}

impl<T> Clone for Settlement<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Settlement<T> {
    /// Returns the settlement handle and the receiver that resolves with the
    /// first settled value.
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let settlement = Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                discarded: AtomicU64::new(0),
            }),
        };
        (settlement, rx)
    }

    /// Attempts to settle with `outcome`. Returns true when this call won the
    /// race; a losing call only bumps the discarded counter.
    pub fn settle(&self, outcome: T) -> bool {
        let mut guard = match self.inner.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.take() {
            Some(tx) => {
                // The receiver may already be gone when the launch was
                // abandoned; the settlement still counts as won.
                let _ = tx.send(outcome);
                true
            }
            None => {
                self.inner.discarded.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        let guard = match self.inner.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.is_none()
    }

    /// Number of signals that arrived after the settlement was decided.
    pub fn discarded(&self) -> u64 {
        self.inner.discarded.load(Ordering::Relaxed)
    }
}
