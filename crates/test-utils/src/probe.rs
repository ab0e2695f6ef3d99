use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flowdag::errors::Result;
use flowdag::exec::{BoundedExecutor, BoxFuture, SemaphoreExecutor, Slot};

/// A [`BoundedExecutor`] that delegates to a [`SemaphoreExecutor`] and records
/// how many slots were ever held at the same time.
#[derive(Debug, Clone)]
pub struct ProbeExecutor {
    inner: SemaphoreExecutor,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    acquired: Arc<AtomicUsize>,
}

impl ProbeExecutor {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            inner: SemaphoreExecutor::new(max_concurrency),
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            acquired: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of simultaneously held slots so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total number of successful acquisitions.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Shut the underlying semaphore.
    pub fn close(&self) {
        self.inner.close();
    }
}

struct HeldSlot {
    _inner: Slot,
    current: Arc<AtomicUsize>,
}

impl Drop for HeldSlot {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BoundedExecutor for ProbeExecutor {
    fn acquire(&self) -> BoxFuture<'_, Result<Slot>> {
        Box::pin(async move {
            let inner = self.inner.acquire().await?;
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Slot::new(HeldSlot {
                _inner: inner,
                current: Arc::clone(&self.current),
            }))
        })
    }

    fn active(&self) -> usize {
        self.inner.active()
    }

    fn pending(&self) -> usize {
        self.inner.pending()
    }

    fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency()
    }
}
