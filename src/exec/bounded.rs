// src/exec/bounded.rs

//! Bounded concurrency primitive.
//!
//! The executor and the worker pool talk to a [`BoundedExecutor`] instead of
//! a raw semaphore, so hosts can plug in their own limiter (or an
//! instrumented one in tests). [`SemaphoreExecutor`] is the default.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::{FlowdagError, Result};

use super::task::BoxFuture;

/// A held concurrency slot. Dropping it frees the slot.
pub struct Slot {
    _guard: Box<dyn Send>,
}

impl Slot {
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Slot")
    }
}

/// Caps how many operations may be in flight at once.
pub trait BoundedExecutor: Send + Sync {
    /// Wait until a slot is free and take it.
    ///
    /// Fails with [`FlowdagError::ExecutorClosed`] once the executor has been
    /// shut down.
    fn acquire(&self) -> BoxFuture<'_, Result<Slot>>;

    /// Operations currently holding a slot.
    fn active(&self) -> usize;

    /// Callers currently waiting for a slot.
    fn pending(&self) -> usize;

    /// Configured cap.
    fn max_concurrency(&self) -> usize;
}

impl dyn BoundedExecutor {
    /// Run `fut` once a slot is available, holding the slot until it settles.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        let _slot = self.acquire().await?;
        Ok(fut.await)
    }
}

/// Default [`BoundedExecutor`] backed by a tokio [`Semaphore`].
#[derive(Debug, Clone)]
pub struct SemaphoreExecutor {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    active: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
}

impl SemaphoreExecutor {
    /// `max_concurrency` is clamped to at least 1.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            active: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Refuse all further acquisitions, including callers already waiting.
    /// Slots that are already held stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// Keeps the `active` counter honest for as long as the permit is held.
struct ActiveGuard {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decrements `pending` even if the acquiring future is dropped mid-wait.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BoundedExecutor for SemaphoreExecutor {
    fn acquire(&self) -> BoxFuture<'_, Result<Slot>> {
        Box::pin(async move {
            self.pending.fetch_add(1, Ordering::SeqCst);
            let waiting = PendingGuard(Arc::clone(&self.pending));

            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| FlowdagError::ExecutorClosed)?;
            drop(waiting);

            self.active.fetch_add(1, Ordering::SeqCst);
            Ok(Slot::new(ActiveGuard {
                _permit: permit,
                active: Arc::clone(&self.active),
            }))
        })
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}
