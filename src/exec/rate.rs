// src/exec/rate.rs

//! Optional start-rate pacing.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

use super::task::BoxFuture;

/// Suspends callers until they are allowed to start under some rate.
///
/// `acquire` may pause for a long time; callers must not assume it is quick.
pub trait RateGate: Send + Sync {
    fn acquire(&self) -> BoxFuture<'_, ()>;
}

/// `max_requests` starts per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Sliding-window [`RateGate`]: remembers the start instants of the last
/// `max_requests` acquisitions and makes new callers wait until the oldest
/// one falls out of the window.
#[derive(Debug)]
pub struct WindowRateGate {
    limit: RateLimit,
    starts: Mutex<VecDeque<Instant>>,
}

impl WindowRateGate {
    /// `max_requests` is clamped to at least 1.
    pub fn new(limit: RateLimit) -> Self {
        let limit = RateLimit {
            max_requests: limit.max_requests.max(1),
            window: limit.window,
        };
        Self {
            limit,
            starts: Mutex::new(VecDeque::with_capacity(limit.max_requests as usize)),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }
}

impl RateGate for WindowRateGate {
    fn acquire(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            loop {
                let wake_at = {
                    let mut starts = self.starts.lock().await;
                    let now = Instant::now();
                    while starts
                        .front()
                        .is_some_and(|&t| now.duration_since(t) >= self.limit.window)
                    {
                        starts.pop_front();
                    }

                    if starts.len() < self.limit.max_requests as usize {
                        starts.push_back(now);
                        return;
                    }

                    match starts.front() {
                        Some(&oldest) => oldest + self.limit.window,
                        None => return,
                    }
                };

                trace!(?wake_at, "rate gate full; waiting for window to slide");
                sleep_until(wake_at).await;
            }
        })
    }
}
