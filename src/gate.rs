//! The compression gate: a counting semaphore with a bounded admission
//! queue in front of it.
//!
//! The semaphore bounds concurrent optimize calls to the permit count; the
//! queue cap bounds how many callers may wait for a permit. A full queue
//! rejects immediately so payload buffers never pile up in memory.

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::{Result, SlimgError};
use crate::settings::Settings;

pub const RETRY_AFTER_SECS: u64 = 5;

pub struct CompressionGate {
    semaphore: Semaphore,
    queue_depth: Mutex<usize>,
    permits: usize,
    cap: usize,
}

impl CompressionGate {
    pub fn new(permits: usize, queue_cap: usize) -> Self {
        Self {
            semaphore: Semaphore::new(permits),
            queue_depth: Mutex::new(0),
            permits,
            cap: queue_cap,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.permits, settings.queue_cap)
    }

    /// Acquire a compression slot.
    ///
    /// The check-and-increment of the queue depth happens under the mutex,
    /// then the caller waits for a permit; tokio hands permits out in FIFO
    /// order. A full queue fails immediately with [`SlimgError::Overloaded`]
    /// without waiting. The returned permit releases on drop, including
    /// when the waiting future is cancelled mid-acquire.
    pub async fn acquire(&self) -> Result<GatePermit<'_>> {
        {
            let mut depth = self.queue_depth.lock();
            if *depth >= self.cap {
                return Err(SlimgError::Overloaded {
                    retry_after_secs: RETRY_AFTER_SECS,
                });
            }
            *depth += 1;
        }
        let depth_guard = DepthGuard { gate: self };

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SlimgError::Cancelled)?;

        Ok(GatePermit {
            _depth: depth_guard,
            _permit: permit,
        })
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Jobs currently holding a permit.
    pub fn active_jobs(&self) -> usize {
        self.permits - self.semaphore.available_permits()
    }

    /// Jobs admitted but still waiting for a permit.
    pub fn queued_jobs(&self) -> usize {
        let depth = *self.queue_depth.lock();
        depth.saturating_sub(self.active_jobs())
    }
}

/// Decrements the queue depth exactly once, whether acquisition completed,
/// failed, or was cancelled.
struct DepthGuard<'a> {
    gate: &'a CompressionGate,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let mut depth = self.gate.queue_depth.lock();
        *depth = depth.saturating_sub(1);
    }
}

/// RAII slot handle. Dropping it returns the permit and leaves the queue.
pub struct GatePermit<'a> {
    _depth: DepthGuard<'a>,
    _permit: SemaphorePermit<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn acquires_up_to_permit_count() {
        let gate = CompressionGate::new(2, 4);
        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert_eq!(gate.active_jobs(), 2);
        drop(a);
        drop(b);
        assert_eq!(gate.active_jobs(), 0);
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let gate = std::sync::Arc::new(CompressionGate::new(1, 2));

        let _held = gate.acquire().await.unwrap();
        // Fill the remaining queue slot with a waiter.
        let waiter_gate = gate.clone();
        let waiter = tokio::spawn(async move {
            let permit = waiter_gate.acquire().await;
            // Hold until aborted.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(permit);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.queued_jobs(), 1);

        let started = Instant::now();
        let err = gate.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            SlimgError::Overloaded {
                retry_after_secs: RETRY_AFTER_SECS
            }
        ));
        // Rejection is non-blocking: well under the 10ms bound.
        assert!(started.elapsed() < Duration::from_millis(10));

        waiter.abort();
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_the_queue() {
        let gate = std::sync::Arc::new(CompressionGate::new(1, 2));
        let held = gate.acquire().await.unwrap();

        let waiter_gate = gate.clone();
        let waiter = tokio::spawn(async move {
            let _permit = waiter_gate.acquire().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.queued_jobs(), 1);
        waiter.abort();
        let _ = waiter.await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The aborted waiter must have decremented the queue depth.
        assert_eq!(gate.queued_jobs(), 0);
        drop(held);
        assert!(gate.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn released_permit_unblocks_waiter() {
        let gate = std::sync::Arc::new(CompressionGate::new(1, 2));
        let held = gate.acquire().await.unwrap();

        let waiter_gate = gate.clone();
        let waiter = tokio::spawn(async move {
            let _permit = waiter_gate.acquire().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should get the permit")
            .unwrap();
    }
}
