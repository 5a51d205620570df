//! Admission control: a bounded waiting queue plus a concurrency limiter.
//!
//! Each incoming request first reserves a [`QueueSlot`] (non-blocking, fails
//! with `QueueFull` at capacity), then trades it for a [`ConcurrencySlot`]
//! once fewer than the configured number of generations are in flight. Both
//! slots are RAII tokens; dropping one releases its capacity unit, so release
//! is guaranteed on every exit path.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// One unit of waiting-queue occupancy. Dropping it releases the slot.
pub struct QueueSlot {
    _permit: OwnedSemaphorePermit,
}

/// One unit of the generation concurrency limit. Held for the whole
/// generation including history commit; dropping it releases the slot.
pub struct ConcurrencySlot {
    _permit: OwnedSemaphorePermit,
}

/// Snapshot of admission state for the status endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AdmissionStatus {
    pub queue_size: usize,
    pub queue_max_size: usize,
    pub active_requests: usize,
    pub max_concurrent_requests: usize,
}

/// Owns the only two pieces of mutable state shared by every request:
/// queue occupancy and the in-flight generation count. No other component
/// touches the counters directly.
pub struct AdmissionController {
    queue: Arc<Semaphore>,
    queue_max_size: usize,
    running: Arc<Semaphore>,
    max_concurrent_requests: usize,
}

impl AdmissionController {
    pub fn new(queue_max_size: usize, max_concurrent_requests: usize) -> Self {
        Self {
            queue: Arc::new(Semaphore::new(queue_max_size)),
            queue_max_size,
            running: Arc::new(Semaphore::new(max_concurrent_requests)),
            max_concurrent_requests,
        }
    }

    /// Reserve a waiting-queue slot without blocking.
    ///
    /// Fails with [`Error::QueueFull`] when the queue is already at capacity;
    /// no slot is reserved in that case.
    pub fn try_enqueue(&self) -> Result<QueueSlot> {
        match self.queue.clone().try_acquire_owned() {
            Ok(permit) => Ok(QueueSlot { _permit: permit }),
            Err(_) => Err(Error::QueueFull),
        }
    }

    /// Wait for a concurrency slot, consuming the queue slot once granted.
    ///
    /// Suspends the calling task until fewer than the configured maximum of
    /// generations are in flight. The queue slot is dropped only after the
    /// concurrency permit is held, with no suspension point in between, so
    /// the waiting-to-running transition is atomic from the scheduler's
    /// perspective.
    pub async fn admit(&self, queue_slot: QueueSlot) -> Result<ConcurrencySlot> {
        let permit = self
            .running
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("concurrency semaphore closed: {}", e)))?;
        drop(queue_slot);
        Ok(ConcurrencySlot { _permit: permit })
    }

    /// Read the current admission state. Never mutates; safe to poll
    /// concurrently with any other operation.
    pub fn status(&self) -> AdmissionStatus {
        AdmissionStatus {
            queue_size: self.queue_max_size - self.queue.available_permits(),
            queue_max_size: self.queue_max_size,
            active_requests: self.max_concurrent_requests - self.running.available_permits(),
            max_concurrent_requests: self.max_concurrent_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_try_enqueue_rejects_at_capacity() {
        let controller = AdmissionController::new(2, 1);

        let _a = controller.try_enqueue().unwrap();
        let _b = controller.try_enqueue().unwrap();

        let rejected = controller.try_enqueue();
        assert!(matches!(rejected, Err(Error::QueueFull)));
        // The failed attempt must not have reserved anything.
        assert_eq!(controller.status().queue_size, 2);
    }

    #[test]
    fn test_queue_slot_released_on_drop() {
        let controller = AdmissionController::new(1, 1);

        let slot = controller.try_enqueue().unwrap();
        assert_eq!(controller.status().queue_size, 1);

        drop(slot);
        assert_eq!(controller.status().queue_size, 0);
        assert!(controller.try_enqueue().is_ok());
    }

    #[tokio::test]
    async fn test_admit_trades_queue_slot_for_concurrency_slot() {
        let controller = AdmissionController::new(1, 1);

        let queued = controller.try_enqueue().unwrap();
        let running = controller.admit(queued).await.unwrap();

        let status = controller.status();
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.active_requests, 1);

        drop(running);
        assert_eq!(controller.status().active_requests, 0);
    }

    #[tokio::test]
    async fn test_saturated_queue_rejects_new_arrivals() {
        // Q=1, C=1: request A is running, request B occupies the single
        // queue slot waiting for A. A further arrival must be rejected,
        // and admission works again once capacity frees up.
        let controller = Arc::new(AdmissionController::new(1, 1));

        let slot_a = controller.try_enqueue().unwrap();
        let running_a = controller.admit(slot_a).await.unwrap();

        let slot_b = controller.try_enqueue().unwrap();
        let waiting_b = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.admit(slot_b).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // B holds the only queue slot while blocked on the concurrency slot.
        assert!(matches!(controller.try_enqueue(), Err(Error::QueueFull)));
        let status = controller.status();
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.active_requests, 1);

        // A completes; B transitions to running and frees the queue.
        drop(running_a);
        let running_b = waiting_b.await.unwrap().unwrap();
        assert_eq!(controller.status().queue_size, 0);

        // A fresh arrival is admitted once B finishes.
        drop(running_b);
        let slot_c = controller.try_enqueue().unwrap();
        let _running_c = controller.admit(slot_c).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_capacity() {
        const CAPACITY: usize = 3;
        const REQUESTS: usize = 20;

        let controller = Arc::new(AdmissionController::new(REQUESTS, CAPACITY));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..REQUESTS {
            let controller = controller.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let queued = controller.try_enqueue().unwrap();
                let _running = controller.admit(queued).await.unwrap();

                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
        let status = controller.status();
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.active_requests, 0);
    }

    #[test]
    fn test_status_reports_capacities() {
        let controller = AdmissionController::new(10, 2);
        let status = controller.status();
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.queue_max_size, 10);
        assert_eq!(status.active_requests, 0);
        assert_eq!(status.max_concurrent_requests, 2);
    }
}
