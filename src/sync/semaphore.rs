//! # FIFO Counting Semaphore
//!
//! Bounds how many batches of a job are in flight at once. Admission is
//! strictly first-come-first-served: a freed slot always goes to the oldest
//! waiter, so no batch can be starved by later arrivals.
//!
//! Permits are RAII guards. There is no free `release()` - dropping the
//! guard returns the slot, which makes releasing a permit more than once
//! unrepresentable.
//!
//! ```
//! use mercato_core::sync::Semaphore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let semaphore = Arc::new(Semaphore::new(2));
//!
//! let first = semaphore.acquire().await;
//! let second = semaphore.acquire().await;
//! assert_eq!(semaphore.available_permits(), 0);
//!
//! drop(first);
//! assert_eq!(semaphore.available_permits(), 1);
//! # drop(second);
//! # });
//! ```

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Counting semaphore with a FIFO wait queue.
#[derive(Debug)]
pub struct Semaphore {
    capacity: usize,
    state: Mutex<SemaphoreState>,
}

#[derive(Debug)]
struct SemaphoreState {
    available: usize,
    /// Oldest waiter at the front; a freed slot is handed to it directly.
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Semaphore {
    /// Create a semaphore with `capacity` permits, all initially available.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "semaphore capacity must be positive");
        Self {
            capacity,
            state: Mutex::new(SemaphoreState {
                available: capacity,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Fixed capacity this semaphore was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held or promised to a queued waiter.
    pub fn available_permits(&self) -> usize {
        self.state.lock().available
    }

    /// Number of acquirers currently queued for a permit.
    pub fn queued_waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquire a permit, suspending while the semaphore is at capacity.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.acquire_slot().await;
        SemaphorePermit { semaphore: self }
    }

    /// Acquire a permit that can move into a spawned task.
    pub async fn acquire_owned(self: Arc<Self>) -> OwnedSemaphorePermit {
        self.acquire_slot().await;
        OwnedSemaphorePermit { semaphore: self }
    }

    /// Claim one slot, queueing behind earlier arrivals when none is free.
    async fn acquire_slot(&self) {
        loop {
            let receiver = {
                let mut state = self.state.lock();
                if state.waiters.is_empty() && state.available > 0 {
                    state.available -= 1;
                    return;
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            let waiter = QueuedWaiter {
                semaphore: self,
                receiver,
                admitted: false,
            };
            if waiter.await {
                return;
            }
            // The sender side vanished without a handoff; take the fast
            // path again.
        }
    }

    /// Return one slot: hand it to the oldest live waiter, or bank it.
    fn release_slot(&self) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
            // Waiter gave up before admission; try the next one.
        }
        state.available = (state.available + 1).min(self.capacity);
    }
}

/// Pending admission for one queued acquirer.
///
/// If the acquiring future is dropped after the releaser already handed it
/// a slot, the drop glue returns that slot so it cannot leak.
struct QueuedWaiter<'a> {
    semaphore: &'a Semaphore,
    receiver: oneshot::Receiver<()>,
    admitted: bool,
}

impl Future for QueuedWaiter<'_> {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(())) => {
                self.admitted = true;
                Poll::Ready(true)
            }
            Poll::Ready(Err(_)) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if self.admitted {
            // The caller owns the slot now; the permit guard releases it.
            return;
        }
        self.receiver.close();
        if let Ok(()) = self.receiver.try_recv() {
            self.semaphore.release_slot();
        }
    }
}

/// Borrowed permit; the slot is returned when this guard drops.
#[must_use]
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release_slot();
    }
}

/// Owning permit for use across `tokio::spawn` boundaries.
#[must_use]
#[derive(Debug)]
pub struct OwnedSemaphorePermit {
    semaphore: Arc<Semaphore>,
}

impl Drop for OwnedSemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_permits_start_at_capacity() {
        let semaphore = Semaphore::new(3);
        assert_eq!(semaphore.capacity(), 3);
        assert_eq!(semaphore.available_permits(), 3);

        let permit = semaphore.acquire().await;
        assert_eq!(semaphore.available_permits(), 2);
        drop(permit);
        assert_eq!(semaphore.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_holders_never_exceed_capacity() {
        let semaphore = Arc::new(Semaphore::new(4));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let semaphore = Arc::clone(&semaphore);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(semaphore.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_admission_is_fifo() {
        let semaphore = Arc::new(Semaphore::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate = semaphore.acquire().await;

        let mut handles = Vec::new();
        for index in 0..8 {
            let task_semaphore = Arc::clone(&semaphore);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = task_semaphore.acquire_owned().await;
                order.lock().push(index);
            }));
            // Let this waiter reach the queue before spawning the next.
            while semaphore.queued_waiters() <= index {
                tokio::task::yield_now().await;
            }
        }

        drop(gate);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_slot() {
        let semaphore = Arc::new(Semaphore::new(1));
        let held = semaphore.acquire().await;

        let waiter = tokio::spawn({
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire_owned().await;
            }
        });
        while semaphore.queued_waiters() == 0 {
            tokio::task::yield_now().await;
        }

        waiter.abort();
        let _ = waiter.await;
        drop(held);

        // The slot abandoned by the cancelled waiter must be reusable.
        let reacquired = semaphore.acquire().await;
        drop(reacquired);
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_is_rejected() {
        let _ = Semaphore::new(0);
    }
}
