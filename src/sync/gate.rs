//! Mutation Gate - serializes read-decide-write sequences on local state
//!
//! One critical section runs at a time process-wide. Waiters are admitted
//! in FIFO order. The guard releases the gate when dropped.
//!
//! Never hold a guard across a network call.

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Process-wide mutual exclusion over the local store
#[derive(Clone, Default)]
pub struct MutationGate {
    inner: Arc<Mutex<()>>,
}

/// Proof of holding the gate; dropping it hands over to the next waiter
pub struct GateGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MutationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until this caller is the sole holder.
    ///
    /// Not re-entrant: acquiring again before dropping the guard deadlocks.
    pub async fn acquire(&self) -> GateGuard<'_> {
        GateGuard {
            _guard: self.inner.lock().await,
        }
    }

    /// Whether some critical section currently holds the gate
    #[cfg(test)]
    pub(crate) fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_on_drop() {
        let gate = MutationGate::new();

        let guard = gate.acquire().await;
        assert!(gate.is_held());
        drop(guard);
        assert!(!gate.is_held());
    }

    #[tokio::test]
    async fn test_one_critical_section_at_a_time() {
        let gate = MutationGate::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = gate.acquire().await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_order() {
        let gate = MutationGate::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let first = gate.acquire().await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = gate.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Let each waiter enqueue before spawning the next
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
