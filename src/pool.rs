//! Bounded pool of reusable client transports

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::transport::ClientTransport;

type Factory<T> = Box<dyn Fn(usize) -> T + Send + Sync>;

/// Snapshot of pool accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub created: usize,
    pub discarded: usize,
}

/// Pool of client transports
///
/// Pre-populated with `capacity` unconnected transports. When the pool is
/// empty `acquire` creates a new transport rather than waiting; surplus
/// transports are closed on release instead of being kept.
pub struct TransportPool<T: ClientTransport> {
    idle: Mutex<VecDeque<T>>,
    capacity: usize,
    factory: Factory<T>,
    created: AtomicUsize,
    discarded: AtomicUsize,
    closed: AtomicBool,
}

impl<T: ClientTransport> TransportPool<T> {
    /// `factory` receives a running creation index, used to spread
    /// transports over endpoints
    pub fn new(capacity: usize, factory: impl Fn(usize) -> T + Send + Sync + 'static) -> Self {
        let pool = Self {
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            factory: Box::new(factory),
            created: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        {
            let mut idle = pool.lock();
            for _ in 0..capacity {
                idle.push_back(pool.create());
            }
        }
        pool
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(&self) -> T {
        let index = self.created.fetch_add(1, Ordering::Relaxed);
        (self.factory)(index)
    }

    /// Take an idle transport, or create one if none is idle
    pub fn acquire(&self) -> PooledTransport<'_, T> {
        let transport = self.lock().pop_front().unwrap_or_else(|| {
            tracing::debug!(capacity = self.capacity, "pool empty, creating transport");
            self.create()
        });
        PooledTransport {
            pool: self,
            transport: Some(transport),
            healthy: false,
        }
    }

    fn release(&self, mut transport: T, healthy: bool) {
        if healthy && transport.is_connected() && !self.closed.load(Ordering::Acquire) {
            let mut idle = self.lock();
            if idle.len() < self.capacity {
                idle.push_back(transport);
                return;
            }
        }
        transport.close();
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Close every idle transport and stop keeping released ones
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<T> = self.lock().drain(..).collect();
        let count = drained.len();
        for mut transport in drained {
            transport.close();
        }
        if count > 0 {
            tracing::debug!(count, "closed pooled transports");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            idle: self.lock().len(),
            created: self.created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl<T: ClientTransport> std::fmt::Debug for TransportPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPool").field("stats", &self.stats()).finish()
    }
}

/// Transport borrowed from a pool
///
/// Returned to the pool on drop only if [`mark_healthy`](Self::mark_healthy)
/// was called and the transport is still connected; otherwise it is closed.
pub struct PooledTransport<'a, T: ClientTransport> {
    pool: &'a TransportPool<T>,
    transport: Option<T>,
    healthy: bool,
}

impl<T: ClientTransport> PooledTransport<'_, T> {
    /// Flag the last exchange as completed cleanly
    pub fn mark_healthy(&mut self) {
        self.healthy = true;
    }
}

impl<T: ClientTransport> Deref for PooledTransport<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only taken in drop
        self.transport.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: ClientTransport> DerefMut for PooledTransport<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.transport.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: ClientTransport> Drop for PooledTransport<'_, T> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            self.pool.release(transport, self.healthy);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::Result;

    #[derive(Debug)]
    struct FakeTransport {
        index: usize,
        connected: bool,
    }

    impl ClientTransport for FakeTransport {
        async fn connect(&mut self, _timeout: Duration) -> Result<()> {
            self.connected = true;
            Ok(())
        }

        async fn write(&mut self, _frame: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn read(&mut self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn close(&mut self) {
            self.connected = false;
        }
    }

    fn pool(capacity: usize) -> TransportPool<FakeTransport> {
        TransportPool::new(capacity, |index| FakeTransport {
            index,
            connected: false,
        })
    }

    #[test]
    fn test_prepopulated() {
        let pool = pool(3);
        assert_eq!(
            pool.stats(),
            PoolStats {
                capacity: 3,
                idle: 3,
                created: 3,
                discarded: 0
            }
        );
    }

    #[test]
    fn test_healthy_transport_is_reused() {
        let pool = pool(1);
        {
            let mut t = pool.acquire();
            smol::block_on(t.connect(Duration::from_secs(1))).unwrap();
            t.mark_healthy();
        }
        let t = pool.acquire();
        assert!(t.is_connected());
        assert_eq!(t.index, 0);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_unhealthy_transport_is_discarded() {
        let pool = pool(1);
        {
            let mut t = pool.acquire();
            smol::block_on(t.connect(Duration::from_secs(1))).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_creates_on_miss_and_trims_surplus() {
        let pool = pool(1);
        let mut a = pool.acquire();
        let mut b = pool.acquire();
        assert_eq!(b.index, 1);
        for t in [&mut a, &mut b] {
            smol::block_on(t.connect(Duration::from_secs(1))).unwrap();
            t.mark_healthy();
        }
        drop(a);
        drop(b);

        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_close_drains_and_rejects_returns() {
        let pool = pool(2);
        let mut t = pool.acquire();
        smol::block_on(t.connect(Duration::from_secs(1))).unwrap();
        t.mark_healthy();

        pool.close();
        assert_eq!(pool.stats().idle, 0);
        drop(t);
        assert_eq!(pool.stats().idle, 0);
        assert!(pool.is_closed());
    }
}
