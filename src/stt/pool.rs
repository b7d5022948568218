use crate::lock_or_recover;
use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fixed set of expensive instances shared between threads.
///
/// Idle instances sit in a bounded channel; [`ModelPool::acquire`] blocks until one is
/// free and the returned guard puts it back on drop.
pub struct ModelPool<T> {
    idle_tx: Sender<T>,
    idle_rx: Receiver<T>,
    size: usize,
    stats: Mutex<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    requests: u64,
    total_wait: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub available: usize,
    pub requests: u64,
    pub total_wait_ms: u64,
    pub avg_wait_ms: f64,
}

impl<T: Send> ModelPool<T> {
    pub fn new(instances: Vec<T>) -> Result<Self> {
        if instances.is_empty() {
            bail!("model pool needs at least one instance");
        }
        let size = instances.len();
        let (idle_tx, idle_rx) = bounded(size);
        for instance in instances {
            idle_tx
                .send(instance)
                .map_err(|_| anyhow!("model pool channel closed"))?;
        }
        Ok(Self {
            idle_tx,
            idle_rx,
            size,
            stats: Mutex::new(Counters::default()),
        })
    }

    /// Build `size` instances with `factory`; any failure aborts the whole pool.
    pub fn load(size: usize, mut factory: impl FnMut(usize) -> Result<T>) -> Result<Self> {
        let instances = (0..size).map(&mut factory).collect::<Result<Vec<_>>>()?;
        Self::new(instances)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Block until an instance is free.
    pub fn acquire(&self) -> Result<PooledModel<'_, T>> {
        let started = Instant::now();
        let item = self
            .idle_rx
            .recv()
            .map_err(|_| anyhow!("model pool channel closed"))?;
        Ok(self.checkout(item, started))
    }

    /// Like [`acquire`](Self::acquire), giving up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PooledModel<'_, T>> {
        let started = Instant::now();
        match self.idle_rx.recv_timeout(timeout) {
            Ok(item) => Some(self.checkout(item, started)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let counters = lock_or_recover(&self.stats, "model pool stats");
        let total_wait_ms = counters.total_wait.as_millis() as u64;
        let avg_wait_ms = if counters.requests == 0 {
            0.0
        } else {
            counters.total_wait.as_secs_f64() * 1_000.0 / counters.requests as f64
        };
        PoolStats {
            size: self.size,
            available: self.idle_rx.len(),
            requests: counters.requests,
            total_wait_ms,
            avg_wait_ms,
        }
    }

    fn checkout(&self, item: T, started: Instant) -> PooledModel<'_, T> {
        let mut counters = lock_or_recover(&self.stats, "model pool stats");
        counters.requests += 1;
        counters.total_wait += started.elapsed();
        PooledModel {
            pool: self,
            item: Some(item),
        }
    }
}

/// Borrowed instance; returns to the pool when dropped.
pub struct PooledModel<'a, T> {
    pool: &'a ModelPool<T>,
    item: Option<T>,
}

impl<T> Deref for PooledModel<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled model used after release"),
        }
    }
}

impl<T> DerefMut for PooledModel<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled model used after release"),
        }
    }
}

impl<T> Drop for PooledModel<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            // Capacity equals the instance count, so this never blocks.
            let _ = self.pool.idle_tx.send(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_pool_is_rejected() {
        assert!(ModelPool::<u32>::new(Vec::new()).is_err());
    }

    #[test]
    fn load_propagates_factory_errors() {
        let result = ModelPool::load(3, |idx| {
            if idx == 2 {
                bail!("model {idx} failed")
            }
            Ok(idx)
        });
        assert!(result.is_err());
    }

    #[test]
    fn guard_returns_instance_on_drop() {
        let pool = ModelPool::new(vec![7u32]).expect("pool");
        {
            let model = pool.acquire().expect("acquire");
            assert_eq!(*model, 7);
            assert_eq!(pool.stats().available, 0);
            assert!(pool.acquire_timeout(Duration::from_millis(10)).is_none());
        }
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.stats().requests, 1);
    }

    #[test]
    fn concurrent_users_never_exceed_pool_size() {
        let pool = Arc::new(ModelPool::load(2, Ok).expect("pool"));
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _model = pool.acquire().expect("acquire");
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    in_use.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let stats = pool.stats();
        assert_eq!(stats.requests, 8);
        assert_eq!(stats.available, 2);
    }
}
