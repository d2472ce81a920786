//! Connection pool
//!
//! Maps each [`DeviceIdentity`] to at most one pooled transport. Every entry
//! carries its own async mutex, held by the caller from checkout through the
//! read, so establishment is single-flight per device and concurrent callers
//! reuse whatever the first one connected.
//!
//! Entries are removed in two ways:
//! - [`ConnectionPool::evict`] removes by key (explicit disconnect, shutdown)
//! - [`ConnectionGuard::discard`] removes only the exact entry the guard holds,
//!   so a failed caller never drops a fresh entry created after it
//!
//! A guard dropped while a read is still outstanding (the caller's future was
//! cancelled) also removes its exact entry, since the transport may still
//! have an unanswered request queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::device::DeviceIdentity;
use crate::error::Result;
use crate::transport::{ModbusTransport, TransportFactory};

type SharedTransport = Arc<Mutex<Box<dyn ModbusTransport>>>;

/// One transport binding for a device
pub struct PooledConnection {
    /// Insertion sequence number, unique per entry for the pool's lifetime
    sequence: u64,
    /// Last openness seen by a lock holder; read when the lock is busy
    open: AtomicBool,
    transport: SharedTransport,
}

impl PooledConnection {
    fn new(transport: Box<dyn ModbusTransport>, sequence: u64) -> Self {
        Self {
            sequence,
            open: AtomicBool::new(false),
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    fn mark_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    /// Openness without waiting behind an in-flight connect or read
    fn peek_open(&self) -> bool {
        match self.transport.try_lock() {
            Ok(transport) => transport.is_open(),
            Err(_) => self.open.load(Ordering::Acquire),
        }
    }
}

/// Snapshot of one pool entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub identity: DeviceIdentity,
    pub is_open: bool,
    pub sequence: u64,
}

/// Pool of per-device Modbus connections
pub struct ConnectionPool {
    factory: Arc<dyn TransportFactory>,
    entries: DashMap<DeviceIdentity, Arc<PooledConnection>>,
    next_sequence: AtomicU64,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            entries: DashMap::new(),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Name of the transport factory backing this pool
    pub fn transport_name(&self) -> &'static str {
        self.factory.name()
    }

    /// Lock the entry for `identity`, creating an unconnected one if absent
    ///
    /// The returned guard holds the entry exclusively; it is not connected yet.
    pub async fn checkout(&self, identity: &DeviceIdentity) -> ConnectionGuard<'_> {
        loop {
            let entry = self.get_or_insert(identity);
            let transport = Arc::clone(&entry.transport).lock_owned().await;

            if self.is_current(identity, &entry) {
                return ConnectionGuard {
                    pool: self,
                    identity: identity.clone(),
                    entry,
                    transport,
                    read_in_flight: false,
                };
            }

            // Evicted while waiting for the lock
            debug!("Entry for {} replaced during checkout, retrying", identity);
        }
    }

    /// Get-or-create the entry for `identity` and make sure it is connected
    ///
    /// On connect failure the closed entry stays in the pool; the caller
    /// decides whether to evict it.
    pub async fn acquire(&self, identity: &DeviceIdentity) -> Result<ConnectionGuard<'_>> {
        let mut guard = self.checkout(identity).await;
        guard.ensure_connected().await?;
        Ok(guard)
    }

    /// Remove the entry for `identity`, closing its transport when open
    ///
    /// Close failures are logged and swallowed. Returns whether an entry was
    /// removed; evicting an absent identity is a no-op.
    pub async fn evict(&self, identity: &DeviceIdentity) -> bool {
        let Some((_, entry)) = self.entries.remove(identity) else {
            debug!("Evict {}: not pooled", identity);
            return false;
        };

        let mut transport = entry.transport.lock().await;
        close_quietly(identity, &mut **transport).await;
        entry.mark_open(false);
        info!("Evicted connection {}", identity);
        true
    }

    /// Snapshot of all entries in insertion order
    ///
    /// Never waits on an entry's lock. A busy entry reports the openness its
    /// holder last recorded.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .entries
            .iter()
            .map(|e| ConnectionInfo {
                identity: e.key().clone(),
                is_open: e.value().peek_open(),
                sequence: e.value().sequence,
            })
            .collect();
        infos.sort_by_key(|info| info.sequence);
        infos
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &DeviceIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Evict every entry, returning how many were removed
    pub async fn close_all(&self) -> usize {
        let identities: Vec<DeviceIdentity> =
            self.entries.iter().map(|e| e.key().clone()).collect();
        let results = join_all(identities.iter().map(|id| self.evict(id))).await;
        let closed = results.into_iter().filter(|removed| *removed).count();
        info!("Closed {} pooled connection(s)", closed);
        closed
    }

    fn get_or_insert(&self, identity: &DeviceIdentity) -> Arc<PooledConnection> {
        let entry = self.entries.entry(identity.clone()).or_insert_with(|| {
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            debug!("Pooling new connection #{} for {}", sequence, identity);
            Arc::new(PooledConnection::new(self.factory.create(), sequence))
        });
        Arc::clone(entry.value())
    }

    fn is_current(&self, identity: &DeviceIdentity, entry: &Arc<PooledConnection>) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }

    fn remove_exact(&self, identity: &DeviceIdentity, entry: &Arc<PooledConnection>) -> bool {
        self.entries
            .remove_if(identity, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }
}

async fn close_quietly(identity: &DeviceIdentity, transport: &mut dyn ModbusTransport) {
    if !transport.is_open() {
        return;
    }
    if let Err(e) = transport.close().await {
        warn!("Failed to close connection {}: {}", identity, e);
    }
}

/// Exclusive access to one pooled connection
pub struct ConnectionGuard<'a> {
    pool: &'a ConnectionPool,
    identity: DeviceIdentity,
    entry: Arc<PooledConnection>,
    transport: OwnedMutexGuard<Box<dyn ModbusTransport>>,
    read_in_flight: bool,
}

impl ConnectionGuard<'_> {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Sequence number of the underlying entry
    pub fn sequence(&self) -> u64 {
        self.entry.sequence
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Connect the transport unless it is already open
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.transport.is_open() {
            debug!("Reusing connection {}", self.identity);
            return Ok(());
        }

        debug!("Connecting {}", self.identity);
        let result = self.transport.connect(&self.identity).await;
        self.entry.mark_open(self.transport.is_open());
        result?;
        info!("Connected to {}", self.identity);
        Ok(())
    }

    pub async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.read_in_flight = true;
        let result = self.transport.read_holding_registers(start, count).await;
        self.read_in_flight = false;
        result
    }

    /// Close the transport and drop this exact entry from the pool
    ///
    /// A newer entry for the same identity is left untouched. Returns whether
    /// this entry was still pooled.
    pub async fn discard(mut self) -> bool {
        close_quietly(&self.identity, &mut **self.transport).await;
        self.entry.mark_open(false);
        self.read_in_flight = false;
        let removed = self.pool.remove_exact(&self.identity, &self.entry);
        if removed {
            info!("Discarded connection {}", self.identity);
        }
        removed
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if !self.read_in_flight {
            return;
        }
        // Dropping the transport with the entry closes its socket
        self.entry.mark_open(false);
        if self.pool.remove_exact(&self.identity, &self.entry) {
            warn!(
                "Read on {} abandoned mid-request, connection dropped",
                self.identity
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::GatewayError;
    use crate::transport::{SimulatedDevices, SimulatorFactory};

    fn pool_with_devices() -> (Arc<ConnectionPool>, Arc<SimulatedDevices>) {
        let devices = SimulatedDevices::new();
        let factory = Arc::new(SimulatorFactory::new(Arc::clone(&devices)));
        (Arc::new(ConnectionPool::new(factory)), devices)
    }

    fn plc(slave_id: u8) -> DeviceIdentity {
        DeviceIdentity::new("10.0.0.5", 502, slave_id)
    }

    #[tokio::test]
    async fn test_acquire_creates_and_connects() {
        let (pool, devices) = pool_with_devices();
        assert!(pool.is_empty());

        let guard = pool.acquire(&plc(1)).await.unwrap();
        assert!(guard.is_open());
        drop(guard);

        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&plc(1)));
        assert_eq!(devices.connect_count(&plc(1)), 1);
    }

    #[tokio::test]
    async fn test_acquire_reuses_open_connection() {
        let (pool, devices) = pool_with_devices();

        let first = pool.acquire(&plc(1)).await.unwrap().sequence();
        let second = pool.acquire(&plc(1)).await.unwrap().sequence();

        assert_eq!(first, second);
        assert_eq!(devices.connect_count(&plc(1)), 1);
    }

    #[tokio::test]
    async fn test_acquire_failure_leaves_closed_entry() {
        let (pool, devices) = pool_with_devices();
        devices.set_unreachable("10.0.0.5");

        let err = pool.acquire(&plc(1)).await.err().unwrap();
        assert!(matches!(err, GatewayError::ConnectionError(_)));
        assert!(pool.contains(&plc(1)));

        let listed = pool.list();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_open);
    }

    #[tokio::test]
    async fn test_closed_entry_reconnects_under_same_key() {
        let (pool, devices) = pool_with_devices();
        devices.set_unreachable("10.0.0.5");
        let _ = pool.acquire(&plc(1)).await;
        devices.set_reachable("10.0.0.5");

        let guard = pool.acquire(&plc(1)).await.unwrap();
        assert!(guard.is_open());
        drop(guard);
        assert_eq!(pool.len(), 1);
        assert_eq!(devices.connect_count(&plc(1)), 1);
    }

    #[tokio::test]
    async fn test_evict_closes_and_is_idempotent() {
        let (pool, devices) = pool_with_devices();
        drop(pool.acquire(&plc(1)).await.unwrap());

        assert!(pool.evict(&plc(1)).await);
        assert!(!pool.evict(&plc(1)).await);
        assert!(pool.is_empty());
        assert_eq!(devices.close_count(&plc(1)), 1);
    }

    #[tokio::test]
    async fn test_slave_ids_are_independent_entries() {
        let (pool, devices) = pool_with_devices();
        drop(pool.acquire(&plc(1)).await.unwrap());
        drop(pool.acquire(&plc(2)).await.unwrap());

        assert_eq!(pool.len(), 2);
        pool.evict(&plc(1)).await;
        assert!(pool.contains(&plc(2)));
        assert_eq!(devices.close_count(&plc(2)), 0);
    }

    #[tokio::test]
    async fn test_list_is_in_insertion_order() {
        let (pool, _devices) = pool_with_devices();
        for slave in [3, 1, 2] {
            drop(pool.acquire(&plc(slave)).await.unwrap());
        }

        let slaves: Vec<u8> = pool
            .list()
            .into_iter()
            .map(|info| info.identity.slave_id)
            .collect();
        assert_eq!(slaves, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_list_does_not_wait_for_connecting_entry() {
        let (pool, devices) = pool_with_devices();
        drop(pool.acquire(&plc(1)).await.unwrap());
        devices.set_connect_delay(Duration::from_secs(3));

        let connecting = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(&plc(2)).await.is_ok() })
        };
        while !pool.contains(&plc(2)) {
            tokio::task::yield_now().await;
        }

        let listed = tokio::time::timeout(Duration::from_millis(500), async { pool.list() })
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].is_open);
        assert!(!listed[1].is_open);

        connecting.abort();
    }

    #[tokio::test]
    async fn test_list_reports_busy_open_entry_as_open() {
        let (pool, _devices) = pool_with_devices();
        let held = pool.acquire(&plc(1)).await.unwrap();

        let listed = pool.list();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_open);
        drop(held);
    }

    #[tokio::test]
    async fn test_cancelled_read_drops_entry() {
        let (pool, devices) = pool_with_devices();
        devices.set_read_delay(Duration::from_secs(3));

        let read = async {
            let mut guard = pool.acquire(&plc(1)).await?;
            guard.read_holding_registers(0, 1).await
        };
        assert!(tokio::time::timeout(Duration::from_millis(100), read)
            .await
            .is_err());
        assert!(!pool.contains(&plc(1)));

        devices.set_read_delay(Duration::ZERO);
        let mut guard = pool.acquire(&plc(1)).await.unwrap();
        assert_eq!(guard.read_holding_registers(0, 1).await.unwrap(), vec![10]);
        assert_eq!(devices.connect_count(&plc(1)), 2);
    }

    #[tokio::test]
    async fn test_completed_read_keeps_entry() {
        let (pool, _devices) = pool_with_devices();
        let mut guard = pool.acquire(&plc(1)).await.unwrap();
        guard.read_holding_registers(0, 2).await.unwrap();
        drop(guard);

        assert!(pool.contains(&plc(1)));
        assert!(pool.list()[0].is_open);
    }

    #[tokio::test]
    async fn test_discard_removes_only_held_entry() {
        let (pool, _devices) = pool_with_devices();
        let stale = pool.acquire(&plc(1)).await.unwrap();
        let stale_sequence = stale.sequence();

        // Simulate a disconnect racing with the held guard
        let evictor = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.evict(&plc(1)).await })
        };
        tokio::task::yield_now().await;
        while pool.contains(&plc(1)) {
            tokio::task::yield_now().await;
        }

        drop(stale);
        assert!(evictor.await.unwrap());

        let fresh = pool.acquire(&plc(1)).await.unwrap();
        assert_ne!(fresh.sequence(), stale_sequence);
        drop(fresh);

        // A guard for the fresh entry discards it; nothing else is touched
        let guard = pool.checkout(&plc(1)).await;
        assert!(guard.discard().await);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_stale_discard_keeps_fresh_entry() {
        let (pool, _devices) = pool_with_devices();
        let stale = pool.acquire(&plc(1)).await.unwrap();

        // Entry replaced while the stale guard is still alive
        pool.entries.remove(&plc(1));
        let fresh = pool.get_or_insert(&plc(1));

        assert!(!stale.discard().await);
        assert!(pool.contains(&plc(1)));
        assert!(pool.is_current(&plc(1), &fresh));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_connects_once() {
        let (pool, devices) = pool_with_devices();
        devices.set_connect_delay(Duration::from_millis(50));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.acquire(&plc(1)).await.map(|g| g.sequence()) })
            })
            .collect();

        let sequences: Vec<u64> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert!(sequences.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(devices.connect_count(&plc(1)), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_checkout_after_eviction_gets_fresh_entry() {
        let (pool, _devices) = pool_with_devices();
        let held = pool.acquire(&plc(1)).await.unwrap();
        let held_sequence = held.sequence();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.checkout(&plc(1)).await.sequence() })
        };
        tokio::task::yield_now().await;

        // Remove the entry while the waiter is blocked on its lock
        pool.entries.remove(&plc(1));
        drop(held);

        let waiter_sequence = waiter.await.unwrap();
        assert_ne!(waiter_sequence, held_sequence);
        assert!(pool.contains(&plc(1)));
    }

    #[tokio::test]
    async fn test_close_all_empties_pool() {
        let (pool, devices) = pool_with_devices();
        for slave in 1..=3 {
            drop(pool.acquire(&plc(slave)).await.unwrap());
        }

        assert_eq!(pool.close_all().await, 3);
        assert!(pool.is_empty());
        assert_eq!(devices.close_count(&plc(2)), 1);
    }
}
