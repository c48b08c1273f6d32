//! Registry of live connections.
//!
//! The registry is the only shared mutable structure in the relay. Every
//! mutation and every snapshot goes through one lock; the lock is held only
//! for the map operation itself and never across a network write. The
//! dispatcher iterates a [`snapshot`](ConnectionRegistry::snapshot), so a
//! removal triggered mid-broadcast can't disturb an iteration in progress.

use super::channel::FrameSink;
use super::handle::ConnectionHandle;
use super::ConnectionId;
use crate::error::RelayError;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Tracks every registered connection, keyed and ordered by identifier.
pub struct ConnectionRegistry {
    /// Active handles; ordered so snapshots come out in registration order
    connections: RwLock<BTreeMap<ConnectionId, Arc<ConnectionHandle>>>,

    /// Next identifier to hand out
    next_id: AtomicU64,

    /// Maximum concurrent connections (0 = unlimited)
    max_connections: usize,

    /// Write timeout given to every new handle
    write_timeout: Duration,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `max_connections` - Capacity limit, `0` for no limit
    /// * `write_timeout` - Per-write deadline applied by every handle
    pub fn new(max_connections: usize, write_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            max_connections,
            write_timeout,
        }
    }

    /// Admits a new connection and assigns it a fresh identifier.
    ///
    /// # Errors
    ///
    /// [`RelayError::CapacityExceeded`] when the registry is full. The sink is
    /// dropped in that case; the caller still owns the read half and should
    /// close the connection without starting an ingress loop.
    pub async fn register(
        &self,
        sink: Box<dyn FrameSink>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Arc<ConnectionHandle>, RelayError> {
        let mut connections = self.connections.write().await;

        if self.max_connections > 0 && connections.len() >= self.max_connections {
            return Err(RelayError::CapacityExceeded {
                limit: self.max_connections,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ConnectionHandle::new(id, sink, remote_addr, self.write_timeout));
        connections.insert(id, handle.clone());

        debug!("Registered connection {} ({} active)", id, connections.len());
        Ok(handle)
    }

    /// Removes a connection and shuts its handle down.
    ///
    /// Idempotent: removing an unknown or already removed id is a no-op and
    /// returns `None`.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let removed = self.connections.write().await.remove(&id);
        if let Some(handle) = &removed {
            handle.shutdown();
            debug!("Removed connection {}", id);
        }
        removed
    }

    /// Point-in-time copy of the membership, ordered by identifier.
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Removes and shuts down every connection. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.connections.write().await);
        for handle in drained.values() {
            handle.shutdown();
        }
        if !drained.is_empty() {
            info!("Closed {} connection(s)", drained.len());
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory_channel;
    use std::collections::HashSet;

    fn registry(max_connections: usize) -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(max_connections, Duration::from_secs(1)))
    }

    async fn register_one(registry: &ConnectionRegistry) -> Result<Arc<ConnectionHandle>, RelayError> {
        let (sink, _source, _peer) = memory_channel(4);
        registry.register(Box::new(sink), None).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_registration_yields_distinct_ids() {
        let registry = registry(0);

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { register_one(&registry).await.unwrap().id() })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }

        assert_eq!(ids.len(), 64);
        assert_eq!(registry.snapshot().await.len(), 64);
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered_by_id() {
        let registry = registry(0);
        for _ in 0..5 {
            register_one(&registry).await.unwrap();
        }
        let ids: Vec<_> = registry.snapshot().await.iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = registry(0);
        let a = register_one(&registry).await.unwrap();
        let b = register_one(&registry).await.unwrap();

        assert!(registry.remove(a.id()).await.is_some());
        assert!(registry.remove(a.id()).await.is_none());
        assert!(registry.remove(999).await.is_none());

        assert!(!a.is_alive());
        assert!(b.is_alive());
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(b.id()).await);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let registry = registry(0);
        let first = register_one(&registry).await.unwrap();
        registry.remove(first.id()).await;
        let second = register_one(&registry).await.unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let registry = registry(2);
        let first = register_one(&registry).await.unwrap();
        register_one(&registry).await.unwrap();

        let result = register_one(&registry).await;
        assert!(matches!(result, Err(RelayError::CapacityExceeded { limit: 2 })));

        // Room frees up after a removal.
        registry.remove(first.id()).await;
        assert!(register_one(&registry).await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_survives_removal() {
        let registry = registry(0);
        for _ in 0..3 {
            register_one(&registry).await.unwrap();
        }

        let snapshot = registry.snapshot().await;
        registry.remove(2).await;

        assert_eq!(snapshot.len(), 3);
        assert_eq!(registry.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = registry(0);
        let handles: Vec<_> = futures::future::join_all((0..3).map(|_| register_one(&registry)))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(registry.close_all().await, 3);
        assert!(registry.is_empty().await);
        assert!(handles.iter().all(|h| !h.is_alive()));
        assert_eq!(registry.close_all().await, 0);
    }
}
