//! Fan-out dispatcher.
//!
//! Distributes one inbound frame to the members of the connection registry.
//! Each dispatch works on its own registry snapshot, writes to the recipients
//! with bounded concurrency, and only returns once every write has settled.
//! A failing recipient is logged and removed; it never aborts delivery to the
//! others.

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, Frame};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Who receives a relayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Every registered connection, the originator included
    #[default]
    EchoToAll,
    /// Every registered connection except the originator
    ExcludeOrigin,
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Recipient selection policy
    pub policy: DeliveryPolicy,

    /// Upper bound on writes in flight for a single dispatch
    pub max_concurrent_writes: usize,

    /// Prefix text frames with `User {origin}: `
    pub label_sender: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            policy: DeliveryPolicy::EchoToAll,
            max_concurrent_writes: 64,
            label_sender: false,
        }
    }
}

/// A frame received from a connection, on its way to the dispatcher.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub origin: ConnectionId,
    pub frame: Frame,
    pub received_at: SystemTime,
}

impl InboundMessage {
    pub fn new(origin: ConnectionId, frame: Frame) -> Self {
        Self {
            origin,
            frame,
            received_at: SystemTime::now(),
        }
    }
}

/// Outcome of a single dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections a write was attempted on
    pub recipients: usize,
    /// Connections that accepted the frame
    pub delivered: usize,
    /// Connections whose write failed; all of them have been deregistered
    pub failed: Vec<ConnectionId>,
}

/// Running totals across all dispatches.
#[derive(Debug, Default)]
pub struct DispatchStats {
    messages: AtomicU64,
    deliveries: AtomicU64,
    write_failures: AtomicU64,
}

/// Copy of [`DispatchStats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub messages: u64,
    pub deliveries: u64,
    pub write_failures: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Pushes inbound frames to registry members.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    config: DispatcherConfig,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Creates a dispatcher bound to `registry`.
    ///
    /// A `max_concurrent_writes` of zero is treated as one.
    pub fn new(registry: Arc<ConnectionRegistry>, mut config: DispatcherConfig) -> Self {
        config.max_concurrent_writes = config.max_concurrent_writes.max(1);
        Self {
            registry,
            config,
            stats: DispatchStats::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Relays `message` to the registry members selected by the policy.
    ///
    /// Never fails as a whole: per-recipient write failures are logged, the
    /// recipient is removed from the registry, and the remaining writes carry
    /// on. The returned report lists what happened.
    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let recipients: Vec<Arc<ConnectionHandle>> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|handle| self.should_deliver(handle.id(), message.origin))
            .collect();

        let frame = self.outbound_frame(message);
        let recipient_count = recipients.len();

        let results: Vec<_> = stream::iter(recipients)
            .map(|handle| {
                let frame = frame.clone();
                async move {
                    let result = handle.write_frame(frame).await;
                    (handle.id(), result)
                }
            })
            .buffer_unordered(self.config.max_concurrent_writes)
            .collect()
            .await;

        let mut report = DispatchReport {
            recipients: recipient_count,
            ..Default::default()
        };

        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Write: {}", e);
                    self.registry.remove(id).await;
                    report.failed.push(id);
                }
            }
        }

        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .write_failures
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);

        debug!(
            "Dispatched message from {} to {}/{} recipient(s)",
            message.origin, report.delivered, report.recipients
        );
        report
    }

    fn should_deliver(&self, target: ConnectionId, origin: ConnectionId) -> bool {
        match self.config.policy {
            DeliveryPolicy::EchoToAll => true,
            DeliveryPolicy::ExcludeOrigin => target != origin,
        }
    }

    fn outbound_frame(&self, message: &InboundMessage) -> Frame {
        match &message.frame {
            Frame::Text(text) if self.config.label_sender => {
                Frame::Text(format!("User {}: {}", message.origin, text))
            }
            frame => frame.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{memory_channel, MemoryPeer};
    use std::time::Duration;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        dispatcher: Dispatcher,
        peers: Vec<(ConnectionId, MemoryPeer)>,
    }

    async fn harness(clients: usize, config: DispatcherConfig) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new(0, Duration::from_millis(200)));
        let mut peers = Vec::new();
        for _ in 0..clients {
            let (sink, _source, peer) = memory_channel(32);
            let handle = registry.register(Box::new(sink), None).await.unwrap();
            peers.push((handle.id(), peer));
        }
        let dispatcher = Dispatcher::new(registry.clone(), config);
        Harness {
            registry,
            dispatcher,
            peers,
        }
    }

    fn text(origin: ConnectionId, body: &str) -> InboundMessage {
        InboundMessage::new(origin, Frame::Text(body.to_string()))
    }

    #[tokio::test]
    async fn test_echo_to_all_includes_origin() {
        let mut h = harness(3, DispatcherConfig::default()).await;
        let origin = h.peers[0].0;

        let report = h.dispatcher.dispatch(&text(origin, "hello")).await;
        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 3);
        assert!(report.failed.is_empty());

        for (_, peer) in h.peers.iter_mut() {
            assert_eq!(peer.try_recv(), Some(Frame::Text("hello".to_string())));
        }
    }

    #[tokio::test]
    async fn test_exclude_origin() {
        let config = DispatcherConfig {
            policy: DeliveryPolicy::ExcludeOrigin,
            ..Default::default()
        };
        let mut h = harness(3, config).await;
        let origin = h.peers[0].0;

        let report = h.dispatcher.dispatch(&text(origin, "hello")).await;
        assert_eq!(report.recipients, 2);

        assert_eq!(h.peers[0].1.try_recv(), None);
        assert!(h.peers[1].1.try_recv().is_some());
        assert!(h.peers[2].1.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_write_failure_removes_only_failing_peer() {
        let mut h = harness(3, DispatcherConfig::default()).await;
        let failing = h.peers[1].0;
        h.peers[1].1.set_fail_writes(true);

        let report = h.dispatcher.dispatch(&text(h.peers[0].0, "M")).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![failing]);

        assert_eq!(h.peers[0].1.try_recv(), Some(Frame::Text("M".to_string())));
        assert_eq!(h.peers[2].1.try_recv(), Some(Frame::Text("M".to_string())));
        assert!(!h.registry.contains(failing).await);

        // Survivors keep receiving; the failed peer is gone from every snapshot.
        let report = h.dispatcher.dispatch(&text(h.peers[0].0, "N")).await;
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(h.peers[2].1.try_recv(), Some(Frame::Text("N".to_string())));
        assert!(h
            .registry
            .snapshot()
            .await
            .iter()
            .all(|handle| handle.id() != failing));

        let stats = h.dispatcher.stats();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.deliveries, 4);
        assert_eq!(stats.write_failures, 1);
    }

    #[tokio::test]
    async fn test_label_sender_prefixes_text_only() {
        let config = DispatcherConfig {
            label_sender: true,
            ..Default::default()
        };
        let mut h = harness(2, config).await;
        let origin = h.peers[0].0;

        h.dispatcher.dispatch(&text(origin, "hi")).await;
        h.dispatcher
            .dispatch(&InboundMessage::new(origin, Frame::Binary(vec![1, 2, 3])))
            .await;

        let peer = &mut h.peers[1].1;
        assert_eq!(peer.try_recv(), Some(Frame::Text(format!("User {}: hi", origin))));
        assert_eq!(peer.try_recv(), Some(Frame::Binary(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn test_dispatch_to_empty_registry() {
        let h = harness(0, DispatcherConfig::default()).await;
        let report = h.dispatcher.dispatch(&text(1, "nobody")).await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let config = DispatcherConfig {
            max_concurrent_writes: 0,
            ..Default::default()
        };
        let h = harness(2, config).await;
        assert_eq!(h.dispatcher.config().max_concurrent_writes, 1);
        let report = h.dispatcher.dispatch(&text(1, "x")).await;
        assert_eq!(report.delivered, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_per_origin_order_under_concurrent_dispatch() {
        let mut h = harness(3, DispatcherConfig::default()).await;
        let mut peers = std::mem::take(&mut h.peers);
        let a = peers[0].0;
        let b = peers[1].0;
        let dispatcher = Arc::new(h.dispatcher);

        let sender_a = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    dispatcher.dispatch(&text(a, &format!("a{}", i))).await;
                }
            })
        };
        let sender_b = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    dispatcher.dispatch(&text(b, &format!("b{}", i))).await;
                }
            })
        };
        sender_a.await.unwrap();
        sender_b.await.unwrap();

        let expected_a: Vec<_> = (0..10).map(|i| format!("a{}", i)).collect();
        let expected_b: Vec<_> = (0..10).map(|i| format!("b{}", i)).collect();
        for (_, peer) in peers.iter_mut() {
            let mut from_a = Vec::new();
            let mut from_b = Vec::new();
            while let Some(Frame::Text(body)) = peer.try_recv() {
                if body.starts_with('a') {
                    from_a.push(body);
                } else {
                    from_b.push(body);
                }
            }
            assert_eq!(from_a, expected_a);
            assert_eq!(from_b, expected_b);
        }
    }
}
