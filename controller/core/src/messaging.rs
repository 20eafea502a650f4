//! In-process topic-based publish/subscribe.
//!
//! Two independent buses are kept: one carrying raw kube events, keyed by
//! announcement kind, and one carrying proxy update requests, either
//! broadcast to every proxy or targeted at a single proxy through a topic
//! derived from its UUID. Delivery is at-least-once for the lifetime of the
//! process; nothing is persisted.

use crate::announcements::{Announcement, Kind};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The topic every proxy update subscriber receives broadcasts on.
pub const PROXY_UPDATE_TOPIC: &str = "proxy-update";

/// A set of subscribers, each interested in some topics.
#[derive(Debug)]
pub struct PubSub<T> {
    inner: Mutex<Subscribers<T>>,
}

#[derive(Debug)]
struct Subscribers<T> {
    next_id: u64,
    by_id: HashMap<u64, Subscriber<T>>,
}

#[derive(Debug)]
struct Subscriber<T> {
    topics: HashSet<String>,
    tx: mpsc::UnboundedSender<T>,
}

/// Receives every message published on the topics it was created with.
#[derive(Debug)]
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
}

#[derive(Clone, Debug)]
pub struct Broker {
    kube_events: Arc<PubSub<Announcement>>,
    proxy_updates: Arc<PubSub<Announcement>>,
    metrics: BrokerMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct BrokerMetrics {
    announcements: Family<KindLabels, Counter>,
    proxy_updates: Family<ProxyUpdateLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ProxyUpdateLabels {
    target: String,
}

/// The topic on which updates targeted at a single proxy are published.
pub fn proxy_uuid_topic(uuid: &str) -> String {
    format!("proxy:{uuid}")
}

// === impl PubSub ===

impl<T> Default for PubSub<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Subscribers {
                next_id: 0,
                by_id: HashMap::default(),
            }),
        }
    }
}

impl<T: Clone> PubSub<T> {
    pub fn sub<S: ToString>(&self, topics: impl IntoIterator<Item = S>) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_id.insert(
            id,
            Subscriber {
                topics: topics.into_iter().map(|t| t.to_string()).collect(),
                tx,
            },
        );
        Subscription { id, rx }
    }

    /// Removes a subscription. Messages already delivered to it are dropped.
    pub fn unsub(&self, sub: Subscription<T>) {
        self.inner.lock().by_id.remove(&sub.id);
    }

    /// Delivers a message to every subscriber of `topic`, returning the
    /// number of subscribers reached. Subscribers whose receiver was dropped
    /// are pruned.
    pub fn publish(&self, topic: &str, msg: T) -> usize {
        let mut inner = self.inner.lock();
        let mut delivered = 0;
        inner.by_id.retain(|_, sub| {
            if !sub.topics.contains(topic) {
                return !sub.tx.is_closed();
            }
            if sub.tx.send(msg.clone()).is_err() {
                return false;
            }
            delivered += 1;
            true
        });
        delivered
    }

    pub fn subscribers(&self) -> usize {
        self.inner.lock().by_id.len()
    }
}

// === impl Subscription ===

impl<T> Subscription<T> {
    /// Waits for the next message. Returns `None` once the subscription has
    /// been removed from its bus.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

// === impl Broker ===

impl Broker {
    pub fn new(metrics: BrokerMetrics) -> Self {
        Self {
            kube_events: Default::default(),
            proxy_updates: Default::default(),
            metrics,
        }
    }

    /// Subscribes to raw kube events of the given kinds.
    pub fn subscribe_kube_events(&self, kinds: &[Kind]) -> Subscription<Announcement> {
        self.kube_events.sub(kinds)
    }

    pub fn unsubscribe_kube_events(&self, sub: Subscription<Announcement>) {
        self.kube_events.unsub(sub)
    }

    /// Subscribes to proxy update requests on the given topics. Pass
    /// [`PROXY_UPDATE_TOPIC`] for broadcasts or [`proxy_uuid_topic`] for a
    /// single proxy.
    pub fn subscribe_proxy_updates<S: ToString>(
        &self,
        topics: impl IntoIterator<Item = S>,
    ) -> Subscription<Announcement> {
        self.proxy_updates.sub(topics)
    }

    pub fn unsubscribe_proxy_updates(&self, sub: Subscription<Announcement>) {
        self.proxy_updates.unsub(sub)
    }

    /// Publishes a kube event on its kind topic and, when it may alter proxy
    /// configuration, a broadcast proxy update.
    pub fn publish(&self, announcement: Announcement) {
        let kind = announcement.kind;
        let topic = kind.to_string();
        self.metrics
            .announcements
            .get_or_create(&KindLabels {
                kind: topic.clone(),
            })
            .inc();

        let triggers_update = kind.triggers_proxy_update();
        let n = self.kube_events.publish(&topic, announcement.clone());
        tracing::trace!(%kind, subscribers = n, "Published kube event");

        if triggers_update {
            self.publish_proxy_update(PROXY_UPDATE_TOPIC, announcement);
        }
    }

    /// Asks every proxy to recompute its configuration.
    pub fn broadcast_proxy_update(&self) {
        self.publish_proxy_update(
            PROXY_UPDATE_TOPIC,
            Announcement::new(Kind::ProxyUpdate, None),
        );
    }

    /// Asks a single proxy to recompute its configuration.
    pub fn update_proxy(&self, uuid: &str) {
        self.publish_proxy_update(
            &proxy_uuid_topic(uuid),
            Announcement::new(Kind::ProxyUpdate, Some(uuid.to_string())),
        );
    }

    fn publish_proxy_update(&self, topic: &str, announcement: Announcement) {
        let target = if topic == PROXY_UPDATE_TOPIC {
            "broadcast"
        } else {
            "proxy"
        };
        self.metrics
            .proxy_updates
            .get_or_create(&ProxyUpdateLabels {
                target: target.to_string(),
            })
            .inc();
        let n = self.proxy_updates.publish(topic, announcement);
        tracing::trace!(%topic, subscribers = n, "Published proxy update");
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerMetrics::default())
    }
}

// === impl BrokerMetrics ===

impl BrokerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let announcements = Family::default();
        prom.register(
            "announcements",
            "Count of announcements published, by kind",
            announcements.clone(),
        );

        let proxy_updates = Family::default();
        prom.register(
            "proxy_updates",
            "Count of proxy updates requested, by target",
            proxy_updates.clone(),
        );

        Self {
            announcements,
            proxy_updates,
        }
    }
}
