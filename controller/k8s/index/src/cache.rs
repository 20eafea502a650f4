//! A read-through cache of the cluster resources the control plane observes.
//!
//! Watches feed the cache through kubert's index traits. Every change that
//! actually alters a cached object is announced on the message broker.

use ahash::AHashMap as HashMap;
use ecnet_controller_core::{
    announcements::{Announcement, Event, Resource},
    messaging::Broker,
};
use ecnet_controller_k8s_api::{
    self as k8s, GlobalTrafficPolicy, MeshConfig, ResourceExt, ServiceImport,
};
use kubert::index::{ClusterRemoved, NamespacedRemoved};
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{family::Family, gauge::Gauge},
    registry::Registry,
};
use std::{collections::hash_map::Entry, sync::Arc};

pub type SharedCache = Arc<RwLock<Cache>>;

#[derive(Debug)]
pub struct Cache {
    broker: Broker,
    metrics: CacheMetrics,

    namespaces: Store<k8s::Namespace>,
    services: Store<k8s::Service>,
    endpoints: Store<k8s::Endpoints>,
    pods: Store<k8s::Pod>,
    service_accounts: Store<k8s::ServiceAccount>,
    mesh_configs: Store<MeshConfig>,
    service_imports: Store<ServiceImport>,
    global_traffic_policies: Store<GlobalTrafficPolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct CacheMetrics {
    objects: Family<KindLabels, Gauge>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

/// Objects of one kind keyed by namespace and name. Cluster-scoped objects
/// use an empty namespace.
#[derive(Debug)]
pub struct Store<T> {
    by_key: HashMap<(String, String), T>,
}

/// Ties a cached kind to its store and to the announcements it emits.
pub trait Cached: ResourceExt + Clone + PartialEq + Sized {
    const RESOURCE: Resource;

    #[doc(hidden)]
    fn store(cache: &Cache) -> &Store<Self>;

    #[doc(hidden)]
    fn store_mut(cache: &mut Cache) -> &mut Store<Self>;
}

// === impl Cache ===

impl Cache {
    pub fn new(broker: Broker, metrics: CacheMetrics) -> Self {
        Self {
            broker,
            metrics,
            namespaces: Store::default(),
            services: Store::default(),
            endpoints: Store::default(),
            pods: Store::default(),
            service_accounts: Store::default(),
            mesh_configs: Store::default(),
            service_imports: Store::default(),
            global_traffic_policies: Store::default(),
        }
    }

    pub fn shared(broker: Broker, metrics: CacheMetrics) -> SharedCache {
        Arc::new(RwLock::new(Self::new(broker, metrics)))
    }

    pub fn get<T: Cached>(&self, namespace: &str, name: &str) -> Option<&T> {
        T::store(self).get(namespace, name)
    }

    /// Every cached object of a kind, in no particular order.
    pub fn list<'a, T: Cached + 'a>(&'a self) -> impl Iterator<Item = &'a T> + 'a {
        T::store(self).by_key.values()
    }

    pub fn list_namespaced<'c, T: Cached + 'c>(
        &'c self,
        namespace: &'c str,
    ) -> impl Iterator<Item = &'c T> + 'c {
        T::store(self)
            .by_key
            .iter()
            .filter(move |((ns, _), _)| ns == namespace)
            .map(|(_, obj)| obj)
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&k8s::Service> {
        self.get(namespace, name)
    }

    pub fn endpoints(&self, namespace: &str, name: &str) -> Option<&k8s::Endpoints> {
        self.get(namespace, name)
    }

    pub fn mesh_config(&self, namespace: &str, name: &str) -> Option<&MeshConfig> {
        self.get(namespace, name)
    }

    pub fn service_import(&self, namespace: &str, name: &str) -> Option<&ServiceImport> {
        self.get(namespace, name)
    }

    pub fn global_traffic_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<&GlobalTrafficPolicy> {
        self.get(namespace, name)
    }

    fn upsert<T: Cached>(&mut self, obj: T) {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_unchecked();
        let event = T::store_mut(self).upsert(namespace.clone(), name.clone(), obj);
        self.observe::<T>();
        if let Some(event) = event {
            tracing::debug!(kind = %T::RESOURCE, %namespace, %name, ?event, "Cache changed");
            self.broker.publish(Announcement::resource(
                T::RESOURCE,
                event,
                &namespace,
                &name,
            ));
        }
    }

    fn remove<T: Cached>(&mut self, namespace: String, name: String) {
        let removed = T::store_mut(self).remove(&namespace, &name);
        self.observe::<T>();
        if removed {
            tracing::debug!(kind = %T::RESOURCE, %namespace, %name, "Cache removed");
            self.broker.publish(Announcement::resource(
                T::RESOURCE,
                Event::Deleted,
                &namespace,
                &name,
            ));
        }
    }

    fn observe<T: Cached>(&self) {
        self.metrics
            .objects
            .get_or_create(&KindLabels {
                kind: T::RESOURCE.to_string(),
            })
            .set(T::store(self).by_key.len() as i64);
    }
}

impl<T: Cached> kubert::index::IndexNamespacedResource<T> for Cache {
    fn apply(&mut self, resource: T) {
        self.upsert(resource)
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove::<T>(namespace, name)
    }

    fn reset(&mut self, resources: Vec<T>, removed: NamespacedRemoved) {
        for resource in resources {
            self.upsert(resource);
        }
        for (namespace, names) in removed {
            for name in names {
                self.remove::<T>(namespace.clone(), name);
            }
        }
    }
}

impl kubert::index::IndexClusterResource<k8s::Namespace> for Cache {
    fn apply(&mut self, ns: k8s::Namespace) {
        self.upsert(ns)
    }

    fn delete(&mut self, name: String) {
        self.remove::<k8s::Namespace>(String::new(), name)
    }

    fn reset(&mut self, namespaces: Vec<k8s::Namespace>, removed: ClusterRemoved) {
        for ns in namespaces {
            self.upsert(ns);
        }
        for name in removed {
            self.remove::<k8s::Namespace>(String::new(), name);
        }
    }
}

// === impl Store ===

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            by_key: HashMap::default(),
        }
    }
}

impl<T: PartialEq> Store<T> {
    fn get(&self, namespace: &str, name: &str) -> Option<&T> {
        self.by_key.get(&(namespace.to_string(), name.to_string()))
    }

    /// Returns the event to announce, if the object changed.
    fn upsert(&mut self, namespace: String, name: String, obj: T) -> Option<Event> {
        match self.by_key.entry((namespace, name)) {
            Entry::Vacant(entry) => {
                entry.insert(obj);
                Some(Event::Added)
            }
            // Watch restarts replay unchanged objects.
            Entry::Occupied(entry) if *entry.get() == obj => None,
            Entry::Occupied(mut entry) => {
                entry.insert(obj);
                Some(Event::Updated)
            }
        }
    }

    fn remove(&mut self, namespace: &str, name: &str) -> bool {
        self.by_key
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some()
    }
}

// === impl CacheMetrics ===

impl CacheMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let objects = Family::default();
        prom.register(
            "objects",
            "Gauge of the number of cached objects, by kind",
            objects.clone(),
        );
        Self { objects }
    }
}

// === impl Cached ===

macro_rules! cached {
    ($ty:ty, $resource:ident, $field:ident) => {
        impl Cached for $ty {
            const RESOURCE: Resource = Resource::$resource;

            fn store(cache: &Cache) -> &Store<Self> {
                &cache.$field
            }

            fn store_mut(cache: &mut Cache) -> &mut Store<Self> {
                &mut cache.$field
            }
        }
    };
}

cached!(k8s::Namespace, Namespace, namespaces);
cached!(k8s::Service, Service, services);
cached!(k8s::Endpoints, Endpoint, endpoints);
cached!(k8s::Pod, Pod, pods);
cached!(k8s::ServiceAccount, ServiceAccount, service_accounts);
cached!(MeshConfig, MeshConfig, mesh_configs);
cached!(ServiceImport, ServiceImport, service_imports);
cached!(GlobalTrafficPolicy, GlobalTrafficPolicy, global_traffic_policies);
