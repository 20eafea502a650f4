//! The event taxonomy carried by the message broker.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Proxies should recompute their configuration.
    ProxyUpdate,
    Resource(Resource, Event),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Pod,
    Endpoint,
    Namespace,
    Service,
    ServiceAccount,
    MeshConfig,
    ServiceImport,
    GlobalTrafficPolicy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    Added,
    Deleted,
    Updated,
}

/// A notification that something changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub kind: Kind,
    /// `namespace/name` (or just `name` for cluster-scoped objects) of the
    /// object the announcement refers to, if any.
    pub referenced_object_id: Option<String>,
}

// === impl Kind ===

impl Kind {
    /// Whether an event of this kind may change what a proxy is configured
    /// with.
    pub fn triggers_proxy_update(&self) -> bool {
        match self {
            Self::ProxyUpdate => true,
            Self::Resource(Resource::Namespace, _) => false,
            Self::Resource(Resource::Pod, Event::Updated) => false,
            Self::Resource(_, _) => true,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProxyUpdate => f.write_str("proxy-update"),
            Self::Resource(resource, event) => write!(f, "{resource}-{event}"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pod => "pod",
            Self::Endpoint => "endpoint",
            Self::Namespace => "namespace",
            Self::Service => "service",
            Self::ServiceAccount => "serviceaccount",
            Self::MeshConfig => "meshconfig",
            Self::ServiceImport => "serviceimport",
            Self::GlobalTrafficPolicy => "globaltrafficpolicy",
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Deleted => "deleted",
            Self::Updated => "updated",
        })
    }
}

// === impl Announcement ===

impl Announcement {
    pub fn new(kind: Kind, referenced_object_id: Option<String>) -> Self {
        Self {
            kind,
            referenced_object_id,
        }
    }

    pub fn resource(resource: Resource, event: Event, namespace: &str, name: &str) -> Self {
        let id = if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}/{name}")
        };
        Self::new(Kind::Resource(resource, event), Some(id))
    }
}
