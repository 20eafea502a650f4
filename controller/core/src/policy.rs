//! The abstract outbound policy the catalog resolves and the sidecar
//! compiler consumes.

use crate::{ClusterName, MeshService, WeightedCluster};
use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

/// A path regex matching every request path.
pub const REGEX_MATCH_ALL: &str = ".*";

/// A method matching every request method.
pub const WILDCARD_HTTP_METHOD: &str = "*";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PathMatchType {
    #[default]
    Regex,
    Exact,
    Prefix,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct HttpRouteMatch {
    /// An empty path matches everything.
    pub path: String,
    pub path_match_type: PathMatchType,
    /// Header name to value regex.
    pub headers: BTreeMap<String, String>,
    /// An empty list matches every method.
    pub methods: Vec<String>,
}

/// An HTTP route match paired with the clusters it forwards to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteWeightedClusters {
    pub route_match: HttpRouteMatch,
    pub weighted_clusters: BTreeSet<WeightedCluster>,
}

/// The HTTP route configuration for one upstream service, keyed by the
/// service FQDN.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutboundTrafficPolicy {
    pub name: String,
    pub hostnames: Vec<String>,
    pub routes: Vec<RouteWeightedClusters>,
}

/// Selects outbound traffic by destination port and protocol.
///
/// Names take the form `<direction>_<namespace>/<name>_<port>_<protocol>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrafficMatch {
    pub name: String,
    pub destination_port: u16,
    pub destination_protocol: String,
    pub weighted_clusters: Vec<WeightedCluster>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid traffic match name {0:?}: expected xxx_<namespace>/<name>_<port>_<protocol>")]
pub struct TrafficMatchNameError(String);

/// The static configuration of a cluster: the service it fronts.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshClusterConfig {
    pub name: ClusterName,
    pub service: MeshService,
}

/// Everything a proxy needs to know to route outbound mesh traffic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutboundMeshTrafficPolicy {
    pub traffic_matches: Vec<TrafficMatch>,
    pub http_route_configs_per_port: BTreeMap<u16, Vec<OutboundTrafficPolicy>>,
    pub clusters_configs: Vec<MeshClusterConfig>,
    /// DNS names the sidecar resolves locally, mapped to their addresses.
    pub services_resolvable_set: BTreeMap<String, Vec<String>>,
}

// === impl HttpRouteMatch ===

impl HttpRouteMatch {
    /// Matches every path and method.
    pub fn wildcard() -> Self {
        Self {
            path: REGEX_MATCH_ALL.to_string(),
            path_match_type: PathMatchType::Regex,
            headers: BTreeMap::new(),
            methods: vec![WILDCARD_HTTP_METHOD.to_string()],
        }
    }
}

// === impl OutboundTrafficPolicy ===

impl OutboundTrafficPolicy {
    pub fn new(name: impl ToString, hostnames: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            hostnames,
            routes: Vec::new(),
        }
    }

    /// Adds a route. Re-adding an identical route is a no-op; adding the same
    /// match with different clusters is an error.
    pub fn add_route(
        &mut self,
        route_match: HttpRouteMatch,
        clusters: impl IntoIterator<Item = WeightedCluster>,
    ) -> Result<()> {
        let weighted_clusters = clusters.into_iter().collect::<BTreeSet<_>>();
        if let Some(existing) = self.routes.iter().find(|r| r.route_match == route_match) {
            if existing.weighted_clusters == weighted_clusters {
                return Ok(());
            }
            bail!(
                "route for {:?} already exists with different clusters in outbound policy {}",
                route_match,
                self.name
            );
        }

        self.routes.push(RouteWeightedClusters {
            route_match,
            weighted_clusters,
        });
        Ok(())
    }
}

// === impl TrafficMatch ===

impl TrafficMatch {
    pub fn outbound_name(svc: &MeshService, protocol: &str) -> String {
        format!(
            "outbound_{}/{}_{}_{protocol}",
            svc.namespace, svc.name, svc.port
        )
    }

    /// Recovers the upstream service a traffic match selects. The
    /// destination port is taken as the service's target port.
    pub fn to_mesh_service(&self) -> Result<MeshService, TrafficMatchNameError> {
        let invalid = || TrafficMatchNameError(self.name.clone());
        let chunks = self
            .name
            .split('_')
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>();
        let [_, namespaced_name, _, _] = chunks.as_slice() else {
            return Err(invalid());
        };
        let (namespace, name) = namespaced_name.split_once('/').ok_or_else(invalid)?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }

        Ok(MeshService {
            namespace: namespace.to_string(),
            name: name.to_string(),
            protocol: self.destination_protocol.to_lowercase(),
            target_port: self.destination_port,
            ..Default::default()
        })
    }
}

// === impl OutboundMeshTrafficPolicy ===

impl OutboundMeshTrafficPolicy {
    pub fn cluster_config(&self, name: &ClusterName) -> Option<&MeshClusterConfig> {
        self.clusters_configs.iter().find(|c| c.name == *name)
    }
}
