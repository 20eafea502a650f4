use crate::CLUSTER_DOMAIN;
use std::{fmt, str::FromStr};

pub const PROTOCOL_HTTP: &str = "http";
pub const PROTOCOL_HTTPS: &str = "https";
pub const PROTOCOL_GRPC: &str = "grpc";
pub const PROTOCOL_TCP: &str = "tcp";
pub const PROTOCOL_TCP_SERVER_FIRST: &str = "tcp-server-first";

/// Protocols that may be declared through a port-name prefix, in match order.
pub const SUPPORTED_PROTOCOLS_IN_MESH: [&str; 4] = [
    PROTOCOL_TCP_SERVER_FIRST,
    PROTOCOL_HTTP,
    PROTOCOL_TCP,
    PROTOCOL_GRPC,
];

/// A logical service in the mesh, bound to a single service port.
///
/// A `MeshService` is a value: it is built fresh for each query and never
/// mutated once handed out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshService {
    pub namespace: String,
    /// May carry a pod hostname as a leading label (`pod-0.svc`) for
    /// headless services.
    pub name: String,
    pub port: u16,
    /// Zero when the target port is not known.
    pub target_port: u16,
    pub protocol: String,
    /// Set for services materialized from a federated service import.
    pub service_import_uid: Option<String>,
}

/// Names a group of endpoints traffic can be routed to: `<namespace>/<name>|<port>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterName(String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeightedCluster {
    pub cluster_name: ClusterName,
    pub weight: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClusterNameError {
    #[error("invalid cluster name {0:?}: expected <namespace>/<name>|<port>")]
    Malformed(String),

    #[error("invalid cluster port {0:?}")]
    Port(String),
}

/// Derives the protocol of a service port: an explicit app protocol wins,
/// then a supported port-name prefix, then `http`.
pub fn port_protocol(port_name: Option<&str>, app_protocol: Option<&str>) -> String {
    if let Some(app_protocol) = app_protocol {
        return app_protocol.to_string();
    }

    let name = port_name.unwrap_or_default();
    SUPPORTED_PROTOCOLS_IN_MESH
        .iter()
        .find(|p| name.starts_with(&format!("{p}-")))
        .copied()
        .unwrap_or(PROTOCOL_HTTP)
        .to_string()
}

// === impl MeshService ===

impl MeshService {
    /// The leading hostname label of a per-pod service name, if any.
    pub fn subdomain(&self) -> Option<&str> {
        self.name.split_once('.').map(|(sub, _)| sub)
    }

    /// The name of the backing service object, with any subdomain stripped.
    pub fn provider_key(&self) -> &str {
        match self.name.split_once('.') {
            Some((_, name)) => name,
            None => &self.name,
        }
    }

    pub fn fqdn(&self) -> String {
        format!("{}.{}.svc.{CLUSTER_DOMAIN}", self.name, self.namespace)
    }

    /// Clusters are keyed by the port endpoints listen on, falling back to
    /// the service port when the target port is not known.
    pub fn cluster_name(&self) -> ClusterName {
        let port = if self.target_port > 0 {
            self.target_port
        } else {
            self.port
        };
        ClusterName(format!("{}/{}|{port}", self.namespace, self.name))
    }

    /// Every name a client may use to reach this service, with and without
    /// the service port.
    pub fn hostnames(&self) -> Vec<String> {
        self.dns_names()
            .into_iter()
            .flat_map(|host| {
                let with_port = format!("{host}:{}", self.port);
                [host, with_port]
            })
            .collect()
    }

    /// Every DNS name of this service, without ports.
    pub fn dns_names(&self) -> Vec<String> {
        let Self {
            name, namespace, ..
        } = self;
        vec![
            name.clone(),
            format!("{name}.{namespace}"),
            format!("{name}.{namespace}.svc"),
            format!("{name}.{namespace}.svc.cluster"),
            format!("{name}.{namespace}.svc.{CLUSTER_DOMAIN}"),
        ]
    }
}

impl fmt::Display for MeshService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}

// === impl ClusterName ===

impl ClusterName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the service a cluster fronts.
    ///
    /// The port always maps to the target port since a cluster's endpoints
    /// are derived from it.
    pub fn to_mesh_service(&self) -> Result<MeshService, ClusterNameError> {
        let chunks = self
            .0
            .split(['/', '|'])
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>();
        let [namespace, name, port] = chunks.as_slice() else {
            return Err(ClusterNameError::Malformed(self.0.clone()));
        };
        let target_port = port
            .parse::<u16>()
            .map_err(|_| ClusterNameError::Port(port.to_string()))?;
        Ok(MeshService {
            namespace: namespace.to_string(),
            name: name.to_string(),
            target_port,
            ..Default::default()
        })
    }
}

impl From<String> for ClusterName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for ClusterName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl FromStr for ClusterName {
    type Err = ClusterNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = Self(s.to_string());
        name.to_mesh_service()?;
        Ok(name)
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl serde::Serialize for ClusterName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

// === impl WeightedCluster ===

impl WeightedCluster {
    pub fn new(cluster_name: impl Into<ClusterName>, weight: u32) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str, port: u16, target_port: u16) -> MeshService {
        MeshService {
            namespace: "ns".to_string(),
            name: name.to_string(),
            port,
            target_port,
            protocol: PROTOCOL_HTTP.to_string(),
            service_import_uid: None,
        }
    }

    #[test]
    fn cluster_name_uses_target_port() {
        assert_eq!(svc("web", 80, 8080).cluster_name().as_str(), "ns/web|8080");
        assert_eq!(svc("web", 80, 0).cluster_name().as_str(), "ns/web|80");
    }

    #[test]
    fn cluster_name_parses_to_target_port() {
        let parsed = ClusterName::from("ns/web|8080")
            .to_mesh_service()
            .expect("cluster name must parse");
        assert_eq!(parsed.namespace, "ns");
        assert_eq!(parsed.name, "web");
        assert_eq!(parsed.port, 0);
        assert_eq!(parsed.target_port, 8080);
    }

    #[test]
    fn cluster_name_rejects_garbage() {
        assert_eq!(
            ClusterName::from("web|8080").to_mesh_service(),
            Err(ClusterNameError::Malformed("web|8080".to_string()))
        );
        assert_eq!(
            ClusterName::from("ns/web|http").to_mesh_service(),
            Err(ClusterNameError::Port("http".to_string()))
        );
        assert!("ns/web|99999".parse::<ClusterName>().is_err());
    }

    #[test]
    fn protocol_from_port() {
        assert_eq!(port_protocol(Some("tcp-db"), None), "tcp");
        assert_eq!(port_protocol(Some("tcp-server-first-db"), None), "tcp-server-first");
        assert_eq!(port_protocol(Some("grpc-api"), Some("http")), "http");
        assert_eq!(port_protocol(Some("web"), None), "http");
        assert_eq!(port_protocol(None, None), "http");
    }

    #[test]
    fn subdomain_split() {
        let headless = svc("pod-0.db", 5432, 5432);
        assert_eq!(headless.subdomain(), Some("pod-0"));
        assert_eq!(headless.provider_key(), "db");

        let plain = svc("db", 5432, 5432);
        assert_eq!(plain.subdomain(), None);
        assert_eq!(plain.provider_key(), "db");
    }

    #[test]
    fn hostnames_include_ports() {
        let hosts = svc("web", 80, 8080).hostnames();
        assert_eq!(hosts.len(), 10);
        assert!(hosts.contains(&"web".to_string()));
        assert!(hosts.contains(&"web.ns:80".to_string()));
        assert!(hosts.contains(&"web.ns.svc.cluster.local:80".to_string()));
    }
}
