use anyhow::Result;
use ecnet_controller_core::{
    policy::{
        HttpRouteMatch, MeshClusterConfig, OutboundMeshTrafficPolicy, OutboundTrafficPolicy,
        TrafficMatch,
    },
    service::{PROTOCOL_GRPC, PROTOCOL_HTTP, PROTOCOL_HTTPS},
    ClusterName, Configurator, Endpoint, MeshCataloger, MeshService, Plugin, WeightedCluster,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

/// Serves a fixed outbound policy. Endpoints are looked up by cluster.
#[derive(Debug, Default)]
pub(crate) struct FakeCatalog {
    pub policy: OutboundMeshTrafficPolicy,
    pub endpoints: Mutex<HashMap<ClusterName, Vec<Endpoint>>>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeConfigurator {
    pub chains: BTreeMap<String, Vec<Plugin>>,
}

pub(crate) fn svc(name: &str, port: u16, target_port: u16, protocol: &str) -> MeshService {
    MeshService {
        namespace: "ns".to_string(),
        name: name.to_string(),
        port,
        target_port,
        protocol: protocol.to_string(),
        service_import_uid: None,
    }
}

pub(crate) fn ep(ip: &str) -> Endpoint {
    Endpoint::new(ip.parse().expect("valid ip"), 0)
}

// === impl FakeCatalog ===

impl FakeCatalog {
    /// Exposes `svc` the way the mesh catalog does: one traffic match, one
    /// cluster, and a wildcard route for HTTP-like protocols.
    pub fn with_service(mut self, svc: MeshService) -> Self {
        let cluster = svc.cluster_name();
        let wc = WeightedCluster::new(cluster.clone(), 100);
        self.policy.traffic_matches.push(TrafficMatch {
            name: TrafficMatch::outbound_name(&svc, &svc.protocol),
            destination_port: svc.port,
            destination_protocol: svc.protocol.clone(),
            weighted_clusters: vec![wc.clone()],
        });
        if matches!(
            svc.protocol.as_str(),
            PROTOCOL_HTTP | PROTOCOL_GRPC | PROTOCOL_HTTPS
        ) {
            let mut config = OutboundTrafficPolicy::new(svc.fqdn(), svc.hostnames());
            config
                .add_route(HttpRouteMatch::wildcard(), [wc])
                .expect("route must be added");
            self.policy
                .http_route_configs_per_port
                .entry(svc.port)
                .or_default()
                .push(config);
        }
        self.policy.clusters_configs.push(MeshClusterConfig {
            name: cluster,
            service: svc,
        });
        self
    }

    pub fn with_endpoints(self, cluster: &str, endpoints: Vec<Endpoint>) -> Self {
        self.set_endpoints(cluster, endpoints);
        self
    }

    pub fn set_endpoints(&self, cluster: &str, endpoints: Vec<Endpoint>) {
        self.endpoints
            .lock()
            .insert(ClusterName::from(cluster), endpoints);
    }
}

impl MeshCataloger for FakeCatalog {
    fn list_outbound_services(&self) -> Vec<MeshService> {
        self.policy
            .clusters_configs
            .iter()
            .map(|c| c.service.clone())
            .collect()
    }

    fn list_upstream_endpoints_for_service(&self, svc: &MeshService) -> Vec<Endpoint> {
        self.endpoints
            .lock()
            .get(&svc.cluster_name())
            .cloned()
            .unwrap_or_default()
    }

    fn outbound_mesh_traffic_policy(&self) -> OutboundMeshTrafficPolicy {
        self.policy.clone()
    }
}

// === impl FakeConfigurator ===

impl Configurator for FakeConfigurator {
    fn sidecar_log_level(&self) -> String {
        "debug".to_string()
    }

    fn local_dns_proxy_enabled(&self) -> bool {
        false
    }

    fn local_dns_proxy_primary_upstream(&self) -> String {
        String::new()
    }

    fn local_dns_proxy_secondary_upstream(&self) -> String {
        String::new()
    }

    fn proxy_server_port(&self) -> u32 {
        6060
    }

    fn repo_server_ipaddr(&self) -> String {
        "127.0.0.1".to_string()
    }

    fn repo_server_codebase(&self) -> String {
        String::new()
    }

    fn config_resync_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn mesh_config_json(&self) -> Result<String> {
        Ok("{}".to_string())
    }

    fn global_plugin_chains(&self) -> BTreeMap<String, Vec<Plugin>> {
        self.chains.clone()
    }
}
