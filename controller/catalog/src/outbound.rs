use crate::MeshCatalog;
use ecnet_controller_core::{
    policy::{
        HttpRouteMatch, MeshClusterConfig, OutboundMeshTrafficPolicy, OutboundTrafficPolicy,
        TrafficMatch,
    },
    service::{PROTOCOL_GRPC, PROTOCOL_HTTP, PROTOCOL_HTTPS},
    ClusterName, MeshService, WeightedCluster, CLUSTER_WEIGHT_ACCEPT_ALL,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::instrument;

/// Resolves the outbound policy every proxy in the mesh receives.
#[instrument(skip_all)]
pub(crate) fn build(catalog: &MeshCatalog) -> OutboundMeshTrafficPolicy {
    let services = catalog.list_services();

    // Each service port becomes one traffic match, spreading traffic over a
    // cluster per distinct target port.
    let mut groups = BTreeMap::<(&str, &str, u16), BTreeMap<ClusterName, &MeshService>>::new();
    for svc in &services {
        groups
            .entry((svc.namespace.as_str(), svc.name.as_str(), svc.port))
            .or_default()
            .entry(svc.cluster_name())
            .or_insert(svc);
    }

    let mut policy = OutboundMeshTrafficPolicy::default();
    for clusters in groups.into_values() {
        let Some(svc) = clusters.values().next().copied() else {
            continue;
        };
        let weighted_clusters = clusters
            .keys()
            .map(|name| WeightedCluster::new(name.clone(), CLUSTER_WEIGHT_ACCEPT_ALL))
            .collect::<Vec<_>>();

        policy
            .clusters_configs
            .extend(clusters.iter().map(|(name, svc)| MeshClusterConfig {
                name: name.clone(),
                service: (**svc).clone(),
            }));

        policy.traffic_matches.push(TrafficMatch {
            name: TrafficMatch::outbound_name(svc, &svc.protocol),
            destination_port: svc.port,
            destination_protocol: svc.protocol.clone(),
            weighted_clusters: weighted_clusters.clone(),
        });

        let protocol = svc.protocol.to_lowercase();
        if [PROTOCOL_HTTP, PROTOCOL_GRPC, PROTOCOL_HTTPS].contains(&protocol.as_str()) {
            let mut route_config = OutboundTrafficPolicy::new(svc.fqdn(), svc.hostnames());
            if let Err(error) = route_config.add_route(HttpRouteMatch::wildcard(), weighted_clusters)
            {
                tracing::warn!(%error, service = %svc, "Failed to add route");
                continue;
            }
            policy
                .http_route_configs_per_port
                .entry(svc.port)
                .or_default()
                .push(route_config);
        }
    }

    policy.services_resolvable_set = resolvable_set(catalog, &services);
    tracing::debug!(
        traffic_matches = policy.traffic_matches.len(),
        clusters = policy.clusters_configs.len(),
        "Built outbound policy"
    );
    policy
}

/// Maps each DNS name of each service to the addresses clients should
/// resolve it to. Names without any address are omitted.
fn resolvable_set(
    catalog: &MeshCatalog,
    services: &[MeshService],
) -> BTreeMap<String, Vec<String>> {
    let mut addrs_by_name = BTreeMap::<String, BTreeSet<String>>::new();
    for svc in services {
        let addrs = catalog
            .resolvable_endpoints_for_service(svc)
            .into_iter()
            .map(|ep| ep.ip.to_string())
            .collect::<BTreeSet<_>>();
        if addrs.is_empty() {
            continue;
        }
        for name in svc.dns_names() {
            addrs_by_name
                .entry(name)
                .or_default()
                .extend(addrs.iter().cloned());
        }
    }
    addrs_by_name
        .into_iter()
        .map(|(name, addrs)| (name, addrs.into_iter().collect()))
        .collect()
}
