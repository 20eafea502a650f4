//! Compiles the mesh catalog's outbound policy into a sidecar configuration.

use crate::conf::{HttpMatchRule, PipyConf, WeightedZoneEndpoint};
use ecnet_controller_core::{
    policy::{OutboundMeshTrafficPolicy, OutboundTrafficPolicy, TrafficMatch, WILDCARD_HTTP_METHOD},
    service::{PROTOCOL_GRPC, PROTOCOL_HTTP, PROTOCOL_HTTPS, PROTOCOL_TCP, PROTOCOL_TCP_SERVER_FIRST},
    ClusterName, Configurator, MeshCataloger, Plugin,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
};
use tracing::instrument;

/// HTTP and gRPC traffic on the same port shares one traffic match.
const HTTP_TRAFFIC_MATCH: &str = "http";

#[derive(Debug)]
pub enum Compiled {
    /// Rebalanced and reordered, ready to publish.
    Ready(PipyConf),

    /// Some upstream cluster could not be resolved yet.
    NotReady,
}

/// Builds a proxy's configuration from the current mesh state.
#[instrument(skip_all)]
pub fn compile(catalog: &dyn MeshCataloger, cfg: &dyn Configurator) -> Compiled {
    let mut conf = PipyConf::default();
    features(&mut conf, cfg);
    conf.chains = plugin_chains(cfg.global_plugin_chains());
    if !outbound(&mut conf, catalog) {
        return Compiled::NotReady;
    }
    conf.rebalance();
    conf.reorder();
    Compiled::Ready(conf)
}

fn features(conf: &mut PipyConf, cfg: &dyn Configurator) {
    conf.set_sidecar_log_level(&cfg.sidecar_log_level());
    conf.set_local_dns_proxy(
        cfg.local_dns_proxy_enabled(),
        &cfg.local_dns_proxy_primary_upstream(),
        &cfg.local_dns_proxy_secondary_upstream(),
    );
}

/// Orders each chain by descending priority and names each plugin by the
/// script implementing it.
fn plugin_chains(chains: BTreeMap<String, Vec<Plugin>>) -> BTreeMap<String, Vec<String>> {
    chains
        .into_iter()
        .filter(|(_, plugins)| !plugins.is_empty())
        .map(|(mount_point, mut plugins)| {
            plugins.sort_by(|a, b| b.priority.total_cmp(&a.priority));
            let scripts = plugins
                .into_iter()
                .map(|p| {
                    if p.build_in {
                        format!("{}.js", p.name)
                    } else {
                        format!("plugins/{}.js", p.name)
                    }
                })
                .collect();
            (mount_point, scripts)
        })
        .collect()
}

/// Returns false if any cluster the routes depend on is not yet resolvable.
fn outbound(conf: &mut PipyConf, catalog: &dyn MeshCataloger) -> bool {
    let policy = catalog.outbound_mesh_traffic_policy();
    if !policy.services_resolvable_set.is_empty() {
        conf.dns_resolve_db = policy.services_resolvable_set.clone();
    }

    let depends = routes(conf, &policy);
    if depends.is_empty() {
        return true;
    }
    balance(conf, catalog, &policy, depends)
}

/// Compiles every traffic match, returning the clusters the compiled routes
/// forward to.
fn routes(conf: &mut PipyConf, policy: &OutboundMeshTrafficPolicy) -> BTreeSet<ClusterName> {
    let mut depends = BTreeSet::new();
    for tm in &policy.traffic_matches {
        let protocol = tm.destination_protocol.to_lowercase();
        let name = match protocol.as_str() {
            PROTOCOL_HTTP | PROTOCOL_GRPC => HTTP_TRAFFIC_MATCH,
            _ => tm.name.as_str(),
        };

        let (pipy_tm, _) = conf.outbound_mut().traffic_match(tm.destination_port, name);
        pipy_tm.port = tm.destination_port;
        pipy_tm.set_protocol(&protocol);

        match protocol.as_str() {
            PROTOCOL_HTTP | PROTOCOL_GRPC => {
                for config in route_configs(policy, tm) {
                    for host in &config.hostnames {
                        pipy_tm.add_host_port(host, &config.name);
                    }
                    let rules = pipy_tm.http_route_rules_mut(&config.name);
                    for route in &config.routes {
                        let m = &route.route_match;
                        let mut match_rule = HttpMatchRule::new(&m.path, m.path_match_type);
                        for (header, regex) in &m.headers {
                            match_rule.add_header_match(header, regex);
                        }
                        if m.methods.is_empty() {
                            match_rule.add_method_match(WILDCARD_HTTP_METHOD);
                        }
                        for method in &m.methods {
                            match_rule.add_method_match(method);
                        }

                        let rule = rules.route_rule(match_rule);
                        for wc in &route.weighted_clusters {
                            rule.add_weighted_cluster(wc.cluster_name.as_str(), wc.weight);
                            depends.insert(wc.cluster_name.clone());
                        }
                    }
                }
            }
            PROTOCOL_TCP | PROTOCOL_TCP_SERVER_FIRST => {
                let rules = pipy_tm.tcp_route_rules_mut();
                for wc in &tm.weighted_clusters {
                    rules.add_weighted_cluster(wc.cluster_name.as_str(), wc.weight);
                    depends.insert(wc.cluster_name.clone());
                }
            }
            PROTOCOL_HTTPS => {
                let rules = pipy_tm.tcp_route_rules_mut();
                for config in route_configs(policy, tm) {
                    for wc in config.routes.iter().flat_map(|r| &r.weighted_clusters) {
                        rules.add_weighted_cluster(wc.cluster_name.as_str(), wc.weight);
                        depends.insert(wc.cluster_name.clone());
                    }
                }
            }
            _ => {
                tracing::warn!(traffic_match = %tm.name, %protocol, "Unsupported protocol");
            }
        }
    }
    depends
}

/// Selects the route configs for the upstream a traffic match names: those
/// on its port, named by its FQDN, that route to exactly its clusters.
fn route_configs<'p>(
    policy: &'p OutboundMeshTrafficPolicy,
    tm: &TrafficMatch,
) -> Vec<&'p OutboundTrafficPolicy> {
    let svc = match tm.to_mesh_service() {
        Ok(svc) => svc,
        Err(error) => {
            tracing::error!(%error, "Skipping traffic match");
            return vec![];
        }
    };
    let Some(configs) = policy.http_route_configs_per_port.get(&svc.target_port) else {
        return vec![];
    };

    // Compared as sorted lists: a traffic match repeating a cluster does not
    // equal a route that names it once.
    let fqdn = svc.fqdn();
    let mut clusters = tm.weighted_clusters.iter().collect::<Vec<_>>();
    clusters.sort();
    configs
        .iter()
        .filter(|c| {
            c.name == fqdn
                && c.routes
                    .iter()
                    .any(|r| r.weighted_clusters.iter().eq(clusters.iter().copied()))
        })
        .collect()
}

/// Resolves the endpoints of every depended-upon cluster.
fn balance(
    conf: &mut PipyConf,
    catalog: &dyn MeshCataloger,
    policy: &OutboundMeshTrafficPolicy,
    depends: BTreeSet<ClusterName>,
) -> bool {
    let mut ready = true;
    for cluster in depends {
        let Some(cluster_config) = policy.cluster_config(&cluster) else {
            tracing::debug!(%cluster, "Cluster config not yet known");
            ready = false;
            continue;
        };
        let upstream = match cluster.to_mesh_service() {
            Ok(svc) => svc,
            Err(error) => {
                tracing::error!(%error, "Invalid cluster");
                ready = false;
                continue;
            }
        };
        let endpoints = catalog.list_upstream_endpoints_for_service(&upstream);
        if endpoints.is_empty() {
            tracing::debug!(%cluster, "No upstream endpoints");
            ready = false;
            continue;
        }

        let svc = &cluster_config.service;
        let configs = conf.outbound_mut().cluster_configs_mut(cluster.as_str());
        for ep in endpoints {
            let port = if ep.is_remote() && svc.target_port > 0 {
                svc.target_port
            } else {
                svc.port
            };
            let address = match ep.ip {
                IpAddr::V4(ip) => ip.to_string(),
                IpAddr::V6(ip) => format!("[{ip}]"),
            };
            configs.add_endpoint(
                &address,
                port,
                WeightedZoneEndpoint {
                    weight: ep.weight,
                    cluster: ep.cluster_key.filter(|k| !k.is_empty()),
                    lb_type: ep.lb_type,
                    context_path: ep.path.filter(|p| !p.is_empty()),
                },
            );
        }
    }
    ready
}

#[cfg(test)]
mod tests;
