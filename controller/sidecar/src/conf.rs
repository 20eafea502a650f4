//! The configuration document served to pipy sidecars.
//!
//! Field names are part of the sidecar's contract and are serialized
//! verbatim. Maps are ordered so that serializing the same document always
//! yields the same bytes.

use chrono::{DateTime, Utc};
use ecnet_controller_core::{
    policy::{PathMatchType, REGEX_MATCH_ALL, WILDCARD_HTTP_METHOD},
    service::{PROTOCOL_TCP, PROTOCOL_TCP_SERVER_FIRST},
    LbType, CLUSTER_WEIGHT_ACCEPT_ALL, CLUSTER_WEIGHT_FAIL_OVER,
};
use ecnet_controller_k8s_api::api::core::v1::Probe;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

static ADDR_WITH_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\d+$").expect("address regex must compile"));

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PipyConf {
    pub ts: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub spec: ConfSpec,
    pub outbound: Option<OutboundTrafficPolicy>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub chains: BTreeMap<String, Vec<String>>,

    #[serde(rename = "DNSResolveDB", skip_serializing_if = "BTreeMap::is_empty")]
    pub dns_resolve_db: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfSpec {
    pub sidecar_log_level: String,
    pub probes: Probes,

    #[serde(rename = "LocalDNSProxy", skip_serializing_if = "Option::is_none")]
    pub local_dns_proxy: Option<LocalDnsProxy>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Probes {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub readiness_probes: Vec<Probe>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub liveness_probes: Vec<Probe>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub startup_probes: Vec<Probe>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LocalDnsProxy {
    #[serde(rename = "UpstreamDNSServers", skip_serializing_if = "Option::is_none")]
    pub upstream_dns_servers: Option<UpstreamDnsServers>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpstreamDnsServers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutboundTrafficPolicy {
    /// Locates traffic matches by `port=name`.
    #[serde(skip)]
    named_traffic_matches: BTreeMap<String, (u16, usize)>,

    pub traffic_matches: BTreeMap<u16, Vec<OutboundTrafficMatch>>,
    pub clusters_configs: BTreeMap<String, ClusterConfigs>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OutboundTrafficMatch {
    #[serde(rename = "Port")]
    pub port: u16,

    #[serde(rename = "Protocol")]
    pub protocol: String,

    /// Host (with or without port) to the route rule set serving it.
    #[serde(rename = "HttpHostPort2Service")]
    pub http_host_port_2_service: BTreeMap<String, String>,

    #[serde(rename = "HttpServiceRouteRules")]
    pub http_service_route_rules: BTreeMap<String, OutboundHttpRouteRules>,

    #[serde(rename = "TcpServiceRouteRules")]
    pub tcp_service_route_rules: Option<OutboundTcpServiceRouteRules>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OutboundHttpRouteRules {
    #[serde(rename = "RouteRules")]
    pub route_rules: Vec<OutboundHttpRouteRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OutboundHttpRouteRule {
    #[serde(flatten)]
    pub match_rule: HttpMatchRule,

    #[serde(rename = "TargetClusters")]
    pub target_clusters: BTreeMap<String, u32>,
}

/// Matches requests by path, headers and methods.
///
/// Equality includes whether a wildcard method was seen, so two rules that
/// serialize identically may still be distinct.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpMatchRule {
    pub path: String,
    #[serde(rename = "Type")]
    pub match_type: UriMatchType,
    pub headers: Option<BTreeMap<String, String>>,
    pub methods: Option<Vec<String>>,

    #[serde(skip)]
    allowed_any_method: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum UriMatchType {
    #[default]
    Regex,
    Exact,
    Prefix,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OutboundTcpServiceRouteRules {
    #[serde(rename = "TargetClusters")]
    pub target_clusters: BTreeMap<String, u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClusterConfigs {
    /// Keyed by `address:port`.
    #[serde(rename = "Endpoints")]
    pub endpoints: BTreeMap<String, WeightedZoneEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WeightedZoneEndpoint {
    #[serde(rename = "Weight")]
    pub weight: u32,

    /// The remote cluster the endpoint lives in. Absent for local endpoints.
    #[serde(rename = "Key", skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    #[serde(skip)]
    pub lb_type: Option<LbType>,

    #[serde(rename = "Path", skip_serializing_if = "Option::is_none")]
    pub context_path: Option<String>,
}

// === impl PipyConf ===

impl PipyConf {
    /// Returns true if the level changed. Levels compare case-insensitively.
    pub fn set_sidecar_log_level(&mut self, level: &str) -> bool {
        if self.spec.sidecar_log_level.eq_ignore_ascii_case(level) {
            return false;
        }
        self.spec.sidecar_log_level = level.to_string();
        true
    }

    /// Upstream servers are only recorded when non-empty.
    pub fn set_local_dns_proxy(&mut self, enable: bool, primary: &str, secondary: &str) {
        if !enable {
            self.spec.local_dns_proxy = None;
            return;
        }

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let upstream_dns_servers = (!primary.is_empty() || !secondary.is_empty()).then(|| {
            UpstreamDnsServers {
                primary: non_empty(primary),
                secondary: non_empty(secondary),
            }
        });
        self.spec.local_dns_proxy = Some(LocalDnsProxy {
            upstream_dns_servers,
        });
    }

    pub fn outbound_mut(&mut self) -> &mut OutboundTrafficPolicy {
        self.outbound.get_or_insert_with(Default::default)
    }

    /// Assigns default weights to endpoints that carry none and applies
    /// failover semantics to remote endpoints.
    pub fn rebalance(&mut self) {
        let Some(outbound) = self.outbound.as_mut() else {
            return;
        };

        for cluster in outbound.clusters_configs.values_mut() {
            let has_local = cluster.endpoints.values().any(|ep| !ep.is_remote());
            for ep in cluster.endpoints.values_mut() {
                if !ep.is_remote() {
                    if ep.weight == 0 {
                        ep.weight = CLUSTER_WEIGHT_ACCEPT_ALL;
                    }
                    continue;
                }
                match ep.lb_type {
                    Some(LbType::FailOver) => {
                        ep.weight = if has_local {
                            CLUSTER_WEIGHT_FAIL_OVER
                        } else {
                            CLUSTER_WEIGHT_ACCEPT_ALL
                        };
                    }
                    Some(LbType::ActiveActive) if ep.weight == 0 => {
                        ep.weight = CLUSTER_WEIGHT_ACCEPT_ALL;
                    }
                    _ => {}
                }
            }
        }
    }

    /// Orders every HTTP route rule set so that the catch-all path is tried
    /// last.
    pub fn reorder(&mut self) {
        let Some(outbound) = self.outbound.as_mut() else {
            return;
        };

        for rules in outbound
            .traffic_matches
            .values_mut()
            .flatten()
            .flat_map(|tm| tm.http_service_route_rules.values_mut())
        {
            rules.sort();
        }
    }
}

// === impl OutboundTrafficPolicy ===

impl OutboundTrafficPolicy {
    /// Returns the traffic match for `port` and `name`, creating it if
    /// needed, and whether it already existed.
    pub fn traffic_match(&mut self, port: u16, name: &str) -> (&mut OutboundTrafficMatch, bool) {
        let key = format!("{port}={name}");
        let matches = self.traffic_matches.entry(port).or_default();
        if let Some(&(_, idx)) = self.named_traffic_matches.get(&key) {
            return (&mut matches[idx], true);
        }

        matches.push(OutboundTrafficMatch::default());
        let idx = matches.len() - 1;
        self.named_traffic_matches.insert(key, (port, idx));
        (&mut matches[idx], false)
    }

    pub fn cluster_configs_mut(&mut self, cluster: &str) -> &mut ClusterConfigs {
        self.clusters_configs.entry(cluster.to_string()).or_default()
    }
}

// === impl OutboundTrafficMatch ===

impl OutboundTrafficMatch {
    /// Server-first TCP is served by the plain TCP pipeline.
    pub fn set_protocol(&mut self, protocol: &str) {
        let protocol = protocol.to_lowercase();
        self.protocol = if protocol == PROTOCOL_TCP_SERVER_FIRST {
            PROTOCOL_TCP.to_string()
        } else {
            protocol
        };
    }

    pub fn add_host_port(&mut self, host_port: &str, rule_name: &str) {
        self.http_host_port_2_service
            .insert(host_port.to_string(), rule_name.to_string());
    }

    pub fn http_route_rules_mut(&mut self, rule_name: &str) -> &mut OutboundHttpRouteRules {
        self.http_service_route_rules
            .entry(rule_name.to_string())
            .or_default()
    }

    pub fn tcp_route_rules_mut(&mut self) -> &mut OutboundTcpServiceRouteRules {
        self.tcp_service_route_rules
            .get_or_insert_with(Default::default)
    }
}

// === impl OutboundHttpRouteRules ===

impl OutboundHttpRouteRules {
    /// Returns the rule for `match_rule`, adding one if no structurally equal
    /// rule exists.
    pub fn route_rule(&mut self, match_rule: HttpMatchRule) -> &mut OutboundHttpRouteRule {
        let idx = match self
            .route_rules
            .iter()
            .position(|r| r.match_rule == match_rule)
        {
            Some(idx) => idx,
            None => {
                self.route_rules.push(OutboundHttpRouteRule {
                    match_rule,
                    target_clusters: BTreeMap::new(),
                });
                self.route_rules.len() - 1
            }
        };
        &mut self.route_rules[idx]
    }

    fn sort(&mut self) {
        self.route_rules.sort_by(|a, b| {
            let a = &a.match_rule.path;
            let b = &b.match_rule.path;
            (a == REGEX_MATCH_ALL, a).cmp(&(b == REGEX_MATCH_ALL, b))
        });
    }
}

// === impl HttpMatchRule ===

impl HttpMatchRule {
    /// An empty path matches everything.
    pub fn new(path: &str, match_type: PathMatchType) -> Self {
        let path = if path.is_empty() {
            REGEX_MATCH_ALL
        } else {
            path
        };
        Self {
            path: path.to_string(),
            match_type: match match_type {
                PathMatchType::Regex => UriMatchType::Regex,
                PathMatchType::Exact => UriMatchType::Exact,
                PathMatchType::Prefix => UriMatchType::Prefix,
            },
            headers: None,
            methods: None,
            allowed_any_method: false,
        }
    }

    pub fn add_header_match(&mut self, header: &str, regex: &str) {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(header.to_string(), regex.to_string());
    }

    /// Once the wildcard method is added, the rule matches every method and
    /// later methods are ignored.
    pub fn add_method_match(&mut self, method: &str) {
        if self.allowed_any_method {
            return;
        }
        if method == WILDCARD_HTTP_METHOD {
            self.allowed_any_method = true;
            self.methods = None;
            return;
        }
        self.methods
            .get_or_insert_with(Vec::new)
            .push(method.to_string());
    }
}

// === impl OutboundTcpServiceRouteRules ===

impl OutboundTcpServiceRouteRules {
    pub fn add_weighted_cluster(&mut self, cluster: &str, weight: u32) {
        self.target_clusters.insert(cluster.to_string(), weight);
    }
}

// === impl OutboundHttpRouteRule ===

impl OutboundHttpRouteRule {
    pub fn add_weighted_cluster(&mut self, cluster: &str, weight: u32) {
        self.target_clusters.insert(cluster.to_string(), weight);
    }
}

// === impl ClusterConfigs ===

impl ClusterConfigs {
    /// Adds an endpoint keyed by `address:port`. Addresses that already carry
    /// a port are used as-is; IPv6 addresses must be bracketed.
    pub fn add_endpoint(&mut self, address: &str, port: u16, endpoint: WeightedZoneEndpoint) {
        let key = if ADDR_WITH_PORT.is_match(address) {
            address.to_string()
        } else {
            format!("{address}:{port}")
        };
        self.endpoints.insert(key, endpoint);
    }
}

// === impl WeightedZoneEndpoint ===

impl WeightedZoneEndpoint {
    pub fn is_remote(&self) -> bool {
        self.cluster.as_deref().is_some_and(|c| !c.is_empty())
    }
}
