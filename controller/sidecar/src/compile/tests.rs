use super::*;
use crate::{
    conf::UriMatchType,
    test_util::{ep, svc, FakeCatalog, FakeConfigurator},
};
use ecnet_controller_core::{
    policy::{HttpRouteMatch, PathMatchType},
    Endpoint, LbType, WeightedCluster,
};
use pretty_assertions::assert_eq;
use tracing::Level;

fn ready(compiled: Compiled) -> PipyConf {
    match compiled {
        Compiled::Ready(conf) => conf,
        Compiled::NotReady => panic!("compile must be ready"),
    }
}

#[test]
fn http_and_grpc_share_a_port() {
    tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .try_init()
        .ok();

    let catalog = FakeCatalog::default()
        .with_service(svc("web", 80, 8080, "http"))
        .with_service(svc("api", 80, 9090, "grpc"))
        .with_endpoints("ns/web|8080", vec![ep("10.0.0.1")])
        .with_endpoints("ns/api|9090", vec![ep("10.0.0.2")]);
    let conf = ready(compile(&catalog, &FakeConfigurator::default()));

    let outbound = conf.outbound.as_ref().expect("outbound must be set");
    let matches = &outbound.traffic_matches[&80];
    assert_eq!(matches.len(), 1);
    let tm = &matches[0];
    assert_eq!(tm.port, 80);
    assert_eq!(
        tm.http_service_route_rules.keys().collect::<Vec<_>>(),
        vec!["api.ns.svc.cluster.local", "web.ns.svc.cluster.local"]
    );
    assert_eq!(
        tm.http_host_port_2_service.get("web.ns:80").map(String::as_str),
        Some("web.ns.svc.cluster.local")
    );

    let rules = &tm.http_service_route_rules["web.ns.svc.cluster.local"].route_rules;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].match_rule.path, ".*");
    assert_eq!(rules[0].match_rule.match_type, UriMatchType::Regex);
    assert_eq!(rules[0].match_rule.methods, None);
    assert_eq!(
        rules[0].target_clusters,
        maplit::btreemap! { "ns/web|8080".to_string() => 100 }
    );

    assert_eq!(
        outbound.clusters_configs.keys().collect::<Vec<_>>(),
        vec!["ns/api|9090", "ns/web|8080"]
    );
}

#[test]
fn tcp_routes_forward_to_clusters() {
    let catalog = FakeCatalog::default()
        .with_service(svc("db", 5432, 5432, "tcp-server-first"))
        .with_endpoints("ns/db|5432", vec![ep("10.0.0.3")]);
    let conf = ready(compile(&catalog, &FakeConfigurator::default()));

    let tm = &conf.outbound.as_ref().expect("outbound must be set").traffic_matches[&5432][0];
    assert_eq!(tm.protocol, "tcp");
    assert!(tm.http_service_route_rules.is_empty());
    assert_eq!(
        tm.tcp_service_route_rules
            .as_ref()
            .expect("tcp rules must be set")
            .target_clusters,
        maplit::btreemap! { "ns/db|5432".to_string() => 100 }
    );
}

#[test]
fn https_passes_through_as_tcp() {
    let catalog = FakeCatalog::default()
        .with_service(svc("secure", 443, 8443, "https"))
        .with_endpoints("ns/secure|8443", vec![ep("10.0.0.4")]);
    let conf = ready(compile(&catalog, &FakeConfigurator::default()));

    let tm = &conf.outbound.as_ref().expect("outbound must be set").traffic_matches[&443][0];
    assert_eq!(tm.protocol, "https");
    assert!(tm.http_service_route_rules.is_empty());
    assert_eq!(
        tm.tcp_service_route_rules
            .as_ref()
            .expect("tcp rules must be set")
            .target_clusters,
        maplit::btreemap! { "ns/secure|8443".to_string() => 100 }
    );
}

#[test]
fn missing_endpoints_are_not_ready() {
    let catalog = FakeCatalog::default().with_service(svc("web", 80, 8080, "http"));
    assert!(matches!(
        compile(&catalog, &FakeConfigurator::default()),
        Compiled::NotReady
    ));
}

#[test]
fn missing_cluster_config_is_not_ready() {
    let mut catalog = FakeCatalog::default()
        .with_service(svc("web", 80, 8080, "http"))
        .with_endpoints("ns/web|8080", vec![ep("10.0.0.1")]);
    catalog.policy.clusters_configs.clear();
    assert!(matches!(
        compile(&catalog, &FakeConfigurator::default()),
        Compiled::NotReady
    ));
}

#[test]
fn endpoint_ports_and_addresses() {
    let remote = Endpoint {
        weight: 0,
        cluster_key: Some("cluster/default/east".to_string()),
        lb_type: Some(LbType::FailOver),
        path: Some("/east".to_string()),
        ..ep("10.1.0.1")
    };
    let catalog = FakeCatalog::default()
        .with_service(svc("web", 80, 8080, "http"))
        .with_endpoints("ns/web|8080", vec![ep("fd00::1"), remote]);
    let conf = ready(compile(&catalog, &FakeConfigurator::default()));

    let endpoints = &conf.outbound.as_ref().expect("outbound must be set").clusters_configs
        ["ns/web|8080"]
        .endpoints;
    assert_eq!(
        endpoints.keys().collect::<Vec<_>>(),
        vec!["10.1.0.1:8080", "[fd00::1]:80"]
    );
    // Local endpoints exist, so the failover endpoint stands by.
    assert_eq!(endpoints["10.1.0.1:8080"].weight, 0);
    assert_eq!(endpoints["10.1.0.1:8080"].context_path.as_deref(), Some("/east"));
    assert_eq!(endpoints["[fd00::1]:80"].weight, 100);
}

#[test]
fn cluster_configs_carry_only_endpoints() {
    let catalog = FakeCatalog::default()
        .with_service(svc("web", 80, 8080, "http"))
        .with_endpoints("ns/web|8080", vec![ep("10.1.0.1")]);
    let conf = ready(compile(&catalog, &FakeConfigurator::default()));

    let json = serde_json::to_value(&conf).expect("conf must serialize");
    assert_eq!(
        json["Outbound"]["ClustersConfigs"],
        serde_json::json!({
            "ns/web|8080": {
                "Endpoints": {
                    "10.1.0.1:80": { "Weight": 100 }
                }
            }
        })
    );
}

#[test]
fn route_matches_compile_to_rules() {
    let web = svc("web", 80, 8080, "http");
    let wc = WeightedCluster::new(web.cluster_name(), 100);
    let mut catalog = FakeCatalog::default()
        .with_service(web)
        .with_endpoints("ns/web|8080", vec![ep("10.0.0.1")]);
    let config = &mut catalog
        .policy
        .http_route_configs_per_port
        .get_mut(&80)
        .expect("route config must exist")[0];
    config
        .add_route(
            HttpRouteMatch {
                path: "/api".to_string(),
                path_match_type: PathMatchType::Prefix,
                headers: maplit::btreemap! { "x-user".to_string() => "admin.*".to_string() },
                methods: vec!["GET".to_string(), "POST".to_string()],
            },
            [wc],
        )
        .expect("route must be added");

    let conf = ready(compile(&catalog, &FakeConfigurator::default()));
    let tm = &conf.outbound.as_ref().expect("outbound must be set").traffic_matches[&80][0];
    let rules = &tm.http_service_route_rules["web.ns.svc.cluster.local"].route_rules;
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].match_rule.path, "/api");
    assert_eq!(rules[0].match_rule.match_type, UriMatchType::Prefix);
    assert_eq!(
        rules[0].match_rule.methods,
        Some(vec!["GET".to_string(), "POST".to_string()])
    );
    assert_eq!(
        rules[0].match_rule.headers,
        Some(maplit::btreemap! { "x-user".to_string() => "admin.*".to_string() })
    );
    assert_eq!(rules[1].match_rule.path, ".*");
}

#[test]
fn resolvable_set_becomes_dns_db() {
    let mut catalog = FakeCatalog::default();
    catalog.policy.services_resolvable_set = maplit::btreemap! {
        "web.ns".to_string() => vec!["10.96.0.10".to_string()],
    };
    let conf = ready(compile(&catalog, &FakeConfigurator::default()));
    assert_eq!(conf.dns_resolve_db, catalog.policy.services_resolvable_set);
    assert_eq!(conf.spec.sidecar_log_level, "debug");
}

#[test]
fn plugins_order_by_priority() {
    let cfg = FakeConfigurator {
        chains: maplit::btreemap! {
            "outbound-http".to_string() => vec![
                Plugin { name: "low".to_string(), priority: 1.0, build_in: true },
                Plugin { name: "custom".to_string(), priority: 5.5, build_in: false },
                Plugin { name: "high".to_string(), priority: 10.0, build_in: true },
            ],
            "inbound-tcp".to_string() => vec![],
        },
    };
    let conf = ready(compile(&FakeCatalog::default(), &cfg));
    assert_eq!(
        conf.chains,
        maplit::btreemap! {
            "outbound-http".to_string() => vec![
                "high.js".to_string(),
                "plugins/custom.js".to_string(),
                "low.js".to_string(),
            ],
        }
    );
}

#[test]
fn compiles_deterministically() {
    let catalog = FakeCatalog::default()
        .with_service(svc("web", 80, 8080, "http"))
        .with_service(svc("api", 80, 9090, "grpc"))
        .with_service(svc("db", 5432, 5432, "tcp"))
        .with_endpoints("ns/web|8080", vec![ep("10.0.0.2"), ep("10.0.0.1")])
        .with_endpoints("ns/api|9090", vec![ep("10.0.0.3")])
        .with_endpoints("ns/db|5432", vec![ep("10.0.0.4")]);
    let cfg = FakeConfigurator::default();

    let first = serde_json::to_vec(&ready(compile(&catalog, &cfg))).expect("must serialize");
    let second = serde_json::to_vec(&ready(compile(&catalog, &cfg))).expect("must serialize");
    assert_eq!(first, second);
}

#[test]
fn repeated_traffic_match_clusters_select_no_routes() {
    let mut catalog = FakeCatalog::default()
        .with_service(svc("web", 80, 8080, "http"))
        .with_endpoints("ns/web|8080", vec![ep("10.0.0.1")]);
    let tm = &catalog.policy.traffic_matches[0];
    assert_eq!(route_configs(&catalog.policy, tm).len(), 1);

    let wc = catalog.policy.traffic_matches[0].weighted_clusters[0].clone();
    catalog.policy.traffic_matches[0].weighted_clusters.push(wc);
    let tm = &catalog.policy.traffic_matches[0];
    assert!(route_configs(&catalog.policy, tm).is_empty());
}
