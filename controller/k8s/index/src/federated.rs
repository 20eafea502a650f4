use crate::cache::SharedCache;
use anyhow::Result;
use ecnet_controller_core::{
    service::port_protocol, Endpoint, LbType, MeshService, Provider, ServiceIdentity,
    FEDERATED_PROVIDER,
};
use ecnet_controller_k8s_api::{
    multicluster::{GlobalTrafficPolicySpec, LoadBalancerType, ServiceImportType},
    ResourceExt, ServiceImport,
};
use std::{collections::BTreeSet, net::IpAddr};

/// Serves services imported from other clusters.
///
/// Each `ServiceImport` port lists the remote endpoints backing it, grouped
/// by cluster. A `GlobalTrafficPolicy` with the same namespace and name
/// decides how traffic is balanced across those clusters.
#[derive(Clone, Debug)]
pub struct FederatedProvider {
    cache: SharedCache,
}

impl FederatedProvider {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }
}

impl Provider for FederatedProvider {
    fn id(&self) -> &'static str {
        FEDERATED_PROVIDER
    }

    fn list_services(&self) -> Result<Vec<MeshService>> {
        let cache = self.cache.read();
        let mut services = Vec::new();
        for import in cache.list::<ServiceImport>() {
            let namespace = import.namespace().unwrap_or_default();
            let name = import.name_unchecked();
            let uid = import.uid();
            for port in &import.spec.ports {
                let Ok(svc_port) = u16::try_from(port.port) else {
                    continue;
                };
                let protocol = port_protocol(port.name.as_deref(), port.app_protocol.as_deref());
                let target_ports = port
                    .endpoints
                    .iter()
                    .flat_map(|ep| &ep.targets)
                    .filter_map(|t| u16::try_from(t.port).ok())
                    .collect::<BTreeSet<_>>();
                services.extend(target_ports.into_iter().map(|target_port| MeshService {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    port: svc_port,
                    target_port,
                    protocol: protocol.clone(),
                    service_import_uid: uid.clone(),
                }));
            }
        }
        Ok(services)
    }

    fn list_endpoints_for_service(&self, svc: &MeshService) -> Result<Vec<Endpoint>> {
        let cache = self.cache.read();
        let Some(import) = cache.service_import(&svc.namespace, svc.provider_key()) else {
            tracing::debug!(service = %svc, "No service import found");
            return Ok(vec![]);
        };
        let policy = cache
            .global_traffic_policy(&svc.namespace, svc.provider_key())
            .map(|gtp| &gtp.spec);

        let subdomain = svc.subdomain();
        let mut endpoints = Vec::new();
        for port in &import.spec.ports {
            for ep in &port.endpoints {
                for target in &ep.targets {
                    if svc.target_port != 0 && target.port != i32::from(svc.target_port) {
                        continue;
                    }
                    if subdomain.is_some() && target.host.as_deref() != subdomain {
                        continue;
                    }
                    let Ok(port) = u16::try_from(target.port) else {
                        continue;
                    };
                    let ip = match target.ip.parse::<IpAddr>() {
                        Ok(ip) => ip,
                        Err(error) => {
                            tracing::warn!(
                                %error,
                                ip = %target.ip,
                                service = %svc,
                                "Invalid imported endpoint address"
                            );
                            continue;
                        }
                    };
                    endpoints.push(Endpoint {
                        ip,
                        port,
                        weight: policy
                            .and_then(|p| p.weight_for(&ep.cluster_key))
                            .unwrap_or(0),
                        cluster_key: Some(ep.cluster_key.clone()),
                        lb_type: Some(lb_type(policy)),
                        path: target.path.clone(),
                    });
                }
            }
        }
        Ok(endpoints)
    }

    fn resolvable_endpoints_for_service(&self, svc: &MeshService) -> Result<Vec<Endpoint>> {
        let (ips, ports) = {
            let cache = self.cache.read();
            let Some(import) = cache.service_import(&svc.namespace, svc.provider_key()) else {
                tracing::debug!(service = %svc, "No service import found");
                return Ok(vec![]);
            };
            if import.spec.type_ == ServiceImportType::Headless || import.spec.ips.is_empty() {
                (Vec::new(), Vec::new())
            } else {
                let ports = import
                    .spec
                    .ports
                    .iter()
                    .filter_map(|p| u16::try_from(p.port).ok())
                    .collect::<Vec<_>>();
                (import.spec.ips.clone(), ports)
            }
        };

        if ips.is_empty() {
            return self.list_endpoints_for_service(svc);
        }

        let mut endpoints = Vec::new();
        for ip in ips {
            let ip = ip.parse::<IpAddr>()?;
            endpoints.extend(ports.iter().map(|&port| Endpoint {
                cluster_key: Some(FEDERATED_PROVIDER.to_string()),
                ..Endpoint::new(ip, port)
            }));
        }
        Ok(endpoints)
    }

    fn list_service_identities_for_service(
        &self,
        svc: &MeshService,
    ) -> Result<Vec<ServiceIdentity>> {
        let cache = self.cache.read();
        Ok(cache
            .service_import(&svc.namespace, svc.provider_key())
            .and_then(|import| import.spec.service_account_name.as_deref())
            .filter(|sa| !sa.is_empty())
            .map(|sa| ServiceIdentity::new(&svc.namespace, sa))
            .into_iter()
            .collect())
    }

    /// Remote workloads are never addressed by identity.
    fn list_endpoints_for_identity(&self, _: &ServiceIdentity) -> Result<Vec<Endpoint>> {
        Ok(vec![])
    }
}

fn lb_type(policy: Option<&GlobalTrafficPolicySpec>) -> LbType {
    match policy.map(|p| p.lb_type).unwrap_or_default() {
        LoadBalancerType::Locality => LbType::Locality,
        LoadBalancerType::ActiveActive => LbType::ActiveActive,
        LoadBalancerType::FailOver => LbType::FailOver,
    }
}
