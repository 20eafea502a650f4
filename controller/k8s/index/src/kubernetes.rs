use crate::cache::SharedCache;
use anyhow::Result;
use ecnet_controller_core::{
    service::port_protocol, Endpoint, MeshService, Provider, ServiceIdentity, KUBERNETES_PROVIDER,
};
use ecnet_controller_k8s_api::{self as k8s, ResourceExt};
use std::{collections::BTreeSet, net::IpAddr};

/// Serves services, endpoints and identities from the local cluster's own
/// resources.
#[derive(Clone, Debug)]
pub struct KubeProvider {
    cache: SharedCache,
}

const CLUSTER_IP_NONE: &str = "None";

impl KubeProvider {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }
}

impl Provider for KubeProvider {
    fn id(&self) -> &'static str {
        KUBERNETES_PROVIDER
    }

    fn list_services(&self) -> Result<Vec<MeshService>> {
        let cache = self.cache.read();
        let mut services = Vec::new();
        for svc in cache.list::<k8s::Service>() {
            let namespace = svc.namespace().unwrap_or_default();
            let name = svc.name_unchecked();
            let endpoints = cache.endpoints(&namespace, &name);
            services.extend(service_to_mesh_services(svc, endpoints));
        }
        Ok(services)
    }

    fn list_endpoints_for_service(&self, svc: &MeshService) -> Result<Vec<Endpoint>> {
        let cache = self.cache.read();
        let Some(endpoints) = cache.endpoints(&svc.namespace, svc.provider_key()) else {
            tracing::debug!(service = %svc, "No endpoints found");
            return Ok(vec![]);
        };
        Ok(endpoints_for(svc, endpoints))
    }

    fn resolvable_endpoints_for_service(&self, svc: &MeshService) -> Result<Vec<Endpoint>> {
        let cluster_ip = {
            let cache = self.cache.read();
            let Some(service) = cache.service(&svc.namespace, svc.provider_key()) else {
                tracing::debug!(service = %svc, "No service found");
                return Ok(vec![]);
            };
            let spec = service.spec.clone().unwrap_or_default();
            match spec.cluster_ip.as_deref() {
                None | Some("") | Some(CLUSTER_IP_NONE) => None,
                Some(ip) => Some((ip.to_string(), spec.ports.unwrap_or_default())),
            }
        };

        // Headless services resolve straight to their endpoints.
        let Some((ip, ports)) = cluster_ip else {
            return self.list_endpoints_for_service(svc);
        };
        let ip = ip.parse::<IpAddr>()?;
        Ok(ports
            .iter()
            .filter_map(|p| u16::try_from(p.port).ok())
            .map(|port| Endpoint::new(ip, port))
            .collect())
    }

    fn list_service_identities_for_service(
        &self,
        svc: &MeshService,
    ) -> Result<Vec<ServiceIdentity>> {
        let cache = self.cache.read();
        let Some(selector) = cache
            .service(&svc.namespace, svc.provider_key())
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.selector.clone())
            .filter(|s| !s.is_empty())
        else {
            return Ok(vec![]);
        };

        let accounts = cache
            .list_namespaced::<k8s::Pod>(&svc.namespace)
            .filter(|pod| {
                let labels = pod.labels();
                selector.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .map(pod_service_account)
            .collect::<BTreeSet<_>>();
        Ok(accounts
            .into_iter()
            .map(|sa| ServiceIdentity::new(&svc.namespace, sa))
            .collect())
    }

    fn list_endpoints_for_identity(&self, identity: &ServiceIdentity) -> Result<Vec<Endpoint>> {
        let cache = self.cache.read();
        let mut endpoints = Vec::new();
        for pod in cache.list_namespaced::<k8s::Pod>(&identity.namespace) {
            if pod_service_account(pod) != identity.name {
                continue;
            }
            let Some(ip) = pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.as_deref())
                .and_then(|ip| ip.parse::<IpAddr>().ok())
            else {
                continue;
            };
            let ports = pod
                .spec
                .iter()
                .flat_map(|s| &s.containers)
                .flat_map(|c| c.ports.iter().flatten())
                .filter_map(|p| u16::try_from(p.container_port).ok());
            endpoints.extend(ports.map(|port| Endpoint::new(ip, port)));
        }
        Ok(endpoints)
    }
}

fn pod_service_account(pod: &k8s::Pod) -> String {
    pod.spec
        .as_ref()
        .and_then(|s| s.service_account_name.clone())
        .filter(|sa| !sa.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

/// Expands a service into one `MeshService` per service port and backing
/// endpoint port. Ports without endpoints are omitted since their target
/// port cannot be known.
pub(crate) fn service_to_mesh_services(
    svc: &k8s::Service,
    endpoints: Option<&k8s::Endpoints>,
) -> Vec<MeshService> {
    let Some(endpoints) = endpoints else {
        return vec![];
    };
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_unchecked();
    let ports = svc
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten();

    let mut services = Vec::new();
    for port in ports {
        let Ok(svc_port) = u16::try_from(port.port) else {
            continue;
        };
        let protocol = port_protocol(port.name.as_deref(), port.app_protocol.as_deref());
        let subset_ports = endpoints
            .subsets
            .iter()
            .flatten()
            .flat_map(|s| s.ports.iter().flatten())
            // Endpoint ports carry the name of the service port they back.
            .filter(|ep| port.name.is_none() || ep.name == port.name);
        for ep_port in subset_ports {
            let Ok(target_port) = u16::try_from(ep_port.port) else {
                continue;
            };
            services.push(MeshService {
                namespace: namespace.clone(),
                name: name.clone(),
                port: svc_port,
                target_port,
                protocol: protocol.clone(),
                service_import_uid: None,
            });
        }
    }
    services.sort();
    services.dedup();
    services
}

fn endpoints_for(svc: &MeshService, endpoints: &k8s::Endpoints) -> Vec<Endpoint> {
    let subdomain = svc.subdomain();
    let mut found = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        for port in subset.ports.iter().flatten() {
            // An unknown target port matches every port.
            if svc.target_port != 0 && port.port != i32::from(svc.target_port) {
                continue;
            }
            let Ok(port) = u16::try_from(port.port) else {
                continue;
            };
            for address in subset.addresses.iter().flatten() {
                if subdomain.is_some() && address.hostname.as_deref() != subdomain {
                    continue;
                }
                match address.ip.parse::<IpAddr>() {
                    Ok(ip) => found.push(Endpoint::new(ip, port)),
                    Err(error) => {
                        tracing::warn!(
                            %error,
                            ip = %address.ip,
                            service = %svc,
                            "Invalid endpoint address"
                        )
                    }
                }
            }
        }
    }
    found
}
