//! The mesh catalog.
//!
//! The catalog is the single view of the mesh the sidecar compiler works
//! from. It fans every query out to the configured providers and merges
//! their answers:
//!
//! ```text
//! [ kubernetes provider ] --\
//!                            +--> [ MeshCatalog ] --> [ OutboundMeshTrafficPolicy ]
//! [ flomesh provider ] -----/
//! ```
//!
//! A provider that fails a query is logged and skipped so that one broken
//! source never hides what the others know.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod outbound;
mod resync;


pub use self::resync::{ResyncTicker, MIN_RESYNC_INTERVAL};
use anyhow::Result;
use ecnet_controller_core::{
    policy::OutboundMeshTrafficPolicy, Endpoint, MeshCataloger, MeshService, Provider,
    ServiceIdentity, FEDERATED_PROVIDER,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct MeshCatalog {
    providers: Vec<Arc<dyn Provider>>,
}

// === impl MeshCatalog ===

impl MeshCatalog {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// Every service in the mesh.
    ///
    /// Federated services are listed first. A service from any other
    /// provider is only listed when a federated service shares its namespace
    /// and name, so nothing is listed until the federated provider knows
    /// about a service.
    pub fn list_services(&self) -> Vec<MeshService> {
        let (federated, others): (Vec<_>, Vec<_>) = self
            .providers
            .iter()
            .partition(|p| p.id() == FEDERATED_PROVIDER);

        let mut services = Vec::new();
        for provider in federated {
            services.extend(query(&**provider, "services", |p| p.list_services()));
        }
        if services.is_empty() {
            return services;
        }

        let federated_len = services.len();
        for provider in others {
            for svc in query(&**provider, "services", |p| p.list_services()) {
                let known = services[..federated_len]
                    .iter()
                    .any(|mc| mc.name == svc.name && mc.namespace == svc.namespace);
                if known {
                    services.push(svc);
                }
            }
        }
        services
    }

    pub fn list_endpoints_for_service(&self, svc: &MeshService) -> Vec<Endpoint> {
        self.collect("endpoints", |p| p.list_endpoints_for_service(svc))
    }

    pub fn list_service_identities_for_service(&self, svc: &MeshService) -> Vec<ServiceIdentity> {
        self.collect("service identities", |p| {
            p.list_service_identities_for_service(svc)
        })
    }

    pub fn list_endpoints_for_service_identity(&self, id: &ServiceIdentity) -> Vec<Endpoint> {
        self.collect("identity endpoints", |p| p.list_endpoints_for_identity(id))
    }

    /// The endpoints a client resolves the service's DNS names to.
    pub fn resolvable_endpoints_for_service(&self, svc: &MeshService) -> Vec<Endpoint> {
        self.collect("resolvable endpoints", |p| {
            p.resolvable_endpoints_for_service(svc)
        })
    }

    fn collect<T>(&self, what: &str, f: impl Fn(&dyn Provider) -> Result<Vec<T>>) -> Vec<T> {
        self.providers
            .iter()
            .flat_map(|p| query(&**p, what, &f))
            .collect()
    }
}

impl MeshCataloger for MeshCatalog {
    fn list_outbound_services(&self) -> Vec<MeshService> {
        self.list_services()
    }

    fn list_upstream_endpoints_for_service(&self, svc: &MeshService) -> Vec<Endpoint> {
        self.list_endpoints_for_service(svc)
    }

    fn outbound_mesh_traffic_policy(&self) -> OutboundMeshTrafficPolicy {
        outbound::build(self)
    }
}

impl std::fmt::Debug for MeshCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCatalog")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn query<T>(
    provider: &dyn Provider,
    what: &str,
    f: impl Fn(&dyn Provider) -> Result<Vec<T>>,
) -> Vec<T> {
    match f(provider) {
        Ok(items) => {
            if items.is_empty() {
                tracing::trace!(provider = provider.id(), "No {what} found");
            }
            items
        }
        Err(error) => {
            tracing::warn!(%error, provider = provider.id(), "Failed to list {what}");
            Vec::new()
        }
    }
}
