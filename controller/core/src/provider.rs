use crate::{Endpoint, MeshService, ServiceIdentity};
use anyhow::Result;

/// Identifies the provider backed by the local cluster's own resources.
pub const KUBERNETES_PROVIDER: &str = "kubernetes";

/// Identifies the provider backed by services imported from other clusters.
pub const FEDERATED_PROVIDER: &str = "flomesh";

/// A source of services, endpoints and identities.
///
/// The catalog only depends on this contract; a provider failing a query
/// costs that provider's contribution, never the aggregate answer.
pub trait Provider: Send + Sync {
    fn id(&self) -> &'static str;

    fn list_services(&self) -> Result<Vec<MeshService>>;

    fn list_endpoints_for_service(&self, svc: &MeshService) -> Result<Vec<Endpoint>>;

    /// Endpoints a client should resolve the service's name to: the cluster
    /// IP when one is allocated, otherwise the backing endpoints.
    fn resolvable_endpoints_for_service(&self, svc: &MeshService) -> Result<Vec<Endpoint>>;

    fn list_service_identities_for_service(
        &self,
        svc: &MeshService,
    ) -> Result<Vec<ServiceIdentity>>;

    fn list_endpoints_for_identity(&self, identity: &ServiceIdentity) -> Result<Vec<Endpoint>>;
}
