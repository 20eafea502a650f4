use crate::{policy::OutboundMeshTrafficPolicy, Endpoint, MeshService};

/// The view of the mesh the sidecar compiler works from.
pub trait MeshCataloger: Send + Sync {
    /// Services a proxy may initiate outbound connections to.
    fn list_outbound_services(&self) -> Vec<MeshService>;

    /// Endpoints over which an upstream service may be reached.
    fn list_upstream_endpoints_for_service(&self, svc: &MeshService) -> Vec<Endpoint>;

    fn outbound_mesh_traffic_policy(&self) -> OutboundMeshTrafficPolicy;
}
