//! Services imported from other clusters and the policies balancing traffic
//! across them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A service exported by one or more remote clusters and made reachable from
/// this one.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "flomesh.io",
    version = "v1alpha1",
    kind = "ServiceImport",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImportSpec {
    /// Virtual IPs allocated to the imported service. Empty for headless
    /// imports.
    #[serde(default)]
    pub ips: Vec<String>,

    #[serde(default, rename = "type")]
    pub type_: ServiceImportType,

    #[serde(default)]
    pub ports: Vec<ImportedServicePort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ServiceImportType {
    #[default]
    ClusterSetIP,
    Headless,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportedServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_protocol: Option<String>,

    pub port: i32,

    /// Backends of this port, grouped by the cluster exporting them.
    #[serde(default)]
    pub endpoints: Vec<ImportedEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportedEndpoint {
    pub cluster_key: String,

    #[serde(default)]
    pub targets: Vec<Target>,
}

/// A reachable address in a remote cluster, usually the ingress of that
/// cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    pub ip: String,

    pub port: i32,

    /// Context path the remote cluster serves the service under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// How traffic to an imported service is spread across the clusters
/// exporting it. Applies to the `ServiceImport` of the same namespace and
/// name.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "flomesh.io",
    version = "v1alpha1",
    kind = "GlobalTrafficPolicy",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTrafficPolicySpec {
    #[serde(default)]
    pub lb_type: LoadBalancerType,

    #[serde(default)]
    pub targets: Vec<TrafficTarget>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum LoadBalancerType {
    #[default]
    Locality,
    ActiveActive,
    FailOver,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTarget {
    pub cluster_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl GlobalTrafficPolicySpec {
    /// The weight configured for a cluster, if any.
    pub fn weight_for(&self, cluster_key: &str) -> Option<u32> {
        self.targets
            .iter()
            .find(|t| t.cluster_key == cluster_key)
            .and_then(|t| t.weight)
    }
}
