use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The mesh-wide control plane configuration.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "config.flomesh.io",
    version = "v1alpha1",
    kind = "MeshConfig",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfigSpec {
    #[serde(default)]
    pub sidecar: SidecarSpec,

    #[serde(default)]
    pub repo_server: RepoServerSpec,

    #[serde(default)]
    pub plugin_chains: PluginChainsSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    /// Log level of the sidecar. Defaults to `error`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_level: String,

    /// The port sidecars poll for their configuration.
    #[serde(default)]
    pub proxy_server_port: u32,

    /// How often every proxy is asked to resync, as a Go duration string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_resync_interval: String,

    #[serde(default, rename = "localDNSProxy")]
    pub local_dns_proxy: LocalDnsProxy,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct LocalDnsProxy {
    #[serde(default)]
    pub enable: bool,

    #[serde(
        default,
        rename = "primaryUpstreamDNSServerIPAddr",
        skip_serializing_if = "String::is_empty"
    )]
    pub primary_upstream_dns_server_ip_addr: String,

    #[serde(
        default,
        rename = "secondaryUpstreamDNSServerIPAddr",
        skip_serializing_if = "String::is_empty"
    )]
    pub secondary_upstream_dns_server_ip_addr: String,
}

/// Where the sidecar configuration repository lives.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct RepoServerSpec {
    #[serde(default)]
    pub ipaddr: String,

    #[serde(default)]
    pub codebase: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PluginChainsSpec {
    #[serde(default, rename = "inbound-tcp")]
    pub inbound_tcp: Vec<PluginChainSpec>,

    #[serde(default, rename = "inbound-http")]
    pub inbound_http: Vec<PluginChainSpec>,

    #[serde(default, rename = "outbound-tcp")]
    pub outbound_tcp: Vec<PluginChainSpec>,

    #[serde(default, rename = "outbound-http")]
    pub outbound_http: Vec<PluginChainSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PluginChainSpec {
    pub plugin: String,

    #[serde(default)]
    pub priority: f32,

    #[serde(default)]
    pub disable: bool,
}

impl PluginChainsSpec {
    /// Chains paired with their mount point names.
    pub fn by_mount_point(&self) -> [(&'static str, &[PluginChainSpec]); 4] {
        [
            ("inbound-tcp", self.inbound_tcp.as_slice()),
            ("inbound-http", self.inbound_http.as_slice()),
            ("outbound-tcp", self.outbound_tcp.as_slice()),
            ("outbound-http", self.outbound_http.as_slice()),
        ]
    }
}
