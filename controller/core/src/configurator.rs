use anyhow::Result;
use std::{collections::BTreeMap, time::Duration};

/// Plugin chain mount points, in the order they are reported.
pub const PLUGIN_MOUNT_POINTS: [&str; 4] =
    ["inbound-tcp", "inbound-http", "outbound-tcp", "outbound-http"];

/// A sidecar plugin mounted on a chain.
#[derive(Clone, Debug, PartialEq)]
pub struct Plugin {
    pub name: String,
    /// Higher priorities run first.
    pub priority: f32,
    /// Built-in plugins ship with the sidecar codebase rather than under
    /// `plugins/`.
    pub build_in: bool,
}

/// Typed access to the mesh-wide configuration.
///
/// Getters never fail on a missing configuration resource; they fall back
/// to documented defaults instead.
pub trait Configurator: Send + Sync {
    fn sidecar_log_level(&self) -> String;

    fn local_dns_proxy_enabled(&self) -> bool;

    fn local_dns_proxy_primary_upstream(&self) -> String;

    fn local_dns_proxy_secondary_upstream(&self) -> String;

    /// Zero when unset.
    fn proxy_server_port(&self) -> u32;

    fn repo_server_ipaddr(&self) -> String;

    /// The codebase prefix in the configuration store, without leading or
    /// trailing slashes. Empty when unset.
    fn repo_server_codebase(&self) -> String;

    /// Zero when unset or unparseable.
    fn config_resync_interval(&self) -> Duration;

    fn mesh_config_json(&self) -> Result<String>;

    /// Enabled plugins by mount point. Every mount point is present.
    fn global_plugin_chains(&self) -> BTreeMap<String, Vec<Plugin>>;
}
