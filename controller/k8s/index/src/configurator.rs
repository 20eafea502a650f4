use crate::cache::SharedCache;
use anyhow::Result;
use ecnet_controller_core::{Configurator, Plugin};
use ecnet_controller_k8s_api::{GoDuration, MeshConfigSpec};
use std::{collections::BTreeMap, time::Duration};

const DEFAULT_SIDECAR_LOG_LEVEL: &str = "error";
const DEFAULT_REPO_SERVER_IPADDR: &str = "127.0.0.1";

pub const REPO_SERVER_IPADDR_ENV: &str = "ECNET_REPO_SERVER_IPADDR";
pub const REPO_SERVER_CODEBASE_ENV: &str = "ECNET_REPO_SERVER_CODEBASE";

/// Reads mesh-wide settings from the cached `MeshConfig` resource.
///
/// The resource is looked up on every call so changes apply without a
/// restart. When it is missing, defaults are used.
#[derive(Clone, Debug)]
pub struct MeshConfigurator {
    cache: SharedCache,
    namespace: String,
    name: String,
    overrides: EnvOverrides,
}

/// Settings the control plane's environment may force regardless of the
/// mesh configuration.
#[derive(Clone, Debug, Default)]
pub struct EnvOverrides {
    pub repo_server_ipaddr: Option<String>,
    pub repo_server_codebase: Option<String>,
}

// === impl MeshConfigurator ===

impl MeshConfigurator {
    pub fn new(
        cache: SharedCache,
        namespace: impl ToString,
        name: impl ToString,
        overrides: EnvOverrides,
    ) -> Self {
        Self {
            cache,
            namespace: namespace.to_string(),
            name: name.to_string(),
            overrides,
        }
    }

    fn spec(&self) -> MeshConfigSpec {
        let cache = self.cache.read();
        match cache.mesh_config(&self.namespace, &self.name) {
            Some(mc) => mc.spec.clone(),
            None => {
                tracing::warn!(
                    namespace = %self.namespace,
                    name = %self.name,
                    "MeshConfig not found; using defaults"
                );
                MeshConfigSpec::default()
            }
        }
    }
}

impl Configurator for MeshConfigurator {
    fn sidecar_log_level(&self) -> String {
        let level = self.spec().sidecar.log_level;
        if level.is_empty() {
            return DEFAULT_SIDECAR_LOG_LEVEL.to_string();
        }
        level
    }

    fn local_dns_proxy_enabled(&self) -> bool {
        self.spec().sidecar.local_dns_proxy.enable
    }

    fn local_dns_proxy_primary_upstream(&self) -> String {
        self.spec()
            .sidecar
            .local_dns_proxy
            .primary_upstream_dns_server_ip_addr
    }

    fn local_dns_proxy_secondary_upstream(&self) -> String {
        self.spec()
            .sidecar
            .local_dns_proxy
            .secondary_upstream_dns_server_ip_addr
    }

    fn proxy_server_port(&self) -> u32 {
        self.spec().sidecar.proxy_server_port
    }

    fn repo_server_ipaddr(&self) -> String {
        if let Some(addr) = self.overrides.repo_server_ipaddr.as_ref() {
            return addr.clone();
        }
        let addr = self.spec().repo_server.ipaddr;
        if addr.is_empty() {
            return DEFAULT_REPO_SERVER_IPADDR.to_string();
        }
        addr
    }

    fn repo_server_codebase(&self) -> String {
        let codebase = match self.overrides.repo_server_codebase.as_ref() {
            Some(codebase) => codebase.clone(),
            None => self.spec().repo_server.codebase,
        };
        codebase.trim_matches('/').to_string()
    }

    fn config_resync_interval(&self) -> Duration {
        let interval = self.spec().sidecar.config_resync_interval;
        if interval.is_empty() {
            return Duration::ZERO;
        }
        match interval.parse::<GoDuration>() {
            Ok(d) => d.to_std().unwrap_or_else(|| {
                tracing::warn!(%interval, "Negative config resync interval");
                Duration::ZERO
            }),
            Err(error) => {
                tracing::warn!(%error, %interval, "Invalid config resync interval");
                Duration::ZERO
            }
        }
    }

    fn mesh_config_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.spec())?)
    }

    fn global_plugin_chains(&self) -> BTreeMap<String, Vec<Plugin>> {
        self.spec()
            .plugin_chains
            .by_mount_point()
            .into_iter()
            .map(|(mount_point, chain)| {
                let plugins = chain
                    .iter()
                    .filter(|p| !p.disable)
                    .map(|p| Plugin {
                        name: p.plugin.clone(),
                        priority: p.priority,
                        build_in: true,
                    })
                    .collect();
                (mount_point.to_string(), plugins)
            })
            .collect()
    }
}

// === impl EnvOverrides ===

impl EnvOverrides {
    /// Reads overrides from the process environment. Empty values are
    /// ignored.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            repo_server_ipaddr: var(REPO_SERVER_IPADDR_ENV),
            repo_server_codebase: var(REPO_SERVER_CODEBASE_ENV),
        }
    }
}
