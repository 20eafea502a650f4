#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod configurator;
mod federated;
mod kubernetes;


pub use self::{
    cache::{Cache, CacheMetrics, Cached, SharedCache, Store},
    configurator::{
        EnvOverrides, MeshConfigurator, REPO_SERVER_CODEBASE_ENV, REPO_SERVER_IPADDR_ENV,
    },
    federated::FederatedProvider,
    kubernetes::KubeProvider,
};
