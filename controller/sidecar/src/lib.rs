//! Sidecar configuration: compiles the mesh catalog into pipy configuration
//! documents and publishes them to the configuration store.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod compile;
pub mod conf;
mod hash;
mod job;
mod metrics;
mod proxy;
mod publish;
mod server;
pub mod store;
#[cfg(test)]
mod test_util;

pub use self::{
    compile::{compile, Compiled},
    conf::PipyConf,
    hash::fnv1_64,
    metrics::SidecarMetrics,
    proxy::{Proxy, ProxyRegistry, ProxyState},
    publish::{Outcome, Publisher},
    server::Server,
    store::{ConfigStore, MemoryStore},
};
