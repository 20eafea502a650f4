#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod announcements;
mod catalog;
mod configurator;
mod endpoint;
mod health;
mod identity;
pub mod messaging;
pub mod policy;
mod provider;
pub mod service;
pub mod workerpool;

pub use self::{
    catalog::MeshCataloger,
    configurator::{Configurator, Plugin, PLUGIN_MOUNT_POINTS},
    endpoint::{Endpoint, InvalidLbType, LbType},
    health::Probes,
    identity::ServiceIdentity,
    provider::{Provider, FEDERATED_PROVIDER, KUBERNETES_PROVIDER},
    service::{ClusterName, MeshService, WeightedCluster},
};

/// The DNS suffix every in-cluster service name resolves under.
pub const CLUSTER_DOMAIN: &str = "cluster.local";

/// Weight assigned to endpoints that should receive their full share of traffic.
pub const CLUSTER_WEIGHT_ACCEPT_ALL: u32 = 100;

/// Weight assigned to failover endpoints while local endpoints are available.
pub const CLUSTER_WEIGHT_FAIL_OVER: u32 = 0;
