#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod duration;
pub mod mesh_config;
pub mod multicluster;

pub use self::{
    duration::GoDuration,
    mesh_config::{MeshConfig, MeshConfigSpec},
    multicluster::{GlobalTrafficPolicy, ServiceImport},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Namespace, Pod, PodSpec,
            Service, ServiceAccount, ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};
pub use kube::{Resource, ResourceExt};
