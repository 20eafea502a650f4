#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use ecnet_controller_catalog as catalog;
pub use ecnet_controller_core as core;
pub use ecnet_controller_k8s_api as k8s;
pub use ecnet_controller_k8s_index as index;
pub use ecnet_controller_sidecar as sidecar;

mod args;
mod health;
mod http;
mod poll;
pub mod proto;

pub use self::args::Args;
