//! The `proxy.Config` gRPC API.
//!
//! ```proto
//! package proxy;
//!
//! service Config {
//!   rpc Poll(ConfigRequest) returns (ConfigResponse);
//! }
//!
//! message ConfigRequest { string addr = 1; }
//! message ConfigResponse { string json = 1; }
//! ```

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigRequest {
    /// The address of the polling client.
    #[prost(string, tag = "1")]
    pub addr: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigResponse {
    /// The latest published sidecar configuration, JSON-encoded.
    #[prost(string, tag = "1")]
    pub json: String,
}

include!(concat!(env!("OUT_DIR"), "/proxy.Config.rs"));
