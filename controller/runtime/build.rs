// Generates the `proxy.Config` service that proxies poll for their
// configuration. The messages are declared by hand in `src/proto.rs`, so no
// protoc is needed.
fn main() {
    let poll = tonic_build::manual::Method::builder()
        .name("poll")
        .route_name("Poll")
        .input_type("crate::proto::ConfigRequest")
        .output_type("crate::proto::ConfigResponse")
        .codec_path("tonic::codec::ProstCodec")
        .build();
    let service = tonic_build::manual::Service::builder()
        .name("Config")
        .package("proxy")
        .method(poll)
        .build();
    tonic_build::manual::Builder::new().compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}
