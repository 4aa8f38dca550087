//! Build script for mnemosyne-client.
//!
//! Compiles `proto/session.proto` into the client and server stubs behind
//! `mnemosyne_client::proto`. `protoc` comes from `protoc-bin-vendored`, so
//! no system installation is needed.
#![allow(clippy::disallowed_methods)]
#![allow(clippy::disallowed_macros)]

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        // Client used by GrpcTransport
        .build_client(true)
        // Server stubs for services and in-process tests
        .build_server(true)
        .compile_protos_with_config(config, &["proto/session.proto"], &["proto/"])?;

    println!("cargo:rerun-if-changed=proto/");

    Ok(())
}
