fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/flagstick.proto");

    // Only generate protobuf bindings when the gRPC transport feature is enabled.
    // Store-only builds stay lean and never need `protoc`.
    if std::env::var_os("CARGO_FEATURE_TRANSPORT_GRPC").is_none() {
        return Ok(());
    }

    // Prefer a vendored protoc to avoid requiring a system installation.
    // This keeps `--features transport-grpc` builds reproducible.
    let protoc_path = protoc_bin_vendored::protoc_bin_path()
        .map_err(|e| format!("failed to locate vendored protoc: {e}"))?;
    std::env::set_var("PROTOC", protoc_path);

    // The resolver proto imports well-known types; point protoc at the
    // vendored copies so no system include directory is needed.
    let include_path = protoc_bin_vendored::include_path()
        .map_err(|e| format!("failed to locate vendored protoc includes: {e}"))?;
    std::env::set_var("PROTOC_INCLUDE", include_path);

    // Only build proto if the proto file exists (allows consumers to omit proto/).
    if std::path::Path::new("proto/flagstick.proto").exists() {
        tonic_build::configure()
            .build_server(false)
            .build_client(true)
            .compile_protos(&["proto/flagstick.proto"], &["proto/"])?;
    }
    Ok(())
}
