fn main() -> Result<(), Box<dyn std::error::Error>> {
    built::write_built_file()?;

    // Fall back to the vendored protoc so builds do not need a system install.
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| format!("{e:?}"))?;
        std::env::set_var("PROTOC", protoc);
    }

    println!("cargo:rerun-if-changed=proto/bottrade/auth/v1/auth.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/bottrade/auth/v1/auth.proto"], &["proto"])?;

    Ok(())
}
