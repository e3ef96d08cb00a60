fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the bundled protoc so builds do not depend on a system install
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/gatehouse.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/");
    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}
