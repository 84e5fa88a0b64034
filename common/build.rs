// Compile the proto files via `prost`, generating the shared datatypes and
// the scheduling service stubs for use with `tonic`. Every crate in the
// workspace pulls the generated types from here so that manager, worker and
// ctl agree on one set of message types.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    tonic_build::configure().compile(
        &["../protos/datatypes.proto", "../protos/scheduler.proto"],
        &["../protos"],
    )?;
    Ok(())
}
