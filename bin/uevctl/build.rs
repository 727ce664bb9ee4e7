//! ---
//! uev_section: "05-networking-external-interfaces"
//! uev_subsection: "binary"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Build script emitting version metadata for uevctl."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder().all_build().all_cargo().emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
