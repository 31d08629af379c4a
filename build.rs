//! Build script for `sanitizer`.
//!
//! Embeds build metadata (timestamp, target triple, rustc version) for
//! `sanitizer version`.

use vergen_gix::{BuildBuilder, CargoBuilder, Emitter, RustcBuilder};

fn main() {
    let mut emitter = Emitter::default();

    if let Ok(build) = BuildBuilder::default().build_timestamp(true).build() {
        if let Err(e) = emitter.add_instructions(&build) {
            eprintln!("cargo:warning=vergen build instructions failed: {e}");
        }
    }

    if let Ok(cargo) = CargoBuilder::default().target_triple(true).build() {
        if let Err(e) = emitter.add_instructions(&cargo) {
            eprintln!("cargo:warning=vergen cargo instructions failed: {e}");
        }
    }

    if let Ok(rustc) = RustcBuilder::default().semver(true).build() {
        if let Err(e) = emitter.add_instructions(&rustc) {
            eprintln!("cargo:warning=vergen rustc instructions failed: {e}");
        }
    }

    if let Err(e) = emitter.emit() {
        eprintln!("cargo:warning=vergen emit failed: {e}");
    }
}
