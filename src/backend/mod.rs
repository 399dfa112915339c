//! The textual assembly backend. The core hands this module a finished
//! `SsaModule`; everything here is serialization.

use std::{fs, io, path::Path};

use crate::middle::ssa::SsaModule;

pub mod x86_64;

#[derive(Debug, Clone, Copy)]
pub struct CodegenOptions {
    pub verbose: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self { verbose: false }
    }
}

pub fn codegen_module(
    module: &SsaModule,
    output_path: &Path,
    options: &CodegenOptions,
) -> io::Result<()> {
    let assembly = x86_64::emit_module(module);

    if options.verbose {
        log::info!(
            "emitting {} bytes of assembly to {}",
            assembly.len(),
            output_path.display()
        );
    }

    fs::write(output_path, assembly)
}
