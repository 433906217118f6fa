//! Portable threaded-code host.
//!
//! Instead of native machine code the backend emits a compact
//! register-machine encoding (see [`insn`]) that [`interp`] executes.
//! It has a fixed register file, three-address instructions and
//! patchable direct jumps, so the allocator and TB chaining work
//! exactly as they would for a native target.

mod codegen;
pub mod constraints;
pub mod insn;
pub mod interp;
pub mod regs;

/// Threaded-code host code generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TciCodeGen;

impl TciCodeGen {
    pub fn new() -> Self {
        Self
    }
}
