//! Cross-crate tests: IR through the interpreter backend, the
//! software MMU, and RISC-V programs run by the execution engine.

#[cfg(test)]
mod common;

#[cfg(test)]
mod backend;
#[cfg(test)]
mod exec;
#[cfg(test)]
mod frontend;
#[cfg(test)]
mod ir;
#[cfg(test)]
mod mmu;
