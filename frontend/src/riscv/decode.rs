//! RV64IMA + Zicsr + Zifencei instruction decoder, generated at build
//! time from `decode/riscv64.decode`.
//!
//! `decode` dispatches an instruction word to the matching `trans_*`
//! method of a [`Decode`] implementation. A `false` return (unknown
//! encoding, or a `trans_*` method rejecting its operands) means
//! "illegal instruction".

include!(concat!(env!("OUT_DIR"), "/riscv64_decode.rs"));
