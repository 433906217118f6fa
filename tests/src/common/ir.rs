//! Run hand-built IR on the interpreter backend, outside any engine.

#![allow(dead_code)]

use xlat_backend::{translate, CodeBuffer, CodeWriter, HostCodeGen, TbReturn, TciCodeGen};
use xlat_core::{AtomicOp, Context, GuestException, MemOpIdx, TbRuntime, MAX_CALL_ARGS};

/// Words of scratch env handed to the generated code.
pub const ENV_WORDS: usize = 16;

/// Byte offset of env word `i`.
pub const fn slot(i: usize) -> i64 {
    (i * 8) as i64
}

/// Runtime for blocks that never touch guest memory or helpers.
pub struct NoRuntime;

impl TbRuntime for NoRuntime {
    fn load(&mut self, addr: u64, _oi: MemOpIdx) -> Result<u64, GuestException> {
        panic!("unexpected guest load at {addr:#x}")
    }

    fn store(&mut self, addr: u64, _val: u64, _oi: MemOpIdx) -> Result<(), GuestException> {
        panic!("unexpected guest store at {addr:#x}")
    }

    fn atomic_rmw(
        &mut self,
        _op: AtomicOp,
        addr: u64,
        _val: u64,
        _oi: MemOpIdx,
    ) -> Result<u64, GuestException> {
        panic!("unexpected atomic at {addr:#x}")
    }

    fn atomic_cmpxchg(
        &mut self,
        addr: u64,
        _cmp: u64,
        _new: u64,
        _oi: MemOpIdx,
    ) -> Result<u64, GuestException> {
        panic!("unexpected cmpxchg at {addr:#x}")
    }

    fn call_helper(
        &mut self,
        idx: u32,
        _env: *mut u8,
        _args: &[u64; MAX_CALL_ARGS],
    ) -> Result<u64, GuestException> {
        panic!("unexpected helper call {idx}")
    }
}

/// A context prepared for the interpreter backend.
pub fn ir_context() -> Context {
    let mut ctx = Context::new();
    TciCodeGen::new().init_context(&mut ctx);
    ctx
}

/// Translate `ctx` and run it once over `env`.
pub fn run_ir(ctx: &mut Context, env: &mut [u64; ENV_WORDS]) -> TbReturn {
    let backend = TciCodeGen::new();
    let code = CodeBuffer::new(64 * 1024, 1).unwrap();
    let (start, limit) = code.region_bounds(0);
    let mut w = CodeWriter::new(&code, start, limit);
    let tc = translate(ctx, &backend, &mut w).unwrap();
    // SAFETY: the block was just generated into `code` and `env`
    // outlives the call.
    unsafe { backend.tb_exec(&code, tc.offset, env.as_mut_ptr() as *mut u8, &mut NoRuntime) }
}
