//! Runtime helpers called from generated code.

use xlat_core::{GuestException, HelperInfo, MAX_CALL_ARGS, CALL_NO_WG};

use super::cpu::RiscvEnv;
use super::csr::{csr_rmw, CsrAccess};

pub const HELPER_CSRRW: u32 = 0;
pub const HELPER_MRET: u32 = 1;
pub const HELPER_RAISE: u32 = 2;

/// Helper table, indexed by the `HELPER_*` constants.
pub static HELPERS: [HelperInfo; 3] = [
    HelperInfo {
        name: "csrrw",
        func: helper_csrrw,
        flags: CALL_NO_WG,
    },
    HelperInfo {
        name: "mret",
        func: helper_mret,
        flags: CALL_NO_WG,
    },
    HelperInfo {
        name: "raise_exception",
        func: helper_raise,
        flags: CALL_NO_WG,
    },
];

/// `(csr, src, access, insn) -> old value`
unsafe fn helper_csrrw(env: *mut u8, args: &[u64; MAX_CALL_ARGS]) -> Result<u64, GuestException> {
    let env = &mut *(env as *mut RiscvEnv);
    csr_rmw(
        env,
        args[0] as u16,
        args[1],
        CsrAccess::from_raw(args[2]),
        args[3] as u32,
    )
}

/// `() -> resume pc`
unsafe fn helper_mret(env: *mut u8, _args: &[u64; MAX_CALL_ARGS]) -> Result<u64, GuestException> {
    let env = &mut *(env as *mut RiscvEnv);
    Ok(env.mret())
}

/// `(cause, tval) -> !`
unsafe fn helper_raise(_env: *mut u8, args: &[u64; MAX_CALL_ARGS]) -> Result<u64, GuestException> {
    Err(GuestException::Trap {
        cause: args[0] as u32,
        tval: args[1],
    })
}
