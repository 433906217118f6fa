//! Machine-mode CSRs.

use xlat_core::GuestException;

use super::cpu::{RiscvEnv, EXCP_ILLEGAL_INSN, MIP_EXTERNAL_MASK};

pub const CSR_MSTATUS: u16 = 0x300;
pub const CSR_MISA: u16 = 0x301;
pub const CSR_MIE: u16 = 0x304;
pub const CSR_MTVEC: u16 = 0x305;
pub const CSR_MSCRATCH: u16 = 0x340;
pub const CSR_MEPC: u16 = 0x341;
pub const CSR_MCAUSE: u16 = 0x342;
pub const CSR_MTVAL: u16 = 0x343;
pub const CSR_MIP: u16 = 0x344;
pub const CSR_MVENDORID: u16 = 0xf11;
pub const CSR_MARCHID: u16 = 0xf12;
pub const CSR_MIMPID: u16 = 0xf13;
pub const CSR_MHARTID: u16 = 0xf14;

pub const MSTATUS_MIE: u64 = 1 << 3;
pub const MSTATUS_MPIE: u64 = 1 << 7;
pub const MSTATUS_MPP_SHIFT: u32 = 11;
pub const MSTATUS_MPP: u64 = 3 << MSTATUS_MPP_SHIFT;
const MSTATUS_WRITABLE: u64 = MSTATUS_MIE | MSTATUS_MPIE | MSTATUS_MPP;

/// Read-modify-write performed by a CSR instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum CsrAccess {
    Write = 0,
    Set = 1,
    Clear = 2,
    /// `csrrs`/`csrrc` with `x0` or a zero immediate: no write.
    Read = 3,
}

impl CsrAccess {
    pub const fn from_raw(v: u64) -> CsrAccess {
        match v {
            0 => CsrAccess::Write,
            1 => CsrAccess::Set,
            2 => CsrAccess::Clear,
            _ => CsrAccess::Read,
        }
    }
}

fn illegal(insn: u32) -> GuestException {
    GuestException::Trap {
        cause: EXCP_ILLEGAL_INSN,
        tval: insn as u64,
    }
}

fn read(env: &RiscvEnv, csr: u16) -> Option<u64> {
    Some(match csr {
        CSR_MSTATUS => env.mstatus,
        CSR_MISA => env.misa,
        CSR_MIE => env.mie,
        CSR_MTVEC => env.mtvec,
        CSR_MSCRATCH => env.mscratch,
        CSR_MEPC => env.mepc,
        CSR_MCAUSE => env.mcause,
        CSR_MTVAL => env.mtval,
        CSR_MIP => env.mip,
        CSR_MHARTID => env.mhartid,
        CSR_MVENDORID | CSR_MARCHID | CSR_MIMPID => 0,
        _ => return None,
    })
}

/// Store `val` with each register's WARL rules applied. Writes to
/// read-only-by-implementation registers (`misa`, `mip`) are ignored.
fn write(env: &mut RiscvEnv, csr: u16, val: u64) {
    match csr {
        CSR_MSTATUS => {
            let mut v = val & MSTATUS_WRITABLE;
            // Only U (0) and M (3) exist.
            if v & MSTATUS_MPP != MSTATUS_MPP {
                v &= !MSTATUS_MPP;
            }
            env.mstatus = (env.mstatus & !MSTATUS_WRITABLE) | v;
        }
        CSR_MIE => env.mie = val & MIP_EXTERNAL_MASK,
        CSR_MTVEC => {
            env.mtvec = if val & 3 >= 2 { val & !3 } else { val };
        }
        CSR_MSCRATCH => env.mscratch = val,
        CSR_MEPC => env.mepc = val & !3,
        CSR_MCAUSE => env.mcause = val,
        CSR_MTVAL => env.mtval = val,
        _ => {}
    }
}

/// Execute one CSR instruction. Returns the old value for `rd`.
///
/// Raises illegal instruction for unknown CSRs, insufficient
/// privilege, or writes to read-only CSRs.
pub fn csr_rmw(
    env: &mut RiscvEnv,
    csr: u16,
    src: u64,
    access: CsrAccess,
    insn: u32,
) -> Result<u64, GuestException> {
    let min_priv = ((csr >> 8) & 3) as u64;
    if env.priv_level < min_priv {
        return Err(illegal(insn));
    }
    let read_only = (csr >> 10) & 3 == 3;
    if read_only && access != CsrAccess::Read {
        return Err(illegal(insn));
    }
    let old = read(env, csr).ok_or_else(|| illegal(insn))?;
    let new = match access {
        CsrAccess::Write => src,
        CsrAccess::Set => old | src,
        CsrAccess::Clear => old & !src,
        CsrAccess::Read => return Ok(old),
    };
    write(env, csr, new);
    Ok(old)
}
