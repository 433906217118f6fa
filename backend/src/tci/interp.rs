//! Interpreter for threaded-code host instructions.
//!
//! Registers hold 64-bit values; 32-bit operations read the low half
//! of their inputs and zero-extend their result.

use std::sync::atomic::{fence, AtomicU32, Ordering};

use crate::code_buffer::CodeBuffer;
use crate::tci::insn::{unpack_field, unpack_regs, Insn, TciOp};
use crate::tci::regs::{CALL_RET_REG, FRAME_REG, FRAME_SIZE, NB_REGS, TCG_AREG0};
use crate::TbReturn;
use xlat_core::{
    AtomicOp, Cond, GuestException, MemOpIdx, TbRuntime, Type, BSWAP_OS, MAX_CALL_ARGS,
};

#[cfg(debug_assertions)]
use crate::tci::regs::{CALL_CLOBBER_REGS, CLOBBER_POISON};

fn ty_of(w64: bool) -> Type {
    if w64 {
        Type::I64
    } else {
        Type::I32
    }
}

fn sext32(v: u64) -> u64 {
    v as u32 as i32 as i64 as u64
}

/// Sign-interpret `v` at the operand width.
fn signed(v: u64, ty: Type) -> i64 {
    match ty {
        Type::I32 => v as u32 as i32 as i64,
        Type::I64 => v as i64,
    }
}

fn binary(op: TciOp, a: u64, b: u64, ty: Type) -> u64 {
    let mask = ty.mask();
    let bits = ty.size_bits();
    let (a, b) = (a & mask, b & mask);
    let (sa, sb) = (signed(a, ty), signed(b, ty));
    let min = match ty {
        Type::I32 => i32::MIN as i64,
        Type::I64 => i64::MIN,
    };
    let r = match op {
        TciOp::Add => a.wrapping_add(b),
        TciOp::Sub => a.wrapping_sub(b),
        TciOp::Mul => a.wrapping_mul(b),
        TciOp::And => a & b,
        TciOp::Or => a | b,
        TciOp::Xor => a ^ b,
        TciOp::AndC => a & !b,
        TciOp::OrC => a | !b,
        TciOp::Eqv => !(a ^ b),
        TciOp::Nand => !(a & b),
        TciOp::Nor => !(a | b),
        TciOp::Shl => a.wrapping_shl((b as u32) % bits),
        TciOp::Shr => a.wrapping_shr((b as u32) % bits),
        TciOp::Sar => (sa >> ((b as u32) % bits)) as u64,
        TciOp::RotL | TciOp::RotR => {
            let sh = (b as u32) % bits;
            match (ty, op == TciOp::RotL) {
                (Type::I32, true) => (a as u32).rotate_left(sh) as u64,
                (Type::I32, false) => (a as u32).rotate_right(sh) as u64,
                (Type::I64, true) => a.rotate_left(sh),
                (Type::I64, false) => a.rotate_right(sh),
            }
        }
        // Division never traps: x/0 is all ones, x%0 is x, and the
        // overflowing MIN/-1 yields MIN with remainder 0.
        TciOp::DivS => {
            if sb == 0 {
                mask
            } else if sa == min && sb == -1 {
                sa as u64
            } else {
                (sa / sb) as u64
            }
        }
        TciOp::DivU => {
            if b == 0 {
                mask
            } else {
                a / b
            }
        }
        TciOp::RemS => {
            if sb == 0 {
                a
            } else if sa == min && sb == -1 {
                0
            } else {
                (sa % sb) as u64
            }
        }
        TciOp::RemU => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
        TciOp::MulSH => ((sa as i128 * sb as i128) >> bits) as u64,
        TciOp::MulUH => ((a as u128 * b as u128) >> bits) as u64,
        TciOp::Clz => {
            if a == 0 {
                b
            } else {
                (a.leading_zeros() - (64 - bits)) as u64
            }
        }
        TciOp::Ctz => {
            if a == 0 {
                b
            } else {
                a.trailing_zeros() as u64
            }
        }
        _ => unreachable!("{op:?} is not a binary op"),
    };
    r & mask
}

fn bswap(op: TciOp, a: u64, flags: u32, ty: Type) -> u64 {
    let os = flags & BSWAP_OS != 0;
    let r = match op {
        TciOp::Bswap16 => {
            let v = (a as u16).swap_bytes();
            if os {
                v as i16 as i64 as u64
            } else {
                v as u64
            }
        }
        TciOp::Bswap32 => {
            let v = (a as u32).swap_bytes();
            if os {
                v as i32 as i64 as u64
            } else {
                v as u64
            }
        }
        _ => a.swap_bytes(),
    };
    r & ty.mask()
}

fn extract(a: u64, ofs: u32, len: u32, signed: bool, ty: Type) -> u64 {
    if len == 0 {
        return 0;
    }
    let shifted = a >> ofs;
    let r = if signed {
        let sh = 64 - len;
        (((shifted << sh) as i64) >> sh) as u64
    } else if len >= 64 {
        shifted
    } else {
        shifted & ((1u64 << len) - 1)
    };
    r & ty.mask()
}

fn deposit(a: u64, b: u64, ofs: u32, len: u32, ty: Type) -> u64 {
    let field = if len >= 64 { u64::MAX } else { (1u64 << len) - 1 };
    let mask = field << ofs;
    ((a & !mask) | ((b << ofs) & mask)) & ty.mask()
}

fn cond_of(insn: Insn) -> Cond {
    let aux = insn.get_aux();
    match Cond::from_u32(aux) {
        Some(c) => c,
        None => panic!("invalid condition {aux} in host insn {:#010x}", insn.0),
    }
}

/// Host memory access at `base + sext(ofs)`.
///
/// # Safety
///
/// The address must be valid for the access; generated code only
/// touches the env and the interpreter frame.
unsafe fn host_load(op: TciOp, base: u64, ofs: u32) -> u64 {
    let addr = base.wrapping_add(ofs as i32 as i64 as u64) as usize;
    let p = addr as *const u8;
    match op {
        TciOp::Ld8U => p.read() as u64,
        TciOp::Ld8S => p.read() as i8 as i64 as u64,
        TciOp::Ld16U => (p as *const u16).read_unaligned() as u64,
        TciOp::Ld16S => (p as *const u16).read_unaligned() as i16 as i64 as u64,
        TciOp::Ld32U | TciOp::Ld32S => {
            // Aligned words may be written concurrently by other
            // threads (exit requests).
            let v = if addr % 4 == 0 {
                (*(p as *const AtomicU32)).load(Ordering::Relaxed)
            } else {
                (p as *const u32).read_unaligned()
            };
            if op == TciOp::Ld32S {
                v as i32 as i64 as u64
            } else {
                v as u64
            }
        }
        _ => (p as *const u64).read_unaligned(),
    }
}

unsafe fn host_store(op: TciOp, base: u64, ofs: u32, val: u64) {
    let addr = base.wrapping_add(ofs as i32 as i64 as u64) as usize;
    let p = addr as *mut u8;
    match op {
        TciOp::St8 => p.write(val as u8),
        TciOp::St16 => (p as *mut u16).write_unaligned(val as u16),
        TciOp::St32 => (p as *mut u32).write_unaligned(val as u32),
        _ => (p as *mut u64).write_unaligned(val),
    }
}

/// Execute host code starting at `start` until an `exit_tb` or a
/// guest exception.
///
/// # Safety
///
/// See [`crate::HostCodeGen::tb_exec`].
pub unsafe fn tci_exec(
    code: &CodeBuffer,
    start: usize,
    env: *mut u8,
    rt: &mut dyn TbRuntime,
) -> TbReturn {
    let mut regs = [0u64; NB_REGS];
    let mut frame = [0u64; FRAME_SIZE / 8];
    regs[TCG_AREG0 as usize] = env as u64;
    regs[FRAME_REG as usize] = frame.as_mut_ptr() as u64;

    let mut pc = start;
    macro_rules! word {
        () => {{
            let w = code.read_u32(pc);
            pc += 4;
            w
        }};
    }
    // Last operand of an op that then jumps or returns.
    macro_rules! peek {
        () => {
            code.read_u32(pc)
        };
    }
    macro_rules! raise {
        ($at:expr, $excp:expr) => {
            return TbReturn::Exception {
                host_off: $at,
                excp: $excp,
            }
        };
    }

    loop {
        let at = pc;
        let insn = Insn(word!());
        let op = match insn.op() {
            Some(op) => op,
            None => panic!("invalid host insn {:#010x} at {at:#x}", insn.0),
        };
        let ty = ty_of(insn.is64());
        let (r0, r1, r2) = (insn.get_r0(), insn.get_r1(), insn.get_r2());

        match op {
            TciOp::Nop => {}
            TciOp::MovR => regs[r0] = regs[r1] & ty.mask(),
            TciOp::MovI32 => {
                let v = word!() as u64;
                regs[r0] = if insn.is64() { sext32(v) } else { v };
            }
            TciOp::MovI64 => {
                let lo = word!() as u64;
                let hi = word!() as u64;
                regs[r0] = lo | (hi << 32);
            }
            TciOp::Ld8U
            | TciOp::Ld8S
            | TciOp::Ld16U
            | TciOp::Ld16S
            | TciOp::Ld32U
            | TciOp::Ld32S
            | TciOp::Ld64 => {
                let ofs = word!();
                regs[r0] = host_load(op, regs[r1], ofs) & ty.mask();
            }
            TciOp::St8 | TciOp::St16 | TciOp::St32 | TciOp::St64 => {
                let ofs = word!();
                host_store(op, regs[r1], ofs, regs[r0]);
            }
            TciOp::Add
            | TciOp::Sub
            | TciOp::Mul
            | TciOp::And
            | TciOp::Or
            | TciOp::Xor
            | TciOp::AndC
            | TciOp::OrC
            | TciOp::Eqv
            | TciOp::Nand
            | TciOp::Nor
            | TciOp::Shl
            | TciOp::Shr
            | TciOp::Sar
            | TciOp::RotL
            | TciOp::RotR
            | TciOp::DivS
            | TciOp::DivU
            | TciOp::RemS
            | TciOp::RemU
            | TciOp::MulSH
            | TciOp::MulUH
            | TciOp::Clz
            | TciOp::Ctz => {
                let b = if insn.has_imm() {
                    sext32(word!() as u64)
                } else {
                    regs[r2]
                };
                regs[r0] = binary(op, regs[r1], b, ty);
            }
            TciOp::Neg => regs[r0] = regs[r1].wrapping_neg() & ty.mask(),
            TciOp::Not => regs[r0] = !regs[r1] & ty.mask(),
            TciOp::CtPop => regs[r0] = (regs[r1] & ty.mask()).count_ones() as u64,
            TciOp::Bswap16 | TciOp::Bswap32 | TciOp::Bswap64 => {
                regs[r0] = bswap(op, regs[r1], insn.get_aux(), ty);
            }
            TciOp::ExtS32 => regs[r0] = sext32(regs[r1]),
            TciOp::ExtU32 => regs[r0] = regs[r1] as u32 as u64,
            TciOp::ExtrH => regs[r0] = regs[r1] >> 32,
            TciOp::Extract | TciOp::SExtract => {
                let (ofs, len) = unpack_field(word!());
                let a = regs[r1] & ty.mask();
                regs[r0] = extract(a, ofs, len, op == TciOp::SExtract, ty);
            }
            TciOp::Deposit => {
                let (ofs, len) = unpack_field(word!());
                regs[r0] = deposit(regs[r1], regs[r2], ofs, len, ty);
            }
            TciOp::SetCond | TciOp::NegSetCond => {
                let b = if insn.has_imm() {
                    sext32(word!() as u64)
                } else {
                    regs[r2]
                };
                let t = cond_of(insn).eval(ty, regs[r1], b) as u64;
                regs[r0] = if op == TciOp::NegSetCond {
                    t.wrapping_neg() & ty.mask()
                } else {
                    t
                };
            }
            TciOp::MovCond => {
                let (ra, rb) = unpack_regs(word!());
                let t = cond_of(insn).eval(ty, regs[r1], regs[r2]);
                regs[r0] = if t { regs[ra] } else { regs[rb] };
            }
            TciOp::Br => pc = peek!() as usize,
            TciOp::BrCond => {
                let b = if insn.has_imm() {
                    sext32(word!() as u64)
                } else {
                    regs[r1]
                };
                let target = word!() as usize;
                if cond_of(insn).eval(ty, regs[r0], b) {
                    pc = target;
                }
            }
            TciOp::GotoTb => pc = code.load_u32_atomic(pc) as usize,
            TciOp::ExitTb => {
                let lo = word!() as u64;
                let hi = peek!() as u64;
                return TbReturn::Exit(lo | (hi << 32));
            }
            TciOp::Trap => {
                let cause = word!();
                let lo = word!() as u64;
                let hi = peek!() as u64;
                raise!(
                    at,
                    GuestException::Trap {
                        cause,
                        tval: lo | (hi << 32),
                    }
                );
            }
            TciOp::Mb => fence(Ordering::SeqCst),
            TciOp::QemuLd => {
                let oi = MemOpIdx::from_raw(word!());
                match rt.load(regs[r1], oi) {
                    Ok(v) => regs[r0] = v & ty.mask(),
                    Err(e) => raise!(at, e),
                }
            }
            TciOp::QemuSt => {
                let oi = MemOpIdx::from_raw(word!());
                if let Err(e) = rt.store(regs[r1], regs[r0], oi) {
                    raise!(at, e);
                }
            }
            TciOp::AtomicRmw => {
                let oi = MemOpIdx::from_raw(word!());
                let aop = match AtomicOp::from_u32(insn.get_aux()) {
                    Some(a) => a,
                    None => panic!("invalid atomic op {} at {at:#x}", insn.get_aux()),
                };
                match rt.atomic_rmw(aop, regs[r1], regs[r2], oi) {
                    Ok(v) => regs[r0] = v & ty.mask(),
                    Err(e) => raise!(at, e),
                }
            }
            TciOp::AtomicCmpxchg => {
                let (rn, _) = unpack_regs(word!());
                let oi = MemOpIdx::from_raw(word!());
                match rt.atomic_cmpxchg(regs[r1], regs[r2], regs[rn], oi) {
                    Ok(v) => regs[r0] = v & ty.mask(),
                    Err(e) => raise!(at, e),
                }
            }
            TciOp::Call => {
                let idx = word!();
                let mut args = [0u64; MAX_CALL_ARGS];
                args.copy_from_slice(&regs[..MAX_CALL_ARGS]);
                match rt.call_helper(idx, env, &args) {
                    Ok(v) => {
                        #[cfg(debug_assertions)]
                        for r in CALL_CLOBBER_REGS.iter() {
                            regs[r as usize] = CLOBBER_POISON;
                        }
                        regs[CALL_RET_REG as usize] = v;
                    }
                    Err(e) => raise!(at, e),
                }
            }
        }
    }
}
