use crate::context::Context;
use crate::op::Op;
use crate::opcode::Opcode;
use crate::temp::TempIdx;
use crate::types::{Cond, MemOpIdx, Type};

/// Number of helper argument slots in a `call` op.
pub const MAX_CALL_ARGS: usize = 6;

/// `bswap*` flag: input is already zero-extended above the swapped width.
pub const BSWAP_IZ: u32 = 1;
/// `bswap*` flag: zero-extend the result.
pub const BSWAP_OZ: u32 = 2;
/// `bswap*` flag: sign-extend the result.
pub const BSWAP_OS: u32 = 4;

/// Read-modify-write operation of an `atomic_rmw` op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AtomicOp {
    Xchg = 0,
    Add,
    And,
    Or,
    Xor,
    Min,
    Max,
    MinU,
    MaxU,
}

impl AtomicOp {
    pub const fn from_u32(v: u32) -> Option<AtomicOp> {
        Some(match v {
            0 => AtomicOp::Xchg,
            1 => AtomicOp::Add,
            2 => AtomicOp::And,
            3 => AtomicOp::Or,
            4 => AtomicOp::Xor,
            5 => AtomicOp::Min,
            6 => AtomicOp::Max,
            7 => AtomicOp::MinU,
            8 => AtomicOp::MaxU,
            _ => return None,
        })
    }

    /// New memory value given the old value and the operand, both
    /// already extended to 64 bits according to the access `MemOp`.
    pub fn apply(self, old: u64, val: u64) -> u64 {
        match self {
            AtomicOp::Xchg => val,
            AtomicOp::Add => old.wrapping_add(val),
            AtomicOp::And => old & val,
            AtomicOp::Or => old | val,
            AtomicOp::Xor => old ^ val,
            AtomicOp::Min => (old as i64).min(val as i64) as u64,
            AtomicOp::Max => (old as i64).max(val as i64) as u64,
            AtomicOp::MinU => old.min(val),
            AtomicOp::MaxU => old.max(val),
        }
    }
}

/// Constant arguments ride in the operand array as raw indices.
fn carg(val: u32) -> TempIdx {
    TempIdx(val)
}

/// Emitters of shape `d = op(a, b)`.
macro_rules! binary_ops {
    ($($(#[$doc:meta])* $name:ident => $opc:ident;)*) => {
        impl Context {
            $(
                $(#[$doc])*
                pub fn $name(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
                    self.emit(Opcode::$opc, ty, &[d, a, b]);
                    d
                }
            )*
        }
    };
}

/// Emitters of shape `d = op(s)`.
macro_rules! unary_ops {
    ($($name:ident => $opc:ident;)*) => {
        impl Context {
            $(
                pub fn $name(&mut self, ty: Type, d: TempIdx, s: TempIdx) -> TempIdx {
                    self.emit(Opcode::$opc, ty, &[d, s]);
                    d
                }
            )*
        }
    };
}

/// Width conversions; the result type is fixed by the opcode.
macro_rules! conversions {
    ($($(#[$doc:meta])* $name:ident => $opc:ident, $ty:ident;)*) => {
        impl Context {
            $(
                $(#[$doc])*
                pub fn $name(&mut self, d: TempIdx, s: TempIdx) -> TempIdx {
                    self.emit(Opcode::$opc, Type::$ty, &[d, s]);
                    d
                }
            )*
        }
    };
}

/// Host memory accesses relative to a base temp, normally env.
macro_rules! host_mem_ops {
    (load: $($ld:ident => $lopc:ident),*; store: $($st:ident => $sopc:ident),*;) => {
        impl Context {
            $(
                pub fn $ld(&mut self, ty: Type, dst: TempIdx, base: TempIdx, offset: i64) -> TempIdx {
                    self.emit(Opcode::$lopc, ty, &[dst, base, host_offset(offset)]);
                    dst
                }
            )*
            $(
                pub fn $st(&mut self, ty: Type, src: TempIdx, base: TempIdx, offset: i64) {
                    self.emit(Opcode::$sopc, ty, &[src, base, host_offset(offset)]);
                }
            )*
        }
    };
}

fn host_offset(offset: i64) -> TempIdx {
    debug_assert!(i32::try_from(offset).is_ok(), "env offset out of range");
    carg(offset as u32)
}

binary_ops! {
    gen_add => Add;
    gen_sub => Sub;
    gen_mul => Mul;
    gen_and => And;
    gen_or => Or;
    gen_xor => Xor;
    gen_shl => Shl;
    gen_shr => Shr;
    gen_sar => Sar;
    gen_rotl => RotL;
    gen_rotr => RotR;
    gen_andc => AndC;
    gen_orc => OrC;
    gen_eqv => Eqv;
    gen_nand => Nand;
    gen_nor => Nor;
    /// Signed division. Division by zero yields all ones and
    /// `MIN / -1` yields `MIN`.
    gen_divs => DivS;
    /// Unsigned division. Division by zero yields all ones.
    gen_divu => DivU;
    /// Signed remainder. `x % 0` yields `x`, `MIN % -1` yields 0.
    gen_rems => RemS;
    /// Unsigned remainder. `x % 0` yields `x`.
    gen_remu => RemU;
    /// High half of the signed double-width product.
    gen_mulsh => MulSH;
    /// High half of the unsigned double-width product.
    gen_muluh => MulUH;
    /// `d = a == 0 ? b : clz(a)`
    gen_clz => Clz;
    /// `d = a == 0 ? b : ctz(a)`
    gen_ctz => Ctz;
}

unary_ops! {
    gen_neg => Neg;
    gen_not => Not;
    gen_mov => Mov;
    gen_ctpop => CtPop;
}

conversions! {
    /// Sign-extend the low word.
    gen_ext_i32_i64 => ExtI32I64, I64;
    /// Zero-extend the low word.
    gen_ext_u32_i64 => ExtUI32I64, I64;
    gen_extrl_i64_i32 => ExtrlI64I32, I32;
    gen_extrh_i64_i32 => ExtrhI64I32, I32;
}

host_mem_ops! {
    load: gen_ld => Ld, gen_ld8u => Ld8U, gen_ld8s => Ld8S, gen_ld16u => Ld16U,
        gen_ld16s => Ld16S, gen_ld32u => Ld32U, gen_ld32s => Ld32S;
    store: gen_st => St, gen_st8 => St8, gen_st16 => St16, gen_st32 => St32;
}

impl Context {
    fn emit(&mut self, opc: Opcode, ty: Type, args: &[TempIdx]) {
        let idx = self.next_op_idx();
        self.emit_op(Op::with_args(idx, opc, ty, args));
    }

    /// Load a constant into `d` through the shared constant pool.
    pub fn gen_movi(&mut self, ty: Type, d: TempIdx, val: u64) -> TempIdx {
        let c = self.new_const(ty, val);
        self.gen_mov(ty, d, c)
    }

    fn bitfield(&mut self, opc: Opcode, ty: Type, args: &[TempIdx], ofs: u32, len: u32) {
        debug_assert!(len > 0 && ofs + len <= ty.size_bits(), "bad field {ofs}+{len}");
        let mut all = args.to_vec();
        all.extend([carg(ofs), carg(len)]);
        self.emit(opc, ty, &all);
    }

    pub fn gen_extract(&mut self, ty: Type, d: TempIdx, src: TempIdx, ofs: u32, len: u32) -> TempIdx {
        self.bitfield(Opcode::Extract, ty, &[d, src], ofs, len);
        d
    }

    pub fn gen_sextract(&mut self, ty: Type, d: TempIdx, src: TempIdx, ofs: u32, len: u32) -> TempIdx {
        self.bitfield(Opcode::SExtract, ty, &[d, src], ofs, len);
        d
    }

    /// `d = a` with bits `[ofs, ofs + len)` taken from the low bits of `b`.
    pub fn gen_deposit(
        &mut self,
        ty: Type,
        d: TempIdx,
        a: TempIdx,
        b: TempIdx,
        ofs: u32,
        len: u32,
    ) -> TempIdx {
        self.bitfield(Opcode::Deposit, ty, &[d, a, b], ofs, len);
        d
    }

    pub fn gen_bswap16(&mut self, ty: Type, d: TempIdx, src: TempIdx, flags: u32) -> TempIdx {
        self.emit(Opcode::Bswap16, ty, &[d, src, carg(flags)]);
        d
    }

    pub fn gen_bswap32(&mut self, ty: Type, d: TempIdx, src: TempIdx, flags: u32) -> TempIdx {
        self.emit(Opcode::Bswap32, ty, &[d, src, carg(flags)]);
        d
    }

    pub fn gen_bswap64(&mut self, ty: Type, d: TempIdx, src: TempIdx, flags: u32) -> TempIdx {
        self.emit(Opcode::Bswap64, ty, &[d, src, carg(flags)]);
        d
    }

    pub fn gen_setcond(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx, cond: Cond) -> TempIdx {
        self.emit(Opcode::SetCond, ty, &[d, a, b, carg(cond as u32)]);
        d
    }

    /// All ones when the condition holds, zero otherwise.
    pub fn gen_negsetcond(&mut self, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx, cond: Cond) -> TempIdx {
        self.emit(Opcode::NegSetCond, ty, &[d, a, b, carg(cond as u32)]);
        d
    }

    /// `d = cond(c1, c2) ? v1 : v2`
    #[allow(clippy::too_many_arguments)]
    pub fn gen_movcond(
        &mut self,
        ty: Type,
        d: TempIdx,
        c1: TempIdx,
        c2: TempIdx,
        v1: TempIdx,
        v2: TempIdx,
        cond: Cond,
    ) -> TempIdx {
        self.emit(Opcode::MovCond, ty, &[d, c1, c2, v1, v2, carg(cond as u32)]);
        d
    }

    pub fn gen_br(&mut self, label_id: u32) {
        self.emit(Opcode::Br, Type::I64, &[carg(label_id)]);
    }

    pub fn gen_brcond(&mut self, ty: Type, a: TempIdx, b: TempIdx, cond: Cond, label_id: u32) {
        self.emit(Opcode::BrCond, ty, &[a, b, carg(cond as u32), carg(label_id)]);
    }

    pub fn gen_set_label(&mut self, label_id: u32) {
        self.emit(Opcode::SetLabel, Type::I64, &[carg(label_id)]);
    }

    /// Patchable direct jump through exit slot `n` (0 or 1). Must be
    /// followed by `exit_tb` for the unchained path.
    pub fn gen_goto_tb(&mut self, n: u32) {
        assert!(n < 2, "goto_tb slot out of range");
        self.emit(Opcode::GotoTb, Type::I64, &[carg(n)]);
    }

    /// Return to the execution loop with exit code `val`.
    pub fn gen_exit_tb(&mut self, val: u32) {
        self.emit(Opcode::ExitTb, Type::I64, &[carg(val)]);
    }

    /// Raise a guest exception at the current instruction.
    pub fn gen_trap(&mut self, cause: u32, tval: u64) {
        let (lo, hi) = split_u64(tval);
        self.emit(Opcode::Trap, Type::I64, &[carg(cause), lo, hi]);
    }

    pub fn gen_insn_start(&mut self, pc: u64) {
        let (lo, hi) = split_u64(pc);
        self.emit(Opcode::InsnStart, Type::I64, &[lo, hi]);
    }

    pub fn gen_mb(&mut self, bar_type: u32) {
        self.emit(Opcode::Mb, Type::I64, &[carg(bar_type)]);
    }

    /// `dst = helper(args..)` where `helper` indexes the guest helper
    /// table and `flags` are its `CALL_*` flags. Unused argument slots
    /// are filled with zero.
    pub fn gen_call(&mut self, dst: TempIdx, helper: u32, flags: u32, args: &[TempIdx]) -> TempIdx {
        assert!(args.len() <= MAX_CALL_ARGS, "too many helper arguments");
        let zero = self.new_const(Type::I64, 0);
        let mut all = Vec::with_capacity(MAX_CALL_ARGS + 3);
        all.push(dst);
        all.extend_from_slice(args);
        all.resize(1 + MAX_CALL_ARGS, zero);
        all.extend([carg(helper), carg(flags)]);
        self.emit(Opcode::Call, Type::I64, &all);
        dst
    }

    pub fn gen_discard(&mut self, ty: Type, t: TempIdx) {
        self.emit(Opcode::Discard, ty, &[t]);
    }

    /// Guest load through the soft MMU.
    pub fn gen_qemu_ld(&mut self, ty: Type, dst: TempIdx, addr: TempIdx, oi: MemOpIdx) -> TempIdx {
        self.emit(Opcode::QemuLd, ty, &[dst, addr, carg(oi.raw())]);
        dst
    }

    pub fn gen_qemu_st(&mut self, ty: Type, val: TempIdx, addr: TempIdx, oi: MemOpIdx) {
        self.emit(Opcode::QemuSt, ty, &[val, addr, carg(oi.raw())]);
    }

    /// `d` gets the old value at `addr`; memory becomes `op(old, val)`.
    pub fn gen_atomic_rmw(
        &mut self,
        ty: Type,
        d: TempIdx,
        addr: TempIdx,
        val: TempIdx,
        oi: MemOpIdx,
        op: AtomicOp,
    ) -> TempIdx {
        self.emit(Opcode::AtomicRmw, ty, &[d, addr, val, carg(oi.raw()), carg(op as u32)]);
        d
    }

    /// `d` gets the old value at `addr`; memory becomes `new` when the
    /// old value equals `cmp`.
    pub fn gen_atomic_cmpxchg(
        &mut self,
        ty: Type,
        d: TempIdx,
        addr: TempIdx,
        cmp: TempIdx,
        new: TempIdx,
        oi: MemOpIdx,
    ) -> TempIdx {
        self.emit(Opcode::AtomicCmpxchg, ty, &[d, addr, cmp, new, carg(oi.raw())]);
        d
    }
}

fn split_u64(v: u64) -> (TempIdx, TempIdx) {
    (carg(v as u32), carg((v >> 32) as u32))
}
