use crate::types::Type;

/// IR opcodes. Ops flagged `INT` take their width from `Op::op_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -- Data movement --
    Mov = 0,
    SetCond,
    NegSetCond,
    MovCond,

    // -- Arithmetic --
    Add,
    Sub,
    Mul,
    Neg,
    DivS,
    DivU,
    RemS,
    RemU,

    // -- Widening multiply --
    MulSH, // signed multiply high
    MulUH, // unsigned multiply high

    // -- Logic --
    And,
    Or,
    Xor,
    Not,
    AndC, // a & ~b
    OrC,  // a | ~b
    Eqv,  // ~(a ^ b)
    Nand,
    Nor,

    // -- Shift/rotate --
    Shl,
    Shr,
    Sar,
    RotL,
    RotR,

    // -- Bit field --
    Extract,  // unsigned bit-field extract
    SExtract, // signed bit-field extract
    Deposit,  // bit-field deposit

    // -- Byte swap --
    Bswap16,
    Bswap32,
    Bswap64,

    // -- Bit counting --
    Clz,   // count leading zeros, second input if zero
    Ctz,   // count trailing zeros, second input if zero
    CtPop, // population count

    // -- Type conversion --
    ExtI32I64,   // sign-extend i32 -> i64
    ExtUI32I64,  // zero-extend i32 -> i64
    ExtrlI64I32, // truncate i64 -> i32 (low)
    ExtrhI64I32, // extract i64 -> i32 (high)

    // -- Host memory load/store (env fields) --
    Ld8U,
    Ld8S,
    Ld16U,
    Ld16S,
    Ld32U,
    Ld32S,
    Ld, // full-width load
    St8,
    St16,
    St32,
    St, // full-width store

    // -- Guest memory access (through the software MMU) --
    QemuLd,
    QemuSt,
    AtomicRmw,     // carg 1 is an `AtomicOp`
    AtomicCmpxchg, // out = old value

    // -- Control flow --
    Br,       // unconditional branch to label
    BrCond,   // conditional branch
    SetLabel, // define label position
    GotoTb,   // patchable direct jump to another TB
    ExitTb,   // return from TB to execution loop
    Mb,       // memory barrier

    // -- Call --
    Call,

    // -- Exceptions --
    Trap, // raise a guest exception (cause, tval_lo, tval_hi)

    // -- Misc --
    Nop,
    Discard,
    InsnStart, // marks guest instruction boundary

    // Sentinel, must be last
    Count,
}

/// Flags describing properties of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpFlags(u16);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// Exits the translation block.
    pub const BB_EXIT: OpFlags = OpFlags(0x01);
    /// Ends a basic block (next op starts a new BB).
    pub const BB_END: OpFlags = OpFlags(0x02);
    /// Clobbers caller-saved registers (like a function call).
    pub const CALL_CLOBBER: OpFlags = OpFlags(0x04);
    /// Has side effects: cannot be eliminated, and globals must be
    /// in memory when it runs since it may raise a guest exception.
    pub const SIDE_EFFECTS: OpFlags = OpFlags(0x08);
    /// Operands may be I32 or I64 (type-polymorphic).
    pub const INT: OpFlags = OpFlags(0x10);
    /// Handled by the register allocator, no constraint entry.
    pub const NOT_PRESENT: OpFlags = OpFlags(0x20);
    /// Conditional branch (may or may not be taken).
    pub const COND_BRANCH: OpFlags = OpFlags(0x80);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: OpFlags) -> Self {
        Self(self.0 | other.0)
    }
}

/// Static definition of an opcode: argument counts and flags.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub nb_oargs: u8,
    pub nb_iargs: u8,
    pub nb_cargs: u8,
    pub flags: OpFlags,
}

impl OpDef {
    pub const fn nb_args(&self) -> u8 {
        self.nb_oargs + self.nb_iargs + self.nb_cargs
    }
}

const fn def(name: &'static str, nb_oargs: u8, nb_iargs: u8, nb_cargs: u8, flags: OpFlags) -> OpDef {
    OpDef { name, nb_oargs, nb_iargs, nb_cargs, flags }
}

const INT: OpFlags = OpFlags::INT;
const NP: OpFlags = OpFlags::NOT_PRESENT;
const SE: OpFlags = OpFlags::SIDE_EFFECTS;
const CC: OpFlags = OpFlags::CALL_CLOBBER;
const BE: OpFlags = OpFlags::BB_END;
const BX: OpFlags = OpFlags::BB_EXIT;
const CB: OpFlags = OpFlags::COND_BRANCH;
const N: OpFlags = OpFlags::NONE;

/// Static opcode definition table, indexed by `Opcode as usize`.
///
/// Columns: name, outputs, inputs, constant args, flags.
#[rustfmt::skip]
pub static OPCODE_DEFS: [OpDef; Opcode::Count as usize] = [
    def("mov", 1, 1, 0, INT.union(NP)),
    def("setcond", 1, 2, 1, INT),
    def("negsetcond", 1, 2, 1, INT),
    def("movcond", 1, 4, 1, INT),
    def("add", 1, 2, 0, INT),
    def("sub", 1, 2, 0, INT),
    def("mul", 1, 2, 0, INT),
    def("neg", 1, 1, 0, INT),
    def("divs", 1, 2, 0, INT),
    def("divu", 1, 2, 0, INT),
    def("rems", 1, 2, 0, INT),
    def("remu", 1, 2, 0, INT),
    def("mulsh", 1, 2, 0, INT),
    def("muluh", 1, 2, 0, INT),
    def("and", 1, 2, 0, INT),
    def("or", 1, 2, 0, INT),
    def("xor", 1, 2, 0, INT),
    def("not", 1, 1, 0, INT),
    def("andc", 1, 2, 0, INT),
    def("orc", 1, 2, 0, INT),
    def("eqv", 1, 2, 0, INT),
    def("nand", 1, 2, 0, INT),
    def("nor", 1, 2, 0, INT),
    def("shl", 1, 2, 0, INT),
    def("shr", 1, 2, 0, INT),
    def("sar", 1, 2, 0, INT),
    def("rotl", 1, 2, 0, INT),
    def("rotr", 1, 2, 0, INT),
    def("extract", 1, 1, 2, INT),
    def("sextract", 1, 1, 2, INT),
    def("deposit", 1, 2, 2, INT),
    def("bswap16", 1, 1, 1, INT),
    def("bswap32", 1, 1, 1, INT),
    def("bswap64", 1, 1, 1, INT),
    def("clz", 1, 2, 0, INT),
    def("ctz", 1, 2, 0, INT),
    def("ctpop", 1, 1, 0, INT),
    def("ext_i32_i64", 1, 1, 0, N),
    def("extu_i32_i64", 1, 1, 0, N),
    def("extrl_i64_i32", 1, 1, 0, N),
    def("extrh_i64_i32", 1, 1, 0, N),
    def("ld8u", 1, 1, 1, INT),
    def("ld8s", 1, 1, 1, INT),
    def("ld16u", 1, 1, 1, INT),
    def("ld16s", 1, 1, 1, INT),
    def("ld32u", 1, 1, 1, INT),
    def("ld32s", 1, 1, 1, INT),
    def("ld", 1, 1, 1, INT),
    def("st8", 0, 2, 1, INT),
    def("st16", 0, 2, 1, INT),
    def("st32", 0, 2, 1, INT),
    def("st", 0, 2, 1, INT),
    def("qemu_ld", 1, 1, 1, SE.union(INT)),
    def("qemu_st", 0, 2, 1, SE.union(INT)),
    def("atomic_rmw", 1, 2, 2, SE.union(INT)),
    def("atomic_cmpxchg", 1, 3, 1, SE.union(INT)),
    def("br", 0, 0, 1, BE.union(NP)),
    def("brcond", 0, 2, 2, BE.union(CB).union(INT)),
    def("set_label", 0, 0, 1, BE.union(NP)),
    def("goto_tb", 0, 0, 1, BX.union(BE).union(NP)),
    def("exit_tb", 0, 0, 1, BX.union(BE).union(NP)),
    def("mb", 0, 0, 1, NP),
    def("call", 1, 6, 2, CC.union(NP)),
    def("trap", 0, 0, 3, BX.union(BE).union(SE).union(NP)),
    def("nop", 0, 0, 0, NP),
    def("discard", 1, 0, 0, NP),
    def("insn_start", 0, 0, 2, NP),
];

/// All opcodes that can appear in an op list, in table order.
pub const ALL_OPCODES: [Opcode; Opcode::Count as usize] = [
    Opcode::Mov,
    Opcode::SetCond,
    Opcode::NegSetCond,
    Opcode::MovCond,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Neg,
    Opcode::DivS,
    Opcode::DivU,
    Opcode::RemS,
    Opcode::RemU,
    Opcode::MulSH,
    Opcode::MulUH,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Not,
    Opcode::AndC,
    Opcode::OrC,
    Opcode::Eqv,
    Opcode::Nand,
    Opcode::Nor,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Sar,
    Opcode::RotL,
    Opcode::RotR,
    Opcode::Extract,
    Opcode::SExtract,
    Opcode::Deposit,
    Opcode::Bswap16,
    Opcode::Bswap32,
    Opcode::Bswap64,
    Opcode::Clz,
    Opcode::Ctz,
    Opcode::CtPop,
    Opcode::ExtI32I64,
    Opcode::ExtUI32I64,
    Opcode::ExtrlI64I32,
    Opcode::ExtrhI64I32,
    Opcode::Ld8U,
    Opcode::Ld8S,
    Opcode::Ld16U,
    Opcode::Ld16S,
    Opcode::Ld32U,
    Opcode::Ld32S,
    Opcode::Ld,
    Opcode::St8,
    Opcode::St16,
    Opcode::St32,
    Opcode::St,
    Opcode::QemuLd,
    Opcode::QemuSt,
    Opcode::AtomicRmw,
    Opcode::AtomicCmpxchg,
    Opcode::Br,
    Opcode::BrCond,
    Opcode::SetLabel,
    Opcode::GotoTb,
    Opcode::ExitTb,
    Opcode::Mb,
    Opcode::Call,
    Opcode::Trap,
    Opcode::Nop,
    Opcode::Discard,
    Opcode::InsnStart,
];

impl Opcode {
    /// Look up the static definition for this opcode.
    pub fn def(self) -> &'static OpDef {
        &OPCODE_DEFS[self as usize]
    }

    /// Return the fixed IR type this opcode operates on, if not
    /// type-polymorphic.
    pub fn fixed_type(self) -> Option<Type> {
        match self {
            Opcode::ExtI32I64 | Opcode::ExtUI32I64 => Some(Type::I64),
            Opcode::ExtrlI64I32 | Opcode::ExtrhI64I32 => Some(Type::I32),
            _ => None,
        }
    }

    /// Whether this opcode is type-polymorphic (works on I32 or I64).
    pub fn is_int_polymorphic(self) -> bool {
        self.def().flags.contains(OpFlags::INT)
    }

    /// Whether the host backend must provide a constraint and an
    /// emitter for this opcode.
    pub fn needs_lowering(self) -> bool {
        !self.def().flags.contains(OpFlags::NOT_PRESENT)
    }
}
