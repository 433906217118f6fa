//! Instruction format of the threaded-code host.
//!
//! Every instruction starts with one 32-bit header word, followed by
//! zero or more extension words. All words are 4-byte aligned.
//!
//! ```text
//!  31      24 23  20 19  16 15  12 11 10  9   8   7        0
//! +---------+------+------+------+-----+---+---+----------+
//! |   aux   |  r2  |  r1  |  r0  |  -  |IMM|W64|  opcode  |
//! +---------+------+------+------+-----+---+---+----------+
//! ```
//!
//! `W64` selects 64-bit operation width, `IMM` replaces the `r2`
//! operand with a sign-extended 32-bit extension word.

/// Host-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TciOp {
    Nop = 0,
    /// r0 = r1
    MovR,
    /// r0 = sext(word)
    MovI32,
    /// r0 = word0 | word1 << 32
    MovI64,

    // r0 = [r1 + sext(word)]
    Ld8U,
    Ld8S,
    Ld16U,
    Ld16S,
    Ld32U,
    Ld32S,
    Ld64,
    // [r1 + sext(word)] = r0
    St8,
    St16,
    St32,
    St64,

    // r0 = r1 op (r2 | imm)
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    AndC,
    OrC,
    Eqv,
    Nand,
    Nor,
    Shl,
    Shr,
    Sar,
    RotL,
    RotR,
    DivS,
    DivU,
    RemS,
    RemU,
    MulSH,
    MulUH,
    /// r0 = r1 != 0 ? clz(r1) : (r2 | imm)
    Clz,
    Ctz,

    // r0 = op r1
    Neg,
    Not,
    CtPop,
    /// aux holds the `BSWAP_*` flags.
    Bswap16,
    Bswap32,
    Bswap64,
    /// r0 = sext32(r1)
    ExtS32,
    /// r0 = zext32(r1)
    ExtU32,
    /// r0 = r1 >> 32
    ExtrH,

    /// r0 = extract(r1, word.ofs, word.len)
    Extract,
    SExtract,
    /// r0 = deposit(r1, r2, word.ofs, word.len)
    Deposit,

    /// r0 = aux.cond(r1, r2 | imm)
    SetCond,
    NegSetCond,
    /// r0 = aux.cond(r1, r2) ? word.ra : word.rb
    MovCond,

    /// pc = word
    Br,
    /// if aux.cond(r0, r1 | imm) { pc = word }
    BrCond,
    /// pc = word, read atomically (patched for chaining)
    GotoTb,
    /// return word0 | word1 << 32
    ExitTb,
    /// raise trap(word0, word1 | word2 << 32)
    Trap,
    Mb,

    /// r0 = guest_load(r1, word.oi)
    QemuLd,
    /// guest_store(r1, r0, word.oi)
    QemuSt,
    /// r0 = guest_rmw(aux.op, r1, r2, word.oi)
    AtomicRmw,
    /// r0 = guest_cmpxchg(r1, r2, word0.ra, word1.oi)
    AtomicCmpxchg,

    /// R0 = helper[word](env, R0..R5)
    Call,
}

pub const TCI_OP_COUNT: usize = TciOp::Call as usize + 1;

const TCI_OPS: [TciOp; TCI_OP_COUNT] = [
    TciOp::Nop,
    TciOp::MovR,
    TciOp::MovI32,
    TciOp::MovI64,
    TciOp::Ld8U,
    TciOp::Ld8S,
    TciOp::Ld16U,
    TciOp::Ld16S,
    TciOp::Ld32U,
    TciOp::Ld32S,
    TciOp::Ld64,
    TciOp::St8,
    TciOp::St16,
    TciOp::St32,
    TciOp::St64,
    TciOp::Add,
    TciOp::Sub,
    TciOp::Mul,
    TciOp::And,
    TciOp::Or,
    TciOp::Xor,
    TciOp::AndC,
    TciOp::OrC,
    TciOp::Eqv,
    TciOp::Nand,
    TciOp::Nor,
    TciOp::Shl,
    TciOp::Shr,
    TciOp::Sar,
    TciOp::RotL,
    TciOp::RotR,
    TciOp::DivS,
    TciOp::DivU,
    TciOp::RemS,
    TciOp::RemU,
    TciOp::MulSH,
    TciOp::MulUH,
    TciOp::Clz,
    TciOp::Ctz,
    TciOp::Neg,
    TciOp::Not,
    TciOp::CtPop,
    TciOp::Bswap16,
    TciOp::Bswap32,
    TciOp::Bswap64,
    TciOp::ExtS32,
    TciOp::ExtU32,
    TciOp::ExtrH,
    TciOp::Extract,
    TciOp::SExtract,
    TciOp::Deposit,
    TciOp::SetCond,
    TciOp::NegSetCond,
    TciOp::MovCond,
    TciOp::Br,
    TciOp::BrCond,
    TciOp::GotoTb,
    TciOp::ExitTb,
    TciOp::Trap,
    TciOp::Mb,
    TciOp::QemuLd,
    TciOp::QemuSt,
    TciOp::AtomicRmw,
    TciOp::AtomicCmpxchg,
    TciOp::Call,
];

impl TciOp {
    pub fn from_u8(v: u8) -> Option<TciOp> {
        TCI_OPS.get(v as usize).copied()
    }
}

const W64: u32 = 1 << 8;
const IMM: u32 = 1 << 9;

/// Instruction header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn(pub u32);

impl Insn {
    pub const fn new(op: TciOp) -> Self {
        Self(op as u32)
    }

    pub const fn w64(self, is64: bool) -> Self {
        if is64 {
            Self(self.0 | W64)
        } else {
            self
        }
    }

    pub const fn imm(self) -> Self {
        Self(self.0 | IMM)
    }

    pub const fn r0(self, r: u8) -> Self {
        Self(self.0 | ((r as u32 & 0xf) << 12))
    }

    pub const fn r1(self, r: u8) -> Self {
        Self(self.0 | ((r as u32 & 0xf) << 16))
    }

    pub const fn r2(self, r: u8) -> Self {
        Self(self.0 | ((r as u32 & 0xf) << 20))
    }

    pub const fn aux(self, v: u32) -> Self {
        Self(self.0 | ((v & 0xff) << 24))
    }

    pub fn op(self) -> Option<TciOp> {
        TciOp::from_u8(self.0 as u8)
    }

    pub const fn is64(self) -> bool {
        self.0 & W64 != 0
    }

    pub const fn has_imm(self) -> bool {
        self.0 & IMM != 0
    }

    pub const fn get_r0(self) -> usize {
        ((self.0 >> 12) & 0xf) as usize
    }

    pub const fn get_r1(self) -> usize {
        ((self.0 >> 16) & 0xf) as usize
    }

    pub const fn get_r2(self) -> usize {
        ((self.0 >> 20) & 0xf) as usize
    }

    pub const fn get_aux(self) -> u32 {
        self.0 >> 24
    }
}

/// Pack a bit-field position into an extension word.
pub const fn field_word(ofs: u32, len: u32) -> u32 {
    (ofs & 0xff) | ((len & 0xff) << 8)
}

pub const fn unpack_field(w: u32) -> (u32, u32) {
    (w & 0xff, (w >> 8) & 0xff)
}

/// Pack two register numbers into an extension word.
pub const fn regs_word(a: u8, b: u8) -> u32 {
    (a as u32 & 0xf) | ((b as u32 & 0xf) << 4)
}

pub const fn unpack_regs(w: u32) -> (usize, usize) {
    ((w & 0xf) as usize, ((w >> 4) & 0xf) as usize)
}
