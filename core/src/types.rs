/// Width of an IR operand. Only scalar integers exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Type {
    I32 = 0,
    I64 = 1,
}

impl Type {
    pub const fn size_bits(self) -> u32 {
        match self {
            Type::I32 => 32,
            Type::I64 => 64,
        }
    }

    pub const fn size_bytes(self) -> u32 {
        self.size_bits() / 8
    }

    /// Mask of the bits that are significant for this type.
    pub const fn mask(self) -> u64 {
        match self {
            Type::I32 => u32::MAX as u64,
            Type::I64 => u64::MAX,
        }
    }
}

/// Where a temp's value currently lives while the allocator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TempVal {
    Dead = 0,
    Reg = 1,
    Mem = 2,
    Const = 3,
}

/// Comparison applied by `brcond`, `setcond` and friends.
///
/// Encodings come in complementary pairs that differ only in bit 0,
/// so inverting a condition flips that bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Never = 0,
    Always = 1,
    Eq = 8,
    Ne = 9,
    Lt = 10,
    Ge = 11,
    Le = 12,
    Gt = 13,
    Ltu = 14,
    Geu = 15,
    Leu = 16,
    Gtu = 17,
    /// `a & b == 0`
    TstEq = 18,
    /// `a & b != 0`
    TstNe = 19,
}

const CONDS: [Cond; 14] = [
    Cond::Never,
    Cond::Always,
    Cond::Eq,
    Cond::Ne,
    Cond::Lt,
    Cond::Ge,
    Cond::Le,
    Cond::Gt,
    Cond::Ltu,
    Cond::Geu,
    Cond::Leu,
    Cond::Gtu,
    Cond::TstEq,
    Cond::TstNe,
];

impl Cond {
    /// Decode a condition stored as a constant argument.
    pub fn from_u32(v: u32) -> Option<Cond> {
        CONDS.iter().copied().find(|&c| c as u32 == v)
    }

    /// The condition that holds exactly when `self` does not.
    pub fn invert(self) -> Cond {
        match Cond::from_u32(self as u32 ^ 1) {
            Some(c) => c,
            None => unreachable!("conditions are paired"),
        }
    }

    /// The condition to use after exchanging the operands.
    pub const fn swap(self) -> Cond {
        match self {
            Cond::Lt => Cond::Gt,
            Cond::Gt => Cond::Lt,
            Cond::Ge => Cond::Le,
            Cond::Le => Cond::Ge,
            Cond::Ltu => Cond::Gtu,
            Cond::Gtu => Cond::Ltu,
            Cond::Geu => Cond::Leu,
            Cond::Leu => Cond::Geu,
            c => c,
        }
    }

    /// Evaluate on two values of width `ty`. The optimizer and the
    /// interpreter both go through here.
    pub fn eval(self, ty: Type, a: u64, b: u64) -> bool {
        let (a, b) = (a & ty.mask(), b & ty.mask());
        let signed = |v: u64| match ty {
            Type::I32 => v as u32 as i32 as i64,
            Type::I64 => v as i64,
        };
        let ord_s = signed(a).cmp(&signed(b));
        let ord_u = a.cmp(&b);
        match self {
            Cond::Never => false,
            Cond::Always => true,
            Cond::Eq => a == b,
            Cond::Ne => a != b,
            Cond::Lt => ord_s.is_lt(),
            Cond::Ge => ord_s.is_ge(),
            Cond::Le => ord_s.is_le(),
            Cond::Gt => ord_s.is_gt(),
            Cond::Ltu => ord_u.is_lt(),
            Cond::Geu => ord_u.is_ge(),
            Cond::Leu => ord_u.is_le(),
            Cond::Gtu => ord_u.is_gt(),
            Cond::TstEq => a & b == 0,
            Cond::TstNe => a & b != 0,
        }
    }
}

/// Guest memory access descriptor.
///
/// Bits 0-1 hold log2 of the size, bit 2 sign extension, bit 3 a byte
/// swap and bits 4-6 the alignment requirement (log2 of the alignment,
/// or 7 for natural alignment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOp(u16);

impl MemOp {
    pub const SIZE_8: u16 = 0;
    pub const SIZE_16: u16 = 1;
    pub const SIZE_32: u16 = 2;
    pub const SIZE_64: u16 = 3;

    pub const SIGN: u16 = 1 << 2;
    /// Access is in the opposite byte order to the guest's little-endian
    /// default.
    pub const BSWAP: u16 = 1 << 3;
    pub const ALIGN_2: u16 = 1 << 4;
    pub const ALIGN_4: u16 = 2 << 4;
    pub const ALIGN_8: u16 = 3 << 4;
    pub const ALIGN_16: u16 = 4 << 4;
    pub const ALIGN_32: u16 = 5 << 4;
    pub const ALIGN_64: u16 = 6 << 4;
    /// Require natural alignment for the access size.
    pub const ALIGN: u16 = 7 << 4;
    const AMASK: u16 = 7 << 4;

    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn ub() -> Self {
        Self(Self::SIZE_8)
    }
    pub const fn sb() -> Self {
        Self(Self::SIZE_8 | Self::SIGN)
    }
    pub const fn uw() -> Self {
        Self(Self::SIZE_16)
    }
    pub const fn sw() -> Self {
        Self(Self::SIZE_16 | Self::SIGN)
    }
    pub const fn ul() -> Self {
        Self(Self::SIZE_32)
    }
    pub const fn sl() -> Self {
        Self(Self::SIZE_32 | Self::SIGN)
    }
    pub const fn uq() -> Self {
        Self(Self::SIZE_64)
    }

    /// Return a copy with extra flag bits set.
    pub const fn with(self, bits: u16) -> Self {
        Self(self.0 | bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }
    pub const fn size(self) -> u16 {
        self.0 & 0x3
    }
    pub const fn is_signed(self) -> bool {
        self.0 & Self::SIGN != 0
    }
    pub const fn is_bswap(self) -> bool {
        self.0 & Self::BSWAP != 0
    }
    pub const fn size_bytes(self) -> u32 {
        1 << self.size()
    }

    /// Low address bits that must be zero, or 0 if unaligned
    /// accesses are permitted.
    pub const fn align_mask(self) -> u64 {
        let a = (self.0 & Self::AMASK) >> 4;
        match a {
            0 => 0,
            7 => self.size_bytes() as u64 - 1,
            n => (1u64 << n) - 1,
        }
    }

    /// Sign- or zero-extend a raw little-endian value of this size.
    pub const fn extend(self, raw: u64) -> u64 {
        let bits = self.size_bytes() * 8;
        if bits == 64 {
            return raw;
        }
        let masked = raw & ((1u64 << bits) - 1);
        if self.is_signed() {
            let shift = 64 - bits;
            (((masked << shift) as i64) >> shift) as u64
        } else {
            masked
        }
    }
}

/// A [`MemOp`] plus the MMU index, packed into one constant argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOpIdx(u32);

impl MemOpIdx {
    pub const fn new(op: MemOp, mmu_idx: u32) -> Self {
        assert!(mmu_idx < 16);
        Self(((op.bits() as u32) << 4) | mmu_idx)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn memop(self) -> MemOp {
        MemOp::new((self.0 >> 4) as u16)
    }

    pub const fn mmu_idx(self) -> usize {
        (self.0 & 0xf) as usize
    }
}

/// Set of host registers, one bit per register number.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegSet(u64);

impl RegSet {
    pub const EMPTY: RegSet = RegSet(0);

    pub const fn from_raw(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn set(self, reg: u8) -> Self {
        Self(self.0 | (1u64 << reg))
    }

    pub const fn clear(self, reg: u8) -> Self {
        Self(self.0 & !(1u64 << reg))
    }

    pub const fn contains(self, reg: u8) -> bool {
        self.0 & (1u64 << reg) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: RegSet) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersect(self, other: RegSet) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn subtract(self, other: RegSet) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Return the lowest set register, or None.
    pub const fn first(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    /// Iterate over the registers in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let r = bits.trailing_zeros() as u8;
            bits &= bits - 1;
            Some(r)
        })
    }
}

impl Default for RegSet {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Debug for RegSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegSet(0x{:016x})", self.0)
    }
}
