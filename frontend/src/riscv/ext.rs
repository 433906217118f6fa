//! RISC-V ISA extension configuration.
//!
//! `MisaExt` is the single-letter extension bitmask reported by the
//! `misa` CSR; `RiscvCfg` selects which extensions the translator
//! accepts.

/// Bitmask of single-letter RISC-V extensions (MISA bits).
///
/// Bit N = extension whose letter is `'A' + N`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MisaExt(u32);

#[allow(non_upper_case_globals)]
impl MisaExt {
    pub const EMPTY: Self = Self(0);
    pub const A: Self = Self(1 << 0);
    pub const I: Self = Self(1 << (b'I' - b'A'));
    pub const M: Self = Self(1 << (b'M' - b'A'));
    /// User mode is implemented.
    pub const U: Self = Self(1 << (b'U' - b'A'));

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// Per-CPU extension configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RiscvCfg {
    pub misa: MisaExt,
    pub ext_zicsr: bool,
    pub ext_zifencei: bool,
}

impl RiscvCfg {
    /// RV64IMA + Zicsr + Zifencei with M and U modes.
    pub const RV64IMA: Self = Self {
        misa: MisaExt::I.union(MisaExt::M).union(MisaExt::A).union(MisaExt::U),
        ext_zicsr: true,
        ext_zifencei: true,
    };

    /// Value of the `misa` CSR: MXL = 2 (64-bit) plus the letters.
    pub const fn misa_csr(&self) -> u64 {
        (2u64 << 62) | self.misa.bits() as u64
    }
}

impl Default for RiscvCfg {
    fn default() -> Self {
        Self::RV64IMA
    }
}
