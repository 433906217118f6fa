//! Guest front ends: instruction decoding and IR generation.
//!
//! Provides the generic translation framework (`TranslatorOps` trait
//! and `translator_loop`) plus architecture-specific translators.

pub mod riscv;

use xlat_core::{BlockEnd, BlockInfo, CodeFetch, Context};

/// Guest page size used to bound blocks and direct chaining.
pub const GUEST_PAGE_BITS: u32 = 12;
const GUEST_PAGE_MASK: u64 = !((1u64 << GUEST_PAGE_BITS) - 1);

// ---------------------------------------------------------------
// Generic translation framework
// ---------------------------------------------------------------

/// TB termination reason set by `translate_insn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisasJumpType {
    /// Continue to the next sequential instruction.
    Next,
    /// Instruction, op or page budget reached; fall through to
    /// `pc_next`.
    TooMany,
    /// The next instruction could not be fetched; fall through to
    /// `pc_next` and let the fault be raised by the next lookup.
    FetchFault,
    /// Unconditional branch / exit, no fall-through.
    NoReturn,
}

/// Base context shared by all guest architectures.
pub struct DisasContextBase {
    /// PC of the first instruction in this TB.
    pub pc_first: u64,
    /// PC of the *next* instruction to decode.
    pub pc_next: u64,
    /// How the current instruction terminates.
    pub is_jmp: DisasJumpType,
    /// Number of guest instructions translated so far.
    pub num_insns: u32,
    /// Maximum instructions allowed in one TB.
    pub max_insns: u32,
}

impl DisasContextBase {
    pub fn new(pc: u64, max_insns: u32) -> Self {
        Self {
            pc_first: pc,
            pc_next: pc,
            is_jmp: DisasJumpType::Next,
            num_insns: 0,
            max_insns: max_insns.max(1),
        }
    }

    /// Whether `pc` lies on the same guest page as the first
    /// instruction. Only such targets may be reached through `goto_tb`.
    pub fn same_page(&self, pc: u64) -> bool {
        (pc ^ self.pc_first) & GUEST_PAGE_MASK == 0
    }

    /// Summary for the execution engine.
    pub fn block_info(&self) -> BlockInfo {
        BlockInfo {
            guest_size: (self.pc_next - self.pc_first) as u32,
            num_insns: self.num_insns,
            end: match self.is_jmp {
                DisasJumpType::NoReturn => BlockEnd::Branch,
                DisasJumpType::FetchFault => BlockEnd::FetchFault,
                DisasJumpType::Next | DisasJumpType::TooMany => BlockEnd::Budget,
            },
        }
    }
}

/// Per-architecture translation operations.
pub trait TranslatorOps {
    /// Architecture-specific disassembly context.
    type DisasContext;

    /// One-time setup before the translation loop.
    fn init_disas_context(ctx: &mut Self::DisasContext, ir: &mut Context);

    /// Called once at the start of the TB (after init).
    fn tb_start(ctx: &mut Self::DisasContext, ir: &mut Context);

    /// Emit `insn_start` marker for the current guest PC.
    fn insn_start(ctx: &mut Self::DisasContext, ir: &mut Context);

    /// Decode and translate one guest instruction.
    ///
    /// Must advance `base().pc_next` and set `base().is_jmp`
    /// when the instruction terminates the TB.
    fn translate_insn(
        ctx: &mut Self::DisasContext,
        ir: &mut Context,
        fetch: &mut dyn CodeFetch,
    );

    /// Emit TB epilogue (exit / goto_tb for fall-through).
    fn tb_stop(ctx: &mut Self::DisasContext, ir: &mut Context);

    /// Access the base context embedded in the arch context.
    fn base(ctx: &Self::DisasContext) -> &DisasContextBase;

    /// Mutable access to the base context.
    fn base_mut(ctx: &mut Self::DisasContext) -> &mut DisasContextBase;
}

/// Generic translation loop: drives the decode → translate cycle.
///
/// The block ends at a control-flow instruction, after `max_insns`
/// instructions, before crossing a guest page, or once the op budget
/// of the context is exhausted.
pub fn translator_loop<T: TranslatorOps>(
    ctx: &mut T::DisasContext,
    ir: &mut Context,
    fetch: &mut dyn CodeFetch,
) -> BlockInfo {
    T::init_disas_context(ctx, ir);
    T::tb_start(ctx, ir);

    loop {
        T::insn_start(ctx, ir);
        T::translate_insn(ctx, ir, fetch);

        let base = T::base(ctx);
        if base.is_jmp != DisasJumpType::Next {
            break;
        }
        if base.num_insns >= base.max_insns
            || !base.same_page(base.pc_next)
            || ir.ops_budget_exceeded()
        {
            T::base_mut(ctx).is_jmp = DisasJumpType::TooMany;
            break;
        }
    }

    T::tb_stop(ctx, ir);
    T::base(ctx).block_info()
}
