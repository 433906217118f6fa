pub mod code_buffer;
pub mod constraint;
pub mod liveness;
pub mod optimize;
pub mod regalloc;
pub mod tci;
pub mod translate;

pub use code_buffer::{CodeBuffer, CodeWriter};
pub use constraint::{validate_constraints, ArgConstraint, ConstClass, OpConstraint};
pub use tci::TciCodeGen;
pub use translate::{translate, TbCode, TranslateError};

use xlat_core::{Context, GuestException, LabelUse, Op, Opcode, RegSet, TbRuntime, Type};

/// An input operand as handed to the emitter: a host register, or a
/// constant the op's constraint accepts as an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostArg {
    Reg(u8),
    Imm(i64),
}

/// How execution of generated code ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbReturn {
    /// `exit_tb` reached; the value packs the TB index and exit code.
    Exit(u64),
    /// A guest exception was raised by the host instruction at
    /// `host_off` (absolute code buffer offset).
    Exception {
        host_off: usize,
        excp: GuestException,
    },
}

/// Trait for host code generators.
///
/// A host backend describes its register file and per-opcode
/// constraints, emits code for IR ops once the register allocator has
/// assigned operands, and runs the code it generated.
pub trait HostCodeGen: Send + Sync {
    fn name(&self) -> &'static str;

    /// Registers the allocator may hand out.
    fn allocatable_regs(&self) -> RegSet;

    /// Registers a helper call may clobber.
    fn call_clobber_regs(&self) -> RegSet;

    /// Registers carrying helper arguments, in order.
    fn call_arg_regs(&self) -> &'static [u8];

    /// Register holding a helper's return value.
    fn call_ret_reg(&self) -> u8;

    /// Initialize a translation context with backend-specific
    /// settings: reserved registers, the spill frame and the env
    /// register.
    fn init_context(&self, ctx: &mut Context);

    /// Return the register constraint for an opcode.
    fn op_constraint(&self, opc: Opcode) -> &'static crate::constraint::OpConstraint;

    // -- Register allocator primitives --

    /// Emit host mov between two registers.
    fn tcg_out_mov(&self, buf: &mut CodeWriter, ty: Type, dst: u8, src: u8);

    /// Emit host load-immediate into a register.
    fn tcg_out_movi(&self, buf: &mut CodeWriter, ty: Type, dst: u8, val: u64);

    /// Emit host load from memory [base + offset] into register.
    fn tcg_out_ld(&self, buf: &mut CodeWriter, ty: Type, dst: u8, base: u8, offset: i64);

    /// Emit host store from register to memory [base + offset].
    fn tcg_out_st(&self, buf: &mut CodeWriter, ty: Type, src: u8, base: u8, offset: i64);

    /// Emit host code for a single IR op. Called by the register
    /// allocator after inputs are placed and outputs allocated.
    /// `cargs` are raw constant values from the op's carg slots.
    ///
    /// Ops that branch to a label emit the label's target as their
    /// last 32-bit word; the allocator records it for back-patching
    /// when the label is not yet placed.
    fn tcg_out_op(
        &self,
        buf: &mut CodeWriter,
        ctx: &Context,
        op: &Op,
        oregs: &[u8],
        iargs: &[HostArg],
        cargs: &[u32],
    );

    /// Resolve a forward label reference to `target`.
    fn patch_label(&self, buf: &mut CodeWriter, at: LabelUse, target: usize);

    /// Point the `goto_tb` slot whose target word is at
    /// `jump_offset` to `target_offset`. Used for TB chaining and
    /// unchaining.
    ///
    /// Takes `&self` and `&CodeBuffer` so chaining can happen
    /// concurrently from multiple vCPU threads.
    fn patch_jump(&self, code: &CodeBuffer, jump_offset: usize, target_offset: usize);

    /// Run generated code starting at `tb_offset` until it exits.
    ///
    /// # Safety
    ///
    /// `tb_offset` must be the start of a published TB, `env` must
    /// point to the env the TB was translated against, and the code
    /// reachable from the TB must stay unmodified (apart from jump
    /// patching) until the call returns.
    unsafe fn tb_exec(
        &self,
        code: &CodeBuffer,
        tb_offset: usize,
        env: *mut u8,
        rt: &mut dyn TbRuntime,
    ) -> TbReturn;
}
