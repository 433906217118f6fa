pub mod context;
pub mod dump;
pub mod exception;
pub mod guest;
pub mod ir_builder;
pub mod label;
pub mod op;
pub mod opcode;
pub mod tb;
pub mod temp;
pub mod types;

pub use context::Context;
pub use exception::{AccessKind, FaultKind, GuestException, MemFault};
pub use guest::{
    BlockEnd, BlockInfo, CodeFetch, GuestCpu, HelperFn, HelperInfo,
    TbRuntime, CALL_NO_RWG, CALL_NO_WG,
};
pub use ir_builder::{
    AtomicOp, BSWAP_IZ, BSWAP_OS, BSWAP_OZ, MAX_CALL_ARGS,
};
pub use label::{Label, LabelUse, RelocKind};
pub use op::{LifeData, Op, OpIdx, MAX_OP_ARGS};
pub use opcode::{OpDef, OpFlags, Opcode, ALL_OPCODES, OPCODE_DEFS};
pub use tb::{
    decode_tb_exit, encode_tb_exit, JumpCache, TbId, TbJmpState,
    TranslationBlock, TB_EXIT_HALT, TB_EXIT_IDX0, TB_EXIT_IDX1,
    TB_EXIT_NOCHAIN, TB_EXIT_REQUESTED, TB_JMP_CACHE_SIZE,
};
pub use temp::{Temp, TempIdx, TempKind};
pub use types::{Cond, MemOp, MemOpIdx, RegSet, TempVal, Type};
