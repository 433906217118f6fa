use log::trace;
use thiserror::Error;

use crate::code_buffer::CodeWriter;
use crate::liveness::liveness_analysis;
use crate::optimize::optimize;
use crate::regalloc::regalloc_and_codegen;
use crate::HostCodeGen;
use xlat_core::dump::IrDump;
use xlat_core::Context;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// The code did not fit in the writer's range.
    #[error("code buffer region full")]
    BufferFull,
    /// A branch names a label that was never placed.
    #[error("label {0} used but never placed")]
    UnresolvedLabel(u32),
}

/// Host code produced for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbCode {
    /// Absolute buffer offset of the first host instruction.
    pub offset: usize,
    pub size: usize,
    /// `(target word offset, reset offset)` of each `goto_tb` slot.
    pub goto_tb: [Option<(usize, usize)>; 2],
}

/// Full translation pipeline: optimize → liveness → regalloc+codegen.
pub fn translate(
    ctx: &mut Context,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
) -> Result<TbCode, TranslateError> {
    optimize(ctx);
    liveness_analysis(ctx);
    trace!("IR after optimization:\n{}", IrDump(ctx));

    let start = buf.offset();
    regalloc_and_codegen(ctx, backend, buf);
    if buf.overflowed() {
        return Err(TranslateError::BufferFull);
    }
    if let Some(l) = ctx.labels().iter().find(|l| l.has_pending_uses()) {
        return Err(TranslateError::UnresolvedLabel(l.id));
    }

    Ok(TbCode {
        offset: start,
        size: buf.offset() - start,
        goto_tb: buf.goto_tb,
    })
}
