use crate::constraint::*;
use crate::tci::regs::ALLOCATABLE_REGS;
use xlat_core::Opcode;

const R: xlat_core::RegSet = ALLOCATABLE_REGS;

/// Return the static register constraint for an opcode on the
/// threaded-code host.
///
/// Every instruction is three-address and reads all inputs before
/// writing its output, so no aliasing or fixed registers are needed.
/// Second operands of ALU, compare and branch ops take 32-bit
/// immediates.
pub fn op_constraint(opc: Opcode) -> &'static OpConstraint {
    match opc {
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::AndC
        | Opcode::OrC
        | Opcode::Eqv
        | Opcode::Nand
        | Opcode::Nor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Sar
        | Opcode::RotL
        | Opcode::RotR
        | Opcode::Clz
        | Opcode::Ctz
        | Opcode::SetCond
        | Opcode::NegSetCond => {
            static C: OpConstraint = o1_i2i(R, R, R);
            &C
        }
        Opcode::DivS
        | Opcode::DivU
        | Opcode::RemS
        | Opcode::RemU
        | Opcode::MulSH
        | Opcode::MulUH
        | Opcode::Deposit
        | Opcode::AtomicRmw => {
            static C: OpConstraint = o1_i2(R, R, R);
            &C
        }
        Opcode::Neg
        | Opcode::Not
        | Opcode::CtPop
        | Opcode::Extract
        | Opcode::SExtract
        | Opcode::Bswap16
        | Opcode::Bswap32
        | Opcode::Bswap64
        | Opcode::ExtI32I64
        | Opcode::ExtUI32I64
        | Opcode::ExtrlI64I32
        | Opcode::ExtrhI64I32
        | Opcode::Ld8U
        | Opcode::Ld8S
        | Opcode::Ld16U
        | Opcode::Ld16S
        | Opcode::Ld32U
        | Opcode::Ld32S
        | Opcode::Ld
        | Opcode::QemuLd => {
            static C: OpConstraint = o1_i1(R, R);
            &C
        }
        Opcode::St8 | Opcode::St16 | Opcode::St32 | Opcode::St | Opcode::QemuSt => {
            static C: OpConstraint = o0_i2(R, R);
            &C
        }
        Opcode::MovCond => {
            static C: OpConstraint = o1_i4(R, R, R, R, R);
            &C
        }
        Opcode::AtomicCmpxchg => {
            static C: OpConstraint = o1_i3(R, R, R, R);
            &C
        }
        Opcode::BrCond => {
            static C: OpConstraint = o0_i2i(R, R);
            &C
        }
        // Handled by the register allocator.
        Opcode::Mov
        | Opcode::Br
        | Opcode::SetLabel
        | Opcode::GotoTb
        | Opcode::ExitTb
        | Opcode::Mb
        | Opcode::Call
        | Opcode::Trap
        | Opcode::Nop
        | Opcode::Discard
        | Opcode::InsnStart
        | Opcode::Count => &OpConstraint::EMPTY,
    }
}
