//! IR-level types: labels, TB metadata and the exit protocol,
//! conditions, memory ops, and dump stability.

use std::sync::Arc;

use xlat_core::dump::dump_to_string;
use xlat_core::label::{Label, RelocKind};
use xlat_core::{
    decode_tb_exit, encode_tb_exit, BlockEnd, CodeFetch, Cond, GuestCpu, GuestException,
    JumpCache, MemOp, MemOpIdx, TbId, TranslationBlock, Type, TB_EXIT_NOCHAIN,
};
use xlat_frontend::riscv::RiscvCpu;

use crate::common::asm::*;
use crate::common::ir::ir_context;

#[test]
fn label_lifecycle() {
    let mut l = Label::new(2);
    assert!(!l.has_pending_uses());
    l.add_use(50, RelocKind::Abs32);
    l.add_use(80, RelocKind::Abs32);
    assert!(l.has_pending_uses());
    let uses = l.bind(300);
    assert_eq!(l.target(), Some(300));
    assert!(!l.has_pending_uses());
    let offsets: Vec<usize> = uses.iter().map(|u| u.offset).collect();
    assert_eq!(offsets, [50, 80]);
}

fn tb(pc: u64) -> TranslationBlock {
    TranslationBlock::new(TbId { index: 3, gen: 1 }, pc, 3, 0)
}

#[test]
fn tb_key_and_invalidation() {
    let t = tb(0x1000);
    assert!(t.matches(0x1000, 3, 0));
    assert!(!t.matches(0x1000, 0, 0));
    assert!(!t.matches(0x1000, 3, 1));
    assert!(!t.is_invalid());
    t.set_invalid();
    assert!(t.is_invalid());
    let jmp = t.jmp.lock();
    assert_eq!(jmp.jmp_dest, [None, None]);
    assert!(jmp.jmp_list.is_empty());
}

#[test]
fn tb_phys_overlap() {
    let mut t = tb(0x1000);
    t.phys_pc = 0x1000;
    t.size = 16;
    assert!(t.overlaps_phys(0x100c, 4));
    assert!(t.overlaps_phys(0xffc, 8));
    assert!(!t.overlaps_phys(0x1010, 4));
    assert!(!t.overlaps_phys(0xff0, 0x10));
}

#[test]
fn tb_restore_pc() {
    let mut t = tb(0x1000);
    t.host_offset = 0x400;
    t.host_size = 0x100;
    t.insn_search = vec![(0, 0x1000), (0x20, 0x1004), (0x48, 0x1008)];
    assert!(t.contains_host(0x400));
    assert!(!t.contains_host(0x500));
    assert_eq!(t.restore_pc(0x400), 0x1000);
    assert_eq!(t.restore_pc(0x41f), 0x1000);
    assert_eq!(t.restore_pc(0x420), 0x1004);
    assert_eq!(t.restore_pc(0x4f0), 0x1008);
}

#[test]
fn exit_value_packing() {
    let v = encode_tb_exit(12345, TB_EXIT_NOCHAIN);
    assert_eq!(decode_tb_exit(v), (12345, TB_EXIT_NOCHAIN));
    assert_eq!(decode_tb_exit(encode_tb_exit(0, 1)), (0, 1));
}

#[test]
fn jump_cache_rechecks_key() {
    let mut jc = JumpCache::new();
    let t = Arc::new(tb(0x2000));
    jc.insert(t.clone());
    assert!(jc.lookup(0x2000, 3, 0).is_some());
    assert!(jc.lookup(0x2000, 0, 0).is_none());
    assert!(jc.lookup(0x2000, 3, 7).is_none());
    t.set_invalid();
    assert!(jc.lookup(0x2000, 3, 0).is_none());
    jc.insert(Arc::new(tb(0x3000)));
    jc.invalidate();
    assert!(jc.lookup(0x3000, 3, 0).is_none());
}

#[test]
fn cond_eval_respects_width() {
    assert!(Cond::Lt.eval(Type::I32, 0xffff_ffff, 0));
    assert!(!Cond::Lt.eval(Type::I64, 0xffff_ffff, 0));
    assert!(Cond::Ltu.eval(Type::I64, 1, u64::MAX));
    assert!(Cond::Eq.eval(Type::I32, 0x1_0000_0005, 5));
    assert!(Cond::TstNe.eval(Type::I64, 0b1010, 0b0010));
    for c in [Cond::Eq, Cond::Lt, Cond::Geu, Cond::Gt, Cond::TstEq] {
        assert_eq!(c.invert().invert(), c);
        assert_ne!(c.eval(Type::I64, 3, 9), c.invert().eval(Type::I64, 3, 9));
        assert_eq!(c.eval(Type::I64, 3, 9), c.swap().eval(Type::I64, 9, 3));
    }
}

#[test]
fn memop_extension_and_alignment() {
    assert_eq!(MemOp::sb().extend(0x80), 0xffff_ffff_ffff_ff80);
    assert_eq!(MemOp::ub().extend(0x180), 0x80);
    assert_eq!(MemOp::sl().extend(0x8000_0000), 0xffff_ffff_8000_0000);
    assert_eq!(MemOp::uq().align_mask(), 0);
    assert_eq!(MemOp::uq().with(MemOp::ALIGN).align_mask(), 7);
    assert_eq!(MemOp::ul().with(MemOp::ALIGN_2).align_mask(), 1);
    let oi = MemOpIdx::new(MemOp::sw(), 3);
    assert_eq!(oi.memop(), MemOp::sw());
    assert_eq!(oi.mmu_idx(), 3);
    assert_eq!(MemOpIdx::from_raw(oi.raw()), oi);
}

/// Instruction words laid out from a base address.
struct Program {
    base: u64,
    words: Vec<u32>,
}

impl CodeFetch for Program {
    fn fetch_u32(&mut self, pc: u64) -> Result<u32, GuestException> {
        let i = (pc.wrapping_sub(self.base) / 4) as usize;
        self.words.get(i).copied().ok_or(GuestException::Trap { cause: 1, tval: pc })
    }

    fn phys_pc(&mut self, pc: u64) -> Result<u64, GuestException> {
        Ok(pc)
    }
}

fn translate_dump(words: &[u32]) -> String {
    let mut cpu = RiscvCpu::rv64(0, 0x1000);
    let mut ir = ir_context();
    let mut prog = Program {
        base: 0x1000,
        words: words.to_vec(),
    };
    let info = cpu.gen_code(&mut ir, 0x1000, 3, 32, &mut prog);
    assert_eq!(info.end, BlockEnd::Branch);
    dump_to_string(&ir)
}

#[test]
fn translation_is_deterministic() {
    let prog = [
        addi(A0, A0, 5),
        ld(A1, A0, 8),
        mul(A2, A0, A1),
        beq(A2, ZERO, 16),
        ecall(),
    ];
    let first = translate_dump(&prog);
    let second = translate_dump(&prog);
    assert_eq!(first, second);
    assert!(first.contains("insn_start $0x1000"));
    assert!(first.contains("goto_tb"));
    assert!(first.contains("a0"));
}

#[test]
fn reset_keeps_globals() {
    let mut cpu = RiscvCpu::rv64(0, 0x1000);
    let mut ir = ir_context();
    let mut prog = Program {
        base: 0x1000,
        words: vec![addi(A0, A0, 1), ecall()],
    };
    cpu.gen_code(&mut ir, 0x1000, 3, 32, &mut prog);
    let globals = ir.nb_globals();
    let dump = dump_to_string(&ir);
    ir.reset();
    assert_eq!(ir.nb_globals(), globals);
    assert!(ir.ops().is_empty());
    cpu.gen_code(&mut ir, 0x1000, 3, 32, &mut prog);
    assert_eq!(ir.nb_globals(), globals);
    assert_eq!(dump_to_string(&ir), dump);
}
