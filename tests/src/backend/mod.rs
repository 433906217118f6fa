//! Optimizer, register allocator and interpreter host, driven with
//! hand-built IR.

use proptest::prelude::*;
use xlat_backend::{
    translate, validate_constraints, CodeBuffer, CodeWriter, HostCodeGen, TbReturn, TciCodeGen,
};
use xlat_core::{decode_tb_exit, Cond, Context, TempIdx, Type, TB_EXIT_IDX0, TB_EXIT_NOCHAIN};

use crate::common::ir::{ir_context, run_ir, slot, NoRuntime, ENV_WORDS};

#[test]
fn interpreter_constraints_are_allocatable() {
    assert_eq!(validate_constraints(&TciCodeGen::new()), Ok(()));
}

#[test]
fn byte_add_carry() {
    let mut ctx = ir_context();
    let env = ctx.env();
    let a = ctx.new_temp(Type::I32);
    let b = ctx.new_temp(Type::I32);
    ctx.gen_ld8u(Type::I32, a, env, slot(0));
    ctx.gen_ld8u(Type::I32, b, env, slot(1));
    let sum = ctx.new_temp(Type::I32);
    ctx.gen_add(Type::I32, sum, a, b);
    let res = ctx.new_temp(Type::I32);
    ctx.gen_extract(Type::I32, res, sum, 0, 8);
    let carry = ctx.new_temp(Type::I32);
    ctx.gen_extract(Type::I32, carry, sum, 8, 1);
    ctx.gen_st(Type::I32, res, env, slot(2));
    ctx.gen_st(Type::I32, carry, env, slot(3));
    ctx.gen_exit_tb(TB_EXIT_NOCHAIN);

    let mut e = [0u64; ENV_WORDS];
    e[0] = 0xff;
    e[1] = 0x01;
    let ret = run_ir(&mut ctx, &mut e);
    assert_eq!(ret, TbReturn::Exit(xlat_core::encode_tb_exit(0, TB_EXIT_NOCHAIN)));
    assert_eq!(e[2], 0x00);
    assert_eq!(e[3], 1);
}

#[test]
fn branch_over_label() {
    // d = a < b ? a : b, through a forward branch.
    let mut ctx = ir_context();
    let env = ctx.env();
    let a = ctx.new_temp_tb(Type::I64);
    let b = ctx.new_temp_tb(Type::I64);
    ctx.gen_ld(Type::I64, a, env, slot(0));
    ctx.gen_ld(Type::I64, b, env, slot(1));
    let take_b = ctx.new_label();
    let done = ctx.new_label();
    ctx.gen_brcond(Type::I64, a, b, Cond::Ge, take_b);
    ctx.gen_st(Type::I64, a, env, slot(2));
    ctx.gen_br(done);
    ctx.gen_set_label(take_b);
    ctx.gen_st(Type::I64, b, env, slot(2));
    ctx.gen_set_label(done);
    ctx.gen_exit_tb(TB_EXIT_NOCHAIN);

    let mut e = [0u64; ENV_WORDS];
    e[0] = (-5i64) as u64;
    e[1] = 3;
    run_ir(&mut ctx, &mut e);
    assert_eq!(e[2], (-5i64) as u64);
}

#[test]
fn movcond_and_setcond() {
    let mut ctx = ir_context();
    let env = ctx.env();
    let a = ctx.new_temp(Type::I64);
    let b = ctx.new_temp(Type::I64);
    ctx.gen_ld(Type::I64, a, env, slot(0));
    ctx.gen_ld(Type::I64, b, env, slot(1));
    let lt = ctx.new_temp(Type::I64);
    ctx.gen_setcond(Type::I64, lt, a, b, Cond::Ltu);
    let max = ctx.new_temp(Type::I64);
    ctx.gen_movcond(Type::I64, max, a, b, b, a, Cond::Ltu);
    ctx.gen_st(Type::I64, lt, env, slot(2));
    ctx.gen_st(Type::I64, max, env, slot(3));
    ctx.gen_exit_tb(TB_EXIT_NOCHAIN);

    let mut e = [0u64; ENV_WORDS];
    e[0] = 7;
    e[1] = u64::MAX;
    run_ir(&mut ctx, &mut e);
    assert_eq!(e[2], 1);
    assert_eq!(e[3], u64::MAX);
}

/// Two blocks in one buffer: the first ends in `goto_tb 0`.
#[test]
fn goto_tb_patch_and_reset() {
    let backend = TciCodeGen::new();
    let code = CodeBuffer::new(64 * 1024, 1).unwrap();
    let (start, limit) = code.region_bounds(0);
    let mut w = CodeWriter::new(&code, start, limit);

    let mut first = ir_context();
    first.tb_idx = 1;
    first.gen_goto_tb(0);
    first.gen_exit_tb(TB_EXIT_IDX0);
    let t1 = translate(&mut first, &backend, &mut w).unwrap();

    let mut second = ir_context();
    second.tb_idx = 2;
    let env = second.env();
    let v = second.new_const(Type::I64, 99);
    second.gen_st(Type::I64, v, env, slot(0));
    second.gen_exit_tb(TB_EXIT_NOCHAIN);
    let t2 = translate(&mut second, &backend, &mut w).unwrap();

    let mut e = [0u64; ENV_WORDS];
    let run = |e: &mut [u64; ENV_WORDS]| {
        // SAFETY: both blocks live in `code`; `e` outlives the call.
        unsafe { backend.tb_exec(&code, t1.offset, e.as_mut_ptr() as *mut u8, &mut NoRuntime) }
    };

    assert_eq!(run(&mut e), TbReturn::Exit(xlat_core::encode_tb_exit(1, TB_EXIT_IDX0)));
    assert_eq!(e[0], 0);

    let (jump, reset) = t1.goto_tb[0].unwrap();
    backend.patch_jump(&code, jump, t2.offset);
    assert_eq!(run(&mut e), TbReturn::Exit(xlat_core::encode_tb_exit(2, TB_EXIT_NOCHAIN)));
    assert_eq!(e[0], 99);

    backend.patch_jump(&code, jump, reset);
    let TbReturn::Exit(v) = run(&mut e) else {
        panic!("expected an exit");
    };
    assert_eq!(decode_tb_exit(v), (1, TB_EXIT_IDX0));
}

#[test]
fn buffer_full_is_reported() {
    let backend = TciCodeGen::new();
    let code = CodeBuffer::new(4096, 1).unwrap();
    let (start, _) = code.region_bounds(0);
    let mut w = CodeWriter::new(&code, start, start + 16);
    let mut ctx = ir_context();
    let env = ctx.env();
    for i in 0..8 {
        let t = ctx.new_temp(Type::I64);
        ctx.gen_ld(Type::I64, t, env, slot(i));
        ctx.gen_st(Type::I64, t, env, slot(i + 8));
    }
    ctx.gen_exit_tb(TB_EXIT_NOCHAIN);
    assert_eq!(
        translate(&mut ctx, &backend, &mut w),
        Err(xlat_backend::TranslateError::BufferFull)
    );
}

// ── Numeric fidelity ───────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    RotL,
    DivS,
    DivU,
    RemS,
    RemU,
    MulUH,
}

const BIN_OPS: [BinOp; 15] = [
    BinOp::Add,
    BinOp::Sub,
    BinOp::Mul,
    BinOp::And,
    BinOp::Or,
    BinOp::Xor,
    BinOp::Shl,
    BinOp::Shr,
    BinOp::Sar,
    BinOp::RotL,
    BinOp::DivS,
    BinOp::DivU,
    BinOp::RemS,
    BinOp::RemU,
    BinOp::MulUH,
];

fn emit(ctx: &mut Context, op: BinOp, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) {
    match op {
        BinOp::Add => ctx.gen_add(ty, d, a, b),
        BinOp::Sub => ctx.gen_sub(ty, d, a, b),
        BinOp::Mul => ctx.gen_mul(ty, d, a, b),
        BinOp::And => ctx.gen_and(ty, d, a, b),
        BinOp::Or => ctx.gen_or(ty, d, a, b),
        BinOp::Xor => ctx.gen_xor(ty, d, a, b),
        BinOp::Shl => ctx.gen_shl(ty, d, a, b),
        BinOp::Shr => ctx.gen_shr(ty, d, a, b),
        BinOp::Sar => ctx.gen_sar(ty, d, a, b),
        BinOp::RotL => ctx.gen_rotl(ty, d, a, b),
        BinOp::DivS => ctx.gen_divs(ty, d, a, b),
        BinOp::DivU => ctx.gen_divu(ty, d, a, b),
        BinOp::RemS => ctx.gen_rems(ty, d, a, b),
        BinOp::RemU => ctx.gen_remu(ty, d, a, b),
        BinOp::MulUH => ctx.gen_muluh(ty, d, a, b),
    };
}

/// Two's-complement result of `op` at the width of `ty`.
fn reference(op: BinOp, ty: Type, a: u64, b: u64) -> u64 {
    let m = ty.mask();
    let (a, b) = (a & m, b & m);
    let bits = ty.size_bits();
    let sh = (b % bits as u64) as u32;
    let r = match ty {
        Type::I32 => {
            let (x, y) = (a as u32, b as u32);
            let (sx, sy) = (x as i32, y as i32);
            (match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::And => x & y,
                BinOp::Or => x | y,
                BinOp::Xor => x ^ y,
                BinOp::Shl => x << sh,
                BinOp::Shr => x >> sh,
                BinOp::Sar => (sx >> sh) as u32,
                BinOp::RotL => x.rotate_left(sh),
                BinOp::DivS if y == 0 => u32::MAX,
                BinOp::DivS => sx.wrapping_div(sy) as u32,
                BinOp::DivU => x.checked_div(y).unwrap_or(u32::MAX),
                BinOp::RemS if y == 0 => x,
                BinOp::RemS => sx.wrapping_rem(sy) as u32,
                BinOp::RemU => x.checked_rem(y).unwrap_or(x),
                BinOp::MulUH => ((x as u64 * y as u64) >> 32) as u32,
            }) as u64
        }
        Type::I64 => {
            let (sx, sy) = (a as i64, b as i64);
            match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Xor => a ^ b,
                BinOp::Shl => a << sh,
                BinOp::Shr => a >> sh,
                BinOp::Sar => (sx >> sh) as u64,
                BinOp::RotL => a.rotate_left(sh),
                BinOp::DivS if b == 0 => u64::MAX,
                BinOp::DivS => sx.wrapping_div(sy) as u64,
                BinOp::DivU => a.checked_div(b).unwrap_or(u64::MAX),
                BinOp::RemS if b == 0 => a,
                BinOp::RemS => sx.wrapping_rem(sy) as u64,
                BinOp::RemU => a.checked_rem(b).unwrap_or(a),
                BinOp::MulUH => ((a as u128 * b as u128) >> 64) as u64,
            }
        }
    };
    r & m
}

/// Evaluate `op` in generated code. With `fold`, both operands are
/// constants and the optimizer computes the result.
fn evaluate(op: BinOp, ty: Type, a: u64, b: u64, fold: bool) -> u64 {
    let (a, b) = (a & ty.mask(), b & ty.mask());
    let mut ctx = ir_context();
    let env = ctx.env();
    let (x, y) = if fold {
        (ctx.new_const(ty, a), ctx.new_const(ty, b))
    } else {
        let x = ctx.new_temp(ty);
        let y = ctx.new_temp(ty);
        ctx.gen_ld(ty, x, env, slot(0));
        ctx.gen_ld(ty, y, env, slot(1));
        (x, y)
    };
    let d = ctx.new_temp(ty);
    emit(&mut ctx, op, ty, d, x, y);
    ctx.gen_st(ty, d, env, slot(2));
    ctx.gen_exit_tb(TB_EXIT_NOCHAIN);

    let mut e = [0u64; ENV_WORDS];
    e[0] = a;
    e[1] = b;
    run_ir(&mut ctx, &mut e);
    e[2] & ty.mask()
}

#[test]
fn division_edge_cases() {
    for ty in [Type::I32, Type::I64] {
        let min = 1u64 << (ty.size_bits() - 1);
        let cases = [
            (BinOp::DivS, 7, 0),
            (BinOp::DivU, 7, 0),
            (BinOp::RemS, 7, 0),
            (BinOp::RemU, 7, 0),
            (BinOp::DivS, min, u64::MAX),
            (BinOp::RemS, min, u64::MAX),
        ];
        for (op, a, b) in cases {
            for fold in [false, true] {
                assert_eq!(
                    evaluate(op, ty, a, b, fold),
                    reference(op, ty, a, b),
                    "{op:?} {ty:?} {a:#x} {b:#x} fold={fold}"
                );
            }
        }
    }
}

fn operand() -> impl Strategy<Value = u64> {
    prop_oneof![
        any::<u64>(),
        Just(0u64),
        Just(1u64),
        Just(u64::MAX),
        Just(0x8000_0000u64),
        Just(1u64 << 63),
        0u64..70,
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn generated_code_matches_reference(
        op in proptest::sample::select(BIN_OPS.to_vec()),
        wide in any::<bool>(),
        a in operand(),
        b in operand(),
    ) {
        let ty = if wide { Type::I64 } else { Type::I32 };
        let want = reference(op, ty, a, b);
        prop_assert_eq!(evaluate(op, ty, a, b, false), want);
        prop_assert_eq!(evaluate(op, ty, a, b, true), want);
    }
}
