//! RV64 instruction encoders for hand-assembled test programs.

#![allow(dead_code)]

pub const ZERO: u32 = 0;
pub const RA: u32 = 1;
pub const SP: u32 = 2;
pub const T0: u32 = 5;
pub const T1: u32 = 6;
pub const T2: u32 = 7;
pub const S0: u32 = 8;
pub const S1: u32 = 9;
pub const A0: u32 = 10;
pub const A1: u32 = 11;
pub const A2: u32 = 12;
pub const A3: u32 = 13;

const OP_LOAD: u32 = 0b0000011;
const OP_MISC_MEM: u32 = 0b0001111;
const OP_IMM: u32 = 0b0010011;
const OP_AUIPC: u32 = 0b0010111;
const OP_IMM_32: u32 = 0b0011011;
const OP_STORE: u32 = 0b0100011;
const OP_AMO: u32 = 0b0101111;
const OP_REG: u32 = 0b0110011;
const OP_LUI: u32 = 0b0110111;
const OP_REG_32: u32 = 0b0111011;
const OP_BRANCH: u32 = 0b1100011;
const OP_JALR: u32 = 0b1100111;
const OP_JAL: u32 = 0b1101111;
const OP_SYSTEM: u32 = 0b1110011;

fn rv_i(imm: i32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    let imm = (imm as u32) & 0xfff;
    (imm << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

fn rv_r(f7: u32, rs2: u32, rs1: u32, f3: u32, rd: u32, op: u32) -> u32 {
    (f7 << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

fn rv_s(imm: i32, rs2: u32, rs1: u32, f3: u32) -> u32 {
    let i = imm as u32;
    (((i >> 5) & 0x7f) << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | ((i & 0x1f) << 7) | OP_STORE
}

fn rv_b(imm: i32, rs2: u32, rs1: u32, f3: u32) -> u32 {
    let i = imm as u32;
    let b12 = (i >> 12) & 1;
    let b11 = (i >> 11) & 1;
    let b10_5 = (i >> 5) & 0x3f;
    let b4_1 = (i >> 1) & 0xf;
    (b12 << 31)
        | (b10_5 << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (f3 << 12)
        | (b4_1 << 8)
        | (b11 << 7)
        | OP_BRANCH
}

fn rv_amo(f5: u32, rs2: u32, rs1: u32, wide: bool, rd: u32) -> u32 {
    let f3 = if wide { 3 } else { 2 };
    rv_r(f5 << 2, rs2, rs1, f3, rd, OP_AMO)
}

// ── RV64I ──────────────────────────────────────────────

pub fn lui(rd: u32, imm: i32) -> u32 {
    ((imm as u32) & 0xffff_f000) | (rd << 7) | OP_LUI
}
pub fn auipc(rd: u32, imm: i32) -> u32 {
    ((imm as u32) & 0xffff_f000) | (rd << 7) | OP_AUIPC
}

pub fn jal(rd: u32, imm: i32) -> u32 {
    let i = imm as u32;
    let b20 = (i >> 20) & 1;
    let b10_1 = (i >> 1) & 0x3ff;
    let b11 = (i >> 11) & 1;
    let b19_12 = (i >> 12) & 0xff;
    (b20 << 31) | (b10_1 << 21) | (b11 << 20) | (b19_12 << 12) | (rd << 7) | OP_JAL
}
pub fn jalr(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0, rd, OP_JALR)
}

pub fn beq(rs1: u32, rs2: u32, imm: i32) -> u32 {
    rv_b(imm, rs2, rs1, 0b000)
}
pub fn bne(rs1: u32, rs2: u32, imm: i32) -> u32 {
    rv_b(imm, rs2, rs1, 0b001)
}
pub fn blt(rs1: u32, rs2: u32, imm: i32) -> u32 {
    rv_b(imm, rs2, rs1, 0b100)
}
pub fn bge(rs1: u32, rs2: u32, imm: i32) -> u32 {
    rv_b(imm, rs2, rs1, 0b101)
}
pub fn bltu(rs1: u32, rs2: u32, imm: i32) -> u32 {
    rv_b(imm, rs2, rs1, 0b110)
}

pub fn lb(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b000, rd, OP_LOAD)
}
pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b010, rd, OP_LOAD)
}
pub fn ld(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b011, rd, OP_LOAD)
}
pub fn lbu(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b100, rd, OP_LOAD)
}
pub fn lwu(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b110, rd, OP_LOAD)
}
pub fn sb(rs2: u32, rs1: u32, imm: i32) -> u32 {
    rv_s(imm, rs2, rs1, 0b000)
}
pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    rv_s(imm, rs2, rs1, 0b010)
}
pub fn sd(rs2: u32, rs1: u32, imm: i32) -> u32 {
    rv_s(imm, rs2, rs1, 0b011)
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b000, rd, OP_IMM)
}
pub fn slti(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b010, rd, OP_IMM)
}
pub fn sltiu(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b011, rd, OP_IMM)
}
pub fn xori(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b100, rd, OP_IMM)
}
pub fn slli(rd: u32, rs1: u32, sh: u32) -> u32 {
    rv_i(sh as i32, rs1, 0b001, rd, OP_IMM)
}
pub fn srli(rd: u32, rs1: u32, sh: u32) -> u32 {
    rv_i(sh as i32, rs1, 0b101, rd, OP_IMM)
}
pub fn srai(rd: u32, rs1: u32, sh: u32) -> u32 {
    rv_i((0x400 | sh) as i32, rs1, 0b101, rd, OP_IMM)
}
pub fn nop() -> u32 {
    addi(ZERO, ZERO, 0)
}

pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0, rs2, rs1, 0b000, rd, OP_REG)
}
pub fn sub(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0x20, rs2, rs1, 0b000, rd, OP_REG)
}
pub fn sll(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0, rs2, rs1, 0b001, rd, OP_REG)
}
pub fn slt(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0, rs2, rs1, 0b010, rd, OP_REG)
}
pub fn sltu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0, rs2, rs1, 0b011, rd, OP_REG)
}
pub fn sra(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0x20, rs2, rs1, 0b101, rd, OP_REG)
}

pub fn addiw(rd: u32, rs1: u32, imm: i32) -> u32 {
    rv_i(imm, rs1, 0b000, rd, OP_IMM_32)
}
pub fn sraiw(rd: u32, rs1: u32, sh: u32) -> u32 {
    rv_i((0x400 | sh) as i32, rs1, 0b101, rd, OP_IMM_32)
}
pub fn addw(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0, rs2, rs1, 0b000, rd, OP_REG_32)
}
pub fn sllw(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(0, rs2, rs1, 0b001, rd, OP_REG_32)
}

pub fn fence() -> u32 {
    // fence rw, rw
    rv_i(0x033, 0, 0b000, 0, OP_MISC_MEM)
}
pub fn fence_i() -> u32 {
    rv_i(0, 0, 0b001, 0, OP_MISC_MEM)
}
pub fn ecall() -> u32 {
    OP_SYSTEM
}
pub fn ebreak() -> u32 {
    (1 << 20) | OP_SYSTEM
}
pub fn mret() -> u32 {
    0x3020_0073
}
pub fn wfi() -> u32 {
    0x1050_0073
}

// ── M ──────────────────────────────────────────────────

pub fn mul(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b000, rd, OP_REG)
}
pub fn mulh(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b001, rd, OP_REG)
}
pub fn mulhsu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b010, rd, OP_REG)
}
pub fn mulhu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b011, rd, OP_REG)
}
pub fn div(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b100, rd, OP_REG)
}
pub fn divu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b101, rd, OP_REG)
}
pub fn rem(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b110, rd, OP_REG)
}
pub fn remu(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b111, rd, OP_REG)
}
pub fn divw(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b100, rd, OP_REG_32)
}
pub fn remw(rd: u32, rs1: u32, rs2: u32) -> u32 {
    rv_r(1, rs2, rs1, 0b110, rd, OP_REG_32)
}

// ── A ──────────────────────────────────────────────────

pub fn lr_w(rd: u32, rs1: u32) -> u32 {
    rv_amo(0b00010, 0, rs1, false, rd)
}
pub fn lr_d(rd: u32, rs1: u32) -> u32 {
    rv_amo(0b00010, 0, rs1, true, rd)
}
pub fn sc_w(rd: u32, rs2: u32, rs1: u32) -> u32 {
    rv_amo(0b00011, rs2, rs1, false, rd)
}
pub fn sc_d(rd: u32, rs2: u32, rs1: u32) -> u32 {
    rv_amo(0b00011, rs2, rs1, true, rd)
}
pub fn amoswap_w(rd: u32, rs2: u32, rs1: u32) -> u32 {
    rv_amo(0b00001, rs2, rs1, false, rd)
}
pub fn amoadd_w(rd: u32, rs2: u32, rs1: u32) -> u32 {
    rv_amo(0b00000, rs2, rs1, false, rd)
}
pub fn amoadd_d(rd: u32, rs2: u32, rs1: u32) -> u32 {
    rv_amo(0b00000, rs2, rs1, true, rd)
}
pub fn amomax_d(rd: u32, rs2: u32, rs1: u32) -> u32 {
    rv_amo(0b10100, rs2, rs1, true, rd)
}
pub fn amominu_d(rd: u32, rs2: u32, rs1: u32) -> u32 {
    rv_amo(0b11000, rs2, rs1, true, rd)
}

// ── Zicsr ──────────────────────────────────────────────

pub fn csrrw(rd: u32, csr: u16, rs1: u32) -> u32 {
    rv_i(csr as i32, rs1, 0b001, rd, OP_SYSTEM)
}
pub fn csrrs(rd: u32, csr: u16, rs1: u32) -> u32 {
    rv_i(csr as i32, rs1, 0b010, rd, OP_SYSTEM)
}
pub fn csrrc(rd: u32, csr: u16, rs1: u32) -> u32 {
    rv_i(csr as i32, rs1, 0b011, rd, OP_SYSTEM)
}
pub fn csrrwi(rd: u32, csr: u16, uimm: u32) -> u32 {
    rv_i(csr as i32, uimm, 0b101, rd, OP_SYSTEM)
}
pub fn csrrsi(rd: u32, csr: u16, uimm: u32) -> u32 {
    rv_i(csr as i32, uimm, 0b110, rd, OP_SYSTEM)
}
pub fn csrr(rd: u32, csr: u16) -> u32 {
    csrrs(rd, csr, ZERO)
}

/// Load a value that fits a sign-extended 32-bit immediate into `rd`
/// with `lui` + `addiw`.
pub fn li(rd: u32, val: i32) -> [u32; 2] {
    let lo = (val << 20) >> 20;
    let hi = val.wrapping_sub(lo);
    [lui(rd, hi), addiw(rd, rd, lo)]
}
