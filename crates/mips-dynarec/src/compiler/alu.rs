//! Arithmetic, logic, shifts and HI/LO moves.

use super::{reg, CompileError, Compiler};
use crate::{
    emitter::{AluOp, Cond, Emitter, HostReg, ShiftOp, Src},
    regcache::Access,
    state::{offset_of, HI, LO},
};
use mips_decomp::instruction::{Mnenomic, ParsedInstruction};

/// How a two operand instruction combines its inputs.
#[derive(Debug, Clone, Copy)]
enum Op {
    Alu(AluOp),
    Set(Cond),
}

impl Op {
    const fn fold(self, lhs: u32, rhs: u32) -> u32 {
        match self {
            Op::Alu(op) => op.fold(lhs, rhs),
            Op::Set(cond) => cond.holds(lhs, rhs) as u32,
        }
    }
}

impl<'a, E: Emitter> Compiler<'a, E> {
    pub(super) fn comp_imm_arith(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let (rt, rs) = (reg(instr.rt()), reg(instr.rs()));
        if rt == 0 {
            return Ok(());
        }

        let (op, imm) = match instr.mnemonic() {
            Mnenomic::Addi | Mnenomic::Addiu => (Op::Alu(AluOp::Add), instr.signed_immediate()),
            Mnenomic::Slti => (Op::Set(Cond::Less), instr.signed_immediate()),
            Mnenomic::Sltiu => (Op::Set(Cond::Below), instr.signed_immediate()),
            Mnenomic::Andi => (Op::Alu(AluOp::And), instr.immediate()),
            Mnenomic::Ori => (Op::Alu(AluOp::Or), instr.immediate()),
            Mnenomic::Xori => (Op::Alu(AluOp::Xor), instr.immediate()),
            other => unreachable!("{} is not an immediate instruction", other.name()),
        };

        if let Some(value) = self.regs.get_imm(rs) {
            self.regs.set_imm(rt, op.fold(value, imm));
            return Ok(());
        }

        let (dst, src) = self.map_dirty_in(rt, rs)?;
        match op {
            Op::Alu(op) => self.emit().alu(op, dst, src, Src::Imm(imm)),
            Op::Set(cond) => self.emit().set_cond(cond, dst, src, Src::Imm(imm)),
        }
        Ok(())
    }

    pub(super) fn comp_lui(&mut self, instr: &ParsedInstruction) {
        let rt = reg(instr.rt());
        if rt != 0 {
            self.regs.set_imm(rt, instr.immediate() << 16);
        }
    }

    pub(super) fn comp_rtype3(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let (rd, rs, rt) = (reg(instr.rd()), reg(instr.rs()), reg(instr.rt()));
        if rd == 0 {
            return Ok(());
        }

        let op = match instr.mnemonic() {
            Mnenomic::Add | Mnenomic::Addu => Op::Alu(AluOp::Add),
            Mnenomic::Sub | Mnenomic::Subu => Op::Alu(AluOp::Sub),
            Mnenomic::And => Op::Alu(AluOp::And),
            Mnenomic::Or => Op::Alu(AluOp::Or),
            Mnenomic::Xor => Op::Alu(AluOp::Xor),
            Mnenomic::Nor => Op::Alu(AluOp::Nor),
            Mnenomic::Slt => Op::Set(Cond::Less),
            Mnenomic::Sltu => Op::Set(Cond::Below),
            other => unreachable!("{} is not a register instruction", other.name()),
        };

        match (self.regs.get_imm(rs), self.regs.get_imm(rt)) {
            (Some(lhs), Some(rhs)) => {
                self.regs.set_imm(rd, op.fold(lhs, rhs));
            }
            (_, Some(rhs)) => {
                let (dst, lhs) = self.map_dirty_in(rd, rs)?;
                self.emit_op(op, dst, lhs, Src::Imm(rhs));
            }
            (Some(lhs), None) if matches!(op, Op::Alu(alu) if alu.is_commutative()) => {
                let (dst, rhs) = self.map_dirty_in(rd, rt)?;
                self.emit_op(op, dst, rhs, Src::Imm(lhs));
            }
            _ => {
                let (dst, lhs, rhs) = self.map_dirty_in_in(rd, rs, rt)?;
                self.emit_op(op, dst, lhs, Src::Reg(rhs));
            }
        }
        Ok(())
    }

    fn emit_op(&mut self, op: Op, dst: HostReg, lhs: HostReg, rhs: Src) {
        match op {
            Op::Alu(op) => self.emit().alu(op, dst, lhs, rhs),
            Op::Set(cond) => self.emit().set_cond(cond, dst, lhs, rhs),
        }
    }

    pub(super) fn comp_shift_imm(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let (rd, rt, sa) = (reg(instr.rd()), reg(instr.rt()), instr.sa());
        if rd == 0 {
            return Ok(());
        }
        let op = shift_op(instr.mnemonic());

        if let Some(value) = self.regs.get_imm(rt) {
            self.regs.set_imm(rd, op.fold(value, sa));
            return Ok(());
        }
        let (dst, src) = self.map_dirty_in(rd, rt)?;
        self.emit().shift(op, dst, src, Src::Imm(sa));
        Ok(())
    }

    /// `rd = rt shifted by the low five bits of rs`.
    pub(super) fn comp_shift_var(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let (rd, rs, rt) = (reg(instr.rd()), reg(instr.rs()), reg(instr.rt()));
        if rd == 0 {
            return Ok(());
        }
        let op = shift_op(instr.mnemonic());

        match (self.regs.get_imm(rt), self.regs.get_imm(rs)) {
            (Some(value), Some(amount)) => self.regs.set_imm(rd, op.fold(value, amount)),
            (_, Some(amount)) => {
                let (dst, src) = self.map_dirty_in(rd, rt)?;
                self.emit().shift(op, dst, src, Src::Imm(amount & 31));
            }
            _ => {
                let (dst, value, amount) = self.map_dirty_in_in(rd, rt, rs)?;
                self.emit().shift(op, dst, value, Src::Reg(amount));
            }
        }
        Ok(())
    }

    pub(super) fn comp_mult(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let signed = instr.mnemonic() == Mnenomic::Mult;
        let (rs, rt) = self.map_in_in(reg(instr.rs()), reg(instr.rt()))?;
        self.emit().multiply(signed, rs, rt, offset_of(HI), offset_of(LO));
        Ok(())
    }

    /// HI and LO are never cached, they always live in guest state memory.
    pub(super) fn comp_hilo(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let offset = match instr.mnemonic() {
            Mnenomic::Mfhi | Mnenomic::Mthi => offset_of(HI),
            _ => offset_of(LO),
        };

        match instr.mnemonic() {
            Mnenomic::Mfhi | Mnenomic::Mflo => {
                let rd = reg(instr.rd());
                if rd != 0 {
                    let dst = self.map_reg(rd, Access::Write)?;
                    self.emit().load_state(dst, offset);
                }
            }
            _ => {
                let rs = reg(instr.rs());
                if let Some(value) = self.regs.get_imm(rs) {
                    self.emit().store_state_imm(offset, value);
                } else {
                    let src = self.map_reg(rs, Access::Read)?;
                    self.emit().store_state(offset, src);
                }
            }
        }
        Ok(())
    }
}

fn shift_op(mnemonic: Mnenomic) -> ShiftOp {
    match mnemonic {
        Mnenomic::Sll | Mnenomic::Sllv => ShiftOp::LogicalLeft,
        Mnenomic::Srl | Mnenomic::Srlv => ShiftOp::LogicalRight,
        _ => ShiftOp::ArithmeticRight,
    }
}
