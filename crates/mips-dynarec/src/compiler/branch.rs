//! Branches and jumps. Every one of them ends the block, after compiling its delay slot.

use super::{reg, CompileError, Compiler};
use crate::{
    emitter::{Cond, Emitter, Src},
    regcache::Access,
    state::{offset_of, BRANCH_TEMP, RA},
};
use log::trace;
use mips_decomp::{
    instruction::{Mnenomic, ParsedInstruction},
    INSTRUCTION_SIZE,
};

/// Target of a branch or an absolute jump at `pc`.
fn static_target(instr: &ParsedInstruction, pc: u32) -> u32 {
    instr
        .try_resolve_static_jump(pc)
        .unwrap_or_else(|| unreachable!("{instr} has no static target"))
}

impl<'a, E: Emitter> Compiler<'a, E> {
    /// `beq`, `bne` and their likely variants.
    pub(super) fn comp_rel_branch(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let cond = match instr.mnemonic() {
            Mnenomic::Beq | Mnenomic::Beql => Cond::Equal,
            _ => Cond::NotEqual,
        };
        self.do_branch(instr, cond, reg(instr.rs()), Some(reg(instr.rt())))
    }

    /// Branches comparing a register against zero.
    pub(super) fn comp_rel_branch_ri(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        use Mnenomic::*;
        let cond = match instr.mnemonic() {
            Blez | Blezl => Cond::LessEqual,
            Bgtz | Bgtzl => Cond::Greater,
            Bltz | Bltzl | Bltzal | Bltzall => Cond::Less,
            _ => Cond::GreaterEqual,
        };
        self.do_branch(instr, cond, reg(instr.rs()), None)
    }

    /// Compiles a conditional branch of `rs` against `rt`, or against zero if there is no `rt`.
    fn do_branch(
        &mut self,
        instr: &ParsedInstruction,
        cond: Cond,
        rs: usize,
        rt: Option<usize>,
    ) -> Result<(), CompileError> {
        let pc = self.js.compiler_pc;
        let target = static_target(instr, pc);
        let fall = pc.wrapping_add(2 * INSTRUCTION_SIZE);
        let likely = instr.discards_delay_slot();
        let link = instr.mnemonic().links();
        self.js.compiling = false;

        let lhs = self.regs.get_imm(rs);
        let rhs = rt.map_or(Some(0), |rt| self.regs.get_imm(rt));
        if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
            let taken = cond.holds(lhs, rhs);
            trace!("branch at {pc:#010x} is always {}", if taken { "taken" } else { "skipped" });
            if link {
                self.regs.set_imm(RA, fall);
            }
            if taken || !likely {
                self.compile_delay_slot()?;
                if self.js.cancelled {
                    return Ok(());
                }
            }
            self.flush_all();
            self.write_exit(if taken { target } else { fall });
            return Ok(());
        }

        if likely {
            return self.do_likely_branch(cond, rs, rt, target, fall, link);
        }

        let delay = self.decode(pc.wrapping_add(INSTRUCTION_SIZE))?;
        let clobbered = delay
            .output_register()
            .is_some_and(|out| reg(out) == rs || Some(reg(out)) == rt);
        let reads_ra = link && (rs == RA || rt == Some(RA));

        if clobbered || reads_ra {
            // The delay slot changes an operand, so the outcome is decided before running it.
            self.emit_compare(rs, rt)?;
            self.emit().store_cond(cond, offset_of(BRANCH_TEMP));
            self.regs.release_spill_locks();
            if link {
                self.regs.set_imm(RA, fall);
            }
            self.compile_delay_slot()?;
            if self.js.cancelled {
                return Ok(());
            }
            self.flush_all();
            let emit = self.emit();
            emit.compare_state(offset_of(BRANCH_TEMP), 0);
            let not_taken = emit.jump_if(Cond::Equal);
            self.write_exit(target);
            self.emit().bind(not_taken);
            self.write_exit(fall);
            return Ok(());
        }

        if link {
            self.regs.set_imm(RA, fall);
        }
        self.compile_delay_slot()?;
        if self.js.cancelled {
            return Ok(());
        }
        self.emit_compare(rs, rt)?;
        self.flush_all();
        let not_taken = self.emit().jump_if(cond.invert());
        self.write_exit(target);
        self.emit().bind(not_taken);
        self.write_exit(fall);
        Ok(())
    }

    /// A branch whose delay slot only runs when it is taken. A skipped delay slot is not charged.
    fn do_likely_branch(
        &mut self,
        cond: Cond,
        rs: usize,
        rt: Option<usize>,
        target: u32,
        fall: u32,
        link: bool,
    ) -> Result<(), CompileError> {
        self.emit_compare(rs, rt)?;
        self.flush_all();
        let emit = self.emit();
        if link {
            emit.store_state_imm(offset_of(RA), fall);
        }
        let not_taken = emit.jump_if(cond.invert());

        let amount = self.js.downcount_amount;
        let regs = self.regs.clone();
        let delay_slot = self.compile_delay_slot();
        if delay_slot.is_ok() && !self.js.cancelled {
            self.flush_all();
            self.write_exit(target);
        }

        // The skipped path still needs its exit, even when the delay slot faulted.
        self.regs = regs;
        self.emit().bind(not_taken);
        self.write_exit_with_amount(fall, amount);
        delay_slot
    }

    /// Compares `rs` against `rt` (or zero), setting the host flags.
    fn emit_compare(&mut self, rs: usize, rt: Option<usize>) -> Result<(), CompileError> {
        self.regs.spill_lock(rs);
        if let Some(rt) = rt {
            self.regs.spill_lock(rt);
        }
        let lhs = self.map_reg(rs, Access::Read)?;
        let rhs = match rt.map(|rt| (rt, self.regs.get_imm(rt))) {
            None => Src::Imm(0),
            Some((_, Some(value))) => Src::Imm(value),
            Some((rt, None)) => Src::Reg(self.map_reg(rt, Access::Read)?),
        };
        self.emit().compare(lhs, rhs);
        Ok(())
    }

    /// `j` and `jal`.
    pub(super) fn comp_jump(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let pc = self.js.compiler_pc;
        let target = static_target(instr, pc);
        self.js.compiling = false;
        if instr.mnemonic() == Mnenomic::Jal {
            self.regs.set_imm(RA, pc.wrapping_add(2 * INSTRUCTION_SIZE));
        }

        self.compile_delay_slot()?;
        if self.js.cancelled {
            return Ok(());
        }
        self.flush_all();
        self.write_exit(target);
        Ok(())
    }

    /// `jr` and `jalr`, which leave through the dispatcher unless the target is a known constant.
    pub(super) fn comp_jump_reg(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let pc = self.js.compiler_pc;
        let fall = pc.wrapping_add(2 * INSTRUCTION_SIZE);
        let rs = reg(instr.rs());
        let rd = match instr.mnemonic() {
            Mnenomic::Jalr => reg(instr.rd()),
            _ => 0,
        };
        self.js.compiling = false;

        if let Some(target) = self.regs.get_imm(rs) {
            self.regs.set_imm(rd, fall);
            self.compile_delay_slot()?;
            if self.js.cancelled {
                return Ok(());
            }
            self.flush_all();
            self.write_exit(target);
            return Ok(());
        }

        let delay = self.decode(pc.wrapping_add(INSTRUCTION_SIZE))?;
        let clobbered = delay.output_register().is_some_and(|out| reg(out) == rs);
        if clobbered || (rd != 0 && rd == rs) {
            let src = self.map_reg(rs, Access::Read)?;
            self.emit().store_state(offset_of(BRANCH_TEMP), src);
            self.regs.set_imm(rd, fall);
            self.compile_delay_slot()?;
            if self.js.cancelled {
                return Ok(());
            }
            self.flush_all();
            self.emit().load_state(E::SCRATCH, offset_of(BRANCH_TEMP));
            self.write_exit_dest_in_reg(E::SCRATCH);
            return Ok(());
        }

        self.regs.set_imm(rd, fall);
        self.compile_delay_slot()?;
        if self.js.cancelled {
            return Ok(());
        }
        let src = self.map_reg(rs, Access::Read)?;
        self.flush_all();
        self.write_exit_dest_in_reg(src);
        Ok(())
    }
}
