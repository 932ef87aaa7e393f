//! Translates runs of guest instructions into host code, one block at a time.

use crate::{
    cache::{BlockCache, Exit},
    config::JitOptions,
    emitter::{Arg, Cond, Emitter, HostReg},
    interpreter,
    regcache::{Access, RegCache},
    runtime::{Bus, BusError, Environment, FallbackFn, FastRegion},
    state::{offset_of, CoreState, CORE_STATE, DOWNCOUNT, PC},
};
use log::{debug, error, trace, warn};
use mips_decomp::{
    instruction::{Mnenomic, ParsedInstruction},
    INSTRUCTION_SIZE,
};

mod alu;
mod branch;
mod load_store;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("all host registers are spill locked at {pc:#010x}")]
    OutOfSpillableRegisters { pc: u32 },
    #[error("guest register {reg} is not mapped at {pc:#010x}")]
    RegisterNotMapped { pc: u32, reg: usize },
    #[error("invalid instruction {raw:#010x} at {pc:#010x}")]
    InvalidInstruction { pc: u32, raw: u32 },
    #[error("no code generation or interpreter routine for {raw:#010x} at {pc:#010x}")]
    NoFallback { pc: u32, raw: u32 },
    #[error("failed to fetch the instruction at {pc:#010x}")]
    Fetch {
        pc: u32,
        #[source]
        source: BusError,
    },
    #[error("ran out of code space")]
    CodeSpaceExhausted,
}

/// Session state of the block being compiled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitState {
    /// Address of the instruction being compiled.
    pub compiler_pc: u32,
    pub block_start: u32,
    /// Cycles charged at the next exit.
    pub downcount_amount: u32,
    pub in_delay_slot: bool,
    /// Cleared by any instruction that ends the block.
    pub compiling: bool,
    /// Set when the block was cut short by a hard fault.
    pub cancelled: bool,
}

const BLOCK_ALIGNMENT: usize = 16;

/// Compiles the block starting at `start`, returning its block number.
///
/// On error nothing is published and the arena is rolled back to where the block began.
pub fn compile_block<E: Emitter>(
    cache: &mut BlockCache<E>,
    bus: &mut dyn Bus,
    options: &JitOptions,
    regions: &[FastRegion],
    start: u32,
) -> Result<usize, CompileError> {
    let num = cache.allocate_block(start);
    let result = Compiler::new(cache, bus, options, regions, num).run(start);
    if let Err(err) = result {
        cache.discard_block(num);
        return Err(err);
    }
    if cache.emitter_mut().code_mut().take_overflow() {
        cache.discard_block(num);
        return Err(CompileError::CodeSpaceExhausted);
    }
    cache.finalize_block(num, options.enable_block_link);
    Ok(num)
}

pub(crate) struct Compiler<'a, E: Emitter> {
    cache: &'a mut BlockCache<E>,
    bus: &'a mut dyn Bus,
    options: &'a JitOptions,
    regions: &'a [FastRegion],
    regs: RegCache,
    js: JitState,
    block: usize,
    exits: Vec<Exit>,
    instructions: u32,
}

impl<'a, E: Emitter> Compiler<'a, E> {
    fn new(
        cache: &'a mut BlockCache<E>,
        bus: &'a mut dyn Bus,
        options: &'a JitOptions,
        regions: &'a [FastRegion],
        block: usize,
    ) -> Self {
        Self {
            cache,
            bus,
            options,
            regions,
            regs: RegCache::new::<E>(),
            js: JitState::default(),
            block,
            exits: Vec::with_capacity(2),
            instructions: 0,
        }
    }

    fn run(mut self, start: u32) -> Result<(), CompileError> {
        debug!("compiling block at {start:#010x}");
        self.js = JitState {
            compiler_pc: start,
            block_start: start,
            compiling: true,
            ..Default::default()
        };
        self.regs.start();
        self.write_checked_entry(start);

        while self.js.compiling {
            if self.instructions as usize >= self.options.max_block_instructions {
                trace!("block at {start:#010x} reached the instruction limit");
                self.flush_all();
                self.write_exit(self.js.compiler_pc);
                break;
            }
            self.compile_instruction()?;
            self.js.compiler_pc = self.js.compiler_pc.wrapping_add(INSTRUCTION_SIZE);
        }

        self.emit().align(BLOCK_ALIGNMENT);
        let exits = std::mem::take(&mut self.exits);
        let instructions = self.instructions;
        if let Some(block) = self.cache.block_mut(self.block) {
            block.original_size = instructions;
            block.exits = exits;
        }
        Ok(())
    }

    fn emit(&mut self) -> &mut E {
        self.cache.emitter_mut()
    }

    fn fetch(&mut self, pc: u32) -> Result<u32, CompileError> {
        self.bus.read_u32(pc).map_err(|source| {
            error!("failed to fetch instruction at {pc:#010x}: {source}");
            CompileError::Fetch { pc, source }
        })
    }

    fn decode(&mut self, pc: u32) -> Result<ParsedInstruction, CompileError> {
        let raw = self.fetch(pc)?;
        ParsedInstruction::new(raw).ok_or_else(|| {
            error!("invalid instruction {raw:#010x} at {pc:#010x}");
            CompileError::InvalidInstruction { pc, raw }
        })
    }

    fn compile_instruction(&mut self) -> Result<(), CompileError> {
        let pc = self.js.compiler_pc;
        self.regs.set_compiler_pc(pc);
        let instr = self.decode(pc)?;
        trace!("{pc:#010x}: {instr}");

        self.js.downcount_amount += instr.cycles();
        self.instructions += 1;
        self.compile_op(&instr)?;
        self.regs.release_spill_locks();
        Ok(())
    }

    /// Compiles the instruction after the branch at the current PC, which stays unchanged afterwards.
    fn compile_delay_slot(&mut self) -> Result<(), CompileError> {
        let pc = self.js.compiler_pc;
        self.js.compiler_pc = pc.wrapping_add(INSTRUCTION_SIZE);
        self.js.in_delay_slot = true;
        let result = self.compile_instruction();
        self.js.in_delay_slot = false;
        self.js.compiler_pc = pc;
        self.regs.set_compiler_pc(pc);
        result
    }

    fn compile_op(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        use Mnenomic::*;
        if self.js.in_delay_slot && instr.ends_block() {
            warn!(
                "{instr} in the delay slot at {:#010x} is undefined behaviour",
                self.js.compiler_pc
            );
            self.hard_fault();
            return Ok(());
        }

        match instr.mnemonic() {
            Addi | Addiu | Slti | Sltiu | Andi | Ori | Xori => self.comp_imm_arith(instr),
            Lui => {
                self.comp_lui(instr);
                Ok(())
            }
            Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu => self.comp_rtype3(instr),
            Sll | Srl | Sra => self.comp_shift_imm(instr),
            Sllv | Srlv | Srav => self.comp_shift_var(instr),
            Mult | Multu => self.comp_mult(instr),
            Mfhi | Mflo | Mthi | Mtlo => self.comp_hilo(instr),
            Lb | Lbu | Lh | Lhu | Lw | Sb | Sh | Sw => self.comp_itype_mem(instr),
            Lwl | Lwr | Swl | Swr => {
                warn!(
                    "{instr} at {:#010x} is disabled, compiling a hard fault",
                    self.js.compiler_pc
                );
                self.hard_fault();
                Ok(())
            }
            Beq | Bne | Beql | Bnel => self.comp_rel_branch(instr),
            Blez | Bgtz | Bltz | Bgez | Blezl | Bgtzl | Bltzl | Bgezl | Bltzal | Bgezal
            | Bltzall | Bgezall => self.comp_rel_branch_ri(instr),
            J | Jal => self.comp_jump(instr),
            Jr | Jalr => self.comp_jump_reg(instr),
            Syscall => self.comp_syscall(instr),
            Break => {
                self.comp_break();
                Ok(())
            }
            _ => self.comp_generic(instr),
        }
    }

    /// Runs a single instruction through the interpreter, with all guest state in memory.
    fn comp_generic(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        self.call_interpreter(instr, self.js.compiler_pc)
    }

    /// Flushes everything, writes `pc` to the guest state and calls the interpreter routine of `instr`.
    fn call_interpreter(&mut self, instr: &ParsedInstruction, pc: u32) -> Result<(), CompileError> {
        let raw = instr.raw();
        let Some(func) = interpreter::lookup(raw) else {
            let pc = self.js.compiler_pc;
            error!("{instr} at {pc:#010x} has no interpreter fallback");
            return Err(CompileError::NoFallback { pc, raw });
        };

        self.flush_all();
        let fallback: FallbackFn = Environment::call_fallback;
        let emit = self.emit();
        emit.store_state_imm(offset_of(PC), pc);
        emit.call(
            fallback as usize,
            &[Arg::Context, Arg::Imm(raw), Arg::Ptr(func as usize)],
        );
        Ok(())
    }

    fn comp_syscall(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        // The handler sees the address of the following instruction, where execution resumes.
        let next = self.js.compiler_pc.wrapping_add(INSTRUCTION_SIZE);
        self.call_interpreter(instr, next)?;
        self.write_syscall_exit();
        self.js.compiling = false;
        Ok(())
    }

    fn comp_break(&mut self) {
        let next = self.js.compiler_pc.wrapping_add(INSTRUCTION_SIZE);
        self.flush_all();
        let emit = self.emit();
        emit.store_state_imm(offset_of(CORE_STATE), CoreState::Halted as u32);
        emit.store_state_imm(offset_of(PC), next);
        self.write_syscall_exit();
        self.js.compiling = false;
    }

    /// Ends the block at the current instruction, which generated code refuses to run.
    fn hard_fault(&mut self) {
        let pc = self.js.compiler_pc;
        self.flush_all();
        let hard_fault = self.cache.stubs().hard_fault;
        let emit = self.emit();
        emit.store_state_imm(offset_of(PC), pc);
        emit.jump_to(hard_fault);
        self.js.compiling = false;
        self.js.cancelled = true;
    }

    /*
        Entries and exits.
    */

    fn write_checked_entry(&mut self, start: u32) {
        let outer_loop = self.cache.stubs().outer_loop;
        let emit = self.emit();
        emit.compare_state(offset_of(DOWNCOUNT), 0);
        let normal = emit.jump_if(Cond::GreaterEqual);
        emit.store_state_imm(offset_of(PC), start);
        emit.jump_to(outer_loop);
        emit.bind(normal);
        let normal_entry = emit.offset();
        if let Some(block) = self.cache.block_mut(self.block) {
            block.normal_entry = normal_entry;
        }
    }

    fn write_exit(&mut self, dest: u32) {
        self.write_exit_with_amount(dest, self.js.downcount_amount);
    }

    /// Exit to a statically known address. All registers must be flushed.
    fn write_exit_with_amount(&mut self, dest: u32, amount: u32) {
        let stubs = *self.cache.stubs();
        let link = self
            .options
            .enable_block_link
            .then(|| self.cache.get_block_number_from_start_address(dest))
            .flatten()
            .and_then(|num| self.cache.block(num))
            .map(|block| block.normal_entry);

        let emit = self.emit();
        emit.sub_state(offset_of(DOWNCOUNT), amount);
        emit.store_state_imm(offset_of(PC), dest);
        emit.jump_if_to(Cond::Less, stubs.outer_loop);
        let patch_offset = emit.patchable_jump(link.unwrap_or(stubs.dispatcher));
        self.exits.push(Exit {
            target: dest,
            patch_offset,
            linked: link.is_some(),
        });
    }

    /// Exit to an address only known at runtime, always through the dispatcher.
    fn write_exit_dest_in_reg(&mut self, dest: HostReg) {
        let dispatcher = self.cache.stubs().dispatcher;
        let amount = self.js.downcount_amount;
        let emit = self.emit();
        emit.sub_state(offset_of(DOWNCOUNT), amount);
        emit.store_state(offset_of(PC), dest);
        emit.jump_to(dispatcher);
    }

    /// Exit that lets the host stop execution before continuing at the PC already written.
    fn write_syscall_exit(&mut self) {
        let dispatcher = self.cache.stubs().dispatcher_check_core_state;
        let amount = self.js.downcount_amount;
        let emit = self.emit();
        emit.sub_state(offset_of(DOWNCOUNT), amount);
        emit.jump_to(dispatcher);
    }

    /*
        Register cache shorthands, the cache emits into the arena owned by the block cache.
    */

    fn map_reg(&mut self, reg: usize, access: Access) -> Result<HostReg, CompileError> {
        self.regs.map_reg(self.cache.emitter_mut(), reg, access)
    }

    fn map_in_in(&mut self, rs: usize, rt: usize) -> Result<(HostReg, HostReg), CompileError> {
        self.regs.map_in_in(self.cache.emitter_mut(), rs, rt)
    }

    fn map_dirty_in(&mut self, dst: usize, src: usize) -> Result<(HostReg, HostReg), CompileError> {
        self.regs.map_dirty_in(self.cache.emitter_mut(), dst, src)
    }

    fn map_dirty_in_in(
        &mut self,
        dst: usize,
        rs: usize,
        rt: usize,
    ) -> Result<(HostReg, HostReg, HostReg), CompileError> {
        self.regs.map_dirty_in_in(self.cache.emitter_mut(), dst, rs, rt)
    }

    fn flush_all(&mut self) {
        self.regs.flush_all(self.cache.emitter_mut());
    }
}

#[inline]
fn reg(index: u32) -> usize {
    index as usize
}
