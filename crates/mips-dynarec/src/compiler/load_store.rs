//! Guest memory access code generation.
//!
//! Accesses inside a fast region go straight to host memory, relative to [`Emitter::MEMBASE`] for the main
//! region. Everything else goes through the bus, using the helpers on [`Environment`].

use super::{reg, CompileError, Compiler};
use crate::{
    emitter::{AluOp, Arg, Cond, Emitter, HostAddr, HostReg, LoadKind, Src, StoreKind},
    regcache::Access,
    runtime::{Environment, FastRegion, ReadFn, WriteFn},
};
use mips_decomp::instruction::{Mnenomic, ParsedInstruction};

#[derive(Debug, Clone, Copy)]
enum MemOp {
    Load(LoadKind),
    Store(StoreKind),
}

impl MemOp {
    const fn size(self) -> u32 {
        match self {
            MemOp::Load(kind) => kind.size(),
            MemOp::Store(kind) => kind.size(),
        }
    }

    fn helper(self) -> usize {
        match self {
            MemOp::Load(kind) => {
                let func: ReadFn = match kind {
                    LoadKind::U8 => Environment::read_u8,
                    LoadKind::S8 => Environment::read_s8,
                    LoadKind::U16 => Environment::read_u16,
                    LoadKind::S16 => Environment::read_s16,
                    LoadKind::U32 => Environment::read_u32,
                };
                func as usize
            }
            MemOp::Store(kind) => {
                let func: WriteFn = match kind {
                    StoreKind::U8 => Environment::write_u8,
                    StoreKind::U16 => Environment::write_u16,
                    StoreKind::U32 => Environment::write_u32,
                };
                func as usize
            }
        }
    }
}

impl<'a, E: Emitter> Compiler<'a, E> {
    pub(super) fn comp_itype_mem(&mut self, instr: &ParsedInstruction) -> Result<(), CompileError> {
        let (rt, base, offset) = (reg(instr.rt()), reg(instr.base()), instr.offset());
        let access = match instr.mnemonic() {
            Mnenomic::Lb => MemOp::Load(LoadKind::S8),
            Mnenomic::Lbu => MemOp::Load(LoadKind::U8),
            Mnenomic::Lh => MemOp::Load(LoadKind::S16),
            Mnenomic::Lhu => MemOp::Load(LoadKind::U16),
            Mnenomic::Lw => MemOp::Load(LoadKind::U32),
            Mnenomic::Sb => MemOp::Store(StoreKind::U8),
            Mnenomic::Sh => MemOp::Store(StoreKind::U16),
            Mnenomic::Sw => MemOp::Store(StoreKind::U32),
            other => unreachable!("{} is not a memory access", other.name()),
        };

        match access {
            MemOp::Load(_) if rt == 0 => Ok(()),
            MemOp::Load(kind) => self.comp_load(kind, rt, base, offset),
            MemOp::Store(kind) => self.comp_store(kind, rt, base, offset),
        }
    }

    fn comp_load(&mut self, kind: LoadKind, rt: usize, base: usize, offset: i32) -> Result<(), CompileError> {
        let access = MemOp::Load(kind);
        if let Some(base) = self.regs.get_imm(base) {
            let addr = base.wrapping_add(offset as u32);
            return match self.find_region(addr, kind.size()) {
                Some((region, offset)) => {
                    let dst = self.map_reg(rt, Access::Write)?;
                    let host = self.constant_host_addr(region, offset);
                    self.emit().load_host(kind, dst, host);
                    Ok(())
                }
                None => {
                    let emit = self.emit();
                    emit.mov_imm(E::SCRATCH, addr);
                    emit.call(access.helper(), &[Arg::Context, Arg::Reg(E::SCRATCH)]);
                    let dst = self.map_reg(rt, Access::Write)?;
                    self.emit().mov(dst, E::SCRATCH);
                    Ok(())
                }
            };
        }

        self.regs.spill_lock(base);
        self.regs.spill_lock(rt);
        let base = self.map_reg(base, Access::Read)?;
        // The address is computed before the destination is written, so `rt == base` is fine.
        let dst = self.map_reg(rt, Access::Write)?;
        self.emit().lea(E::SCRATCH, base, offset);
        self.emit_dynamic_access(access, dst);
        Ok(())
    }

    fn comp_store(&mut self, kind: StoreKind, rt: usize, base: usize, offset: i32) -> Result<(), CompileError> {
        let access = MemOp::Store(kind);
        if let Some(base) = self.regs.get_imm(base) {
            let addr = base.wrapping_add(offset as u32);
            let src = self.map_reg(rt, Access::Read)?;
            match self.find_region(addr, kind.size()) {
                Some((region, offset)) => {
                    let host = self.constant_host_addr(region, offset);
                    self.emit().store_host(kind, host, src);
                }
                None => {
                    let emit = self.emit();
                    emit.mov_imm(E::SCRATCH, addr);
                    emit.call(
                        access.helper(),
                        &[Arg::Context, Arg::Reg(E::SCRATCH), Arg::Reg(src)],
                    );
                }
            }
            return Ok(());
        }

        let (base, src) = self.map_in_in(base, rt)?;
        self.emit().lea(E::SCRATCH, base, offset);
        self.emit_dynamic_access(access, src);
        Ok(())
    }

    /// The fast region holding the whole access and the offset of `addr` inside it.
    fn find_region(&self, addr: u32, size: u32) -> Option<(usize, u32)> {
        self.regions
            .iter()
            .enumerate()
            .find_map(|(i, region)| fast_offset(region, addr, size).map(|offset| (i, offset)))
    }

    /// Sets up the host address of a constant access, which may use the scratch and pointer registers.
    fn constant_host_addr(&mut self, region: usize, offset: u32) -> HostAddr {
        if region == 0 && offset <= i32::MAX as u32 {
            return HostAddr::Fixed(offset);
        }

        let ptr = self.regions[region].ptr.as_ptr() as usize;
        let emit = self.emit();
        emit.mov_imm(E::SCRATCH, offset);
        if region == 0 {
            HostAddr::Indexed(E::SCRATCH)
        } else {
            emit.mov_ptr(E::POINTER, ptr);
            HostAddr::Based {
                base: E::POINTER,
                index: E::SCRATCH,
            }
        }
    }

    /// Accesses the guest address held in the scratch register. `value` is the destination of a load
    /// or the source of a store.
    fn emit_dynamic_access(&mut self, access: MemOp, value: HostReg) {
        let regions = self.regions;
        let Some(main) = regions.first() else {
            self.emit_slow_access(access, value);
            return;
        };

        if self.options.fast_memory {
            if main.len < access.size() {
                self.emit_slow_access(access, value);
                return;
            }
            let emit = self.emit();
            if main.start != 0 {
                emit.alu(AluOp::Sub, E::SCRATCH, E::SCRATCH, Src::Imm(main.start));
            }
            // Aligned down as well, so the access can never leave the region.
            let mask = (main.len - 1) & !(access.size() - 1);
            emit.alu(AluOp::And, E::SCRATCH, E::SCRATCH, Src::Imm(mask));
            emit_fast_access(emit, access, value, HostAddr::Indexed(E::SCRATCH));
            return;
        }

        let mut done = Vec::with_capacity(regions.len());
        for (i, region) in regions.iter().enumerate() {
            let Some(last) = region.len.checked_sub(access.size()) else {
                continue;
            };

            let emit = self.emit();
            if region.start != 0 {
                emit.alu(AluOp::Sub, E::SCRATCH, E::SCRATCH, Src::Imm(region.start));
            }
            emit.compare(E::SCRATCH, Src::Imm(last));
            let miss = emit.jump_if(Cond::Above);
            let addr = if i == 0 {
                HostAddr::Indexed(E::SCRATCH)
            } else {
                emit.mov_ptr(E::POINTER, region.ptr.as_ptr() as usize);
                HostAddr::Based {
                    base: E::POINTER,
                    index: E::SCRATCH,
                }
            };
            emit_fast_access(emit, access, value, addr);
            done.push(emit.jump());

            emit.bind(miss);
            if region.start != 0 {
                emit.alu(AluOp::Add, E::SCRATCH, E::SCRATCH, Src::Imm(region.start));
            }
        }

        self.emit_slow_access(access, value);
        let emit = self.emit();
        for fixup in done {
            emit.bind(fixup);
        }
    }

    /// Calls the bus helper with the guest address in the scratch register.
    fn emit_slow_access(&mut self, access: MemOp, value: HostReg) {
        let emit = self.emit();
        match access {
            MemOp::Load(_) => {
                emit.call(access.helper(), &[Arg::Context, Arg::Reg(E::SCRATCH)]);
                emit.mov(value, E::SCRATCH);
            }
            MemOp::Store(_) => emit.call(
                access.helper(),
                &[Arg::Context, Arg::Reg(E::SCRATCH), Arg::Reg(value)],
            ),
        }
    }
}

fn fast_offset(region: &FastRegion, addr: u32, size: u32) -> Option<u32> {
    region.contains(addr, size).then(|| addr - region.start)
}

fn emit_fast_access<E: Emitter>(emit: &mut E, access: MemOp, value: HostReg, addr: HostAddr) {
    match access {
        MemOp::Load(kind) => emit.load_host(kind, value, addr),
        MemOp::Store(kind) => emit.store_host(kind, addr, value),
    }
}
