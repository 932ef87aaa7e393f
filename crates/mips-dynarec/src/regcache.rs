//! Tracks which guest registers live in which host registers while a block is being compiled.
//!
//! A guest register is either in guest state memory, a compile time constant, or resident in a host
//! register from the allocation order. Constants and dirty host registers are written back on flush.

use crate::{
    compiler::CompileError,
    emitter::{Emitter, HostReg},
    state::{offset_of, GPR_COUNT},
};
use log::{error, trace};

/// What the caller is about to do with a mapped register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
    /// The current value is not needed, the caller overwrites the whole register.
    Write,
}

impl Access {
    const fn writes(self) -> bool {
        !matches!(self, Access::Read)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Memory,
    Imm(u32),
    Host(HostReg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HostSlot {
    reg: HostReg,
    mips: Option<usize>,
    dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegCache {
    mips: [Location; GPR_COUNT],
    spill_locked: [bool; GPR_COUNT],
    hosts: Vec<HostSlot>,
    scratch: HostReg,
    compiler_pc: u32,
}

impl RegCache {
    pub fn new<E: Emitter>() -> Self {
        let mut cache = Self {
            mips: [Location::Memory; GPR_COUNT],
            spill_locked: [false; GPR_COUNT],
            hosts: E::ALLOCATION_ORDER
                .iter()
                .map(|&reg| HostSlot {
                    reg,
                    mips: None,
                    dirty: false,
                })
                .collect(),
            scratch: E::SCRATCH,
            compiler_pc: 0,
        };
        cache.start();
        cache
    }

    /// Resets to the block entry state: everything in memory, nothing locked.
    pub fn start(&mut self) {
        self.mips = [Location::Memory; GPR_COUNT];
        self.mips[0] = Location::Imm(0);
        self.spill_locked = [false; GPR_COUNT];
        for slot in &mut self.hosts {
            slot.mips = None;
            slot.dirty = false;
        }
    }

    /// The guest address reported alongside allocation failures.
    pub fn set_compiler_pc(&mut self, pc: u32) {
        self.compiler_pc = pc;
    }

    pub fn location(&self, reg: usize) -> Location {
        self.mips[reg]
    }

    /// Every guest register currently held in a host register, in allocation order.
    pub fn resident(&self) -> Vec<(usize, HostReg)> {
        self.hosts
            .iter()
            .filter_map(|slot| slot.mips.map(|mips| (mips, slot.reg)))
            .collect()
    }

    pub fn is_dirty(&self, host: HostReg) -> bool {
        self.slot(host).is_some_and(|slot| slot.dirty)
    }

    /// The host register of a resident guest register.
    pub fn r(&self, reg: usize) -> Result<HostReg, CompileError> {
        match self.mips[reg] {
            Location::Host(host) => Ok(host),
            _ => {
                error!("guest register {reg} used without being mapped at {:#010x}", self.compiler_pc);
                Err(CompileError::RegisterNotMapped {
                    pc: self.compiler_pc,
                    reg,
                })
            }
        }
    }

    pub fn spill_lock(&mut self, reg: usize) {
        self.spill_locked[reg] = true;
    }

    pub fn release_spill_locks(&mut self) {
        self.spill_locked = [false; GPR_COUNT];
    }

    /// Records a compile time constant, dropping any host register binding without a write back.
    pub fn set_imm(&mut self, reg: usize, value: u32) {
        if reg == 0 {
            return;
        }
        self.unbind(reg);
        self.mips[reg] = Location::Imm(value);
    }

    pub fn is_imm(&self, reg: usize) -> bool {
        matches!(self.mips[reg], Location::Imm(_))
    }

    pub fn get_imm(&self, reg: usize) -> Option<u32> {
        match self.mips[reg] {
            Location::Imm(value) => Some(value),
            _ => None,
        }
    }

    /// Binds a guest register to a host register, loading its current value unless `access` is [`Access::Write`].
    ///
    /// Register zero is never written back: reads get a clean host register holding zero, writes land in the
    /// scratch register and are dropped.
    pub fn map_reg<E: Emitter>(
        &mut self,
        emit: &mut E,
        reg: usize,
        access: Access,
    ) -> Result<HostReg, CompileError> {
        if reg == 0 && access.writes() {
            if access == Access::ReadWrite {
                emit.mov_imm(self.scratch, 0);
            }
            return Ok(self.scratch);
        }

        match self.mips[reg] {
            Location::Host(host) => {
                if access.writes() {
                    self.slot_mut(host).dirty = true;
                }
                Ok(host)
            }
            Location::Imm(value) => {
                let host = self.allocate(emit)?;
                if access != Access::Write {
                    emit.mov_imm(host, value);
                }
                // The constant was never stored, so the register always has to be written back.
                self.bind(host, reg, reg != 0);
                Ok(host)
            }
            Location::Memory => {
                let host = self.allocate(emit)?;
                if access != Access::Write {
                    emit.load_state(host, offset_of(reg));
                }
                self.bind(host, reg, access.writes());
                Ok(host)
            }
        }
    }

    /// Maps two source registers for reading, spill locking both.
    pub fn map_in_in<E: Emitter>(
        &mut self,
        emit: &mut E,
        rs: usize,
        rt: usize,
    ) -> Result<(HostReg, HostReg), CompileError> {
        self.spill_lock(rs);
        self.spill_lock(rt);
        let rs = self.map_reg(emit, rs, Access::Read)?;
        let rt = self.map_reg(emit, rt, Access::Read)?;
        Ok((rs, rt))
    }

    /// Maps a destination and one source, returning `(dst, src)`.
    pub fn map_dirty_in<E: Emitter>(
        &mut self,
        emit: &mut E,
        dst: usize,
        src: usize,
    ) -> Result<(HostReg, HostReg), CompileError> {
        self.spill_lock(dst);
        self.spill_lock(src);
        let src_host = self.map_reg(emit, src, Access::Read)?;
        let access = if dst == src {
            Access::ReadWrite
        } else {
            Access::Write
        };
        let dst_host = self.map_reg(emit, dst, access)?;
        Ok((dst_host, src_host))
    }

    /// Maps a destination and two sources, returning `(dst, rs, rt)`.
    pub fn map_dirty_in_in<E: Emitter>(
        &mut self,
        emit: &mut E,
        dst: usize,
        rs: usize,
        rt: usize,
    ) -> Result<(HostReg, HostReg, HostReg), CompileError> {
        self.spill_lock(dst);
        let (rs_host, rt_host) = self.map_in_in(emit, rs, rt)?;
        let access = if dst == rs || dst == rt {
            Access::ReadWrite
        } else {
            Access::Write
        };
        let dst_host = self.map_reg(emit, dst, access)?;
        Ok((dst_host, rs_host, rt_host))
    }

    /// Writes back whatever guest register lives in `host` and frees it.
    pub fn flush_host_reg<E: Emitter>(&mut self, emit: &mut E, host: HostReg) {
        let Some(slot) = self.slot(host).copied() else {
            return;
        };
        let Some(reg) = slot.mips else {
            return;
        };

        if slot.dirty && reg != 0 {
            trace!("writing back guest register {reg} from {}", E::name(host));
            emit.store_state(offset_of(reg), host);
        }
        self.unbind(reg);
    }

    pub fn flush_mips_reg<E: Emitter>(&mut self, emit: &mut E, reg: usize) {
        match self.mips[reg] {
            Location::Host(host) => self.flush_host_reg(emit, host),
            Location::Imm(value) if reg != 0 => {
                emit.store_state_imm(offset_of(reg), value);
                self.mips[reg] = Location::Memory;
            }
            Location::Imm(_) | Location::Memory => {}
        }
    }

    /// Writes everything back, leaving the cache as it was at the start of the block. Only emits moves, so
    /// host flags survive.
    pub fn flush_all<E: Emitter>(&mut self, emit: &mut E) {
        for reg in 0..GPR_COUNT {
            self.flush_mips_reg(emit, reg);
        }
        self.release_spill_locks();
    }

    fn allocate<E: Emitter>(&mut self, emit: &mut E) -> Result<HostReg, CompileError> {
        if let Some(slot) = self.hosts.iter().find(|slot| slot.mips.is_none()) {
            return Ok(slot.reg);
        }

        let victim = self
            .hosts
            .iter()
            .find(|slot| slot.mips.is_some_and(|reg| !self.spill_locked[reg]))
            .map(|slot| slot.reg);
        match victim {
            Some(host) => {
                self.flush_host_reg(emit, host);
                Ok(host)
            }
            None => {
                error!(
                    "all host registers are spill locked at {:#010x}: {:?}",
                    self.compiler_pc,
                    self.resident()
                );
                Err(CompileError::OutOfSpillableRegisters {
                    pc: self.compiler_pc,
                })
            }
        }
    }

    fn bind(&mut self, host: HostReg, reg: usize, dirty: bool) {
        let slot = self.slot_mut(host);
        slot.mips = Some(reg);
        slot.dirty = dirty;
        self.mips[reg] = Location::Host(host);
    }

    /// Forgets a host binding without writing anything back.
    fn unbind(&mut self, reg: usize) {
        if let Location::Host(host) = self.mips[reg] {
            let slot = self.slot_mut(host);
            slot.mips = None;
            slot.dirty = false;
            self.mips[reg] = if reg == 0 {
                Location::Imm(0)
            } else {
                Location::Memory
            };
        }
    }

    fn slot(&self, host: HostReg) -> Option<&HostSlot> {
        self.hosts.iter().find(|slot| slot.reg == host)
    }

    fn slot_mut(&mut self, host: HostReg) -> &mut HostSlot {
        self.hosts
            .iter_mut()
            .find(|slot| slot.reg == host)
            .expect("host register outside the allocation order")
    }
}
