//! The guest CPU state, laid out as a flat array of words so generated code can address every
//! register with a fixed offset from a single base pointer.

use mips_decomp::register::{GeneralPurpose, Special};
use std::fmt;
use strum::FromRepr;

pub const GPR_COUNT: usize = 32;
/// The link register written by `jal` and the linking branches.
pub const RA: usize = 31;
pub const HI: usize = 32;
pub const LO: usize = 33;
pub const PC: usize = 34;
pub const DOWNCOUNT: usize = 35;
pub const CORE_STATE: usize = 36;
/// Scratch word for generated code, used to carry a branch decision or jump target across a delay slot.
pub const BRANCH_TEMP: usize = 37;
pub const STATE_WORDS: usize = 38;

/// Byte offset of a state word from the start of [`CpuState`].
pub const fn offset_of(index: usize) -> i32 {
    (index * std::mem::size_of::<u32>()) as i32
}

/// Whether the guest should keep running, written by syscall handlers and the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Default)]
#[repr(u32)]
pub enum CoreState {
    #[default]
    Running = 0,
    /// The host asked for execution to stop, for example from a syscall handler.
    Stopping = 1,
    /// The guest executed a `break` instruction.
    Halted = 2,
}

#[derive(Clone, PartialEq, Eq)]
#[repr(C)]
pub struct CpuState {
    words: [u32; STATE_WORDS],
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            words: [0; STATE_WORDS],
        }
    }
}

impl CpuState {
    pub fn gpr(&self, index: usize) -> u32 {
        self.words[index]
    }

    /// Writes a general purpose register, writes to `zero` are discarded.
    pub fn set_gpr(&mut self, index: usize, value: u32) {
        if index != 0 {
            self.words[index] = value;
        }
    }

    pub fn read(&self, reg: GeneralPurpose) -> u32 {
        self.gpr(reg.to_repr())
    }

    pub fn write(&mut self, reg: GeneralPurpose, value: u32) {
        self.set_gpr(reg.to_repr(), value);
    }

    pub fn hi(&self) -> u32 {
        self.words[HI]
    }

    pub fn set_hi(&mut self, value: u32) {
        self.words[HI] = value;
    }

    pub fn lo(&self) -> u32 {
        self.words[LO]
    }

    pub fn set_lo(&mut self, value: u32) {
        self.words[LO] = value;
    }

    pub fn pc(&self) -> u32 {
        self.words[PC]
    }

    pub fn set_pc(&mut self, value: u32) {
        self.words[PC] = value;
    }

    pub fn downcount(&self) -> i32 {
        self.words[DOWNCOUNT] as i32
    }

    pub fn set_downcount(&mut self, value: i32) {
        self.words[DOWNCOUNT] = value as u32;
    }

    /// The raw core state word. Unknown values are reported as [`CoreState::Stopping`].
    pub fn core_state(&self) -> CoreState {
        CoreState::from_repr(self.words[CORE_STATE]).unwrap_or(CoreState::Stopping)
    }

    pub fn set_core_state(&mut self, state: CoreState) {
        self.words[CORE_STATE] = state as u32;
    }

    pub fn words(&self) -> &[u32; STATE_WORDS] {
        &self.words
    }
}

impl fmt::Debug for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for reg in GeneralPurpose::iter() {
            map.entry(&reg.name(), &format_args!("{:#010x}", self.read(reg)));
        }
        map.entry(&Special::Hi.name(), &format_args!("{:#010x}", self.hi()))
            .entry(&Special::Lo.name(), &format_args!("{:#010x}", self.lo()))
            .entry(&Special::Pc.name(), &format_args!("{:#010x}", self.pc()))
            .entry(&"downcount", &self.downcount())
            .entry(&"core_state", &self.core_state())
            .finish()
    }
}
