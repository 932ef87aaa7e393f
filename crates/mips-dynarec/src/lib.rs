//! A dynamic recompiler for 32-bit little endian MIPS guest code, targeting x86-64 hosts.
//!
//! Guest code is translated one block at a time into an executable arena. Blocks keep guest registers in
//! host registers while they run, fall back to an interpreter for rare instructions, and jump directly into
//! each other once their successors are compiled.

#[cfg(not(all(target_arch = "x86_64", unix)))]
compile_error!("mips-dynarec only generates code for x86-64 unix hosts");

pub mod arena;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod disasm;
pub mod dispatcher;
pub mod emitter;
pub mod interpreter;
pub mod jit;
pub mod regcache;
pub mod runtime;
pub mod state;

pub use crate::{
    config::JitOptions,
    jit::{Jit, RunExit},
    runtime::{Bus, BusError, BusResult, FastRegion, FlatMemory, PhysicalAddress},
    state::{CoreState, CpuState},
};

#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error(transparent)]
    Arena(#[from] arena::ArenaError),
    #[error(transparent)]
    Compile(#[from] compiler::CompileError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("hard fault at {pc:#010x} (instruction {raw:#010x})")]
    HardFault { pc: u32, raw: u32 },
}
