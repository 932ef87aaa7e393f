//! Decoding helpers for the guest MIPS instruction set: table driven decoding, disassembly text,
//! block classification and cycle estimation.

use crate::instruction::ParsedInstruction;

pub mod instruction;
mod pattern;
pub mod register;

pub use crate::pattern::Operand;

pub const INSTRUCTION_SIZE: u32 = 4;
pub const REGISTER_COUNT: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaybeInstruction {
    Instruction(ParsedInstruction),
    Invalid(u32),
}

impl MaybeInstruction {
    pub const fn new(raw: u32) -> Self {
        if let Some(parsed) = ParsedInstruction::new(raw) {
            Self::Instruction(parsed)
        } else {
            Self::Invalid(raw)
        }
    }

    #[inline]
    pub fn try_resolve_static_jump(&self, pc: u32) -> Option<u32> {
        match self {
            Self::Instruction(instr) => instr.try_resolve_static_jump(pc),
            Self::Invalid(_) => None,
        }
    }

    #[inline]
    pub const fn ends_block(&self) -> bool {
        match self {
            Self::Instruction(instr) => instr.ends_block(),
            Self::Invalid(_) => true,
        }
    }

    #[inline]
    pub const fn has_delay_slot(&self) -> bool {
        match self {
            Self::Instruction(instr) => instr.has_delay_slot(),
            Self::Invalid(_) => false,
        }
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Instruction(_))
    }

    /// The estimated cycle cost, invalid encodings are counted as a single cycle.
    #[inline]
    pub const fn cycles(&self) -> u32 {
        match self {
            Self::Instruction(instr) => instr.cycles(),
            Self::Invalid(_) => 1,
        }
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        match self {
            Self::Instruction(instr) => instr.raw(),
            Self::Invalid(raw) => *raw,
        }
    }
}

impl From<u32> for MaybeInstruction {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for MaybeInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instruction(instr) => write!(f, "{instr}"),
            Self::Invalid(value) => write!(f, "unknown: {value:#034b}"),
        }
    }
}
