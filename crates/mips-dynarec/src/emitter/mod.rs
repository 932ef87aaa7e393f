//! The host code emission capability the compiler and register cache are written against.

use crate::arena::CodeBuffer;
use std::fmt;

mod x64;

pub use x64::X64Emitter;

/// The emitter for the machine this crate was built for.
pub type HostEmitter = X64Emitter;

/// A host register number, as understood by the concrete emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostReg(pub u8);

impl fmt::Display for HostReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The right hand side of a two operand operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Reg(HostReg),
    Imm(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Nor,
}

impl AluOp {
    /// Evaluates the operation at compile time, for constant folding.
    pub const fn fold(self, lhs: u32, rhs: u32) -> u32 {
        match self {
            AluOp::Add => lhs.wrapping_add(rhs),
            AluOp::Sub => lhs.wrapping_sub(rhs),
            AluOp::And => lhs & rhs,
            AluOp::Or => lhs | rhs,
            AluOp::Xor => lhs ^ rhs,
            AluOp::Nor => !(lhs | rhs),
        }
    }

    pub const fn is_commutative(self) -> bool {
        !matches!(self, AluOp::Sub)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    LogicalLeft,
    LogicalRight,
    ArithmeticRight,
}

impl ShiftOp {
    pub const fn fold(self, value: u32, amount: u32) -> u32 {
        let amount = amount & 31;
        match self {
            ShiftOp::LogicalLeft => value << amount,
            ShiftOp::LogicalRight => value >> amount,
            ShiftOp::ArithmeticRight => ((value as i32) >> amount) as u32,
        }
    }
}

/// Conditions on the result of the last comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Equal,
    NotEqual,
    /// Signed less than.
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    /// Unsigned less than.
    Below,
    BelowEqual,
    Above,
    AboveEqual,
}

impl Cond {
    pub const fn invert(self) -> Self {
        match self {
            Cond::Equal => Cond::NotEqual,
            Cond::NotEqual => Cond::Equal,
            Cond::Less => Cond::GreaterEqual,
            Cond::LessEqual => Cond::Greater,
            Cond::Greater => Cond::LessEqual,
            Cond::GreaterEqual => Cond::Less,
            Cond::Below => Cond::AboveEqual,
            Cond::BelowEqual => Cond::Above,
            Cond::Above => Cond::BelowEqual,
            Cond::AboveEqual => Cond::Below,
        }
    }

    /// Evaluates the condition at compile time.
    pub const fn holds(self, lhs: u32, rhs: u32) -> bool {
        let (slhs, srhs) = (lhs as i32, rhs as i32);
        match self {
            Cond::Equal => lhs == rhs,
            Cond::NotEqual => lhs != rhs,
            Cond::Less => slhs < srhs,
            Cond::LessEqual => slhs <= srhs,
            Cond::Greater => slhs > srhs,
            Cond::GreaterEqual => slhs >= srhs,
            Cond::Below => lhs < rhs,
            Cond::BelowEqual => lhs <= rhs,
            Cond::Above => lhs > rhs,
            Cond::AboveEqual => lhs >= rhs,
        }
    }
}

/// Memory access widths for loads, with the extension applied to the loaded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    U8,
    S8,
    U16,
    S16,
    U32,
}

impl LoadKind {
    pub const fn size(self) -> u32 {
        match self {
            LoadKind::U8 | LoadKind::S8 => 1,
            LoadKind::U16 | LoadKind::S16 => 2,
            LoadKind::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    U8,
    U16,
    U32,
}

impl StoreKind {
    pub const fn size(self) -> u32 {
        match self {
            StoreKind::U8 => 1,
            StoreKind::U16 => 2,
            StoreKind::U32 => 4,
        }
    }
}

/// A host address inside fast memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAddr {
    /// [`Emitter::MEMBASE`] plus the zero extended 32-bit offset held in a register.
    Indexed(HostReg),
    /// [`Emitter::MEMBASE`] plus a constant offset, which must not exceed `i32::MAX`.
    Fixed(u32),
    /// A host pointer plus the zero extended 32-bit offset held in another register.
    Based { base: HostReg, index: HostReg },
}

/// An argument passed to a runtime helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// The guest state pointer, which doubles as the environment pointer.
    Context,
    Reg(HostReg),
    Imm(u32),
    Ptr(usize),
}

/// A forward jump whose target is not known yet, see [`Emitter::bind`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Fixup {
    /// Offset of the end of the jump instruction.
    end: usize,
}

impl Fixup {
    pub const fn new(end: usize) -> Self {
        Self { end }
    }

    pub const fn end(&self) -> usize {
        self.end
    }
}

/// Host machine code generation.
///
/// Register roles are fixed: [`Emitter::CONTEXT`] holds the guest state pointer, [`Emitter::MEMBASE`] the
/// host address of the main fast memory region, [`Emitter::SCRATCH`] is free for address computations and
/// holds helper return values, and [`Emitter::ALLOCATION_ORDER`] lists the registers the register cache may hand out.
/// [`Emitter::POINTER`] holds the base of other fast regions for the duration of a single access.
/// Allocatable registers must be preserved across helper calls.
///
/// Guest state transfers (`load_state`, `store_state`, `store_state_imm`, `mov`, `mov_imm`) must leave the host
/// flags untouched, so flushes can sit between a comparison and the branch consuming it.
pub trait Emitter: Sized {
    const CONTEXT: HostReg;
    const MEMBASE: HostReg;
    const SCRATCH: HostReg;
    const POINTER: HostReg;
    const ALLOCATION_ORDER: &'static [HostReg];

    fn new(code: CodeBuffer) -> Self;

    fn code(&self) -> &CodeBuffer;

    fn code_mut(&mut self) -> &mut CodeBuffer;

    fn name(reg: HostReg) -> &'static str;

    /// The offset the next instruction will be emitted at.
    fn offset(&self) -> usize {
        self.code().len()
    }

    fn load_state(&mut self, dst: HostReg, offset: i32);

    fn store_state(&mut self, offset: i32, src: HostReg);

    fn store_state_imm(&mut self, offset: i32, imm: u32);

    fn mov(&mut self, dst: HostReg, src: HostReg);

    fn mov_imm(&mut self, dst: HostReg, imm: u32);

    /// Loads a full width host pointer.
    fn mov_ptr(&mut self, dst: HostReg, ptr: usize);

    /// `dst = lhs op rhs` on 32-bit values. Any of the registers may alias.
    fn alu(&mut self, op: AluOp, dst: HostReg, lhs: HostReg, rhs: Src);

    fn shift(&mut self, op: ShiftOp, dst: HostReg, src: HostReg, amount: Src);

    /// `dst = (lhs cond rhs) as u32`.
    fn set_cond(&mut self, cond: Cond, dst: HostReg, lhs: HostReg, rhs: Src);

    fn compare(&mut self, lhs: HostReg, rhs: Src);

    fn compare_state(&mut self, offset: i32, imm: u32);

    /// Subtracts from a state word, leaving the flags as a comparison of the old value against `imm` would.
    fn sub_state(&mut self, offset: i32, imm: u32);

    /// Stores the outcome of the last comparison into a state word as 0 or 1.
    fn store_cond(&mut self, cond: Cond, offset: i32);

    /// 32x32 to 64-bit multiply, writing the halves to two state words.
    fn multiply(&mut self, signed: bool, lhs: HostReg, rhs: HostReg, hi: i32, lo: i32);

    /// `dst = base + disp`, truncated to 32 bits.
    fn lea(&mut self, dst: HostReg, base: HostReg, disp: i32);

    fn load_host(&mut self, kind: LoadKind, dst: HostReg, addr: HostAddr);

    fn store_host(&mut self, kind: StoreKind, addr: HostAddr, src: HostReg);

    /// Calls a function using the host C calling convention. The return value lands in [`Emitter::SCRATCH`].
    fn call(&mut self, func: usize, args: &[Arg]);

    fn jump(&mut self) -> Fixup;

    fn jump_if(&mut self, cond: Cond) -> Fixup;

    /// Points a forward jump at the current offset.
    fn bind(&mut self, fixup: Fixup);

    fn jump_to(&mut self, target: usize);

    fn jump_if_to(&mut self, cond: Cond, target: usize);

    /// Emits a jump that can later be retargeted with [`Emitter::patch_jump`], returning its offset.
    fn patchable_jump(&mut self, target: usize) -> usize;

    fn patch_jump(&mut self, at: usize, target: usize) -> bool;

    /// Code for `extern "sysv64" fn(context, membase, entry) -> u32`: saves host state, sets up the fixed
    /// register roles and jumps to `entry`.
    fn enter_host(&mut self);

    /// Undoes [`Emitter::enter_host`] and returns the value in [`Emitter::SCRATCH`].
    fn leave_host(&mut self);

    /// Pads with trapping filler until the offset is a multiple of `alignment`.
    fn align(&mut self, alignment: usize);
}
