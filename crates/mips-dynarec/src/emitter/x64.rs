//! x86-64 machine code encoding.
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use super::{AluOp, Arg, Cond, Emitter, Fixup, HostAddr, HostReg, LoadKind, ShiftOp, Src, StoreKind};
use crate::arena::CodeBuffer;
use tartan_bitfield::bitfield;

pub const RAX: HostReg = HostReg(0);
pub const RCX: HostReg = HostReg(1);
pub const RDX: HostReg = HostReg(2);
pub const RBX: HostReg = HostReg(3);
pub const RBP: HostReg = HostReg(5);
pub const RSI: HostReg = HostReg(6);
pub const RDI: HostReg = HostReg(7);
pub const R12: HostReg = HostReg(12);
pub const R13: HostReg = HostReg(13);
pub const R14: HostReg = HostReg(14);
pub const R15: HostReg = HostReg(15);

/// Integer argument registers of the System V calling convention, in order.
const ARGUMENTS: [HostReg; 4] = [RDI, RSI, RDX, RCX];

/// Callee saved registers that `enter_host` preserves, in push order.
const SAVED: [HostReg; 6] = [RBX, RBP, R12, R13, R14, R15];

const NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

bitfield! {
    /// The `0100WRXB` prefix, selecting 64-bit operands and the upper eight registers.
    struct Rex(u8) {
        [0] b,
        [1] x,
        [2] r,
        [3] w,
        [4..=7] fixed: u8,
    }
}

bitfield! {
    struct ModRm(u8) {
        [0..=2] rm: u8,
        [3..=5] reg: u8,
        [6..=7] mode: u8,
    }
}

bitfield! {
    struct Sib(u8) {
        [0..=2] base: u8,
        [3..=5] index: u8,
        [6..=7] scale: u8,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Byte,
    Word,
    Dword,
    Qword,
}

#[derive(Debug, Clone, Copy)]
enum Rm {
    Reg(HostReg),
    Mem {
        base: HostReg,
        index: Option<HostReg>,
        disp: i32,
    },
}

/// A single instruction being assembled. No x86 instruction is longer than 15 bytes.
struct Inst {
    bytes: [u8; 15],
    len: usize,
}

impl Inst {
    fn push(&mut self, byte: u8) {
        self.bytes[self.len] = byte;
        self.len += 1;
    }

    fn extend(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push(byte);
        }
    }

    fn imm(mut self, imm: Imm) -> Self {
        match imm {
            Imm::I8(value) => self.push(value as u8),
            Imm::I32(value) => self.extend(&value.to_le_bytes()),
        }
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Imm {
    I8(i8),
    I32(u32),
}

impl Imm {
    fn shortest(value: u32) -> Self {
        i8::try_from(value as i32).map_or(Imm::I32(value), Imm::I8)
    }
}

const fn condition_code(cond: Cond) -> u8 {
    match cond {
        Cond::Below => 0x2,
        Cond::AboveEqual => 0x3,
        Cond::Equal => 0x4,
        Cond::NotEqual => 0x5,
        Cond::BelowEqual => 0x6,
        Cond::Above => 0x7,
        Cond::Less => 0xC,
        Cond::GreaterEqual => 0xD,
        Cond::LessEqual => 0xE,
        Cond::Greater => 0xF,
    }
}

/// The `/digit` opcode extension of the `0x81`/`0x83` immediate group.
const fn group1_digit(op: AluOp) -> u8 {
    match op {
        AluOp::Add => 0,
        AluOp::Or | AluOp::Nor => 1,
        AluOp::And => 4,
        AluOp::Sub => 5,
        AluOp::Xor => 6,
    }
}

const CMP_DIGIT: u8 = 7;

const fn shift_digit(op: ShiftOp) -> u8 {
    match op {
        ShiftOp::LogicalLeft => 4,
        ShiftOp::LogicalRight => 5,
        ShiftOp::ArithmeticRight => 7,
    }
}

const fn state(offset: i32) -> Rm {
    Rm::Mem {
        base: R15,
        index: None,
        disp: offset,
    }
}

const fn host(addr: HostAddr) -> Rm {
    match addr {
        HostAddr::Indexed(index) => Rm::Mem {
            base: R14,
            index: Some(index),
            disp: 0,
        },
        HostAddr::Fixed(offset) => {
            debug_assert!(offset <= i32::MAX as u32, "displacement out of range");
            Rm::Mem {
                base: R14,
                index: None,
                disp: offset as i32,
            }
        }
        HostAddr::Based { base, index } => Rm::Mem {
            base,
            index: Some(index),
            disp: 0,
        },
    }
}

#[derive(Debug)]
pub struct X64Emitter {
    code: CodeBuffer,
}

impl X64Emitter {
    fn encode(width: Width, opcode: &[u8], reg: u8, rm: Rm) -> Inst {
        let mut inst = Inst {
            bytes: [0; 15],
            len: 0,
        };
        if width == Width::Word {
            inst.push(0x66);
        }

        let mut rex = Rex(0);
        rex.set_fixed(0b0100);
        rex.set_w(width == Width::Qword);
        rex.set_r(reg >= 8);
        let byte_register = |r: u8| width == Width::Byte && (4..8).contains(&r);
        let mut force_rex = byte_register(reg);
        match rm {
            Rm::Reg(r) => {
                rex.set_b(r.0 >= 8);
                force_rex |= byte_register(r.0);
            }
            Rm::Mem { base, index, .. } => {
                rex.set_b(base.0 >= 8);
                rex.set_x(index.is_some_and(|index| index.0 >= 8));
            }
        }
        if force_rex || rex.0 != 0x40 {
            inst.push(rex.0);
        }
        inst.extend(opcode);

        let mut modrm = ModRm(0);
        modrm.set_reg(reg & 7);
        match rm {
            Rm::Reg(r) => {
                modrm.set_mode(0b11);
                modrm.set_rm(r.0 & 7);
                inst.push(modrm.0);
            }
            Rm::Mem { base, index, disp } => {
                // A base of rbp/r13 without displacement would encode RIP-relative addressing.
                let mode = if disp == 0 && base.0 & 7 != 5 {
                    0b00
                } else if i8::try_from(disp).is_ok() {
                    0b01
                } else {
                    0b10
                };
                modrm.set_mode(mode);
                if index.is_some() || base.0 & 7 == 4 {
                    let mut sib = Sib(0);
                    sib.set_base(base.0 & 7);
                    sib.set_index(index.map_or(0b100, |index| index.0 & 7));
                    modrm.set_rm(0b100);
                    inst.push(modrm.0);
                    inst.push(sib.0);
                } else {
                    modrm.set_rm(base.0 & 7);
                    inst.push(modrm.0);
                }
                match mode {
                    0b01 => inst.push(disp as u8),
                    0b10 => inst.extend(&disp.to_le_bytes()),
                    _ => {}
                }
            }
        }
        inst
    }

    fn emit(&mut self, inst: &Inst) {
        self.code.emit(&inst.bytes[..inst.len]);
    }

    fn op(&mut self, width: Width, opcode: &[u8], reg: u8, rm: Rm) {
        let inst = Self::encode(width, opcode, reg, rm);
        self.emit(&inst);
    }

    /// `op r/m32, imm` from the `0x81`/`0x83` group.
    fn op_imm(&mut self, digit: u8, rm: Rm, value: u32) {
        let imm = Imm::shortest(value);
        let opcode = match imm {
            Imm::I8(_) => 0x83,
            Imm::I32(_) => 0x81,
        };
        let inst = Self::encode(Width::Dword, &[opcode], digit, rm).imm(imm);
        self.emit(&inst);
    }

    /// Two operand form, `dst = dst op src`.
    fn alu2(&mut self, op: AluOp, dst: HostReg, src: Src) {
        match src {
            Src::Reg(src) => {
                let opcode = match op {
                    AluOp::Add => 0x01,
                    AluOp::Or | AluOp::Nor => 0x09,
                    AluOp::And => 0x21,
                    AluOp::Sub => 0x29,
                    AluOp::Xor => 0x31,
                };
                self.op(Width::Dword, &[opcode], src.0, Rm::Reg(dst));
            }
            Src::Imm(imm) => self.op_imm(group1_digit(op), Rm::Reg(dst), imm),
        }
    }

    fn mov64(&mut self, dst: HostReg, src: HostReg) {
        self.op(Width::Qword, &[0x89], src.0, Rm::Reg(dst));
    }

    fn mov_imm64(&mut self, dst: HostReg, imm: u64) {
        let mut rex = Rex(0);
        rex.set_fixed(0b0100);
        rex.set_w(true);
        rex.set_b(dst.0 >= 8);
        self.code.emit(&[rex.0, 0xB8 + (dst.0 & 7)]);
        self.code.emit(&imm.to_le_bytes());
    }

    fn push_or_pop(&mut self, opcode: u8, reg: HostReg) {
        if reg.0 >= 8 {
            self.code.emit(&[0x41, opcode + (reg.0 & 7)]);
        } else {
            self.code.emit(&[opcode + reg.0]);
        }
    }

    fn setcc_al(&mut self, cond: Cond) {
        self.op(Width::Byte, &[0x0F, 0x90 | condition_code(cond)], 0, Rm::Reg(RAX));
    }

    fn movzx_al(&mut self, dst: HostReg) {
        self.op(Width::Dword, &[0x0F, 0xB6], dst.0, Rm::Reg(RAX));
    }

    fn rel32(&self, target: usize, instruction_len: usize) -> i32 {
        (target as i64 - (self.offset() + instruction_len) as i64) as i32
    }
}

impl Emitter for X64Emitter {
    const CONTEXT: HostReg = R15;
    const MEMBASE: HostReg = R14;
    const SCRATCH: HostReg = RAX;
    const POINTER: HostReg = RDX;
    const ALLOCATION_ORDER: &'static [HostReg] = &[RBX, RBP, R12, R13];

    fn new(code: CodeBuffer) -> Self {
        Self { code }
    }

    fn code(&self) -> &CodeBuffer {
        &self.code
    }

    fn code_mut(&mut self) -> &mut CodeBuffer {
        &mut self.code
    }

    fn name(reg: HostReg) -> &'static str {
        NAMES.get(reg.0 as usize).copied().unwrap_or("r?")
    }

    fn load_state(&mut self, dst: HostReg, offset: i32) {
        self.op(Width::Dword, &[0x8B], dst.0, state(offset));
    }

    fn store_state(&mut self, offset: i32, src: HostReg) {
        self.op(Width::Dword, &[0x89], src.0, state(offset));
    }

    fn store_state_imm(&mut self, offset: i32, imm: u32) {
        let inst = Self::encode(Width::Dword, &[0xC7], 0, state(offset)).imm(Imm::I32(imm));
        self.emit(&inst);
    }

    fn mov(&mut self, dst: HostReg, src: HostReg) {
        if dst != src {
            self.op(Width::Dword, &[0x89], src.0, Rm::Reg(dst));
        }
    }

    fn mov_imm(&mut self, dst: HostReg, imm: u32) {
        // `xor reg, reg` would be shorter for zero, but clobbers the flags.
        if dst.0 >= 8 {
            self.code.emit(&[0x41]);
        }
        self.code.emit(&[0xB8 + (dst.0 & 7)]);
        self.code.emit(&imm.to_le_bytes());
    }

    fn mov_ptr(&mut self, dst: HostReg, ptr: usize) {
        self.mov_imm64(dst, ptr as u64);
    }

    fn alu(&mut self, op: AluOp, dst: HostReg, lhs: HostReg, rhs: Src) {
        match rhs {
            Src::Reg(rhs) if rhs == dst && lhs != dst => {
                if op.is_commutative() {
                    self.alu2(op, dst, Src::Reg(lhs));
                } else {
                    // dst = lhs - dst
                    self.op(Width::Dword, &[0xF7], 3, Rm::Reg(dst));
                    self.alu2(AluOp::Add, dst, Src::Reg(lhs));
                }
            }
            _ => {
                self.mov(dst, lhs);
                self.alu2(op, dst, rhs);
            }
        }
        if op == AluOp::Nor {
            self.op(Width::Dword, &[0xF7], 2, Rm::Reg(dst));
        }
    }

    fn shift(&mut self, op: ShiftOp, dst: HostReg, src: HostReg, amount: Src) {
        match amount {
            Src::Imm(amount) => {
                self.mov(dst, src);
                if amount & 31 != 0 {
                    let inst = Self::encode(Width::Dword, &[0xC1], shift_digit(op), Rm::Reg(dst))
                        .imm(Imm::I8((amount & 31) as i8));
                    self.emit(&inst);
                }
            }
            Src::Reg(amount) => {
                // The count has to be copied first, `dst` may alias it.
                self.mov(RCX, amount);
                self.mov(dst, src);
                self.op(Width::Dword, &[0xD3], shift_digit(op), Rm::Reg(dst));
            }
        }
    }

    fn set_cond(&mut self, cond: Cond, dst: HostReg, lhs: HostReg, rhs: Src) {
        self.compare(lhs, rhs);
        self.setcc_al(cond);
        self.movzx_al(dst);
    }

    fn compare(&mut self, lhs: HostReg, rhs: Src) {
        match rhs {
            Src::Reg(rhs) => self.op(Width::Dword, &[0x39], rhs.0, Rm::Reg(lhs)),
            Src::Imm(imm) => self.op_imm(CMP_DIGIT, Rm::Reg(lhs), imm),
        }
    }

    fn compare_state(&mut self, offset: i32, imm: u32) {
        self.op_imm(CMP_DIGIT, state(offset), imm);
    }

    fn sub_state(&mut self, offset: i32, imm: u32) {
        self.op_imm(group1_digit(AluOp::Sub), state(offset), imm);
    }

    fn store_cond(&mut self, cond: Cond, offset: i32) {
        self.setcc_al(cond);
        self.movzx_al(RAX);
        self.store_state(offset, RAX);
    }

    fn multiply(&mut self, signed: bool, lhs: HostReg, rhs: HostReg, hi: i32, lo: i32) {
        self.mov(RAX, lhs);
        // edx:eax = eax * r/m32
        self.op(Width::Dword, &[0xF7], if signed { 5 } else { 4 }, Rm::Reg(rhs));
        self.store_state(lo, RAX);
        self.store_state(hi, RDX);
    }

    fn lea(&mut self, dst: HostReg, base: HostReg, disp: i32) {
        let rm = Rm::Mem {
            base,
            index: None,
            disp,
        };
        self.op(Width::Dword, &[0x8D], dst.0, rm);
    }

    fn load_host(&mut self, kind: LoadKind, dst: HostReg, addr: HostAddr) {
        let opcode: &[u8] = match kind {
            LoadKind::U8 => &[0x0F, 0xB6],
            LoadKind::S8 => &[0x0F, 0xBE],
            LoadKind::U16 => &[0x0F, 0xB7],
            LoadKind::S16 => &[0x0F, 0xBF],
            LoadKind::U32 => &[0x8B],
        };
        self.op(Width::Dword, opcode, dst.0, host(addr));
    }

    fn store_host(&mut self, kind: StoreKind, addr: HostAddr, src: HostReg) {
        match kind {
            StoreKind::U8 => self.op(Width::Byte, &[0x88], src.0, host(addr)),
            StoreKind::U16 => self.op(Width::Word, &[0x89], src.0, host(addr)),
            StoreKind::U32 => self.op(Width::Dword, &[0x89], src.0, host(addr)),
        }
    }

    fn call(&mut self, func: usize, args: &[Arg]) {
        assert!(args.len() <= ARGUMENTS.len(), "too many helper arguments");
        for (&dst, arg) in ARGUMENTS.iter().zip(args) {
            match *arg {
                Arg::Context => self.mov64(dst, R15),
                Arg::Reg(src) => self.mov(dst, src),
                Arg::Imm(imm) => self.mov_imm(dst, imm),
                Arg::Ptr(ptr) => self.mov_imm64(dst, ptr as u64),
            }
        }
        self.mov_imm64(RAX, func as u64);
        self.op(Width::Dword, &[0xFF], 2, Rm::Reg(RAX));
    }

    fn jump(&mut self) -> Fixup {
        self.code.emit(&[0xE9, 0, 0, 0, 0]);
        Fixup::new(self.offset())
    }

    fn jump_if(&mut self, cond: Cond) -> Fixup {
        self.code.emit(&[0x0F, 0x80 | condition_code(cond), 0, 0, 0, 0]);
        Fixup::new(self.offset())
    }

    fn bind(&mut self, fixup: Fixup) {
        let rel = (self.offset() as i64 - fixup.end() as i64) as i32;
        self.code.patch(fixup.end() - 4, &rel.to_le_bytes());
    }

    fn jump_to(&mut self, target: usize) {
        let rel = self.rel32(target, 5);
        self.code.emit(&[0xE9]);
        self.code.emit(&rel.to_le_bytes());
    }

    fn jump_if_to(&mut self, cond: Cond, target: usize) {
        let rel = self.rel32(target, 6);
        self.code.emit(&[0x0F, 0x80 | condition_code(cond)]);
        self.code.emit(&rel.to_le_bytes());
    }

    fn patchable_jump(&mut self, target: usize) -> usize {
        let at = self.offset();
        self.jump_to(target);
        at
    }

    fn patch_jump(&mut self, at: usize, target: usize) -> bool {
        let rel = (target as i64 - (at + 5) as i64) as i32;
        self.code.patch(at + 1, &rel.to_le_bytes())
    }

    fn enter_host(&mut self) {
        for reg in SAVED {
            self.push_or_pop(0x50, reg);
        }
        // Six pushes plus the return address leave the stack 8 bytes off a 16 byte boundary.
        self.code.emit(&[0x48, 0x83, 0xEC, 0x08]);
        self.mov64(R15, ARGUMENTS[0]);
        self.mov64(R14, ARGUMENTS[1]);
        self.op(Width::Dword, &[0xFF], 4, Rm::Reg(ARGUMENTS[2]));
    }

    fn leave_host(&mut self) {
        self.code.emit(&[0x48, 0x83, 0xC4, 0x08]);
        for reg in SAVED.into_iter().rev() {
            self.push_or_pop(0x58, reg);
        }
        self.code.emit(&[0xC3]);
    }

    fn align(&mut self, alignment: usize) {
        while self.offset() % alignment != 0 {
            let before = self.offset();
            self.code.emit(&[0xCC]);
            if self.offset() == before {
                // Out of space, the overflow is reported by the buffer.
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter() -> X64Emitter {
        X64Emitter::new(CodeBuffer::new(0x1000).unwrap())
    }

    fn bytes(emit: &X64Emitter) -> Vec<u8> {
        emit.code().bytes(0, emit.offset()).to_vec()
    }

    #[test]
    fn immediate_moves() {
        let mut emit = emitter();
        emit.mov_imm(RBX, 0x1234);
        emit.mov_imm(R12, 1);
        assert_eq!(
            bytes(&emit),
            [0xBB, 0x34, 0x12, 0x00, 0x00, 0x41, 0xBC, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn guest_state_access() {
        let mut emit = emitter();
        emit.load_state(RBX, 16);
        emit.store_state(0x88, R13);
        assert_eq!(
            bytes(&emit),
            [0x41, 0x8B, 0x5F, 0x10, 0x45, 0x89, 0xAF, 0x88, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn downcount_subtraction() {
        let mut emit = emitter();
        emit.sub_state(140, 3);
        emit.sub_state(4, 0x1000);
        assert_eq!(
            bytes(&emit),
            [
                0x41, 0x83, 0xAF, 0x8C, 0x00, 0x00, 0x00, 0x03, // sub dword [r15+140], 3
                0x41, 0x81, 0x6F, 0x04, 0x00, 0x10, 0x00, 0x00, // sub dword [r15+4], 0x1000
            ]
        );
    }

    #[test]
    fn fast_memory_access() {
        let mut emit = emitter();
        emit.load_host(LoadKind::U32, RBX, HostAddr::Indexed(RAX));
        emit.store_host(StoreKind::U8, HostAddr::Indexed(RAX), RBP);
        emit.load_host(LoadKind::S16, R12, HostAddr::Fixed(0x100));
        assert_eq!(
            bytes(&emit),
            [
                0x41, 0x8B, 0x1C, 0x06, // mov ebx, [r14+rax]
                0x41, 0x88, 0x2C, 0x06, // mov [r14+rax], bpl
                0x45, 0x0F, 0xBF, 0xA6, 0x00, 0x01, 0x00, 0x00, // movsx r12d, word [r14+0x100]
            ]
        );
    }

    #[test]
    fn pointer_based_access() {
        let mut emit = emitter();
        emit.mov_ptr(RDX, 0x7F00_0000_1000);
        emit.load_host(LoadKind::U32, RBX, HostAddr::Based { base: RDX, index: RAX });
        emit.store_host(StoreKind::U16, HostAddr::Based { base: RDX, index: RAX }, R13);
        assert_eq!(
            bytes(&emit),
            [
                0x48, 0xBA, 0x00, 0x10, 0x00, 0x00, 0x00, 0x7F, 0x00, 0x00, // mov rdx, imm64
                0x8B, 0x1C, 0x02, // mov ebx, [rdx+rax]
                0x66, 0x44, 0x89, 0x2C, 0x02, // mov [rdx+rax], r13w
            ]
        );
    }

    #[test]
    fn three_operand_alu() {
        let mut emit = emitter();
        // ebx = ebp - ebx
        emit.alu(AluOp::Sub, RBX, RBP, Src::Reg(RBX));
        assert_eq!(bytes(&emit), [0xF7, 0xDB, 0x01, 0xEB]);

        let mut emit = emitter();
        // ebx = ~(ebx | 1)
        emit.alu(AluOp::Nor, RBX, RBX, Src::Imm(1));
        assert_eq!(bytes(&emit), [0x83, 0xCB, 0x01, 0xF7, 0xD3]);
    }

    #[test]
    fn effective_address() {
        let mut emit = emitter();
        emit.lea(RAX, R13, 0);
        emit.lea(RAX, R12, -4);
        assert_eq!(
            bytes(&emit),
            [0x41, 0x8D, 0x45, 0x00, 0x41, 0x8D, 0x44, 0x24, 0xFC]
        );
    }

    #[test]
    fn forward_jumps() {
        let mut emit = emitter();
        let fixup = emit.jump_if(Cond::Less);
        emit.mov_imm(RBX, 0);
        emit.bind(fixup);
        assert_eq!(
            bytes(&emit),
            [0x0F, 0x8C, 0x05, 0x00, 0x00, 0x00, 0xBB, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn patching_jumps() {
        let mut emit = emitter();
        emit.align(16);
        let at = emit.patchable_jump(0x40);
        assert_eq!(bytes(&emit), [0xE9, 0x3B, 0x00, 0x00, 0x00]);
        assert!(emit.patch_jump(at, 0));
        assert_eq!(bytes(&emit), [0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);
        assert!(!emit.patch_jump(0x20, 0));
    }

    #[test]
    fn host_entry_and_exit() {
        let mut emit = emitter();
        emit.enter_host();
        assert_eq!(
            bytes(&emit),
            [
                0x53, 0x55, 0x41, 0x54, 0x41, 0x55, 0x41, 0x56, 0x41, 0x57, // pushes
                0x48, 0x83, 0xEC, 0x08, // sub rsp, 8
                0x49, 0x89, 0xFF, // mov r15, rdi
                0x49, 0x89, 0xF6, // mov r14, rsi
                0xFF, 0xE2, // jmp rdx
            ]
        );

        let mut emit = emitter();
        emit.leave_host();
        assert_eq!(
            bytes(&emit),
            [0x48, 0x83, 0xC4, 0x08, 0x41, 0x5F, 0x41, 0x5E, 0x41, 0x5D, 0x41, 0x5C, 0x5D, 0x5B, 0xC3]
        );
    }

    #[test]
    fn helper_calls() {
        let mut emit = emitter();
        emit.call(0x1122_3344_5566_7788, &[Arg::Context, Arg::Reg(RAX), Arg::Imm(7)]);
        assert_eq!(
            bytes(&emit),
            [
                0x4C, 0x89, 0xFF, // mov rdi, r15
                0x89, 0xC6, // mov esi, eax
                0xBA, 0x07, 0x00, 0x00, 0x00, // mov edx, 7
                0x48, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, // mov rax, imm64
                0xFF, 0xD0, // call rax
            ]
        );
    }
}
