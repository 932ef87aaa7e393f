//! Single instruction interpreter routines, the safety net for opcodes without native code generation.
//!
//! Only instructions that do not transfer control are covered: the compiler owns branches and jumps. The
//! unaligned word accesses are left out as well, the compiler refuses to run them.
//! Arithmetic never raises overflow exceptions, `add` behaves like `addu`.

use crate::{
    runtime::{unmapped, Bus},
    state::{CoreState, CpuState},
};
use mips_decomp::instruction::{Mnenomic, ParsedInstruction};

pub type InterpretFn = fn(&mut CpuState, &mut dyn Bus, u32);

/// The interpreter routine for an encoded instruction, if one exists.
pub fn lookup(raw: u32) -> Option<InterpretFn> {
    use Mnenomic::*;
    let instr = ParsedInstruction::new(raw)?;
    let func: InterpretFn = match instr.mnemonic() {
        Add | Addu => addu,
        Sub | Subu => subu,
        And => and,
        Or => or,
        Xor => xor,
        Nor => nor,
        Slt => slt,
        Sltu => sltu,
        Max => max,
        Min => min,
        Movz => movz,
        Movn => movn,
        Addi | Addiu => addiu,
        Slti => slti,
        Sltiu => sltiu,
        Andi => andi,
        Ori => ori,
        Xori => xori,
        Lui => lui,
        Sll => sll,
        Srl => srl,
        Sra => sra,
        Sllv => sllv,
        Srlv => srlv,
        Srav => srav,
        Clz => clz,
        Clo => clo,
        Seb => seb,
        Seh => seh,
        Mult => mult,
        Multu => multu,
        Div => div,
        Divu => divu,
        Mfhi => mfhi,
        Mflo => mflo,
        Mthi => mthi,
        Mtlo => mtlo,
        Lb => lb,
        Lbu => lbu,
        Lh => lh,
        Lhu => lhu,
        Lw => lw,
        Sb => sb,
        Sh => sh,
        Sw => sw,
        Sync | Cache => nop,
        Syscall => syscall,
        Break => brk,
        _ => return None,
    };
    Some(func)
}

fn decode(raw: u32) -> ParsedInstruction {
    ParsedInstruction::new(raw)
        .unwrap_or_else(|| panic!("interpreter routine called for invalid instruction {raw:#010x}"))
}

#[inline]
fn reg(index: u32) -> usize {
    index as usize
}

macro_rules! register_op {
    ($($name:ident => |$rs:ident, $rt:ident| $body:expr;)+) => {
        $(
            fn $name(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
                let instr = decode(raw);
                let ($rs, $rt) = (state.gpr(reg(instr.rs())), state.gpr(reg(instr.rt())));
                state.set_gpr(reg(instr.rd()), $body);
            }
        )+
    };
}

macro_rules! immediate_op {
    ($($name:ident => |$rs:ident, $imm:ident| $body:expr;)+) => {
        $(
            fn $name(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
                let instr = decode(raw);
                let ($rs, $imm) = (state.gpr(reg(instr.rs())), instr.immediate());
                state.set_gpr(reg(instr.rt()), $body);
            }
        )+
    };
}

macro_rules! unary_op {
    ($($name:ident($source:ident) => |$value:ident| $body:expr;)+) => {
        $(
            fn $name(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
                let instr = decode(raw);
                let $value = state.gpr(reg(instr.$source()));
                state.set_gpr(reg(instr.rd()), $body);
            }
        )+
    };
}

register_op! {
    addu => |rs, rt| rs.wrapping_add(rt);
    subu => |rs, rt| rs.wrapping_sub(rt);
    and => |rs, rt| rs & rt;
    or => |rs, rt| rs | rt;
    xor => |rs, rt| rs ^ rt;
    nor => |rs, rt| !(rs | rt);
    slt => |rs, rt| u32::from((rs as i32) < (rt as i32));
    sltu => |rs, rt| u32::from(rs < rt);
    max => |rs, rt| (rs as i32).max(rt as i32) as u32;
    min => |rs, rt| (rs as i32).min(rt as i32) as u32;
    sllv => |rs, rt| rt << (rs & 31);
    srlv => |rs, rt| rt >> (rs & 31);
    srav => |rs, rt| ((rt as i32) >> (rs & 31)) as u32;
}

immediate_op! {
    addiu => |rs, imm| rs.wrapping_add(imm as u16 as i16 as u32);
    slti => |rs, imm| u32::from((rs as i32) < i32::from(imm as u16 as i16));
    sltiu => |rs, imm| u32::from(rs < imm as u16 as i16 as u32);
    andi => |rs, imm| rs & imm;
    ori => |rs, imm| rs | imm;
    xori => |rs, imm| rs ^ imm;
}

fn lui(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let instr = decode(raw);
    state.set_gpr(reg(instr.rt()), instr.immediate() << 16);
}

unary_op! {
    clz(rs) => |value| value.leading_zeros();
    clo(rs) => |value| value.leading_ones();
    seb(rt) => |value| value as u8 as i8 as u32;
    seh(rt) => |value| value as u16 as i16 as u32;
}

macro_rules! shift_op {
    ($($name:ident => |$value:ident, $sa:ident| $body:expr;)+) => {
        $(
            fn $name(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
                let instr = decode(raw);
                let ($value, $sa) = (state.gpr(reg(instr.rt())), instr.sa());
                state.set_gpr(reg(instr.rd()), $body);
            }
        )+
    };
}

shift_op! {
    sll => |value, sa| value << sa;
    srl => |value, sa| value >> sa;
    sra => |value, sa| ((value as i32) >> sa) as u32;
}

fn movz(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let instr = decode(raw);
    if state.gpr(reg(instr.rt())) == 0 {
        state.set_gpr(reg(instr.rd()), state.gpr(reg(instr.rs())));
    }
}

fn movn(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let instr = decode(raw);
    if state.gpr(reg(instr.rt())) != 0 {
        state.set_gpr(reg(instr.rd()), state.gpr(reg(instr.rs())));
    }
}

fn mult(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let instr = decode(raw);
    let rs = i64::from(state.gpr(reg(instr.rs())) as i32);
    let rt = i64::from(state.gpr(reg(instr.rt())) as i32);
    let result = (rs * rt) as u64;
    state.set_hi((result >> 32) as u32);
    state.set_lo(result as u32);
}

fn multu(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let instr = decode(raw);
    let rs = u64::from(state.gpr(reg(instr.rs())));
    let rt = u64::from(state.gpr(reg(instr.rt())));
    let result = rs * rt;
    state.set_hi((result >> 32) as u32);
    state.set_lo(result as u32);
}

fn div(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let instr = decode(raw);
    let rs = state.gpr(reg(instr.rs())) as i32;
    let rt = state.gpr(reg(instr.rt())) as i32;
    if rt == 0 {
        state.set_lo(if rs < 0 { 1 } else { u32::MAX });
        state.set_hi(rs as u32);
    } else {
        state.set_lo(rs.wrapping_div(rt) as u32);
        state.set_hi(rs.wrapping_rem(rt) as u32);
    }
}

fn divu(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let instr = decode(raw);
    let rs = state.gpr(reg(instr.rs()));
    let rt = state.gpr(reg(instr.rt()));
    if rt == 0 {
        state.set_lo(u32::MAX);
        state.set_hi(rs);
    } else {
        state.set_lo(rs / rt);
        state.set_hi(rs % rt);
    }
}

fn mfhi(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let rd = reg(decode(raw).rd());
    state.set_gpr(rd, state.hi());
}

fn mflo(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let rd = reg(decode(raw).rd());
    state.set_gpr(rd, state.lo());
}

fn mthi(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let rs = reg(decode(raw).rs());
    state.set_hi(state.gpr(rs));
}

fn mtlo(state: &mut CpuState, _: &mut dyn Bus, raw: u32) {
    let rs = reg(decode(raw).rs());
    state.set_lo(state.gpr(rs));
}

/// The effective address and target register of a load or store.
fn address(state: &CpuState, instr: &ParsedInstruction) -> (u32, usize) {
    let base = state.gpr(reg(instr.base()));
    (base.wrapping_add(instr.offset() as u32), reg(instr.rt()))
}

macro_rules! load_op {
    ($($name:ident => $read:ident($value:ident) $extend:expr;)+) => {
        $(
            fn $name(state: &mut CpuState, bus: &mut dyn Bus, raw: u32) {
                let (addr, rt) = address(state, &decode(raw));
                let value = match bus.$read(addr) {
                    Ok($value) => $extend,
                    Err(err) => unmapped(err),
                };
                state.set_gpr(rt, value);
            }
        )+
    };
}

load_op! {
    lb => read_u8(value) value as i8 as u32;
    lbu => read_u8(value) u32::from(value);
    lh => read_u16(value) value as i16 as u32;
    lhu => read_u16(value) u32::from(value);
    lw => read_u32(value) value;
}

fn sb(state: &mut CpuState, bus: &mut dyn Bus, raw: u32) {
    let (addr, rt) = address(state, &decode(raw));
    if let Err(err) = bus.write_u8(addr, state.gpr(rt) as u8) {
        unmapped(err);
    }
}

fn sh(state: &mut CpuState, bus: &mut dyn Bus, raw: u32) {
    let (addr, rt) = address(state, &decode(raw));
    if let Err(err) = bus.write_u16(addr, state.gpr(rt) as u16) {
        unmapped(err);
    }
}

fn sw(state: &mut CpuState, bus: &mut dyn Bus, raw: u32) {
    let (addr, rt) = address(state, &decode(raw));
    if let Err(err) = bus.write_u32(addr, state.gpr(rt)) {
        unmapped(err);
    }
}

fn nop(_: &mut CpuState, _: &mut dyn Bus, _: u32) {}

fn syscall(state: &mut CpuState, bus: &mut dyn Bus, raw: u32) {
    bus.syscall(state, decode(raw).immediate());
}

fn brk(state: &mut CpuState, _: &mut dyn Bus, _: u32) {
    state.set_core_state(CoreState::Halted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FlatMemory;

    fn run(state: &mut CpuState, bus: &mut dyn Bus, raw: u32) {
        let func = lookup(raw).unwrap_or_else(|| panic!("no routine for {raw:#010x}"));
        func(state, bus, raw);
    }

    #[test]
    fn control_flow_is_not_covered() {
        // j 0x2000, beq $0, $0, 0, jr $ra
        for raw in [0x0800_0800, 0x1000_0000, 0x03E0_0008] {
            assert!(lookup(raw).is_none());
        }
        assert!(lookup(0x4400_0000).is_none());
    }

    #[test]
    fn unaligned_accesses_are_not_covered() {
        // lwl, lwr, swl, swr
        for raw in [0x8882_0003, 0x9882_0000, 0xA883_0003, 0xB883_0000] {
            assert!(lookup(raw).is_none());
        }
        // lw $2, 0($4)
        assert!(lookup(0x8C82_0000).is_some());
    }

    #[test]
    fn division() {
        let mut state = CpuState::default();
        let mut bus = FlatMemory::new(0, 0x10);
        state.set_gpr(4, (-7_i32) as u32);
        state.set_gpr(5, 2);
        // div $4, $5
        run(&mut state, &mut bus, 0x0085_001A);
        assert_eq!(state.lo() as i32, -3);
        assert_eq!(state.hi() as i32, -1);

        state.set_gpr(5, 0);
        // divu $4, $5
        run(&mut state, &mut bus, 0x0085_001B);
        assert_eq!(state.lo(), u32::MAX);
        assert_eq!(state.hi(), (-7_i32) as u32);
    }

    #[test]
    fn bit_counting_and_extension() {
        let mut state = CpuState::default();
        let mut bus = FlatMemory::new(0, 0x10);
        state.set_gpr(4, 0x0000_F080);
        // clz $2, $4
        run(&mut state, &mut bus, 0x0080_1016);
        assert_eq!(state.gpr(2), 16);
        // seb $2, $4
        run(&mut state, &mut bus, 0x7C04_1420);
        assert_eq!(state.gpr(2), 0xFFFF_FF80);
        // seh $2, $4
        run(&mut state, &mut bus, 0x7C04_1620);
        assert_eq!(state.gpr(2), 0xFFFF_F080);
    }

    #[test]
    fn conditional_moves() {
        let mut state = CpuState::default();
        let mut bus = FlatMemory::new(0, 0x10);
        state.set_gpr(4, 9);
        // movz $2, $4, $0
        run(&mut state, &mut bus, 0x0080_100A);
        assert_eq!(state.gpr(2), 9);
        // movn $3, $4, $0
        run(&mut state, &mut bus, 0x0080_180B);
        assert_eq!(state.gpr(3), 0);
    }

    #[test]
    fn syscall_and_break_change_core_state() {
        let mut state = CpuState::default();
        let mut bus = FlatMemory::new(0, 0x10);
        run(&mut state, &mut bus, 0x0000_000C);
        assert_eq!(state.core_state(), CoreState::Stopping);
        run(&mut state, &mut bus, 0x0000_000D);
        assert_eq!(state.core_state(), CoreState::Halted);
    }
}
