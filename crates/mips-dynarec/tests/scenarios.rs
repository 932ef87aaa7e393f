//! End to end runs of small guest programs through the recompiler.

#![cfg(all(target_arch = "x86_64", unix))]

use mips_dynarec::{
    Bus, BusError, BusResult, CoreState, CpuState, FastRegion, FlatMemory, Jit, JitError,
    JitOptions, PhysicalAddress, RunExit,
};
use std::{cell::Cell, ptr::NonNull, rc::Rc};

const NOP: u32 = 0;
const BREAK: u32 = 0x0000_000D;

fn itype(op: u32, rs: u32, rt: u32, imm: u16) -> u32 {
    (op << 26) | (rs << 21) | (rt << 16) | u32::from(imm)
}

fn rtype(funct: u32, rs: u32, rt: u32, rd: u32) -> u32 {
    (rs << 21) | (rt << 16) | (rd << 11) | funct
}

fn addiu(rt: u32, rs: u32, imm: i16) -> u32 {
    itype(0x09, rs, rt, imm as u16)
}

fn ori(rt: u32, rs: u32, imm: u16) -> u32 {
    itype(0x0D, rs, rt, imm)
}

fn lui(rt: u32, imm: u16) -> u32 {
    itype(0x0F, 0, rt, imm)
}

fn lw(rt: u32, offset: i16, base: u32) -> u32 {
    itype(0x23, base, rt, offset as u16)
}

fn lb(rt: u32, offset: i16, base: u32) -> u32 {
    itype(0x20, base, rt, offset as u16)
}

fn lhu(rt: u32, offset: i16, base: u32) -> u32 {
    itype(0x25, base, rt, offset as u16)
}

fn sw(rt: u32, offset: i16, base: u32) -> u32 {
    itype(0x2B, base, rt, offset as u16)
}

fn sb(rt: u32, offset: i16, base: u32) -> u32 {
    itype(0x28, base, rt, offset as u16)
}

fn beq(rs: u32, rt: u32, offset: i16) -> u32 {
    itype(0x04, rs, rt, offset as u16)
}

fn bne(rs: u32, rt: u32, offset: i16) -> u32 {
    itype(0x05, rs, rt, offset as u16)
}

fn beql(rs: u32, rt: u32, offset: i16) -> u32 {
    itype(0x14, rs, rt, offset as u16)
}

fn bltzal(rs: u32, offset: i16) -> u32 {
    itype(0x01, rs, 0x10, offset as u16)
}

fn j(target: u32) -> u32 {
    (0x02 << 26) | ((target >> 2) & 0x03FF_FFFF)
}

fn jal(target: u32) -> u32 {
    (0x03 << 26) | ((target >> 2) & 0x03FF_FFFF)
}

fn jr(rs: u32) -> u32 {
    rtype(0x08, rs, 0, 0)
}

fn addu(rd: u32, rs: u32, rt: u32) -> u32 {
    rtype(0x21, rs, rt, rd)
}

fn syscall(code: u32) -> u32 {
    (code << 6) | 0x0C
}

fn options() -> JitOptions {
    JitOptions {
        code_size: 0x40000,
        reserved_code_margin: 0x1000,
        ..Default::default()
    }
}

fn jit(base: PhysicalAddress, program: &[(u32, &[u32])], options: JitOptions) -> Jit {
    let mut memory = FlatMemory::new(base, 0x10000);
    for (addr, words) in program {
        memory.load_words(*addr, words).unwrap();
    }
    let mut jit = Jit::new(Box::new(memory), options).unwrap();
    jit.state_mut().set_pc(program[0].0);
    jit
}

fn read_u32(jit: &mut Jit, addr: u32) -> u32 {
    jit.bus_mut().read_u32(addr).unwrap()
}

/// Where the patchable jump of an exit currently points, as an arena offset.
fn exit_destination(jit: &Jit, patch_offset: usize) -> usize {
    let bytes = jit.code(patch_offset, 5);
    assert_eq!(bytes[0], 0xE9);
    let rel = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
    (patch_offset as i64 + 5 + i64::from(rel)) as usize
}

#[test]
fn straight_line_store() {
    let program = [ori(4, 0, 0x1234), sw(4, 0x100, 0)];
    let mut jit = jit(
        0,
        &[(0x1000, &program)],
        JitOptions {
            max_block_instructions: 2,
            ..options()
        },
    );

    assert_eq!(jit.run_loop_until(1).unwrap(), RunExit::DowncountExpired);
    assert_eq!(read_u32(&mut jit, 0x100), 0x1234);
    assert_eq!(jit.state().gpr(4), 0x1234);
    assert_eq!(jit.state().downcount(), -1);
    assert_eq!(jit.state().pc(), 0x1008);
}

/// `j 0x2000` into a block that branches to itself forever.
const JUMP_TO_LOOP: [(u32, &[u32]); 2] = [
    (0x1000, &[0x0800_0800, NOP]),
    (0x2000, &[0x1000_FFFF, NOP]),
];

#[test]
fn unlinked_exits_stay_on_the_dispatcher() {
    let mut jit = jit(
        0,
        &JUMP_TO_LOOP,
        JitOptions {
            enable_block_link: false,
            ..options()
        },
    );

    jit.compile(0x1000).unwrap();
    let exit = jit.block_at(0x1000).unwrap().exits[0];
    assert_eq!(exit.target, 0x2000);
    let before = jit.code(exit.patch_offset, 5).to_vec();

    jit.compile(0x2000).unwrap();
    let exit = jit.block_at(0x1000).unwrap().exits[0];
    assert!(!exit.linked);
    assert_eq!(jit.code(exit.patch_offset, 5), before);

    assert_eq!(jit.run_loop_until(10).unwrap(), RunExit::DowncountExpired);
    assert_eq!(jit.state().pc(), 0x2000);
    assert_eq!(jit.state().downcount(), -2);
}

#[test]
fn linked_exits_jump_to_the_successor() {
    let mut jit = jit(0, &JUMP_TO_LOOP, options());
    jit.compile(0x1000).unwrap();
    jit.compile(0x2000).unwrap();

    let target = jit.block_at(0x2000).unwrap().clone();
    let exit = jit.block_at(0x1000).unwrap().exits[0];
    assert!(exit.linked);
    assert_eq!(exit_destination(&jit, exit.patch_offset), target.normal_entry);

    // The self loop is linked as soon as it is compiled.
    assert!(target.exits.iter().all(|exit| exit.linked));
    assert_eq!(exit_destination(&jit, target.exits[0].patch_offset), target.normal_entry);
}

#[test]
fn linking_does_not_change_results() {
    let run = |enable_block_link| {
        let mut jit = jit(
            0,
            &JUMP_TO_LOOP,
            JitOptions {
                enable_block_link,
                ..options()
            },
        );
        let exit = jit.run_loop_until(11).unwrap();
        (exit, jit.state().clone())
    };

    let (linked_exit, linked) = run(true);
    let (unlinked_exit, unlinked) = run(false);
    assert_eq!(linked_exit, RunExit::DowncountExpired);
    assert_eq!(linked_exit, unlinked_exit);
    assert_eq!(linked, unlinked);
    assert_eq!(linked.downcount(), -1);
}

/// Counts `v0` up to `v1`, then stops.
const COUNT_LOOP: [u32; 5] = [
    0x2402_0000, // addiu v0, zero, 0
    0x2442_0001, // addiu v0, v0, 1
    0x1443_FFFE, // bne v0, v1, -2
    NOP,
    BREAK,
];

#[test]
fn downcount_charges_every_instruction() {
    let mut jit = jit(0, &[(0x1000, &COUNT_LOOP)], options());
    jit.state_mut().set_gpr(3, 5);

    let exit = jit.run_loop_until(1000).unwrap();
    assert_eq!(exit, RunExit::CoreStateChanged(CoreState::Halted));
    assert_eq!(jit.state().gpr(2), 5);
    assert_eq!(jit.state().pc(), 0x1014);
    // One pass through the entry block, four more through the loop, then the break.
    assert_eq!(jit.state().downcount(), 1000 - (4 + 4 * 3 + 1));
}

#[test]
fn budget_stops_long_loops() {
    let mut jit = jit(0, &[(0x1000, &COUNT_LOOP)], options());
    jit.state_mut().set_gpr(3, 1000);

    assert_eq!(jit.run_loop_until(10).unwrap(), RunExit::DowncountExpired);
    assert!(jit.state().downcount() < 0);
    assert_eq!(jit.state().core_state(), CoreState::Running);
    // 4 cycles for the entry block, then 3 per iteration until the downcount drops below zero.
    assert_eq!(jit.state().gpr(2), 4);
    assert_eq!(jit.state().downcount(), -3);
    assert_eq!(jit.state().pc(), 0x1004);

    // Resuming picks up where the budget ran out.
    assert_eq!(jit.run_loop_until(3).unwrap(), RunExit::DowncountExpired);
    assert_eq!(jit.state().gpr(2), 6);
}

#[test]
fn clearing_the_cache_is_safe() {
    let program = [ori(2, 0, 1), BREAK];
    let mut jit = jit(0, &[(0x1000, &program)], options());
    let restart = |jit: &mut Jit| {
        let state = jit.state_mut();
        state.set_pc(0x1000);
        state.set_core_state(CoreState::Running);
    };

    jit.run_loop_until(100).unwrap();
    assert_eq!(jit.state().gpr(2), 1);
    assert_eq!(jit.blocks().len(), 1);

    // Stale until invalidated.
    jit.bus_mut().write_u32(0x1000, ori(2, 0, 2)).unwrap();
    restart(&mut jit);
    jit.run_loop_until(100).unwrap();
    assert_eq!(jit.state().gpr(2), 1);

    jit.invalidate_cache_at(0x1000, 4);
    assert!(jit.blocks().is_empty());
    restart(&mut jit);
    jit.run_loop_until(100).unwrap();
    assert_eq!(jit.state().gpr(2), 2);

    jit.clear_cache();
    restart(&mut jit);
    assert_eq!(
        jit.run_loop_until(100).unwrap(),
        RunExit::CoreStateChanged(CoreState::Halted)
    );
    assert_eq!(jit.state().gpr(2), 2);
}

#[test]
fn full_block_table_is_recycled() {
    let mut jit = jit(
        0,
        &[(0x1000, &COUNT_LOOP)],
        JitOptions {
            max_blocks: 1,
            ..options()
        },
    );
    jit.state_mut().set_gpr(3, 5);

    let exit = jit.run_loop_until(1000).unwrap();
    assert_eq!(exit, RunExit::CoreStateChanged(CoreState::Halted));
    assert_eq!(jit.state().gpr(2), 5);
    assert_eq!(jit.blocks().len(), 1);
}

/// `beq`-style branch at 0x1000 to 0x1010, with `addiu a2, zero, 7` in the delay slot.
fn branch_program(branch: u32) -> [u32; 6] {
    [
        branch,
        addiu(6, 0, 7),
        addiu(7, 0, 1), // not taken
        BREAK,
        addiu(8, 0, 1), // taken
        BREAK,
    ]
}

fn run_branch(branch: u32, setup: impl FnOnce(&mut CpuState)) -> CpuState {
    let program = branch_program(branch);
    let mut jit = jit(0, &[(0x1000, &program)], options());
    setup(jit.state_mut());
    let exit = jit.run_loop_until(100).unwrap();
    assert_eq!(exit, RunExit::CoreStateChanged(CoreState::Halted));
    jit.state().clone()
}

#[test]
fn conditional_branches() {
    let taken = run_branch(beq(4, 5, 3), |state| {
        state.set_gpr(4, 3);
        state.set_gpr(5, 3);
    });
    assert_eq!((taken.gpr(6), taken.gpr(7), taken.gpr(8)), (7, 0, 1));

    let skipped = run_branch(beq(4, 5, 3), |state| {
        state.set_gpr(4, 1);
        state.set_gpr(5, 2);
    });
    assert_eq!((skipped.gpr(6), skipped.gpr(7), skipped.gpr(8)), (7, 1, 0));

    // Both operands known while compiling.
    let folded = run_branch(bne(0, 0, 3), |_| {});
    assert_eq!((folded.gpr(6), folded.gpr(7), folded.gpr(8)), (7, 1, 0));
}

#[test]
fn likely_branches_skip_the_delay_slot() {
    let taken = run_branch(beql(4, 0, 3), |_| {});
    assert_eq!((taken.gpr(6), taken.gpr(8)), (7, 1));

    let skipped = run_branch(beql(4, 0, 3), |state| state.set_gpr(4, 1));
    assert_eq!((skipped.gpr(6), skipped.gpr(7)), (0, 1));
}

#[test]
fn delay_slot_overwriting_an_operand() {
    // bne a0, zero with `addiu a0, zero, 0` in the delay slot: the old value decides.
    let mut program = branch_program(bne(4, 0, 3));
    program[1] = addiu(4, 0, 0);
    let mut jit = jit(0, &[(0x1000, &program)], options());
    jit.state_mut().set_gpr(4, 1);

    jit.run_loop_until(100).unwrap();
    assert_eq!(jit.state().gpr(4), 0);
    assert_eq!(jit.state().gpr(8), 1);
}

#[test]
fn linking_branch() {
    let taken = run_branch(bltzal(4, 3), |state| state.set_gpr(4, u32::MAX));
    assert_eq!((taken.gpr(31), taken.gpr(8)), (0x1008, 1));

    // The return address is written even when the branch is not taken.
    let skipped = run_branch(bltzal(4, 3), |state| state.set_gpr(4, 1));
    assert_eq!((skipped.gpr(31), skipped.gpr(7)), (0x1008, 1));
}

#[test]
fn call_and_return() {
    let main = [jal(0x1100), NOP, BREAK];
    let function = [addiu(2, 0, 9), jr(31), addu(3, 2, 2)];
    let mut jit = jit(0, &[(0x1000, &main), (0x1100, &function)], options());

    let exit = jit.run_loop_until(100).unwrap();
    assert_eq!(exit, RunExit::CoreStateChanged(CoreState::Halted));
    assert_eq!(jit.state().gpr(2), 9);
    assert_eq!(jit.state().gpr(3), 18);
    assert_eq!(jit.state().gpr(31), 0x1008);
    assert_eq!(jit.state().pc(), 0x100C);
}

#[test]
fn rare_instructions_use_the_interpreter() {
    let program = [
        0x0085_001A, // div a0, a1
        0x0000_1012, // mflo v0
        0x0000_1810, // mfhi v1
        BREAK,
    ];
    let mut jit = jit(0, &[(0x1000, &program)], options());
    jit.state_mut().set_gpr(4, 17);
    jit.state_mut().set_gpr(5, 5);

    jit.run_loop_until(100).unwrap();
    assert_eq!((jit.state().gpr(2), jit.state().gpr(3)), (3, 2));
    assert_eq!(jit.state().downcount(), 100 - (36 + 3));
}

#[test]
fn unhandled_syscall_stops() {
    let program = [syscall(0), addiu(2, 0, 1), BREAK];
    let mut jit = jit(0, &[(0x1000, &program)], options());

    let exit = jit.run_loop_until(100).unwrap();
    assert_eq!(exit, RunExit::CoreStateChanged(CoreState::Stopping));
    assert_eq!(jit.state().pc(), 0x1004);
    assert_eq!(jit.state().gpr(2), 0);

    jit.state_mut().set_core_state(CoreState::Running);
    let exit = jit.run_loop_until(100).unwrap();
    assert_eq!(exit, RunExit::CoreStateChanged(CoreState::Halted));
    assert_eq!(jit.state().gpr(2), 1);
}

/// Answers every syscall by writing its code plus one to `v0`.
struct Echo(FlatMemory);

impl Bus for Echo {
    fn read_u8(&mut self, addr: PhysicalAddress) -> BusResult<u8> {
        self.0.read_u8(addr)
    }

    fn read_u16(&mut self, addr: PhysicalAddress) -> BusResult<u16> {
        self.0.read_u16(addr)
    }

    fn read_u32(&mut self, addr: PhysicalAddress) -> BusResult<u32> {
        self.0.read_u32(addr)
    }

    fn write_u8(&mut self, addr: PhysicalAddress, value: u8) -> BusResult<()> {
        self.0.write_u8(addr, value)
    }

    fn write_u16(&mut self, addr: PhysicalAddress, value: u16) -> BusResult<()> {
        self.0.write_u16(addr, value)
    }

    fn write_u32(&mut self, addr: PhysicalAddress, value: u32) -> BusResult<()> {
        self.0.write_u32(addr, value)
    }

    fn fast_regions(&mut self) -> Vec<FastRegion> {
        self.0.fast_regions()
    }

    fn syscall(&mut self, state: &mut CpuState, code: u32) {
        state.set_gpr(2, code + 1);
    }
}

#[test]
fn syscall_handler_sees_the_guest_state() {
    let mut memory = FlatMemory::new(0, 0x10000);
    memory
        .load_words(0x1000, &[syscall(0x42), addu(3, 2, 0), BREAK])
        .unwrap();
    let mut jit = Jit::new(Box::new(Echo(memory)), options()).unwrap();
    jit.state_mut().set_pc(0x1000);

    let exit = jit.run_loop_until(100).unwrap();
    assert_eq!(exit, RunExit::CoreStateChanged(CoreState::Halted));
    assert_eq!(jit.state().gpr(2), 0x43);
    assert_eq!(jit.state().gpr(3), 0x43);
}

#[test]
fn disabled_instructions_fault() {
    // lwl v0, 0(a0)
    let mut jit = jit(0, &[(0x1000, &[addiu(2, 0, 1), 0x8882_0000])], options());
    match jit.run_loop_until(100) {
        Err(JitError::HardFault { pc, raw }) => assert_eq!((pc, raw), (0x1004, 0x8882_0000)),
        other => panic!("expected a hard fault, got {other:?}"),
    }
    // Everything before the fault still ran.
    assert_eq!(jit.state().gpr(2), 1);
}

#[test]
fn jump_in_delay_slot_faults() {
    let mut jit = jit(0, &[(0x1000, &[j(0x2000), j(0x3000)])], options());
    match jit.run_loop_until(100) {
        Err(JitError::HardFault { pc, .. }) => assert_eq!(pc, 0x1004),
        other => panic!("expected a hard fault, got {other:?}"),
    }
}

fn memory_program() -> [u32; 10] {
    [
        sw(5, 0, 4),
        lw(6, 0, 4),
        sb(9, 4, 4),
        lb(10, 4, 4),
        lhu(11, 4, 4),
        lw(12, 0, 7),
        sw(5, 0, 7),
        BREAK,
        NOP,
        NOP,
    ]
}

fn run_memory_program(base: u32, fast_memory: bool) -> Jit {
    let program = memory_program();
    let mut jit = jit(
        base,
        &[(base + 0x1000, &program)],
        JitOptions {
            fast_memory,
            ..options()
        },
    );
    let state = jit.state_mut();
    state.set_gpr(4, base + 0x200);
    state.set_gpr(5, 0xCAFE_F00D);
    state.set_gpr(7, base + 0x10200);
    state.set_gpr(9, 0x80);
    assert_eq!(
        jit.run_loop_until(100).unwrap(),
        RunExit::CoreStateChanged(CoreState::Halted)
    );
    jit
}

#[test]
fn checked_memory_access() {
    let mut jit = run_memory_program(0, false);
    assert_eq!(read_u32(&mut jit, 0x200), 0xCAFE_F00D);
    assert_eq!(jit.state().gpr(6), 0xCAFE_F00D);
    assert_eq!(jit.state().gpr(10), 0xFFFF_FF80);
    assert_eq!(jit.state().gpr(11), 0x80);
    // Outside memory: reads give zero and writes are dropped.
    assert_eq!(jit.state().gpr(12), 0);
}

#[test]
fn checked_memory_access_at_an_offset() {
    let base = 0x8000_0000;
    let mut jit = run_memory_program(base, false);
    assert_eq!(read_u32(&mut jit, base + 0x200), 0xCAFE_F00D);
    assert_eq!(jit.state().gpr(6), 0xCAFE_F00D);
    assert_eq!(jit.state().gpr(10), 0xFFFF_FF80);
    assert_eq!(jit.state().gpr(12), 0);
}

#[test]
fn masked_memory_access_wraps() {
    let mut jit = run_memory_program(0, true);
    assert_eq!(jit.state().gpr(6), 0xCAFE_F00D);
    assert_eq!(jit.state().gpr(10), 0xFFFF_FF80);
    // 0x10200 wraps around to 0x200.
    assert_eq!(jit.state().gpr(12), 0xCAFE_F00D);
}

#[test]
fn invalid_options_are_rejected() {
    let memory = FlatMemory::new(0, 0x3000);
    let err = Jit::new(
        Box::new(memory),
        JitOptions {
            fast_memory: true,
            ..options()
        },
    )
    .unwrap_err();
    assert!(matches!(err, JitError::InvalidConfig(_)));
}

const ADDS_PER_BLOCK: usize = 40;

/// Blocks at 0x1000, 0x1100, ... that each add `ADDS_PER_BLOCK` to `v0` and jump to the next one. The
/// last one halts instead.
fn block_chain(blocks: u32, options: JitOptions) -> Jit {
    let mut memory = FlatMemory::new(0, 0x10000);
    for i in 0..blocks {
        let addr = 0x1000 + i * 0x100;
        let mut words = vec![addiu(2, 2, 1); ADDS_PER_BLOCK];
        if i + 1 == blocks {
            words.push(BREAK);
        } else {
            words.extend([j(addr + 0x100), NOP]);
        }
        memory.load_words(addr, &words).unwrap();
    }
    let mut jit = Jit::new(Box::new(memory), options).unwrap();
    jit.state_mut().set_pc(0x1000);
    jit
}

#[test]
fn reserved_margin_clears_before_compiling() {
    // Room for the stubs and a few blocks, the cache is cleared once less than the margin is left.
    let mut jit = block_chain(
        6,
        JitOptions {
            code_size: 0x400,
            reserved_code_margin: 0x180,
            ..options()
        },
    );

    assert_eq!(
        jit.run_loop_until(10_000).unwrap(),
        RunExit::CoreStateChanged(CoreState::Halted)
    );
    assert_eq!(jit.state().gpr(2), 6 * ADDS_PER_BLOCK as u32);
    assert!(!jit.blocks().is_empty());
    assert!(jit.blocks().len() < 6);
    assert!(jit.block_at(0x1500).is_some());
    assert!(jit.block_at(0x1000).is_none());
}

#[test]
fn block_that_does_not_fit_is_retried() {
    // One block fits next to the stubs but two do not, while the margin never triggers a clear. Every
    // block after the first one runs out of space halfway and gets compiled again into an empty cache.
    let mut jit = block_chain(
        4,
        JitOptions {
            code_size: 400,
            reserved_code_margin: 1,
            ..options()
        },
    );

    assert_eq!(
        jit.run_loop_until(10_000).unwrap(),
        RunExit::CoreStateChanged(CoreState::Halted)
    );
    assert_eq!(jit.state().gpr(2), 4 * ADDS_PER_BLOCK as u32);
    assert_eq!(jit.blocks().len(), 1);
    assert_eq!(jit.blocks()[0].start, 0x1300);
    assert_eq!(jit.state().pc(), 0x1300 + 4 * ADDS_PER_BLOCK as u32 + 4);
}

/// Anonymous memory starting at guest address zero, only backed by pages once they are touched.
struct LargeMemory {
    ptr: NonNull<u8>,
    len: u32,
}

impl LargeMemory {
    fn new(len: u32) -> Self {
        // SAFETY: anonymous private mapping.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        assert_ne!(ptr, libc::MAP_FAILED);
        Self {
            ptr: NonNull::new(ptr.cast()).unwrap(),
            len,
        }
    }

    fn bytes<const N: usize>(&mut self, addr: PhysicalAddress) -> BusResult<&mut [u8; N]> {
        if u64::from(addr) + N as u64 > u64::from(self.len) {
            return Err(BusError::AddressNotMapped { address: addr });
        }
        // SAFETY: bounds checked against the mapping.
        Ok(unsafe { &mut *self.ptr.as_ptr().add(addr as usize).cast::<[u8; N]>() })
    }
}

impl Drop for LargeMemory {
    fn drop(&mut self) {
        // SAFETY: mapped in `new` with this size.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len as usize);
        }
    }
}

impl Bus for LargeMemory {
    fn read_u8(&mut self, addr: PhysicalAddress) -> BusResult<u8> {
        self.bytes::<1>(addr).map(|bytes| bytes[0])
    }

    fn read_u16(&mut self, addr: PhysicalAddress) -> BusResult<u16> {
        self.bytes(addr).map(|bytes| u16::from_le_bytes(*bytes))
    }

    fn read_u32(&mut self, addr: PhysicalAddress) -> BusResult<u32> {
        self.bytes(addr).map(|bytes| u32::from_le_bytes(*bytes))
    }

    fn write_u8(&mut self, addr: PhysicalAddress, value: u8) -> BusResult<()> {
        *self.bytes(addr)? = [value];
        Ok(())
    }

    fn write_u16(&mut self, addr: PhysicalAddress, value: u16) -> BusResult<()> {
        *self.bytes(addr)? = value.to_le_bytes();
        Ok(())
    }

    fn write_u32(&mut self, addr: PhysicalAddress, value: u32) -> BusResult<()> {
        *self.bytes(addr)? = value.to_le_bytes();
        Ok(())
    }

    fn fast_regions(&mut self) -> Vec<FastRegion> {
        vec![FastRegion {
            start: 0,
            len: self.len,
            ptr: self.ptr,
        }]
    }
}

#[test]
fn constant_addresses_past_two_gigabytes() {
    let mut memory = LargeMemory::new(0x9000_0000);
    let program = [
        lui(4, 0x8000),
        ori(2, 0, 0x55),
        sw(2, 0x10, 4),
        lw(3, 0x10, 4),
        lw(9, 0x20, 4),
        sw(2, 0, 6),
        lw(8, 0, 6),
        BREAK,
    ];
    for (i, word) in program.iter().enumerate() {
        memory.write_u32(0x1000 + 4 * i as u32, *word).unwrap();
    }
    memory.write_u32(0x8000_0020, 0xDEAD_BEEF).unwrap();

    let mut jit = Jit::new(Box::new(memory), options()).unwrap();
    let state = jit.state_mut();
    state.set_pc(0x1000);
    state.set_gpr(6, 0x8FFF_FFF0);
    assert_eq!(
        jit.run_loop_until(100).unwrap(),
        RunExit::CoreStateChanged(CoreState::Halted)
    );

    assert_eq!(read_u32(&mut jit, 0x8000_0010), 0x55);
    assert_eq!(read_u32(&mut jit, 0x8FFF_FFF0), 0x55);
    assert_eq!(jit.state().gpr(3), 0x55);
    assert_eq!(jit.state().gpr(8), 0x55);
    assert_eq!(jit.state().gpr(9), 0xDEAD_BEEF);
    assert_eq!(read_u32(&mut jit, 0x10), 0);
}

const SCRATCHPAD: PhysicalAddress = 0x0010_0000;
const SCRATCHPAD_SIZE: usize = 0x4000;

/// Main memory at zero plus a scratchpad, both handed out as fast regions. Counts the accesses to the
/// scratchpad that go through the bus.
struct WithScratchpad {
    main: FlatMemory,
    scratchpad: FlatMemory,
    scratchpad_accesses: Rc<Cell<u32>>,
}

impl WithScratchpad {
    fn route(&mut self, addr: PhysicalAddress) -> &mut FlatMemory {
        if (SCRATCHPAD..SCRATCHPAD + SCRATCHPAD_SIZE as u32).contains(&addr) {
            self.scratchpad_accesses.set(self.scratchpad_accesses.get() + 1);
            &mut self.scratchpad
        } else {
            &mut self.main
        }
    }
}

impl Bus for WithScratchpad {
    fn read_u8(&mut self, addr: PhysicalAddress) -> BusResult<u8> {
        self.route(addr).read_u8(addr)
    }

    fn read_u16(&mut self, addr: PhysicalAddress) -> BusResult<u16> {
        self.route(addr).read_u16(addr)
    }

    fn read_u32(&mut self, addr: PhysicalAddress) -> BusResult<u32> {
        self.route(addr).read_u32(addr)
    }

    fn write_u8(&mut self, addr: PhysicalAddress, value: u8) -> BusResult<()> {
        self.route(addr).write_u8(addr, value)
    }

    fn write_u16(&mut self, addr: PhysicalAddress, value: u16) -> BusResult<()> {
        self.route(addr).write_u16(addr, value)
    }

    fn write_u32(&mut self, addr: PhysicalAddress, value: u32) -> BusResult<()> {
        self.route(addr).write_u32(addr, value)
    }

    fn fast_regions(&mut self) -> Vec<FastRegion> {
        let mut regions = self.main.fast_regions();
        regions.extend(self.scratchpad.fast_regions());
        regions
    }
}

#[test]
fn scratchpad_is_a_fast_region() {
    let program = [
        lui(4, 0x0010),
        ori(2, 0, 0x77),
        sw(2, 0x10, 4),
        sw(2, 0, 6),
        lw(3, 0x10, 4),
        lhu(8, 0, 6),
        sw(2, 0, 5),
        lw(10, 0, 5),
        lw(9, 0, 7),
        BREAK,
    ];
    let mut main = FlatMemory::new(0, 0x10000);
    main.load_words(0x1000, &program).unwrap();
    let accesses = Rc::new(Cell::new(0));
    let bus = WithScratchpad {
        main,
        scratchpad: FlatMemory::new(SCRATCHPAD, SCRATCHPAD_SIZE),
        scratchpad_accesses: Rc::clone(&accesses),
    };

    let mut jit = Jit::new(Box::new(bus), options()).unwrap();
    let state = jit.state_mut();
    state.set_pc(0x1000);
    state.set_gpr(5, 0x200);
    state.set_gpr(6, SCRATCHPAD + 0x20);
    state.set_gpr(7, 0x0020_0000);
    assert_eq!(
        jit.run_loop_until(100).unwrap(),
        RunExit::CoreStateChanged(CoreState::Halted)
    );

    // Neither the constant nor the dynamic accesses went through the bus.
    assert_eq!(accesses.get(), 0);
    assert_eq!(jit.state().gpr(3), 0x77);
    assert_eq!(jit.state().gpr(8), 0x77);
    assert_eq!(jit.state().gpr(10), 0x77);
    // Outside both regions: handled by the bus, which has nothing there.
    assert_eq!(jit.state().gpr(9), 0);
    assert_eq!(read_u32(&mut jit, SCRATCHPAD + 0x10), 0x77);
    assert_eq!(read_u32(&mut jit, SCRATCHPAD + 0x20), 0x77);
    assert_eq!(read_u32(&mut jit, 0x200), 0x77);
}

#[test]
fn overlapping_fast_regions_are_rejected() {
    let bus = WithScratchpad {
        main: FlatMemory::new(0, 0x10000),
        scratchpad: FlatMemory::new(0x8000, SCRATCHPAD_SIZE),
        scratchpad_accesses: Rc::default(),
    };
    let err = Jit::new(Box::new(bus), options()).unwrap_err();
    assert!(matches!(err, JitError::InvalidConfig(_)));
}
