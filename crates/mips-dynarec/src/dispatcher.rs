//! The permanently resident stubs every block exits through, regenerated after each cache clear.
//!
//! Generated code never returns to the host on its own. Blocks leave through one of the stubs below,
//! each of which tells the host side dispatcher why by returning an [`ExitReason`].

use crate::{
    emitter::{Cond, Emitter},
    state::{offset_of, CORE_STATE},
};
use strum::FromRepr;

/// Why generated code returned to the host, passed back in the scratch register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u32)]
pub enum ExitReason {
    /// Continue at the guest PC, compiling it if needed.
    Dispatch = 0,
    /// The core state left `Running`, for example because a syscall asked to stop.
    CoreState = 1,
    DowncountExpired = 2,
    /// Execution reached an instruction that is deliberately not supported.
    HardFault = 3,
}

/// Offsets of the stubs within the code arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stubs {
    /// `extern "sysv64" fn(env, membase, entry) -> u32`.
    pub enter: usize,
    pub exit: usize,
    /// Indirect dispatch, the guest PC has already been written.
    pub dispatcher: usize,
    /// Indirect dispatch that first checks whether the core should stop.
    pub dispatcher_check_core_state: usize,
    pub outer_loop: usize,
    pub hard_fault: usize,
}

const STUB_ALIGNMENT: usize = 16;

fn return_with<E: Emitter>(emit: &mut E, reason: ExitReason, exit: usize) {
    emit.mov_imm(E::SCRATCH, reason as u32);
    emit.jump_to(exit);
}

/// Emits the stubs at the current arena offset. The caller checks the arena for overflow.
pub fn generate<E: Emitter>(emit: &mut E) -> Stubs {
    emit.align(STUB_ALIGNMENT);
    let exit = emit.offset();
    emit.leave_host();

    emit.align(STUB_ALIGNMENT);
    let enter = emit.offset();
    emit.enter_host();

    emit.align(STUB_ALIGNMENT);
    let dispatcher_check_core_state = emit.offset();
    emit.compare_state(offset_of(CORE_STATE), 0);
    let core_exit = emit.jump_if(Cond::NotEqual);

    let dispatcher = emit.offset();
    return_with(emit, ExitReason::Dispatch, exit);

    emit.bind(core_exit);
    return_with(emit, ExitReason::CoreState, exit);

    let outer_loop = emit.offset();
    return_with(emit, ExitReason::DowncountExpired, exit);

    let hard_fault = emit.offset();
    return_with(emit, ExitReason::HardFault, exit);

    emit.align(STUB_ALIGNMENT);
    Stubs {
        enter,
        exit,
        dispatcher,
        dispatcher_check_core_state,
        outer_loop,
        hard_fault,
    }
}
