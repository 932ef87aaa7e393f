//! The environment generated code runs against, and the functions it calls back into.

use crate::{interpreter::InterpretFn, state::CpuState};
use log::warn;

mod bus;

pub use bus::{Bus, BusError, BusResult, FastRegion, FlatMemory, PhysicalAddress};

/// Signatures of the helpers generated code calls, for taking their addresses.
pub(crate) type ReadFn = extern "sysv64" fn(&mut Environment, u32) -> u32;
pub(crate) type WriteFn = extern "sysv64" fn(&mut Environment, u32, u32);
#[allow(improper_ctypes_definitions)]
pub(crate) type FallbackFn = extern "sysv64" fn(&mut Environment, u32, InterpretFn);

/// Everything generated code can reach through the context register.
///
/// The guest state comes first so its words sit at fixed offsets from the context pointer. Always kept
/// boxed, since generated code holds on to its address.
#[repr(C)]
pub struct Environment {
    pub state: CpuState,
    pub bus: Box<dyn Bus>,
}

impl Environment {
    pub fn new(bus: Box<dyn Bus>) -> Box<Self> {
        Box::new(Self {
            state: CpuState::default(),
            bus,
        })
    }

    /*
        Runtime functions. These are not meant to be called directly, but rather by generated code.
        Loads return the value already extended to 32 bits.
    */

    pub(crate) extern "sysv64" fn read_u8(&mut self, addr: u32) -> u32 {
        self.bus.read_u8(addr).map_or_else(unmapped, u32::from)
    }

    pub(crate) extern "sysv64" fn read_s8(&mut self, addr: u32) -> u32 {
        self.bus
            .read_u8(addr)
            .map_or_else(unmapped, |value| value as i8 as i32 as u32)
    }

    pub(crate) extern "sysv64" fn read_u16(&mut self, addr: u32) -> u32 {
        self.bus.read_u16(addr).map_or_else(unmapped, u32::from)
    }

    pub(crate) extern "sysv64" fn read_s16(&mut self, addr: u32) -> u32 {
        self.bus
            .read_u16(addr)
            .map_or_else(unmapped, |value| value as i16 as i32 as u32)
    }

    pub(crate) extern "sysv64" fn read_u32(&mut self, addr: u32) -> u32 {
        self.bus.read_u32(addr).unwrap_or_else(unmapped)
    }

    pub(crate) extern "sysv64" fn write_u8(&mut self, addr: u32, value: u32) {
        if let Err(err) = self.bus.write_u8(addr, value as u8) {
            unmapped(err);
        }
    }

    pub(crate) extern "sysv64" fn write_u16(&mut self, addr: u32, value: u32) {
        if let Err(err) = self.bus.write_u16(addr, value as u16) {
            unmapped(err);
        }
    }

    pub(crate) extern "sysv64" fn write_u32(&mut self, addr: u32, value: u32) {
        if let Err(err) = self.bus.write_u32(addr, value) {
            unmapped(err);
        }
    }

    /// Runs a single instruction through the interpreter.
    #[allow(improper_ctypes_definitions)]
    pub(crate) extern "sysv64" fn call_fallback(&mut self, raw: u32, func: InterpretFn) {
        func(&mut self.state, self.bus.as_mut(), raw);
    }
}

/// Reads from unmapped memory return zero, writes are dropped.
pub(crate) fn unmapped(err: BusError) -> u32 {
    warn!("guest memory access failed: {err}");
    0
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
